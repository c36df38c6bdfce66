// 掉速检测器
//
// 每个监控目标一个实例，按接收顺序消费采样：
// - 维护按秒计的滑动窗口，每次插入都会清理过期采样
// - 在窗口内寻找最长的连续低速序列（不仅是末尾序列）
// - 序列长度达到阈值即告警，冷却期内不再告警
//
// 同一次掉速只告警一次：告警时记录窗口内最新采样的序号，
// 之后只有包含更新采样的序列才有资格再次触发。

use super::clock::Clock;
use super::config::{DetectorConfig, DetectorConfigUpdate};
use chrono::{DateTime, Duration, Utc};
use common::{AlertEvent, Result, Sample};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// 单个采样的检测结果
#[derive(Debug, Clone, PartialEq)]
pub enum DropResult {
    NotDetected,
    Detected(AlertEvent),
}

impl DropResult {
    pub fn is_detected(&self) -> bool {
        matches!(self, DropResult::Detected(_))
    }

    pub fn into_event(self) -> Option<AlertEvent> {
        match self {
            DropResult::Detected(event) => Some(event),
            DropResult::NotDetected => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    seq: u64,
    sample: Sample,
}

pub struct DropDetector {
    config: DetectorConfig,
    window: VecDeque<WindowEntry>,
    next_seq: u64,
    last_alert_time: Option<DateTime<Utc>>,
    /// 上次告警覆盖到的最新采样序号
    last_alerted_seq: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl DropDetector {
    pub fn with_clock(config: DetectorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            window: VecDeque::new(),
            next_seq: 0,
            last_alert_time: None,
            last_alerted_seq: None,
            clock,
        })
    }

    /// 加入一个采样并评估窗口
    ///
    /// 无效采样返回 `InvalidSample`，窗口保持不变。
    /// 与窗口内已有采样时间戳相同的视为重复投递，直接忽略。
    pub fn add_sample(&mut self, sample: Sample) -> Result<DropResult> {
        sample.validate()?;

        if self
            .window
            .iter()
            .any(|entry| entry.sample.timestamp == sample.timestamp)
        {
            debug!("Ignoring duplicate sample at {}", sample.timestamp);
            return Ok(DropResult::NotDetected);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.window.push_back(WindowEntry { seq, sample });
        self.purge(sample.timestamp);

        Ok(self.evaluate())
    }

    /// 清理早于 `latest - window_seconds` 的采样
    ///
    /// 采样可能乱序到达，所以用 retain 而不是只弹出队首。
    fn purge(&mut self, latest: DateTime<Utc>) {
        let cutoff = i64::try_from(self.config.window_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|window| latest.checked_sub_signed(window));
        // 超出可表示的时间范围时窗口覆盖全部采样
        let Some(cutoff) = cutoff else {
            return;
        };
        let before = self.window.len();
        self.window.retain(|entry| entry.sample.timestamp >= cutoff);
        let purged = before - self.window.len();
        if purged > 0 {
            trace!("Purged {} stale samples older than {}", purged, cutoff);
        }
    }

    fn evaluate(&mut self) -> DropResult {
        if self.window.len() < self.config.duration_threshold {
            return DropResult::NotDetected;
        }

        let now = self.clock.now();
        if let Some(last_alert) = self.last_alert_time {
            let elapsed_ms = (now - last_alert).num_milliseconds();
            let cooldown_ms = i64::try_from(self.config.cooldown_ms).unwrap_or(i64::MAX);
            if elapsed_ms < cooldown_ms {
                trace!(
                    "Drop evaluation suppressed, {}ms into {}ms cooldown",
                    elapsed_ms,
                    self.config.cooldown_ms
                );
                return DropResult::NotDetected;
            }
        }

        let max_run = self.longest_unreported_run();
        if max_run < self.config.duration_threshold {
            return DropResult::NotDetected;
        }

        // 窗口非空（长度已不小于 duration_threshold >= 1）
        let latest = match self.window.back() {
            Some(entry) => *entry,
            None => return DropResult::NotDetected,
        };

        self.last_alert_time = Some(now);
        self.last_alerted_seq = Some(latest.seq);

        info!(
            "Drop detected: {} consecutive measurements below {} Mbps",
            max_run, self.config.threshold
        );

        DropResult::Detected(AlertEvent::new(
            max_run,
            self.config.threshold,
            latest.sample.download,
            now,
        ))
    }

    /// 从新到旧扫描，返回尚未告警过的最长连续低速序列长度
    fn longest_unreported_run(&self) -> usize {
        let mut run = 0usize;
        let mut run_newest_seq = 0u64;
        let mut max_run = 0usize;

        for entry in self.window.iter().rev() {
            if entry.sample.download < self.config.threshold {
                if run == 0 {
                    run_newest_seq = entry.seq;
                }
                run += 1;

                let unreported = self
                    .last_alerted_seq
                    .map_or(true, |alerted| run_newest_seq > alerted);
                if unreported {
                    max_run = max_run.max(run);
                }
            } else {
                run = 0;
            }
        }

        max_run
    }

    /// 合并部分配置，下一次插入时生效，不清空窗口和冷却状态
    ///
    /// 合并结果无效时拒绝整个更新，保留原配置。
    pub fn update_config(&mut self, update: &DetectorConfigUpdate) -> Result<DetectorConfig> {
        let merged = update.merge_into(&self.config);
        merged.validate()?;
        if merged != self.config {
            info!("Detector config updated: {:?} -> {:?}", self.config, merged);
        }
        self.config = merged;
        Ok(merged)
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    /// 当前窗口内容的只读副本
    ///
    /// 按到达顺序而不是时间戳排序。乱序到达时，比最近一次插入更新的采样
    /// 不会被清理（例如依次插入 `[20, 15, 0]` 后窗口仍保留 20）。
    pub fn snapshot(&self) -> Vec<Sample> {
        self.window.iter().map(|entry| entry.sample).collect()
    }

    pub fn last_alert_time(&self) -> Option<DateTime<Utc>> {
        self.last_alert_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::clock::ManualClock;
    use crate::detector::config::MAX_WINDOW_SECONDS;
    use chrono::TimeZone;
    use common::MonitorError;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample_at(secs: i64, download: f64) -> Sample {
        Sample::new(base() + Duration::seconds(secs), download, download * 0.3).unwrap()
    }

    fn detector(config: DetectorConfig) -> (DropDetector, ManualClock) {
        let clock = ManualClock::new(base());
        let detector = DropDetector::with_clock(config, Arc::new(clock.clone())).unwrap();
        (detector, clock)
    }

    fn strict_config() -> DetectorConfig {
        DetectorConfig {
            threshold: 10.0,
            window_seconds: 10,
            duration_threshold: 3,
            cooldown_ms: 0,
        }
    }

    /// 按秒推进时钟喂入一串下行速率，返回每个采样的检测结果
    fn feed(detector: &mut DropDetector, clock: &ManualClock, downloads: &[f64]) -> Vec<DropResult> {
        downloads
            .iter()
            .enumerate()
            .map(|(i, &download)| {
                if i > 0 {
                    clock.advance(Duration::seconds(1));
                }
                detector.add_sample(sample_at(i as i64, download)).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_detects_exactly_at_fourth_sample() {
        let (mut detector, clock) = detector(strict_config());
        let results = feed(&mut detector, &clock, &[20.0, 5.0, 5.0, 5.0, 20.0]);

        let detected: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_detected())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(detected, vec![3]);

        let event = results[3].clone().into_event().unwrap();
        assert!(event.detected);
        assert_eq!(event.consecutive_drops, 3);
        assert_eq!(event.threshold, 10.0);
        assert_eq!(event.current_speed, 5.0);
        assert_eq!(event.timestamp, base() + Duration::seconds(3));
    }

    #[test]
    fn test_window_only_holds_recent_samples() {
        let (mut detector, _clock) = detector(DetectorConfig {
            window_seconds: 5,
            ..strict_config()
        });

        let offsets = [0, 1, 2, 5, 6, 7, 20, 21, 22, 40, 41, 47];
        for &offset in &offsets {
            detector.add_sample(sample_at(offset, 50.0)).unwrap();
            let latest = base() + Duration::seconds(offset);
            let cutoff = latest - Duration::seconds(5);
            let snapshot = detector.snapshot();

            assert!(snapshot.iter().all(|s| s.timestamp >= cutoff));
            assert!(snapshot
                .windows(2)
                .all(|pair| pair[0].timestamp < pair[1].timestamp));
            assert_eq!(snapshot.last().unwrap().timestamp, latest);
        }

        // 长间隔后窗口只剩最新采样
        assert_eq!(detector.snapshot().len(), 1);
    }

    #[test]
    fn test_gap_ages_out_window() {
        let (mut detector, clock) = detector(strict_config());
        feed(&mut detector, &clock, &[5.0, 5.0]);

        // 30 秒后才恢复上报，之前的低速采样已过期
        clock.advance(Duration::seconds(30));
        let result = detector.add_sample(sample_at(31, 5.0)).unwrap();
        assert_eq!(result, DropResult::NotDetected);
        assert_eq!(detector.snapshot().len(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_until_elapsed() {
        let (mut detector, clock) = detector(DetectorConfig {
            threshold: 10.0,
            window_seconds: 60,
            duration_threshold: 2,
            cooldown_ms: 60_000,
        });

        assert!(!detector.add_sample(sample_at(0, 5.0)).unwrap().is_detected());
        clock.advance(Duration::seconds(1));
        let first = detector.add_sample(sample_at(1, 5.0)).unwrap();
        assert!(first.is_detected());
        let alert_time = detector.last_alert_time().unwrap();

        // 冷却期内持续掉速，序列在增长但不告警
        for secs in 2..=60 {
            clock.advance(Duration::seconds(1));
            let result = detector.add_sample(sample_at(secs, 5.0)).unwrap();
            assert!(!result.is_detected(), "unexpected alert at {}s", secs);
        }

        clock.advance(Duration::seconds(1));
        let result = detector.add_sample(sample_at(61, 5.0)).unwrap();
        let event = result.into_event().expect("alert after cooldown");
        assert_eq!(event.timestamp - alert_time, Duration::seconds(60));
        assert_eq!(event.consecutive_drops, 61);
    }

    #[test]
    fn test_recovered_run_still_alerts() {
        // 冷却期内出现并已恢复的掉速，冷却结束后仍在窗口内就会告警
        let (mut detector, clock) = detector(DetectorConfig {
            threshold: 10.0,
            window_seconds: 30,
            duration_threshold: 3,
            cooldown_ms: 10_000,
        });

        // 第一次告警
        let results = feed(&mut detector, &clock, &[5.0, 5.0, 5.0]);
        assert!(results[2].is_detected());

        // 恢复后又掉速三次，再次恢复，全部落在冷却期内
        for (i, download) in [50.0, 4.0, 4.0, 4.0, 50.0, 50.0].iter().enumerate() {
            clock.advance(Duration::seconds(1));
            let secs = 3 + i as i64;
            assert!(!detector.add_sample(sample_at(secs, *download)).unwrap().is_detected());
        }

        // 冷却结束，末尾是正常速率，但窗口内还有未告警的掉速序列
        clock.advance(Duration::seconds(5));
        let result = detector.add_sample(sample_at(13, 60.0)).unwrap();
        let event = result.into_event().expect("recovered run should alert");
        assert_eq!(event.consecutive_drops, 3);
        assert_eq!(event.current_speed, 60.0);
    }

    #[test]
    fn test_reported_episode_does_not_alert_again() {
        let (mut detector, clock) = detector(strict_config());
        let results = feed(&mut detector, &clock, &[5.0, 5.0, 5.0, 50.0, 50.0, 50.0]);
        assert_eq!(results.iter().filter(|r| r.is_detected()).count(), 1);
    }

    #[test]
    fn test_ongoing_outage_realerts_without_cooldown() {
        let (mut detector, clock) = detector(strict_config());
        let results = feed(&mut detector, &clock, &[5.0, 5.0, 5.0, 5.0]);
        assert!(results[2].is_detected());
        let event = results[3].clone().into_event().unwrap();
        assert_eq!(event.consecutive_drops, 4);
    }

    #[test]
    fn test_insufficient_samples() {
        let (mut detector, _clock) = detector(DetectorConfig {
            duration_threshold: 5,
            ..strict_config()
        });
        for secs in 0..4 {
            assert!(!detector.add_sample(sample_at(secs, 1.0)).unwrap().is_detected());
        }
    }

    #[test]
    fn test_invalid_sample_leaves_window_untouched() {
        let (mut detector, _clock) = detector(strict_config());
        detector.add_sample(sample_at(0, 20.0)).unwrap();

        let bad = Sample {
            timestamp: base() + Duration::seconds(1),
            download: f64::NAN,
            upload: 1.0,
        };
        match detector.add_sample(bad) {
            Err(MonitorError::InvalidSample(_)) => {}
            other => panic!("expected InvalidSample, got {:?}", other),
        }
        assert_eq!(detector.snapshot().len(), 1);
    }

    #[test]
    fn test_duplicate_sample_is_ignored() {
        let (mut detector, _clock) = detector(strict_config());
        detector.add_sample(sample_at(0, 5.0)).unwrap();
        detector.add_sample(sample_at(1, 5.0)).unwrap();

        // 重复投递不会凑成第三次掉速
        let result = detector.add_sample(sample_at(1, 5.0)).unwrap();
        assert_eq!(result, DropResult::NotDetected);
        assert_eq!(detector.snapshot().len(), 2);
    }

    #[test]
    fn test_out_of_order_samples_do_not_panic() {
        let (mut detector, _clock) = detector(strict_config());
        for secs in [5, 3, 9, 1, 20, 15, 0] {
            detector.add_sample(sample_at(secs, 5.0)).unwrap();
        }
        let snapshot = detector.snapshot();
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.last().unwrap().timestamp, base());
    }

    #[test]
    fn test_empty_update_is_idempotent() {
        let (mut detector, clock) = detector(strict_config());
        feed(&mut detector, &clock, &[5.0, 5.0]);
        let before = detector.config();
        let after = detector.update_config(&DetectorConfigUpdate::default()).unwrap();
        assert_eq!(before, after);
        assert_eq!(detector.config(), before);
        assert_eq!(detector.snapshot().len(), 2);
    }

    #[test]
    fn test_invalid_update_keeps_prior_config() {
        let (mut detector, _clock) = detector(strict_config());
        let update = DetectorConfigUpdate {
            threshold: Some(50.0),
            window_seconds: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            detector.update_config(&update),
            Err(MonitorError::InvalidConfig(_))
        ));
        assert_eq!(detector.config(), strict_config());
    }

    #[test]
    fn test_oversized_window_update_is_rejected() {
        let (mut detector, clock) = detector(strict_config());
        for window in [10_000_000_000_000, u64::MAX] {
            let update = DetectorConfigUpdate {
                window_seconds: Some(window),
                ..Default::default()
            };
            assert!(matches!(
                detector.update_config(&update),
                Err(MonitorError::InvalidConfig(_))
            ));
        }
        let oversized_cooldown = DetectorConfigUpdate {
            cooldown_ms: Some(u64::MAX),
            ..Default::default()
        };
        assert!(detector.update_config(&oversized_cooldown).is_err());
        assert_eq!(detector.config(), strict_config());

        // 检测仍然正常工作
        let results = feed(&mut detector, &clock, &[5.0, 5.0, 5.0]);
        assert_eq!(detector.snapshot().len(), 3);
        assert!(results[2].is_detected());
    }

    #[test]
    fn test_widest_window_keeps_samples() {
        let config = DetectorConfig {
            window_seconds: MAX_WINDOW_SECONDS,
            ..strict_config()
        };
        let (mut detector, clock) = detector(config);
        let results = feed(&mut detector, &clock, &[5.0, 5.0, 5.0]);
        assert_eq!(detector.snapshot().len(), 3);
        assert!(results[2].is_detected());
    }

    #[test]
    fn test_update_applies_on_next_insertion() {
        let (mut detector, clock) = detector(strict_config());
        let results = feed(&mut detector, &clock, &[5.0, 5.0]);
        assert!(!results[1].is_detected());

        // 不回溯评估当前窗口
        detector
            .update_config(&DetectorConfigUpdate {
                duration_threshold: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(detector.snapshot().len(), 2);

        clock.advance(Duration::seconds(1));
        let result = detector.add_sample(sample_at(2, 50.0)).unwrap();
        assert_eq!(result.into_event().unwrap().consecutive_drops, 2);
    }
}
