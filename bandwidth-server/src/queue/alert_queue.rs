// 告警分发队列
//
// 检测（快路径）与通知投递（慢路径）之间的持久化队列：
// - 入队先写日志，写入成功才算接收
// - 同一任务同一时刻只交给一个 worker，确认前崩溃会重新投递（至少一次）
// - 失败按退避策略重试，重试耗尽后进入失败列表，不再自动恢复

use super::job::{AlertJob, DeadLetter, JournalRecord};
use super::journal::JobJournal;
use super::retry::RetryPolicy;
use chrono::Utc;
use common::{AlertEvent, MonitorError, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 失败列表最多保留的任务数
const MAX_DEAD_LETTERS: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// 未完成任务上限（待投递 + 投递中 + 等待重试），超过后拒绝入队
    pub max_pending: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// 队列状态统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
    pub delayed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<AlertJob>,
    in_flight: HashMap<Uuid, AlertJob>,
    /// 等待退避结束的任务数
    delayed: usize,
    /// 已占位但还在写日志的入队请求
    reserved: usize,
    dead_letters: VecDeque<DeadLetter>,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.ready.len() + self.in_flight.len() + self.delayed + self.reserved
    }

    fn push_dead_letter(&mut self, dead: DeadLetter) {
        if self.dead_letters.len() >= MAX_DEAD_LETTERS {
            self.dead_letters.pop_front();
        }
        self.dead_letters.push_back(dead);
    }
}

struct QueueInner {
    journal: Arc<dyn JobJournal>,
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    config: QueueConfig,
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_ready(&self, job: AlertJob) {
        self.state().ready.push_back(job);
        self.notify.notify_one();
    }
}

/// 入队占位，写日志期间计入 pending
///
/// 入队 future 被丢弃（如客户端断开）时由 Drop 归还名额。
struct Reservation<'a> {
    inner: &'a QueueInner,
    held: bool,
}

impl<'a> Reservation<'a> {
    fn acquire(inner: &'a QueueInner) -> Result<Self> {
        let mut state = inner.state();
        if state.pending() >= inner.config.max_pending {
            return Err(MonitorError::QueueUnavailable(format!(
                "queue is full ({} pending jobs)",
                state.pending()
            )));
        }
        state.reserved += 1;
        Ok(Self { inner, held: true })
    }

    /// 在已持有的状态锁内归还名额
    fn release(mut self, state: &mut QueueState) {
        state.reserved -= 1;
        self.held = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.inner.state().reserved -= 1;
        }
    }
}

#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<QueueInner>,
}

impl AlertQueue {
    /// 打开队列并从日志恢复
    ///
    /// 所有未确认、未失败的任务（包括上次崩溃时正在投递的）重新进入待投递状态。
    pub async fn open(journal: Arc<dyn JobJournal>, config: QueueConfig) -> Result<Self> {
        let records = journal.replay().await?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut live: HashMap<Uuid, AlertJob> = HashMap::new();
        let mut dead_letters: VecDeque<DeadLetter> = VecDeque::new();

        for record in records {
            match record {
                JournalRecord::Enqueued(job) => {
                    order.push(job.id);
                    live.insert(job.id, job);
                }
                JournalRecord::Retried { id, attempts, .. } => {
                    if let Some(job) = live.get_mut(&id) {
                        job.attempts = attempts;
                    }
                }
                JournalRecord::Acked { id } => {
                    live.remove(&id);
                }
                JournalRecord::Failed(dead) => {
                    live.remove(&dead.job.id);
                    if dead_letters.len() >= MAX_DEAD_LETTERS {
                        dead_letters.pop_front();
                    }
                    dead_letters.push_back(dead);
                }
            }
        }

        let ready: VecDeque<AlertJob> = order
            .into_iter()
            .filter_map(|id| live.remove(&id))
            .collect();

        let mut compacted: Vec<JournalRecord> = dead_letters
            .iter()
            .cloned()
            .map(JournalRecord::Failed)
            .collect();
        compacted.extend(ready.iter().cloned().map(JournalRecord::Enqueued));
        journal.compact(&compacted).await?;

        if !ready.is_empty() {
            info!("Recovered {} undelivered alert jobs from journal", ready.len());
        }
        if !dead_letters.is_empty() {
            warn!("{} alert jobs are marked permanently failed", dead_letters.len());
        }

        let state = QueueState {
            ready,
            dead_letters,
            ..Default::default()
        };

        Ok(Self {
            inner: Arc::new(QueueInner {
                journal,
                state: Mutex::new(state),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// 告警入队
    ///
    /// 日志写入成功后返回任务ID，不等待投递。
    /// 队列已关闭、已满或日志不可写时返回 `QueueUnavailable`。
    pub async fn enqueue(&self, target: &str, event: AlertEvent) -> Result<Uuid> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MonitorError::QueueUnavailable(
                "queue is shutting down".to_string(),
            ));
        }

        let reservation = Reservation::acquire(&self.inner)?;

        let job = AlertJob::drop_alert(target, event);
        let appended = self
            .inner
            .journal
            .append(&JournalRecord::Enqueued(job.clone()))
            .await;

        let mut state = self.inner.state();
        reservation.release(&mut state);
        if let Err(e) = appended {
            return Err(MonitorError::QueueUnavailable(e.to_string()));
        }

        let id = job.id;
        state.ready.push_back(job);
        drop(state);
        self.inner.notify.notify_one();

        info!("Alert job {} enqueued for target {}", id, target);
        Ok(id)
    }

    /// 领取一个任务，取消时返回 None
    pub async fn claim(&self, cancel: &CancellationToken) -> Option<AlertJob> {
        loop {
            {
                let mut state = self.inner.state();
                if let Some(job) = state.ready.pop_front() {
                    state.in_flight.insert(job.id, job.clone());
                    debug!("Alert job {} claimed (attempt {})", job.id, job.attempts + 1);
                    return Some(job);
                }
            }

            if cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// 确认任务投递完成
    pub async fn ack(&self, id: Uuid) {
        if let Err(e) = self
            .inner
            .journal
            .append(&JournalRecord::Acked { id })
            .await
        {
            // 未记录确认的任务重启后会再投递一次
            error!("Failed to record ack for alert job {}: {}", id, e);
        }
        self.inner.state().in_flight.remove(&id);
        info!("Alert job {} completed", id);
    }

    /// 投递失败：按策略退避重试，或标记为永久失败
    pub async fn retry(&self, id: Uuid, reason: String) {
        let job = match self.inner.state().in_flight.remove(&id) {
            Some(mut job) => {
                job.attempts += 1;
                job
            }
            None => {
                warn!("Retry requested for unknown alert job {}", id);
                return;
            }
        };

        let policy = &self.inner.config.retry;
        if !policy.should_retry(job.attempts) {
            self.dead_letter(job, reason).await;
            return;
        }

        let record = JournalRecord::Retried {
            id,
            attempts: job.attempts,
            last_error: reason.clone(),
        };
        if let Err(e) = self.inner.journal.append(&record).await {
            warn!("Failed to record retry for alert job {}: {}", id, e);
        }

        let delay = policy.calculate_delay(job.attempts - 1);
        warn!(
            "Alert job {} failed (attempt {}/{}): {}, retrying in {:?}",
            id, job.attempts, policy.max_attempts, reason, delay
        );

        if delay.is_zero() {
            self.inner.make_ready(job);
            return;
        }

        self.inner.state().delayed += 1;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.state().delayed -= 1;
            inner.make_ready(job);
        });
    }

    async fn dead_letter(&self, job: AlertJob, reason: String) {
        let dead = DeadLetter {
            job,
            error: reason,
            failed_at: Utc::now(),
        };
        error!(
            "Alert job {} for target {} permanently failed after {} attempts: {}",
            dead.job.id, dead.job.target, dead.job.attempts, dead.error
        );

        if let Err(e) = self
            .inner
            .journal
            .append(&JournalRecord::Failed(dead.clone()))
            .await
        {
            error!("Failed to record failure of alert job {}: {}", dead.job.id, e);
        }
        self.inner.state().push_dead_letter(dead);
    }

    /// 停止接收新任务并唤醒等待中的 worker
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state().dead_letters.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state();
        QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            delayed: state.delayed,
            failed: state.dead_letters.len(),
        }
    }
}
