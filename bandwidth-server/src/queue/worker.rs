use super::alert_queue::AlertQueue;
use super::job::AlertJob;
use async_trait::async_trait;
use common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 任务处理器
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// 返回 Ok 表示任务完成，Err 表示需要重试
    async fn handle(&self, job: &AlertJob) -> Result<()>;
}

/// 队列 worker 池
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 启动 `workers` 个 worker
    pub fn spawn(queue: AlertQueue, handler: Arc<dyn JobHandler>, workers: usize) -> Self {
        let cancel = CancellationToken::new();
        let workers = workers.max(1);

        let handles = (0..workers)
            .map(|index| {
                let queue = queue.clone();
                let handler = handler.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(index, queue, handler, cancel).await;
                })
            })
            .collect();

        info!("Started {} alert queue workers", workers);
        Self { cancel, handles }
    }

    /// 停止领取新任务，等待进行中的任务在 `grace` 内结束
    ///
    /// 超时未结束的任务被放弃，它们在日志中仍未确认，重启后会重新投递。
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();

        let mut handles = self.handles;
        let join_all = futures::future::join_all(handles.iter_mut());
        match tokio::time::timeout(grace, join_all).await {
            Ok(_) => info!("All alert queue workers stopped"),
            Err(_) => {
                warn!(
                    "Alert queue workers did not finish within {:?}, abandoning in-flight jobs",
                    grace
                );
                for handle in &handles {
                    handle.abort();
                }
            }
        }
    }
}

async fn run_worker(
    index: usize,
    queue: AlertQueue,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
) {
    debug!("Alert queue worker {} started", index);

    while let Some(job) = queue.claim(&cancel).await {
        let id = job.id;

        // 在独立任务中处理，handler panic 只会让该任务重试
        let task_handler = handler.clone();
        let outcome = tokio::spawn(async move { task_handler.handle(&job).await }).await;

        match outcome {
            Ok(Ok(())) => queue.ack(id).await,
            Ok(Err(e)) => queue.retry(id, e.to_string()).await,
            Err(join_error) => {
                error!("Alert job {} handler panicked: {}", id, join_error);
                queue.retry(id, format!("handler panicked: {}", join_error)).await;
            }
        }
    }

    debug!("Alert queue worker {} stopped", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::alert_queue::QueueConfig;
    use crate::queue::journal::MemoryJournal;
    use crate::queue::retry::{RetryPolicy, RetryStrategy};
    use chrono::Utc;
    use common::{AlertEvent, MonitorError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 `failures` 次调用失败
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &AlertJob) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(MonitorError::AllChannelsFailed {
                    failures: vec!["email: timeout".to_string()],
                })
            } else {
                Ok(())
            }
        }
    }

    struct PanicOnceHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for PanicOnceHandler {
        async fn handle(&self, _job: &AlertJob) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        }
    }

    async fn queue(max_attempts: u32) -> AlertQueue {
        let config = QueueConfig {
            max_pending: 100,
            retry: RetryPolicy {
                max_attempts,
                retry_strategy: RetryStrategy::Immediate,
                backoff_base: Duration::from_millis(0),
                backoff_max: Duration::from_millis(0),
            },
        };
        AlertQueue::open(Arc::new(MemoryJournal::new()), config)
            .await
            .unwrap()
    }

    fn event() -> AlertEvent {
        AlertEvent::new(3, 10.0, 2.5, Utc::now())
    }

    async fn wait_until_idle(queue: &AlertQueue) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let stats = queue.stats();
                if stats.ready == 0 && stats.in_flight == 0 && stats.delayed == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_until_success() {
        let queue = queue(5).await;
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::spawn(queue.clone(), handler.clone(), 2);

        queue.enqueue("home", event()).await.unwrap();
        wait_until_idle(&queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.stats().failed, 0);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_exhausted_job_is_dead_lettered() {
        let queue = queue(2).await;
        let handler = Arc::new(FlakyHandler {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::spawn(queue.clone(), handler.clone(), 1);

        queue.enqueue("home", event()).await.unwrap();
        wait_until_idle(&queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error.contains("email: timeout"));
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panicking_handler_triggers_retry() {
        let queue = queue(3).await;
        let handler = Arc::new(PanicOnceHandler {
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::spawn(queue.clone(), handler.clone(), 1);

        queue.enqueue("home", event()).await.unwrap();
        wait_until_idle(&queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(queue.dead_letters().is_empty());
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let queue = queue(3).await;
        let handler = Arc::new(FlakyHandler {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::spawn(queue, handler, 4);

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown(Duration::from_millis(500)))
            .await
            .unwrap();
    }
}
