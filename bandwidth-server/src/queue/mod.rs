mod alert_queue;
mod job;
mod journal;
mod retry;
mod worker;

pub use alert_queue::{AlertQueue, QueueConfig, QueueStats};
pub use job::{AlertJob, DeadLetter, DROP_JOB};
pub use journal::{FileJournal, JobJournal, MemoryJournal};
pub use retry::{RetryPolicy, RetryStrategy};
pub use worker::{JobHandler, WorkerPool};
