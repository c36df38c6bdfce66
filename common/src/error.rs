use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Delivery failed on channel {channel}: {reason}")]
    ChannelDelivery { channel: String, reason: String },

    #[error("All {} configured channels failed: {}", .failures.len(), .failures.join("; "))]
    AllChannelsFailed { failures: Vec<String> },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl MonitorError {
    /// 客户端输入导致的错误
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MonitorError::InvalidSample(_) | MonitorError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
