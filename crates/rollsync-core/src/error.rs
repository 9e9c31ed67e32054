use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures that end a run. Recoverable anomalies (unparseable cells, failed
/// primary-table batches, odd eviction anchors) are plain values instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("log table write failed: {0}")]
    LogWrite(String),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn log_write(message: impl Into<String>) -> Self {
        Self::LogWrite(message.into())
    }
}
