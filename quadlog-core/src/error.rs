// quadlog-core/src/error.rs
// Error type shared by the coordinator, commit log, codecs and restore

use thiserror::Error;

use crate::log::Position;

#[derive(Debug, Error)]
pub enum QuadLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bytes that do not form a valid encoded commit
    #[error("Codec error: {0}")]
    Codec(String),

    /// Stream ended before its commit marker
    #[error("Truncated commit stream: {0}")]
    Truncated(String),

    #[error("Commit log corruption at position {position}: {reason}")]
    Corruption { position: Position, reason: String },

    #[error("Position {position} is out of range (log size {size})")]
    PositionOutOfRange { position: Position, size: u64 },

    #[error("Can't promote a read transaction to a write transaction")]
    PromotionNotAllowed,

    #[error("No write transaction is active")]
    NoWriteTransaction,

    #[error("A write transaction is already active")]
    WriteTransactionActive,

    #[error("Storage error: {0}")]
    Storage(String),

    /// Batch-wide failure, reported to every unit of the batch
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The commit log holds changes live storage does not; live storage must
    /// be rebuilt from the log before any further write
    #[error("Live storage diverged from the commit log: {0}")]
    Diverged(String),
}

impl QuadLogError {
    /// True for failures that take down a whole batch rather than one unit
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            QuadLogError::TransactionFailed(_)
                | QuadLogError::Io(_)
                | QuadLogError::Storage(_)
                | QuadLogError::Diverged(_)
        )
    }
}

impl From<bincode::Error> for QuadLogError {
    fn from(err: bincode::Error) -> Self {
        QuadLogError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for QuadLogError {
    fn from(err: serde_json::Error) -> Self {
        QuadLogError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for QuadLogError {
    fn from(err: toml::de::Error) -> Self {
        QuadLogError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuadLogError>;
