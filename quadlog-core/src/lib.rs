// quadlog-core/src/lib.rs
// Durable commit log, batching transaction coordinator and restore for quad stores

pub mod capture;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod log;
pub mod quad;
pub mod record;
pub mod restore;
pub mod store;

// Public exports
pub use capture::{CaptureListener, CapturedChanges, ChangeCapture, QuadAction, QuadChangeListener};
pub use codec::{CodecKind, Encoder};
pub use config::QuadLogConfig;
pub use coordinator::{CoordinatorOptions, CoordinatorStats, ReadTxn, TransactionCoordinator, WriteTxn};
pub use error::{QuadLogError, Result};
pub use listener::{emit_records, RecordCollector, TransactionListener};
pub use log::{CommitLog, LocalCommitLog, MemoryCommitLog, Position, Shard, ShardLayout};
pub use quad::{Node, Quad, QuadPattern};
pub use record::{CommitMetadata, CommitRecord, WriteContext};
pub use restore::{connect_or_restore, read_records, restore, verify_log, LogSummary, RestoreStats};
pub use store::{DatasetView, FileQuadStore, LiveStorage, MemoryQuadStore, QuadStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
