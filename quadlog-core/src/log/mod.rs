// log/mod.rs
// Append-only commit log
//
// This module provides:
// - `CommitLog`: the append/size/read interface the coordinator writes to
// - `LocalCommitLog`: sharded on-disk log (`volume-N/chapter-M/tx-P`)
// - `MemoryCommitLog`: in-memory log for tests and embedding
// - `ShardLayout` / `Shard`: pure Position -> directory addressing
// - `LogEntry`: checksummed envelope around one entry's bytes

mod entry;
mod local;
mod memory;
mod shard;

pub use entry::{EntryDefect, LogEntry, ENTRY_HEADER_SIZE, ENTRY_MAGIC, MAX_ENTRY_SIZE};
pub use local::LocalCommitLog;
pub use memory::MemoryCommitLog;
pub use shard::{Shard, ShardLayout, DEFAULT_CHAPTERS_PER_VOLUME, DEFAULT_CHAPTER_CAPACITY};

use crate::error::Result;

/// 1-based sequence number of an appended physical commit
pub type Position = u64;

/// Durable, strictly ordered, append-only sequence of encoded commits
///
/// Only the coordinator appends, and only from its commit step, so
/// implementations never see concurrent `append` calls.
pub trait CommitLog: Send {
    /// Durably store `bytes` as the next entry and return its Position
    fn append(&mut self, bytes: &[u8]) -> Result<Position>;

    /// Number of entries, which is also the highest Position
    fn size(&self) -> u64;

    /// Bytes of the entry at `position`
    fn read(&self, position: Position) -> Result<Vec<u8>>;
}
