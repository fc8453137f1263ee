// quadlog-core/src/restore.rs
//! Rebuilding live storage from the commit log
//!
//! Replays every entry, in Position order, into a fresh quad store with one
//! physical transaction per entry. Records within an entry have disjoint
//! added/removed sets, so only the order between entries matters.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::codec::CodecKind;
use crate::config::QuadLogConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::{QuadLogError, Result};
use crate::listener::{RecordCollector, TransactionListener};
use crate::log::{CommitLog, LocalCommitLog, Position};
use crate::quad::Quad;
use crate::record::{CommitMetadata, CommitRecord};
use crate::store::{FileQuadStore, LiveStorage, MemoryQuadStore, QuadStore};

const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    /// Log entries replayed
    pub transactions: u64,
    pub records: u64,
    pub quads_added: u64,
    pub quads_deleted: u64,
}

/// Totals gathered by decoding the whole log without applying it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub entries: u64,
    pub records: u64,
    pub quads_added: u64,
    pub quads_deleted: u64,
    /// Timestamp of the first record, epoch milliseconds
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

/// Applies decoded events straight to a store
struct StoreApplier<'a, S: ?Sized> {
    store: &'a mut S,
    stats: RestoreStats,
    committed: bool,
}

impl<'a, S: QuadStore + ?Sized> TransactionListener for StoreApplier<'a, S> {
    fn on_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_metadata(&mut self, _metadata: &CommitMetadata) -> Result<()> {
        self.stats.records += 1;
        Ok(())
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        self.store.add(quad.clone())?;
        self.stats.quads_added += 1;
        Ok(())
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        self.store.delete(quad)?;
        self.stats.quads_deleted += 1;
        Ok(())
    }

    fn on_commit(&mut self) -> Result<()> {
        self.committed = true;
        Ok(())
    }

    fn on_abort(&mut self) -> Result<()> {
        self.committed = false;
        Ok(())
    }
}

/// Replay positions `1..=log.size()` into `store`
///
/// Stops at the first entry that cannot be read or decoded; that entry's
/// store transaction is aborted and the error returned.
pub fn restore<L, S>(log: &L, codec: CodecKind, store: &mut S) -> Result<RestoreStats>
where
    L: CommitLog + ?Sized,
    S: QuadStore + ?Sized,
{
    let size = log.size();
    info!(entries = size, codec = codec.as_str(), "restoring from commit log");

    let mut totals = RestoreStats::default();
    for position in 1..=size {
        let bytes = log.read(position)?;

        store.begin_write()?;
        let mut applier = StoreApplier {
            store: &mut *store,
            stats: RestoreStats::default(),
            committed: false,
        };
        let decoded = codec.decode(&bytes, &mut applier);
        let StoreApplier {
            stats, committed, ..
        } = applier;

        match decoded {
            Ok(()) if committed => store.commit()?,
            Ok(()) => {
                warn!(position, "log entry holds an aborted transaction, skipping");
                store.abort()?;
                continue;
            }
            Err(err) => {
                error!(position, error = %err, "cannot replay commit log entry");
                store.abort()?;
                return Err(err);
            }
        }

        totals.transactions += 1;
        totals.records += stats.records;
        totals.quads_added += stats.quads_added;
        totals.quads_deleted += stats.quads_deleted;

        if position % PROGRESS_INTERVAL == 0 {
            info!(position, total = size, "restore progress");
        }
    }

    info!(
        transactions = totals.transactions,
        records = totals.records,
        quads = store.len(),
        "restore complete"
    );
    Ok(totals)
}

/// Decoded records of the entry at `position`
pub fn read_records<L>(log: &L, codec: CodecKind, position: Position) -> Result<Vec<CommitRecord>>
where
    L: CommitLog + ?Sized,
{
    let bytes = log.read(position)?;
    let mut collector = RecordCollector::new();
    codec.decode(&bytes, &mut collector)?;
    Ok(collector.into_records())
}

/// Decode every entry without applying anything
pub fn verify_log<L>(log: &L, codec: CodecKind) -> Result<LogSummary>
where
    L: CommitLog + ?Sized,
{
    let mut summary = LogSummary::default();
    for position in 1..=log.size() {
        let records = read_records(log, codec, position).map_err(|err| match err {
            QuadLogError::Codec(reason)
            | QuadLogError::Truncated(reason)
            | QuadLogError::Serialization(reason) => QuadLogError::Corruption { position, reason },
            other => other,
        })?;

        summary.entries += 1;
        for record in &records {
            summary.records += 1;
            summary.quads_added += record.added.len() as u64;
            summary.quads_deleted += record.removed.len() as u64;
            let ts = record.metadata.timestamp;
            summary.first_timestamp.get_or_insert(ts);
            summary.last_timestamp = Some(ts);
        }
    }
    Ok(summary)
}

/// Rebuild live storage in `config.data_dir` from `log`
fn rebuild_live_storage(config: &QuadLogConfig, log: &LocalCommitLog) -> Result<FileQuadStore> {
    let mut scratch = MemoryQuadStore::new();
    let stats = restore(log, config.codec, &mut scratch)?;
    let store = FileQuadStore::create(&config.data_dir, &scratch.snapshot())?;
    info!(
        transactions = stats.transactions,
        quads = store.len(),
        data_dir = %config.data_dir.display(),
        "live storage rebuilt from commit log"
    );
    Ok(store)
}

/// Bootstrap entry point: open the log, open or rebuild live storage, and
/// hand both to a coordinator
///
/// Live storage is rebuilt when its dataset file is missing, unreadable, or
/// empty while the log is not.
pub fn connect_or_restore(
    config: &QuadLogConfig,
) -> Result<TransactionCoordinator<FileQuadStore, LocalCommitLog>> {
    config.validate()?;
    let log = LocalCommitLog::open(&config.log_dir, config.shard_layout())?;

    let store = match FileQuadStore::open(&config.data_dir)? {
        LiveStorage::Present(store) => {
            if store.is_empty() && log.size() > 0 {
                warn!(entries = log.size(), "live storage is empty but the commit log is not");
                rebuild_live_storage(config, &log)?
            } else {
                store
            }
        }
        LiveStorage::Missing => {
            info!(data_dir = %config.data_dir.display(), "no live storage found");
            rebuild_live_storage(config, &log)?
        }
        LiveStorage::Corrupt(reason) => {
            warn!(%reason, "live storage is corrupt, discarding it");
            rebuild_live_storage(config, &log)?
        }
    };

    TransactionCoordinator::new(store, log, config.coordinator_options())
}
