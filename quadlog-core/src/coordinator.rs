// quadlog-core/src/coordinator.rs
//! Transaction coordinator
//!
//! All reads and writes of the live graph go through
//! `TransactionCoordinator`. Reads run against the last published committed
//! snapshot and never wait for writers. Writes are admitted through a queue
//! and batched: the first writer to find no batch running becomes leader,
//! opens one physical write transaction and runs queued units in admission
//! order until the queue is empty or `max_batch_size` is reached.
//!
//! ```text
//! calculate_write ──► admission queue ──► leader thread
//!                                           begin_write
//!                                           for each unit:
//!                                             open capture scope
//!                                             run work
//!                                             close scope ─► ok: pending record
//!                                                         └► err: undo in reverse
//!                                           encode + append ─► commit ─► publish
//!                                           reply to every unit of the batch
//! ```
//!
//! A unit is acknowledged only after the commit log entry holding its record
//! has been durably appended. When the leader's batch is done and more units
//! are queued, leadership passes to the caller of the oldest queued unit.
//!
//! If the log accepts a batch but live storage then fails to commit it, the
//! two have diverged. The coordinator invalidates live storage, so the next
//! `connect_or_restore` rebuilds it from the log, and fails every later
//! write with `TransactionFailed`. Reads keep serving the last published
//! snapshot.
//!
//! A unit that blocks forever blocks every later writer. A unit that waits
//! on another thread writing through the same coordinator deadlocks.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::capture::{CaptureListener, ChangeCapture};
use crate::codec::CodecKind;
use crate::error::{QuadLogError, Result};
use crate::log::{CommitLog, Position};
use crate::quad::{Quad, QuadPattern};
use crate::record::{CommitRecord, WriteContext};
use crate::store::{DatasetView, QuadStore};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub codec: CodecKind,
    /// Upper bound on logical units per physical transaction
    pub max_batch_size: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            codec: CodecKind::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl CoordinatorOptions {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Batch size actually used: at least 1, and exactly 1 for codecs that
    /// hold a single record per entry
    pub fn effective_batch_size(&self) -> usize {
        if self.codec.supports_batches() {
            self.max_batch_size.max(1)
        } else {
            1
        }
    }
}

/// Counters since the coordinator was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Batches committed and appended to the log
    pub physical_commits: u64,
    pub units_committed: u64,
    /// Units that returned an error, panicked, aborted or were lost with
    /// their batch
    pub units_failed: u64,
    /// Batches in which no unit survived
    pub empty_batches: u64,
    /// Batches lost to a storage, codec or log failure
    pub batch_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    physical_commits: AtomicU64,
    units_committed: AtomicU64,
    units_failed: AtomicU64,
    empty_batches: AtomicU64,
    batch_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            physical_commits: self.physical_commits.load(Ordering::Relaxed),
            units_committed: self.units_committed.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            empty_batches: self.empty_batches.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// NESTING
// ============================================================================

#[derive(Clone)]
enum Frame {
    Read(DatasetView),
    Write,
}

thread_local! {
    /// Units running on this thread, innermost last, keyed by coordinator
    static ACTIVE_UNITS: RefCell<Vec<(u64, Frame)>> = RefCell::new(Vec::new());
}

fn current_frame(coordinator: u64) -> Option<Frame> {
    ACTIVE_UNITS.with(|units| {
        units
            .borrow()
            .iter()
            .rev()
            .find(|(id, _)| *id == coordinator)
            .map(|(_, frame)| frame.clone())
    })
}

/// Pops its frame on drop, including during unwinding
struct FrameGuard;

impl FrameGuard {
    fn push(coordinator: u64, frame: Frame) -> Self {
        ACTIVE_UNITS.with(|units| units.borrow_mut().push((coordinator, frame)));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        ACTIVE_UNITS.with(|units| {
            units.borrow_mut().pop();
        });
    }
}

// ============================================================================
// TRANSACTION HANDLES
// ============================================================================

/// Read access to a consistent snapshot
#[derive(Debug, Clone)]
pub struct ReadTxn {
    view: DatasetView,
}

impl ReadTxn {
    pub fn contains(&self, quad: &Quad) -> bool {
        self.view.contains(quad)
    }

    pub fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.view.find(pattern)
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn view(&self) -> &DatasetView {
        &self.view
    }
}

/// Write access to the live graph from inside a batch
pub struct WriteTxn<'a, S: QuadStore> {
    store: &'a Mutex<S>,
    aborted: &'a AtomicBool,
    context: &'a WriteContext,
}

impl<'a, S: QuadStore> WriteTxn<'a, S> {
    /// Insert `quad`; false if it was already present
    pub fn add(&mut self, quad: Quad) -> Result<bool> {
        self.store.lock().add(quad)
    }

    /// Remove `quad`; false if it was absent
    pub fn delete(&mut self, quad: &Quad) -> Result<bool> {
        self.store.lock().delete(quad)
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.store.lock().contains(quad)
    }

    pub fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.store.lock().find(pattern)
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live state including this batch's uncommitted changes
    pub fn view(&self) -> DatasetView {
        self.store.lock().live_view()
    }

    /// Roll back this unit when its work returns; nothing is logged for it
    pub fn abort(&mut self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> &WriteContext {
        self.context
    }
}

// ============================================================================
// ADMISSION QUEUE
// ============================================================================

enum Reply<T, E> {
    /// Become leader and drain the queue
    Lead,
    Done(std::result::Result<T, E>),
    Panicked(Box<dyn Any + Send>),
}

enum UnitOutcome {
    Survived(PendingCommit),
    Discarded,
    /// Rollback failed; live state can only be recovered by aborting the batch
    Poisoned(QuadLogError),
}

/// Successful unit waiting for its batch to be logged
struct PendingCommit {
    record: CommitRecord,
    complete: Box<dyn FnOnce(Option<QuadLogError>) + Send>,
}

struct QueuedUnit<S, L> {
    run: Box<dyn FnOnce(&Shared<S, L>) -> UnitOutcome + Send>,
    reject: Box<dyn FnOnce(QuadLogError) + Send>,
    promote: Box<dyn FnOnce() + Send>,
}

struct Admission<S, L> {
    pending: VecDeque<QueuedUnit<S, L>>,
    /// Some thread is leading; cleared only with `pending` empty
    leader_active: bool,
}

struct Shared<S, L> {
    id: u64,
    options: CoordinatorOptions,
    batch_size: usize,
    store: Mutex<S>,
    log: Mutex<L>,
    capture: Arc<Mutex<ChangeCapture>>,
    published: RwLock<DatasetView>,
    admission: Mutex<Admission<S, L>>,
    unit_aborted: AtomicBool,
    /// Set once live storage and the log disagree; never cleared
    halted: Mutex<Option<String>>,
    stats: StatsCounters,
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Facade for every read and write of the live graph
///
/// Cloning is cheap; clones share one store, one log and one queue.
pub struct TransactionCoordinator<S, L> {
    shared: Arc<Shared<S, L>>,
}

impl<S, L> Clone for TransactionCoordinator<S, L> {
    fn clone(&self) -> Self {
        TransactionCoordinator {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, L> TransactionCoordinator<S, L>
where
    S: QuadStore + 'static,
    L: CommitLog + 'static,
{
    /// Take ownership of `store` and `log` and register change capture
    pub fn new(mut store: S, log: L, options: CoordinatorOptions) -> Result<Self> {
        if store.in_write_transaction() {
            return Err(QuadLogError::WriteTransactionActive);
        }

        let capture = Arc::new(Mutex::new(ChangeCapture::new()));
        store.set_change_listener(Some(Box::new(CaptureListener::new(Arc::clone(&capture)))));
        let published = store.snapshot();

        let shared = Shared {
            id: NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed),
            options,
            batch_size: options.effective_batch_size(),
            store: Mutex::new(store),
            log: Mutex::new(log),
            capture,
            published: RwLock::new(published),
            admission: Mutex::new(Admission {
                pending: VecDeque::new(),
                leader_active: false,
            }),
            unit_aborted: AtomicBool::new(false),
            halted: Mutex::new(None),
            stats: StatsCounters::default(),
        };

        Ok(TransactionCoordinator {
            shared: Arc::new(shared),
        })
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.shared.options
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.shared.stats.snapshot()
    }

    /// Size of the commit log, i.e. the Position of the last append
    pub fn position(&self) -> Position {
        self.shared.log.lock().size()
    }

    /// Decoded records of the log entry at `position`
    pub fn read_records(&self, position: Position) -> Result<Vec<CommitRecord>> {
        let bytes = self.shared.log.lock().read(position)?;
        self.shared.options.codec.decode_records(&bytes)
    }

    /// Why writes are refused, once live storage has diverged from the log
    pub fn halted(&self) -> Option<String> {
        self.shared.halted.lock().clone()
    }

    /// Write units waiting for a leader to run them
    pub fn queued(&self) -> usize {
        self.shared.admission.lock().pending.len()
    }

    /// Last published committed state
    pub fn snapshot(&self) -> DatasetView {
        self.shared.published.read().clone()
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn calculate_read<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ReadTxn) -> std::result::Result<T, E>,
    {
        let view = match current_frame(self.shared.id) {
            Some(Frame::Read(view)) => view,
            Some(Frame::Write) => self.shared.store.lock().live_view(),
            None => self.snapshot(),
        };

        let _frame = FrameGuard::push(self.shared.id, Frame::Read(view.clone()));
        work(&ReadTxn { view })
    }

    pub fn execute_read<E, F>(&self, work: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&ReadTxn) -> std::result::Result<(), E>,
    {
        self.calculate_read(work)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Run `work` in a batched write transaction
    ///
    /// Returns once the unit's commit record is durable, or with the unit's
    /// own error after its changes were rolled back, or with
    /// `TransactionFailed` if the whole batch could not be committed.
    pub fn calculate_write<T, E, F>(&self, context: WriteContext, work: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<QuadLogError> + Send + 'static,
        F: FnOnce(&mut WriteTxn<'_, S>) -> std::result::Result<T, E> + Send + 'static,
    {
        match current_frame(self.shared.id) {
            Some(Frame::Read(_)) => return Err(QuadLogError::PromotionNotAllowed.into()),
            Some(Frame::Write) => return self.run_nested(&context, work),
            None => {}
        }
        if let Some(reason) = self.halted() {
            return Err(QuadLogError::TransactionFailed(reason).into());
        }

        let (sender, receiver) = channel::bounded::<Reply<T, E>>(1);
        let unit = QueuedUnit::new(context, work, sender);

        let lead = {
            let mut admission = self.shared.admission.lock();
            admission.pending.push_back(unit);
            if admission.leader_active {
                false
            } else {
                admission.leader_active = true;
                true
            }
        };
        if lead {
            self.shared.lead_batch();
        }

        loop {
            match receiver.recv() {
                Ok(Reply::Lead) => self.shared.lead_batch(),
                Ok(Reply::Done(result)) => return result,
                Ok(Reply::Panicked(payload)) => panic::resume_unwind(payload),
                Err(_) => {
                    return Err(QuadLogError::TransactionFailed(
                        "unit was dropped before completing".to_string(),
                    )
                    .into())
                }
            }
        }
    }

    pub fn execute_write<E, F>(&self, context: WriteContext, work: F) -> std::result::Result<(), E>
    where
        E: From<QuadLogError> + Send + 'static,
        F: FnOnce(&mut WriteTxn<'_, S>) -> std::result::Result<(), E> + Send + 'static,
    {
        self.calculate_write(context, work)
    }

    /// Write inside a running write unit: same transaction, same scope
    ///
    /// `context` is only visible to `work` through `WriteTxn::context`. The
    /// unit logs a single record, carrying the metadata of the outermost
    /// write.
    fn run_nested<T, E, F>(&self, context: &WriteContext, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut WriteTxn<'_, S>) -> std::result::Result<T, E>,
    {
        let shared = &*self.shared;
        let mut txn = WriteTxn {
            store: &shared.store,
            aborted: &shared.unit_aborted,
            context,
        };
        work(&mut txn)
    }
}

impl<S, L> QueuedUnit<S, L>
where
    S: QuadStore + 'static,
    L: CommitLog + 'static,
{
    fn new<T, E, F>(context: WriteContext, work: F, sender: Sender<Reply<T, E>>) -> Self
    where
        T: Send + 'static,
        E: From<QuadLogError> + Send + 'static,
        F: FnOnce(&mut WriteTxn<'_, S>) -> std::result::Result<T, E> + Send + 'static,
    {
        let reject_sender = sender.clone();
        let promote_sender = sender.clone();

        let run = Box::new(move |shared: &Shared<S, L>| -> UnitOutcome {
            match shared.run_unit(&context, work) {
                UnitRun::Survived { value, record } => UnitOutcome::Survived(PendingCommit {
                    record,
                    complete: Box::new(move |failure| {
                        let reply = match failure {
                            None => Reply::Done(Ok(value)),
                            Some(err) => Reply::Done(Err(E::from(err))),
                        };
                        let _ = sender.send(reply);
                    }),
                }),
                UnitRun::Discarded(reply) => {
                    let _ = sender.send(reply);
                    UnitOutcome::Discarded
                }
                UnitRun::Poisoned(reply, err) => {
                    let _ = sender.send(reply);
                    UnitOutcome::Poisoned(err)
                }
            }
        });

        QueuedUnit {
            run,
            reject: Box::new(move |err| {
                let _ = reject_sender.send(Reply::Done(Err(E::from(err))));
            }),
            promote: Box::new(move || {
                let _ = promote_sender.send(Reply::Lead);
            }),
        }
    }
}

enum UnitRun<T, E> {
    Survived { value: T, record: CommitRecord },
    Discarded(Reply<T, E>),
    Poisoned(Reply<T, E>, QuadLogError),
}

fn batch_failure(err: &QuadLogError) -> QuadLogError {
    match err {
        QuadLogError::TransactionFailed(msg) => QuadLogError::TransactionFailed(msg.clone()),
        other => QuadLogError::TransactionFailed(other.to_string()),
    }
}

impl<S, L> Shared<S, L>
where
    S: QuadStore + 'static,
    L: CommitLog + 'static,
{
    /// Run one logical unit inside the open physical transaction
    fn run_unit<T, E, F>(&self, context: &WriteContext, work: F) -> UnitRun<T, E>
    where
        E: From<QuadLogError>,
        F: FnOnce(&mut WriteTxn<'_, S>) -> std::result::Result<T, E>,
    {
        self.unit_aborted.store(false, Ordering::SeqCst);
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.capture.lock().open_scope();

        let outcome = {
            let _frame = FrameGuard::push(self.id, Frame::Write);
            let mut txn = WriteTxn {
                store: &self.store,
                aborted: &self.unit_aborted,
                context,
            };
            panic::catch_unwind(AssertUnwindSafe(|| work(&mut txn)))
        };

        let changes = self.capture.lock().close_scope();
        let aborted = self.unit_aborted.load(Ordering::SeqCst);

        let reply = match outcome {
            Ok(Ok(value)) if !aborted => {
                return UnitRun::Survived {
                    value,
                    record: changes.into_record(context.to_metadata(timestamp)),
                };
            }
            Ok(result) => Reply::Done(result),
            Err(payload) => Reply::Panicked(payload),
        };

        StatsCounters::bump(&self.stats.units_failed, 1);
        if changes.is_empty() {
            return UnitRun::Discarded(reply);
        }

        warn!(changes = changes.len(), aborted, "rolling back failed unit");
        match changes.undo(&mut *self.store.lock()) {
            Ok(()) => UnitRun::Discarded(reply),
            Err(err) => {
                error!(error = %err, "rollback of failed unit did not complete");
                let reply = Reply::Done(Err(E::from(batch_failure(&err))));
                UnitRun::Poisoned(reply, err)
            }
        }
    }

    /// Run one physical transaction over the head of the queue, then pass
    /// leadership on or release it
    fn lead_batch(&self) {
        let halted = self.halted.lock().clone();
        if let Some(reason) = halted {
            self.reject_queue(&QuadLogError::TransactionFailed(reason));
            return;
        }
        if let Err(err) = self.store.lock().begin_write() {
            error!(error = %err, "could not begin a write transaction");
            StatsCounters::bump(&self.stats.batch_failures, 1);
            self.reject_queue(&err);
            return;
        }

        let mut pending = Vec::new();
        let mut admitted = 0;
        let mut poisoned = None;

        while admitted < self.batch_size {
            let next = self.admission.lock().pending.pop_front();
            let Some(unit) = next else { break };
            admitted += 1;

            match (unit.run)(self) {
                UnitOutcome::Survived(commit) => pending.push(commit),
                UnitOutcome::Discarded => {}
                UnitOutcome::Poisoned(err) => {
                    poisoned = Some(err);
                    break;
                }
            }
        }

        match poisoned {
            Some(err) => self.fail_batch(pending, err),
            None => self.finish_batch(pending, admitted),
        }

        let next_leader = {
            let mut admission = self.admission.lock();
            match admission.pending.front_mut() {
                Some(unit) => Some(std::mem::replace(&mut unit.promote, Box::new(|| {}))),
                None => {
                    admission.leader_active = false;
                    None
                }
            }
        };
        if let Some(promote) = next_leader {
            promote();
        }
    }

    /// Fail every queued unit and release leadership
    fn reject_queue(&self, err: &QuadLogError) {
        let failed: Vec<QueuedUnit<S, L>> = {
            let mut admission = self.admission.lock();
            admission.leader_active = false;
            admission.pending.drain(..).collect()
        };
        StatsCounters::bump(&self.stats.units_failed, failed.len() as u64);
        for unit in failed {
            (unit.reject)(batch_failure(err));
        }
    }

    fn finish_batch(&self, pending: Vec<PendingCommit>, admitted: usize) {
        if pending.is_empty() {
            if let Err(err) = self.store.lock().abort() {
                error!(error = %err, "failed to roll back empty batch");
            }
            StatsCounters::bump(&self.stats.empty_batches, 1);
            debug!(units = admitted, "no unit survived, batch rolled back");
            return;
        }

        match self.commit_batch(&pending) {
            Ok(position) => {
                let count = pending.len() as u64;
                StatsCounters::bump(&self.stats.physical_commits, 1);
                StatsCounters::bump(&self.stats.units_committed, count);
                debug!(position, records = count, units = admitted, "batch committed");
                for commit in pending {
                    (commit.complete)(None);
                }
            }
            Err(err) => self.fail_batch(pending, err),
        }
    }

    /// Encode, append, commit and publish; the store transaction is left
    /// open on error
    fn commit_batch(&self, pending: &[PendingCommit]) -> Result<Position> {
        let records: Vec<CommitRecord> = pending.iter().map(|p| p.record.clone()).collect();
        let bytes = self.options.codec.encode_records(&records)?;

        let position = self.log.lock().append(&bytes)?;

        let mut store = self.store.lock();
        if let Err(err) = store.commit() {
            return Err(QuadLogError::Diverged(format!(
                "entry {} was appended but live storage failed to commit: {}",
                position, err
            )));
        }
        *self.published.write() = store.snapshot();
        Ok(position)
    }

    fn fail_batch(&self, pending: Vec<PendingCommit>, err: QuadLogError) {
        error!(error = %err, units = pending.len(), "batch failed");
        StatsCounters::bump(&self.stats.batch_failures, 1);
        StatsCounters::bump(&self.stats.units_failed, pending.len() as u64);

        let mut store = self.store.lock();
        if store.in_write_transaction() {
            if let Err(abort_err) = store.abort() {
                error!(error = %abort_err, "failed to abort write transaction");
            }
        }
        drop(store);

        if let QuadLogError::Diverged(reason) = &err {
            self.halt(reason);
        }
        for commit in pending {
            (commit.complete)(Some(batch_failure(&err)));
        }
    }

    /// Refuse every later write and leave live storage to be rebuilt
    fn halt(&self, reason: &str) {
        error!(reason, "live storage has diverged from the commit log, refusing writes");
        *self.halted.lock() = Some(format!("coordinator halted: {}", reason));
        if let Err(err) = self.store.lock().invalidate() {
            error!(error = %err, "failed to invalidate live storage, restore it manually");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryCommitLog;
    use crate::quad::Node;
    use crate::store::MemoryQuadStore;

    fn quad(s: &str) -> Quad {
        Quad::triple(Node::iri(s), Node::iri("http://ex/p"), Node::literal("o"))
    }

    fn coordinator() -> TransactionCoordinator<MemoryQuadStore, MemoryCommitLog> {
        TransactionCoordinator::new(
            MemoryQuadStore::new(),
            MemoryCommitLog::new(),
            CoordinatorOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_write_is_visible_to_later_reads() {
        let coordinator = coordinator();
        coordinator
            .execute_write(WriteContext::new(), |txn| {
                txn.add(quad("a"))?;
                Ok::<_, QuadLogError>(())
            })
            .unwrap();

        let found = coordinator
            .calculate_read(|txn| Ok::<_, QuadLogError>(txn.contains(&quad("a"))))
            .unwrap();
        assert!(found);
        assert_eq!(coordinator.position(), 1);
    }

    #[test]
    fn test_promotion_is_rejected() {
        let coordinator = coordinator();
        let inner = coordinator.clone();
        let result: std::result::Result<(), QuadLogError> = coordinator.calculate_read(|_| {
            inner.execute_write(WriteContext::new(), |txn| {
                txn.add(quad("a"))?;
                Ok(())
            })
        });
        assert!(matches!(result, Err(QuadLogError::PromotionNotAllowed)));
        assert_eq!(coordinator.position(), 0);
    }

    #[test]
    fn test_nested_write_shares_the_unit() {
        let coordinator = coordinator();
        let inner = coordinator.clone();
        coordinator
            .execute_write(WriteContext::system("outer"), move |txn| {
                txn.add(quad("outer"))?;
                inner.execute_write(WriteContext::system("inner"), |nested| {
                    nested.add(quad("inner"))?;
                    Ok::<_, QuadLogError>(())
                })?;
                // Demotion sees uncommitted state
                let seen = inner.calculate_read(|read| {
                    Ok::<_, QuadLogError>(read.contains(&quad("inner")))
                })?;
                assert!(seen);
                Ok::<_, QuadLogError>(())
            })
            .unwrap();

        assert_eq!(coordinator.position(), 1);
        assert_eq!(coordinator.snapshot().len(), 2);
        assert_eq!(coordinator.stats().units_committed, 1);

        let records = coordinator.read_records(1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.system_message.as_deref(), Some("outer"));
    }

    #[test]
    fn test_explicit_abort_rolls_back() {
        let coordinator = coordinator();
        let value = coordinator
            .calculate_write(WriteContext::new(), |txn| {
                txn.add(quad("a"))?;
                txn.abort();
                Ok::<_, QuadLogError>(7)
            })
            .unwrap();

        assert_eq!(value, 7);
        assert!(coordinator.snapshot().is_empty());
        assert_eq!(coordinator.position(), 0);
        assert_eq!(coordinator.stats().empty_batches, 1);
    }

    #[test]
    fn test_json_codec_forces_single_unit_batches() {
        let options = CoordinatorOptions::default()
            .with_codec(CodecKind::Json)
            .with_max_batch_size(50);
        assert_eq!(options.effective_batch_size(), 1);
        assert_eq!(
            CoordinatorOptions::default().with_max_batch_size(0).effective_batch_size(),
            1
        );
    }
}
