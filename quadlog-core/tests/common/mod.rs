// common/mod.rs
// Shared fixtures for integration tests: quads, coordinators, file damage

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quadlog_core::{
    CodecKind, CommitLog, CoordinatorOptions, DatasetView, MemoryCommitLog, MemoryQuadStore, Node,
    Position, Quad, QuadChangeListener, QuadLogError, QuadPattern, QuadStore,
    TransactionCoordinator,
};

pub type MemoryCoordinator = TransactionCoordinator<MemoryQuadStore, FlakyLog>;

/// Quad in the default graph with IRI subject `http://ex/<name>`
pub fn quad(name: &str) -> Quad {
    Quad::triple(
        Node::iri(format!("http://ex/{}", name)),
        Node::iri("http://ex/p"),
        Node::literal(name),
    )
}

pub fn coordinator(options: CoordinatorOptions) -> (MemoryCoordinator, Arc<AtomicBool>) {
    let log = FlakyLog::new();
    let fail = log.fail_switch();
    let coordinator = TransactionCoordinator::new(MemoryQuadStore::new(), log, options).unwrap();
    (coordinator, fail)
}

pub type FlakyStoreCoordinator = TransactionCoordinator<FlakyStore<MemoryQuadStore>, MemoryCommitLog>;

/// Coordinator over a `FlakyStore`; returns its begin and commit switches
pub fn flaky_store_coordinator(
    options: CoordinatorOptions,
) -> (FlakyStoreCoordinator, Arc<AtomicBool>, Arc<AtomicBool>) {
    let store = FlakyStore::new(MemoryQuadStore::new());
    let (begin, commit) = (store.begin_switch(), store.commit_switch());
    let coordinator = TransactionCoordinator::new(store, MemoryCommitLog::new(), options).unwrap();
    (coordinator, begin, commit)
}

pub fn binary_coordinator() -> MemoryCoordinator {
    coordinator(CoordinatorOptions::default().with_codec(CodecKind::Binary)).0
}

/// Spin until `coordinator` has `n` queued write units
pub fn wait_for_queued<S, L>(coordinator: &TransactionCoordinator<S, L>, n: usize)
where
    S: quadlog_core::QuadStore + 'static,
    L: CommitLog + 'static,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while coordinator.queued() < n {
        assert!(Instant::now() < deadline, "timed out waiting for {} queued units", n);
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// FAILING COMMIT LOG
// =============================================================================

/// In-memory log whose appends fail while its switch is on
#[derive(Debug)]
pub struct FlakyLog {
    inner: MemoryCommitLog,
    fail: Arc<AtomicBool>,
}

impl FlakyLog {
    pub fn new() -> Self {
        FlakyLog {
            inner: MemoryCommitLog::new(),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail)
    }
}

impl CommitLog for FlakyLog {
    fn append(&mut self, bytes: &[u8]) -> quadlog_core::Result<Position> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QuadLogError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.append(bytes)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read(&self, position: Position) -> quadlog_core::Result<Vec<u8>> {
        self.inner.read(position)
    }
}

// =============================================================================
// FAILING QUAD STORE
// =============================================================================

/// Store wrapper whose `begin_write` and `commit` fail while their switches
/// are on
pub struct FlakyStore<S> {
    inner: S,
    fail_begin: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

impl<S: QuadStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        FlakyStore {
            inner,
            fail_begin: Arc::new(AtomicBool::new(false)),
            fail_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn begin_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_begin)
    }

    pub fn commit_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_commit)
    }
}

impl<S: QuadStore> QuadStore for FlakyStore<S> {
    fn begin_write(&mut self) -> quadlog_core::Result<()> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(QuadLogError::Storage("store is read-only".to_string()));
        }
        self.inner.begin_write()
    }

    fn commit(&mut self) -> quadlog_core::Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(QuadLogError::Storage("device lost".to_string()));
        }
        self.inner.commit()
    }

    fn abort(&mut self) -> quadlog_core::Result<()> {
        self.inner.abort()
    }

    fn in_write_transaction(&self) -> bool {
        self.inner.in_write_transaction()
    }

    fn invalidate(&mut self) -> quadlog_core::Result<()> {
        self.inner.invalidate()
    }

    fn add(&mut self, quad: Quad) -> quadlog_core::Result<bool> {
        self.inner.add(quad)
    }

    fn delete(&mut self, quad: &Quad) -> quadlog_core::Result<bool> {
        self.inner.delete(quad)
    }

    fn set_change_listener(&mut self, listener: Option<Box<dyn QuadChangeListener>>) {
        self.inner.set_change_listener(listener)
    }

    fn contains(&self, quad: &Quad) -> bool {
        self.inner.contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.inner.find(pattern)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn snapshot(&self) -> DatasetView {
        self.inner.snapshot()
    }

    fn live_view(&self) -> DatasetView {
        self.inner.live_view()
    }
}

// =============================================================================
// FILE DAMAGE
// =============================================================================

/// Truncate file to specified length
pub fn truncate_file(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

/// Flip a specific bit in a file at given offset
pub fn corrupt_bit(path: &Path, offset: u64, bit: u8) -> std::io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    byte[0] ^= 1 << bit;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

/// Get file length
pub fn file_len(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

// =============================================================================
// BATCH GATE
// =============================================================================

/// Leader unit that keeps its physical transaction open until released, so
/// units submitted meanwhile join the same batch
///
/// The gate unit aborts itself and never produces a record.
pub struct BatchGate {
    release: crossbeam::channel::Sender<()>,
    handle: thread::JoinHandle<Result<(), QuadLogError>>,
}

impl BatchGate {
    pub fn open<S, L>(coordinator: &TransactionCoordinator<S, L>) -> Self
    where
        S: quadlog_core::QuadStore + 'static,
        L: CommitLog + 'static,
    {
        let (started_tx, started_rx) = crossbeam::channel::bounded(1);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(1);
        let coordinator = coordinator.clone();

        let handle = thread::spawn(move || {
            coordinator.execute_write(quadlog_core::WriteContext::system("gate"), move |txn| {
                txn.abort();
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
        });
        started_rx.recv().unwrap();

        BatchGate {
            release: release_tx,
            handle,
        }
    }

    pub fn release(self) {
        self.release.send(()).unwrap();
        self.handle.join().unwrap().unwrap();
    }
}
