// quadlog-core/src/store/mod.rs
//! Quad store abstraction
//!
//! The coordinator drives the live graph only through this interface. A
//! store offers a single level of write transaction, immutable committed
//! snapshots for readers, and a per-quad change hook.
//!
//! # Architecture
//!
//! ```text
//! QuadStore trait
//!   ├── MemoryQuadStore (copy-on-write BTreeSet, no persistence)
//!   └── FileQuadStore   (MemoryQuadStore + dataset.bin rewritten on commit)
//! ```

mod file;
mod memory;

pub use file::{FileQuadStore, LiveStorage, DATASET_FILE};
pub use memory::MemoryQuadStore;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::capture::QuadChangeListener;
use crate::error::Result;
use crate::quad::{Quad, QuadPattern};

/// Transactional quad store consumed by the coordinator
///
/// `add` and `delete` are only valid inside a write transaction and report
/// whether the quad set actually changed. Queries read the live state,
/// which inside a write transaction includes its uncommitted changes.
pub trait QuadStore: Send {
    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    fn begin_write(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    /// Discard every change since `begin_write`
    fn abort(&mut self) -> Result<()>;

    fn in_write_transaction(&self) -> bool;

    /// Mark persisted state as unusable so the next open rebuilds it from
    /// the commit log; a no-op for stores that persist nothing
    fn invalidate(&mut self) -> Result<()> {
        Ok(())
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    fn add(&mut self, quad: Quad) -> Result<bool>;

    fn delete(&mut self, quad: &Quad) -> Result<bool>;

    /// Register the single change listener, replacing any previous one
    fn set_change_listener(&mut self, listener: Option<Box<dyn QuadChangeListener>>);

    // ========================================================================
    // QUERIES
    // ========================================================================

    fn contains(&self, quad: &Quad) -> bool;

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last committed state
    fn snapshot(&self) -> DatasetView;

    /// Current state, including uncommitted changes
    fn live_view(&self) -> DatasetView;
}

/// Immutable, cheaply cloned view of a quad set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetView {
    quads: Arc<BTreeSet<Quad>>,
}

impl DatasetView {
    pub fn new(quads: Arc<BTreeSet<Quad>>) -> Self {
        DatasetView { quads }
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.quads.contains(quad)
    }

    pub fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.quads
            .iter()
            .filter(|quad| pattern.matches(quad))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.quads.iter()
    }

    pub fn quads(&self) -> &BTreeSet<Quad> {
        &self.quads
    }
}

impl FromIterator<Quad> for DatasetView {
    fn from_iter<I: IntoIterator<Item = Quad>>(iter: I) -> Self {
        DatasetView::new(Arc::new(iter.into_iter().collect()))
    }
}
