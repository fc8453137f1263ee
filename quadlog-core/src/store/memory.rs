// store/memory.rs
//! In-memory quad store
//!
//! Committed state is an `Arc<BTreeSet<Quad>>` shared with every snapshot
//! handed out. A write transaction starts from the same `Arc` and clones the
//! set only on its first change, so readers never see uncommitted quads.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::capture::{QuadAction, QuadChangeListener};
use crate::error::{QuadLogError, Result};
use crate::quad::{Quad, QuadPattern};

use super::{DatasetView, QuadStore};

#[derive(Default)]
pub struct MemoryQuadStore {
    committed: Arc<BTreeSet<Quad>>,
    /// Working set of the open write transaction
    live: Option<Arc<BTreeSet<Quad>>>,
    listener: Option<Box<dyn QuadChangeListener>>,
}

impl MemoryQuadStore {
    pub fn new() -> Self {
        MemoryQuadStore::default()
    }

    /// Store whose committed state is `view`
    pub fn from_view(view: &DatasetView) -> Self {
        MemoryQuadStore {
            committed: Arc::new(view.quads().clone()),
            ..MemoryQuadStore::default()
        }
    }

    fn current(&self) -> &BTreeSet<Quad> {
        self.live.as_deref().unwrap_or(&self.committed)
    }

    fn notify(&mut self, action: QuadAction, quad: &Quad) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_change(action, quad);
        }
    }
}

impl fmt::Debug for MemoryQuadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQuadStore")
            .field("committed", &self.committed.len())
            .field("in_write_transaction", &self.live.is_some())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl QuadStore for MemoryQuadStore {
    fn begin_write(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Err(QuadLogError::WriteTransactionActive);
        }
        self.live = Some(Arc::clone(&self.committed));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let live = self.live.take().ok_or(QuadLogError::NoWriteTransaction)?;
        self.committed = live;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.live.take().ok_or(QuadLogError::NoWriteTransaction)?;
        Ok(())
    }

    fn in_write_transaction(&self) -> bool {
        self.live.is_some()
    }

    fn add(&mut self, quad: Quad) -> Result<bool> {
        let live = self.live.as_mut().ok_or(QuadLogError::NoWriteTransaction)?;
        if live.contains(&quad) {
            return Ok(false);
        }
        Arc::make_mut(live).insert(quad.clone());
        self.notify(QuadAction::Add, &quad);
        Ok(true)
    }

    fn delete(&mut self, quad: &Quad) -> Result<bool> {
        let live = self.live.as_mut().ok_or(QuadLogError::NoWriteTransaction)?;
        if !live.contains(quad) {
            return Ok(false);
        }
        Arc::make_mut(live).remove(quad);
        self.notify(QuadAction::Delete, quad);
        Ok(true)
    }

    fn set_change_listener(&mut self, listener: Option<Box<dyn QuadChangeListener>>) {
        self.listener = listener;
    }

    fn contains(&self, quad: &Quad) -> bool {
        self.current().contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.current()
            .iter()
            .filter(|quad| pattern.matches(quad))
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.current().len()
    }

    fn snapshot(&self) -> DatasetView {
        DatasetView::new(Arc::clone(&self.committed))
    }

    fn live_view(&self) -> DatasetView {
        DatasetView::new(Arc::clone(self.live.as_ref().unwrap_or(&self.committed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::Node;

    fn quad(s: &str) -> Quad {
        Quad::triple(Node::iri(s), Node::iri("http://ex/p"), Node::iri("http://ex/o"))
    }

    #[test]
    fn test_mutation_requires_write_transaction() {
        let mut store = MemoryQuadStore::new();
        assert!(matches!(store.add(quad("a")), Err(QuadLogError::NoWriteTransaction)));
        assert!(matches!(store.commit(), Err(QuadLogError::NoWriteTransaction)));
    }

    #[test]
    fn test_single_write_transaction() {
        let mut store = MemoryQuadStore::new();
        store.begin_write().unwrap();
        assert!(matches!(store.begin_write(), Err(QuadLogError::WriteTransactionActive)));
    }

    #[test]
    fn test_snapshot_isolated_from_uncommitted_changes() {
        let mut store = MemoryQuadStore::new();
        store.begin_write().unwrap();
        assert!(store.add(quad("a")).unwrap());
        assert!(!store.add(quad("a")).unwrap());

        assert!(store.snapshot().is_empty());
        assert!(store.live_view().contains(&quad("a")));

        store.commit().unwrap();
        assert!(store.snapshot().contains(&quad("a")));
    }

    #[test]
    fn test_abort_discards_changes() {
        let mut store = MemoryQuadStore::new();
        store.begin_write().unwrap();
        store.add(quad("a")).unwrap();
        store.abort().unwrap();
        assert!(store.is_empty());
        assert!(!store.in_write_transaction());
    }

    #[test]
    fn test_find_by_subject() {
        let mut store = MemoryQuadStore::new();
        store.begin_write().unwrap();
        store.add(quad("a")).unwrap();
        store.add(quad("b")).unwrap();
        store.commit().unwrap();

        let found = store.find(&QuadPattern::any().subject(Node::iri("b")));
        assert_eq!(found, vec![quad("b")]);
    }
}
