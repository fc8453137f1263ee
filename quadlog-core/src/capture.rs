// quadlog-core/src/capture.rs
//! Per-unit change capture
//!
//! The quad store reports every mutation to one registered
//! `QuadChangeListener`. The coordinator registers a `CaptureListener` and
//! opens a scope around each logical unit, so a closed scope holds exactly
//! that unit's adds and deletes, in order.
//!
//! ```text
//! QuadStore::add / delete
//!      ↓ on_change(action, quad)
//! CaptureListener ──► ChangeCapture (open scope)
//!                          ↓ close_scope
//!                     CapturedChanges ──► net()  → CommitRecord
//!                                     └─► undo() → inverse ops, reverse order
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::quad::Quad;
use crate::record::{CommitMetadata, CommitRecord};
use crate::store::QuadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadAction {
    Add,
    Delete,
}

impl QuadAction {
    pub fn inverse(self) -> Self {
        match self {
            QuadAction::Add => QuadAction::Delete,
            QuadAction::Delete => QuadAction::Add,
        }
    }
}

/// Per-quad mutation hook of a quad store
///
/// Called once for every quad actually inserted or removed.
pub trait QuadChangeListener: Send {
    fn on_change(&mut self, action: QuadAction, quad: &Quad);
}

/// Scoped recorder of quad changes
///
/// Notifications outside an open scope are ignored; this is what keeps
/// rollbacks and restores from recording themselves.
#[derive(Debug, Default)]
pub struct ChangeCapture {
    scope: Option<Vec<(QuadAction, Quad)>>,
}

impl ChangeCapture {
    pub fn new() -> Self {
        ChangeCapture::default()
    }

    /// Start recording; any previously open scope is discarded
    pub fn open_scope(&mut self) {
        self.scope = Some(Vec::new());
    }

    pub fn is_open(&self) -> bool {
        self.scope.is_some()
    }

    pub fn record(&mut self, action: QuadAction, quad: &Quad) {
        if let Some(events) = self.scope.as_mut() {
            events.push((action, quad.clone()));
        }
    }

    /// Stop recording and hand back what the scope saw
    pub fn close_scope(&mut self) -> CapturedChanges {
        CapturedChanges {
            events: self.scope.take().unwrap_or_default(),
        }
    }
}

/// Ordered quad changes of one closed scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedChanges {
    events: Vec<(QuadAction, Quad)>,
}

impl CapturedChanges {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[(QuadAction, Quad)] {
        &self.events
    }

    /// Reduce the event sequence to disjoint (added, removed) sets
    ///
    /// Added then removed cancels out of both sets; removed then re-added
    /// nets to added.
    pub fn net(&self) -> (BTreeSet<Quad>, BTreeSet<Quad>) {
        let mut added = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for (action, quad) in &self.events {
            match action {
                QuadAction::Add => {
                    removed.remove(quad);
                    added.insert(quad.clone());
                }
                QuadAction::Delete => {
                    if !added.remove(quad) {
                        removed.insert(quad.clone());
                    }
                }
            }
        }
        (added, removed)
    }

    pub fn into_record(self, metadata: CommitMetadata) -> CommitRecord {
        let (added, removed) = self.net();
        CommitRecord::new(metadata, added, removed)
    }

    /// Revert these changes in `store` by applying inverse operations in
    /// reverse order
    pub fn undo<S: QuadStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        for (action, quad) in self.events.iter().rev() {
            match action.inverse() {
                QuadAction::Add => store.add(quad.clone())?,
                QuadAction::Delete => store.delete(quad)?,
            };
        }
        Ok(())
    }
}

/// Listener registered with the store, forwarding into a shared capture
#[derive(Debug, Clone)]
pub struct CaptureListener {
    capture: Arc<Mutex<ChangeCapture>>,
}

impl CaptureListener {
    pub fn new(capture: Arc<Mutex<ChangeCapture>>) -> Self {
        CaptureListener { capture }
    }
}

impl QuadChangeListener for CaptureListener {
    fn on_change(&mut self, action: QuadAction, quad: &Quad) {
        self.capture.lock().record(action, quad);
    }
}
