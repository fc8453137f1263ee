// quadlog-core/src/listener.rs
// Event interface between commit records and codecs

use crate::error::{QuadLogError, Result};
use crate::quad::Quad;
use crate::record::{CommitMetadata, CommitRecord};

/// Receives the events of one physical commit
///
/// A well-formed sequence is `on_begin`, then one or more sections of
/// `on_metadata` followed by `on_add`* and `on_delete`*, then `on_commit`.
/// `on_abort` may arrive at any point instead of `on_commit`.
pub trait TransactionListener {
    fn on_begin(&mut self) -> Result<()>;
    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()>;
    fn on_add(&mut self, quad: &Quad) -> Result<()>;
    fn on_delete(&mut self, quad: &Quad) -> Result<()>;
    fn on_commit(&mut self) -> Result<()>;
    fn on_abort(&mut self) -> Result<()>;
}

/// Emit the event sequence for one physical commit holding `records`
pub fn emit_records(records: &[CommitRecord], listener: &mut dyn TransactionListener) -> Result<()> {
    listener.on_begin()?;
    for record in records {
        listener.on_metadata(&record.metadata)?;
        for quad in &record.added {
            listener.on_add(quad)?;
        }
        for quad in &record.removed {
            listener.on_delete(quad)?;
        }
    }
    listener.on_commit()
}

/// Listener that rebuilds commit records from events
#[derive(Debug, Default)]
pub struct RecordCollector {
    records: Vec<CommitRecord>,
    current: Option<CommitRecord>,
    begun: bool,
    committed: bool,
}

impl RecordCollector {
    pub fn new() -> Self {
        RecordCollector::default()
    }

    /// True once `on_commit` has been received
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Records of a committed stream; empty after an abort
    pub fn into_records(self) -> Vec<CommitRecord> {
        self.records
    }

    fn current_mut(&mut self, event: &str) -> Result<&mut CommitRecord> {
        self.current
            .as_mut()
            .ok_or_else(|| QuadLogError::Codec(format!("{} before metadata", event)))
    }
}

impl TransactionListener for RecordCollector {
    fn on_begin(&mut self) -> Result<()> {
        if self.begun {
            return Err(QuadLogError::Codec("nested begin".to_string()));
        }
        self.begun = true;
        Ok(())
    }

    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()> {
        if !self.begun {
            return Err(QuadLogError::Codec("metadata before begin".to_string()));
        }
        if let Some(done) = self.current.take() {
            self.records.push(done);
        }
        self.current = Some(CommitRecord {
            metadata: metadata.clone(),
            ..CommitRecord::default()
        });
        Ok(())
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        self.current_mut("add")?.added.insert(quad.clone());
        Ok(())
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        self.current_mut("delete")?.removed.insert(quad.clone());
        Ok(())
    }

    fn on_commit(&mut self) -> Result<()> {
        if let Some(done) = self.current.take() {
            self.records.push(done);
        }
        self.committed = true;
        Ok(())
    }

    fn on_abort(&mut self) -> Result<()> {
        self.records.clear();
        self.current = None;
        Ok(())
    }
}
