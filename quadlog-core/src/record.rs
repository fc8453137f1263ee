// quadlog-core/src/record.rs
// Commit records: the durable unit of change

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::quad::Quad;

/// Who changed the graph, why, and when
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub user_message: Option<String>,
    pub system_message: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Net quad changes of one logical unit plus its metadata
///
/// `added` and `removed` are disjoint; `new` enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub metadata: CommitMetadata,
    pub added: BTreeSet<Quad>,
    pub removed: BTreeSet<Quad>,
}

impl CommitRecord {
    pub fn new(metadata: CommitMetadata, added: BTreeSet<Quad>, removed: BTreeSet<Quad>) -> Self {
        let mut record = CommitRecord {
            metadata,
            added,
            removed,
        };
        record.normalize();
        record
    }

    /// Drop quads present in both sets from both sets
    pub fn normalize(&mut self) {
        let both: Vec<Quad> = self.added.intersection(&self.removed).cloned().collect();
        for quad in &both {
            self.added.remove(quad);
            self.removed.remove(quad);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Actor and messages attached to a write unit
///
/// Passed explicitly to `calculate_write` / `execute_write`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_message: Option<String>,
    pub system_message: Option<String>,
}

impl WriteContext {
    pub fn new() -> Self {
        WriteContext::default()
    }

    /// Context for writes performed by the system itself
    pub fn system(message: impl Into<String>) -> Self {
        WriteContext {
            system_message: Some(message.into()),
            ..WriteContext::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn to_metadata(&self, timestamp: i64) -> CommitMetadata {
        CommitMetadata {
            user_message: self.user_message.clone(),
            system_message: self.system_message.clone(),
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            timestamp,
        }
    }
}
