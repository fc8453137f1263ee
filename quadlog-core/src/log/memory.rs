// log/memory.rs
//! In-memory commit log
//!
//! Same contract as `LocalCommitLog` without persistence. Useful for tests
//! and for embedding the coordinator where durability is provided elsewhere.

use crate::error::{QuadLogError, Result};

use super::{CommitLog, Position};

#[derive(Debug, Default, Clone)]
pub struct MemoryCommitLog {
    entries: Vec<Vec<u8>>,
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        MemoryCommitLog::default()
    }

    /// Log pre-populated with `entries`, Position 1 first
    pub fn from_entries(entries: Vec<Vec<u8>>) -> Self {
        MemoryCommitLog { entries }
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }
}

impl CommitLog for MemoryCommitLog {
    fn append(&mut self, bytes: &[u8]) -> Result<Position> {
        self.entries.push(bytes.to_vec());
        Ok(self.entries.len() as Position)
    }

    fn size(&self) -> u64 {
        self.entries.len() as u64
    }

    fn read(&self, position: Position) -> Result<Vec<u8>> {
        if position == 0 || position > self.size() {
            return Err(QuadLogError::PositionOutOfRange {
                position,
                size: self.size(),
            });
        }
        Ok(self.entries[(position - 1) as usize].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_positions() {
        let mut log = MemoryCommitLog::new();
        assert_eq!(log.append(b"a").unwrap(), 1);
        assert_eq!(log.append(b"b").unwrap(), 2);
        assert_eq!(log.read(2).unwrap(), b"b".to_vec());
        assert!(log.read(3).is_err());
        assert!(log.read(0).is_err());
    }
}
