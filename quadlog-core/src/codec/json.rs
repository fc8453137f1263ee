// codec/json.rs
// Whole-record JSON codec (one commit record per entry)

use crate::error::{QuadLogError, Result};
use crate::listener::{emit_records, RecordCollector, TransactionListener};
use crate::quad::Quad;
use crate::record::{CommitMetadata, CommitRecord};

/// Buffers the events and serializes the single resulting record
#[derive(Debug, Default)]
pub struct JsonEncoder {
    collector: RecordCollector,
    aborted: bool,
}

impl JsonEncoder {
    pub fn new() -> Self {
        JsonEncoder::default()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        let mut records = self.collector.into_records();
        if records.len() != 1 {
            return Err(QuadLogError::Codec(format!(
                "whole-record format holds exactly one record, got {}",
                records.len()
            )));
        }
        let record = records.remove(0);
        Ok(serde_json::to_vec(&record)?)
    }
}

impl TransactionListener for JsonEncoder {
    fn on_begin(&mut self) -> Result<()> {
        self.collector = RecordCollector::new();
        self.aborted = false;
        self.collector.on_begin()
    }

    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()> {
        self.collector.on_metadata(metadata)
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        self.collector.on_add(quad)
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        self.collector.on_delete(quad)
    }

    fn on_commit(&mut self) -> Result<()> {
        self.collector.on_commit()
    }

    fn on_abort(&mut self) -> Result<()> {
        self.aborted = true;
        self.collector.on_abort()
    }
}

pub(crate) fn decode(data: &[u8], listener: &mut dyn TransactionListener) -> Result<()> {
    let record: CommitRecord = serde_json::from_slice(data).map_err(|e| {
        if e.is_eof() {
            QuadLogError::Truncated(e.to_string())
        } else {
            QuadLogError::Codec(e.to_string())
        }
    })?;
    emit_records(std::slice::from_ref(&record), listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::Node;

    #[test]
    fn test_truncated_json_is_detected() {
        let mut record = CommitRecord::default();
        record.added.insert(Quad::triple(Node::iri("s"), Node::iri("p"), Node::literal("o")));
        let bytes = serde_json::to_vec(&record).unwrap();

        let result = decode(&bytes[..bytes.len() / 2], &mut RecordCollector::new());
        assert!(matches!(result, Err(QuadLogError::Truncated(_))));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let result = decode(b"{\"metadata\": 12}", &mut RecordCollector::new());
        assert!(matches!(result, Err(QuadLogError::Codec(_))));
    }
}
