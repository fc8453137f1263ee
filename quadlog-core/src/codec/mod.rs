// codec/mod.rs
// Commit codecs
//
// This module provides:
// - `CodecKind`: the configured wire format (binary, RDF Patch text, JSON)
// - `Encoder`: streaming encoder for one physical commit
// - `BinaryEncoder` / `PatchEncoder` / `JsonEncoder`: per-format encoders

mod binary;
mod json;
mod patch;

pub use binary::{BinaryEncoder, BINARY_MAGIC, MAX_FRAME_SIZE};
pub use json::JsonEncoder;
pub use patch::PatchEncoder;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::listener::{emit_records, RecordCollector, TransactionListener};
use crate::quad::Quad;
use crate::record::{CommitMetadata, CommitRecord};

/// Wire format of a physical commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Framed binary events with per-frame CRC32
    #[default]
    Binary,
    /// RDF Patch text
    Patch,
    /// One commit record as one JSON value
    Json,
}

impl CodecKind {
    pub fn encoder(self) -> Encoder {
        match self {
            CodecKind::Binary => Encoder::Binary(BinaryEncoder::new()),
            CodecKind::Patch => Encoder::Patch(PatchEncoder::new()),
            CodecKind::Json => Encoder::Json(JsonEncoder::new()),
        }
    }

    /// Replay an encoded commit as events
    pub fn decode(self, bytes: &[u8], listener: &mut dyn TransactionListener) -> Result<()> {
        match self {
            CodecKind::Binary => binary::decode(bytes, listener),
            CodecKind::Patch => patch::decode(bytes, listener),
            CodecKind::Json => json::decode(bytes, listener),
        }
    }

    pub fn encode_records(self, records: &[CommitRecord]) -> Result<Vec<u8>> {
        let mut encoder = self.encoder();
        emit_records(records, &mut encoder)?;
        encoder.finish()
    }

    pub fn decode_records(self, bytes: &[u8]) -> Result<Vec<CommitRecord>> {
        let mut collector = RecordCollector::new();
        self.decode(bytes, &mut collector)?;
        Ok(collector.into_records())
    }

    /// Whether one encoded commit can carry more than one record
    pub fn supports_batches(self) -> bool {
        !matches!(self, CodecKind::Json)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::Binary => "binary",
            CodecKind::Patch => "patch",
            CodecKind::Json => "json",
        }
    }
}

/// Streaming encoder for the configured format
#[derive(Debug)]
pub enum Encoder {
    Binary(BinaryEncoder),
    Patch(PatchEncoder),
    Json(JsonEncoder),
}

impl Encoder {
    /// Encoded bytes; empty if the commit was aborted
    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            Encoder::Binary(e) => e.finish(),
            Encoder::Patch(e) => e.finish(),
            Encoder::Json(e) => e.finish(),
        }
    }

    fn listener(&mut self) -> &mut dyn TransactionListener {
        match self {
            Encoder::Binary(e) => e,
            Encoder::Patch(e) => e,
            Encoder::Json(e) => e,
        }
    }
}

impl TransactionListener for Encoder {
    fn on_begin(&mut self) -> Result<()> {
        self.listener().on_begin()
    }

    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()> {
        self.listener().on_metadata(metadata)
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        self.listener().on_add(quad)
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        self.listener().on_delete(quad)
    }

    fn on_commit(&mut self) -> Result<()> {
        self.listener().on_commit()
    }

    fn on_abort(&mut self) -> Result<()> {
        self.listener().on_abort()
    }
}
