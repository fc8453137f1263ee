// codec/binary.rs
// Compact framed binary codec

use crate::error::{QuadLogError, Result};
use crate::listener::TransactionListener;
use crate::quad::Quad;
use crate::record::CommitMetadata;

/// Stream header
pub const BINARY_MAGIC: &[u8; 4] = b"QLB1";

/// Frame header: 1 (type) + 4 (len)
const FRAME_HEADER_SIZE: usize = 5;

/// Maximum frame payload: 16MB
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    Begin = 0x01,
    Metadata = 0x02,
    Add = 0x03,
    Delete = 0x04,
    Commit = 0x05,
}

impl FrameType {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Begin),
            0x02 => Ok(FrameType::Metadata),
            0x03 => Ok(FrameType::Add),
            0x04 => Ok(FrameType::Delete),
            0x05 => Ok(FrameType::Commit),
            other => Err(QuadLogError::Codec(format!("unknown frame type 0x{:02x}", other))),
        }
    }
}

fn frame_checksum(frame_type: FrameType, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[frame_type as u8]);
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Binary format:
/// - magic: 4 bytes (`QLB1`)
/// - frames, each:
///   - frame_type: 1 byte
///   - payload_len: 4 bytes (u32 LE)
///   - payload: bincode of `CommitMetadata` or `Quad`, empty for Begin/Commit
///   - checksum: 4 bytes (CRC32 over type, len and payload)
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    buf: Vec<u8>,
    aborted: bool,
}

impl BinaryEncoder {
    pub fn new() -> Self {
        BinaryEncoder::default()
    }

    fn write_frame(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(QuadLogError::Codec(format!(
                "frame of {} bytes exceeds limit",
                payload.len()
            )));
        }
        self.buf.push(frame_type as u8);
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.buf
            .extend_from_slice(&frame_checksum(frame_type, payload).to_le_bytes());
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        Ok(self.buf)
    }
}

impl TransactionListener for BinaryEncoder {
    fn on_begin(&mut self) -> Result<()> {
        self.buf.clear();
        self.aborted = false;
        self.buf.extend_from_slice(BINARY_MAGIC);
        self.write_frame(FrameType::Begin, &[])
    }

    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()> {
        let payload = bincode::serialize(metadata)?;
        self.write_frame(FrameType::Metadata, &payload)
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        let payload = bincode::serialize(quad)?;
        self.write_frame(FrameType::Add, &payload)
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        let payload = bincode::serialize(quad)?;
        self.write_frame(FrameType::Delete, &payload)
    }

    fn on_commit(&mut self) -> Result<()> {
        self.write_frame(FrameType::Commit, &[])
    }

    fn on_abort(&mut self) -> Result<()> {
        self.buf.clear();
        self.aborted = true;
        Ok(())
    }
}

/// Read one frame starting at `offset`; returns the frame and the next offset
fn read_frame(data: &[u8], offset: usize) -> Result<(FrameType, &[u8], usize)> {
    if data.len() < offset + FRAME_HEADER_SIZE {
        return Err(QuadLogError::Truncated("partial frame header".to_string()));
    }
    let frame_type = FrameType::from_u8(data[offset])?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[offset + 1..offset + FRAME_HEADER_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;

    // Prevent OOM from a malformed length
    if len > MAX_FRAME_SIZE {
        return Err(QuadLogError::Codec(format!("frame length {} exceeds limit", len)));
    }

    let payload_start = offset + FRAME_HEADER_SIZE;
    let payload_end = payload_start + len;
    if data.len() < payload_end + 4 {
        return Err(QuadLogError::Truncated("partial frame body".to_string()));
    }
    let payload = &data[payload_start..payload_end];

    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[payload_end..payload_end + 4]);
    if u32::from_le_bytes(crc_bytes) != frame_checksum(frame_type, payload) {
        return Err(QuadLogError::Codec("frame checksum mismatch".to_string()));
    }

    Ok((frame_type, payload, payload_end + 4))
}

pub(crate) fn decode(data: &[u8], listener: &mut dyn TransactionListener) -> Result<()> {
    if data.len() < BINARY_MAGIC.len() {
        return Err(QuadLogError::Truncated("missing stream header".to_string()));
    }
    if &data[..BINARY_MAGIC.len()] != BINARY_MAGIC {
        return Err(QuadLogError::Codec("bad stream header".to_string()));
    }

    let mut offset = BINARY_MAGIC.len();
    let mut begun = false;
    let mut in_section = false;

    loop {
        let (frame_type, payload, next) = read_frame(data, offset)?;
        offset = next;

        match frame_type {
            FrameType::Begin => {
                if begun {
                    return Err(QuadLogError::Codec("duplicate begin frame".to_string()));
                }
                begun = true;
                listener.on_begin()?;
            }
            _ if !begun => {
                return Err(QuadLogError::Codec("stream does not start with begin".to_string()));
            }
            FrameType::Metadata => {
                let metadata: CommitMetadata = bincode::deserialize(payload)?;
                in_section = true;
                listener.on_metadata(&metadata)?;
            }
            FrameType::Add | FrameType::Delete if !in_section => {
                return Err(QuadLogError::Codec("quad frame before metadata".to_string()));
            }
            FrameType::Add => {
                let quad: Quad = bincode::deserialize(payload)?;
                listener.on_add(&quad)?;
            }
            FrameType::Delete => {
                let quad: Quad = bincode::deserialize(payload)?;
                listener.on_delete(&quad)?;
            }
            FrameType::Commit => {
                if offset != data.len() {
                    return Err(QuadLogError::Codec(format!(
                        "{} trailing bytes after commit",
                        data.len() - offset
                    )));
                }
                return listener.on_commit();
            }
        }
    }
}
