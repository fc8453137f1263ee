// log/entry.rs
// Checksummed envelope around one commit log entry

use std::fmt;

/// File header
pub const ENTRY_MAGIC: &[u8; 4] = b"QLTX";

const ENTRY_VERSION: u8 = 1;

/// Header size: 4 (magic) + 1 (version) + 4 (len) = 9 bytes
pub const ENTRY_HEADER_SIZE: usize = 9;

/// Maximum entry payload: 256MB
pub const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// Why an entry file could not be read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDefect {
    /// The file ends early (crash mid-append)
    Truncated,
    /// The file is complete but its content is wrong
    Corrupt(String),
}

impl fmt::Display for EntryDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryDefect::Truncated => write!(f, "entry is truncated"),
            EntryDefect::Corrupt(reason) => write!(f, "{}", reason),
        }
    }
}

/// One entry of the commit log
///
/// Binary format:
/// - magic: 4 bytes (`QLTX`)
/// - version: 1 byte
/// - data_len: 4 bytes (u32 LE)
/// - data: variable (codec bytes, opaque here)
/// - checksum: 4 bytes (CRC32 of data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub data: Vec<u8>,
    pub checksum: u32,
}

impl LogEntry {
    pub fn new(data: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&data);
        LogEntry { data, checksum }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + self.data.len() + 4);
        buf.extend_from_slice(ENTRY_MAGIC);
        buf.push(ENTRY_VERSION);
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, EntryDefect> {
        if bytes.len() < ENTRY_HEADER_SIZE {
            return Err(EntryDefect::Truncated);
        }
        if &bytes[..4] != ENTRY_MAGIC {
            return Err(EntryDefect::Corrupt("bad entry magic".to_string()));
        }
        if bytes[4] != ENTRY_VERSION {
            return Err(EntryDefect::Corrupt(format!(
                "unsupported entry version {}",
                bytes[4]
            )));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[5..9]);
        let data_len = u32::from_le_bytes(len_bytes) as usize;

        // Prevent OOM from a malformed length
        if data_len > MAX_ENTRY_SIZE {
            return Err(EntryDefect::Corrupt(format!(
                "entry length {} exceeds limit",
                data_len
            )));
        }

        let expected = ENTRY_HEADER_SIZE + data_len + 4;
        if bytes.len() < expected {
            return Err(EntryDefect::Truncated);
        }
        if bytes.len() > expected {
            return Err(EntryDefect::Corrupt(format!(
                "{} unexpected trailing bytes",
                bytes.len() - expected
            )));
        }

        let data = bytes[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + data_len].to_vec();
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[expected - 4..expected]);
        let checksum = u32::from_le_bytes(crc_bytes);

        let entry = LogEntry { data, checksum };
        if !entry.verify() {
            return Err(EntryDefect::Corrupt("checksum mismatch".to_string()));
        }
        Ok(entry)
    }

    pub fn verify(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialize_deserialize() {
        let entry = LogEntry::new(b"encoded commit".to_vec());
        let bytes = entry.serialize();
        assert_eq!(LogEntry::deserialize(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_every_prefix_is_truncated() {
        let bytes = LogEntry::new(b"payload".to_vec()).serialize();
        for cut in 0..bytes.len() {
            assert_eq!(
                LogEntry::deserialize(&bytes[..cut]),
                Err(EntryDefect::Truncated),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = LogEntry::new(b"payload".to_vec()).serialize();
        bytes[ENTRY_HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            LogEntry::deserialize(&bytes),
            Err(EntryDefect::Corrupt(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = LogEntry::new(vec![]).serialize();
        bytes[0] = b'X';
        assert!(matches!(
            LogEntry::deserialize(&bytes),
            Err(EntryDefect::Corrupt(_))
        ));
    }
}
