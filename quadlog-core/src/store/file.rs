// store/file.rs
// Quad store persisted as a single dataset snapshot file

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::capture::QuadChangeListener;
use crate::error::{QuadLogError, Result};
use crate::quad::{Quad, QuadPattern};

use super::{DatasetView, MemoryQuadStore, QuadStore};

/// Name of the snapshot file inside the data directory
pub const DATASET_FILE: &str = "dataset.bin";

const DATASET_MAGIC: &[u8; 4] = b"QLDS";

/// Header size: 4 (magic) + 4 (crc32 of payload) = 8 bytes
const DATASET_HEADER_SIZE: usize = 8;

/// What `FileQuadStore::open` found in the data directory
#[derive(Debug)]
pub enum LiveStorage {
    Present(FileQuadStore),
    Missing,
    /// The dataset file exists but cannot be loaded
    Corrupt(String),
}

/// `MemoryQuadStore` whose committed state is rewritten to
/// `<dir>/dataset.bin` on every commit
///
/// File format:
/// - magic: 4 bytes (`QLDS`)
/// - checksum: 4 bytes (CRC32 of payload, u32 LE)
/// - payload: bincode of the quad set
#[derive(Debug)]
pub struct FileQuadStore {
    dir: PathBuf,
    inner: MemoryQuadStore,
}

impl FileQuadStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<LiveStorage> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(DATASET_FILE);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LiveStorage::Missing),
            Err(e) => return Err(e.into()),
        };

        match decode_dataset(&raw) {
            Ok(quads) => {
                info!(path = %path.display(), quads = quads.len(), "loaded live storage");
                let view = DatasetView::from_iter(quads);
                Ok(LiveStorage::Present(FileQuadStore {
                    dir,
                    inner: MemoryQuadStore::from_view(&view),
                }))
            }
            Err(reason) => Ok(LiveStorage::Corrupt(reason)),
        }
    }

    /// Create (or overwrite) live storage holding exactly `initial`
    pub fn create(dir: impl AsRef<Path>, initial: &DatasetView) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let store = FileQuadStore {
            dir,
            inner: MemoryQuadStore::from_view(initial),
        };
        store.persist(initial.quads())?;
        Ok(store)
    }

    /// Delete the dataset file; returns whether one existed
    pub fn discard(dir: impl AsRef<Path>) -> Result<bool> {
        let path = dir.as_ref().join(DATASET_FILE);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "discarded live storage");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.dir.join(DATASET_FILE)
    }

    /// Temp file + fsync + rename, so the file is always a complete snapshot
    fn persist(&self, quads: &BTreeSet<Quad>) -> Result<()> {
        let payload = bincode::serialize(quads)?;
        let checksum = crc32fast::hash(&payload);

        let path = self.dataset_path();
        let tmp_path = self.dir.join(format!("{}.tmp", DATASET_FILE));

        let mut file = File::create(&tmp_path)?;
        file.write_all(DATASET_MAGIC)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;

        debug!(path = %path.display(), quads = quads.len(), "persisted live storage");
        Ok(())
    }
}

fn decode_dataset(raw: &[u8]) -> std::result::Result<Vec<Quad>, String> {
    if raw.len() < DATASET_HEADER_SIZE {
        return Err("dataset file is truncated".to_string());
    }
    if &raw[..4] != DATASET_MAGIC {
        return Err("bad dataset magic".to_string());
    }
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&raw[4..8]);
    let payload = &raw[DATASET_HEADER_SIZE..];
    if crc32fast::hash(payload) != u32::from_le_bytes(crc_bytes) {
        return Err("dataset checksum mismatch".to_string());
    }
    bincode::deserialize(payload).map_err(|e| format!("undecodable dataset: {}", e))
}

impl QuadStore for FileQuadStore {
    fn begin_write(&mut self) -> Result<()> {
        self.inner.begin_write()
    }

    fn commit(&mut self) -> Result<()> {
        if !self.inner.in_write_transaction() {
            return Err(QuadLogError::NoWriteTransaction);
        }
        // Durable first; a failed write leaves the transaction open to abort
        self.persist(self.inner.live_view().quads())
            .map_err(|e| QuadLogError::Storage(format!("failed to persist dataset: {}", e)))?;
        self.inner.commit()
    }

    fn abort(&mut self) -> Result<()> {
        self.inner.abort()
    }

    fn in_write_transaction(&self) -> bool {
        self.inner.in_write_transaction()
    }

    fn invalidate(&mut self) -> Result<()> {
        FileQuadStore::discard(&self.dir).map(|_| ())
    }

    fn add(&mut self, quad: Quad) -> Result<bool> {
        self.inner.add(quad)
    }

    fn delete(&mut self, quad: &Quad) -> Result<bool> {
        self.inner.delete(quad)
    }

    fn set_change_listener(&mut self, listener: Option<Box<dyn QuadChangeListener>>) {
        self.inner.set_change_listener(listener)
    }

    fn contains(&self, quad: &Quad) -> bool {
        self.inner.contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.inner.find(pattern)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn snapshot(&self) -> DatasetView {
        self.inner.snapshot()
    }

    fn live_view(&self) -> DatasetView {
        self.inner.live_view()
    }
}
