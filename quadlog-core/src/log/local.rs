// log/local.rs
// Sharded on-disk commit log

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::{QuadLogError, Result};

use super::entry::{EntryDefect, LogEntry};
use super::shard::{parse_numbered, ShardLayout};
use super::{CommitLog, Position};

const TMP_SUFFIX: &str = ".tmp";
const PARTIAL_SUFFIX: &str = ".partial";

/// Commit log stored as one file per entry under
/// `root/volume-<V>/chapter-<C>/tx-<P>`
///
/// Each entry is written to a temporary file, fsynced and renamed into
/// place, so a Position only becomes visible once its bytes are durable.
#[derive(Debug)]
pub struct LocalCommitLog {
    root: PathBuf,
    layout: ShardLayout,
    size: u64,
}

impl LocalCommitLog {
    /// Open or create a log, resuming numbering after the highest entry
    pub fn open(root: impl AsRef<Path>, layout: ShardLayout) -> Result<Self> {
        layout.validate()?;
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let size = discover_size(&root, &layout)?;
        info!(root = %root.display(), size, "opened commit log");

        Ok(LocalCommitLog { root, layout, size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    pub fn entry_path(&self, position: Position) -> PathBuf {
        self.layout.entry_path(&self.root, position)
    }

    /// Validate the envelope of every entry; returns the number checked
    pub fn verify(&self) -> Result<u64> {
        for position in 1..=self.size {
            self.read(position)?;
        }
        Ok(self.size)
    }

    fn write_entry(&self, position: Position, bytes: &[u8]) -> Result<()> {
        let dir = self.layout.chapter_dir(&self.root, position);
        let new_chapter = !dir.exists();
        fs::create_dir_all(&dir)?;

        let path = dir.join(ShardLayout::entry_file_name(position));
        let tmp_path = dir.join(format!("{}{}", ShardLayout::entry_file_name(position), TMP_SUFFIX));

        let written = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&LogEntry::new(bytes.to_vec()).serialize())?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        let mut dirs = vec![dir.as_path()];
        if new_chapter {
            if let Some(volume_dir) = dir.parent() {
                dirs.push(volume_dir);
            }
            dirs.push(&self.root);
        }
        install_entry(position, &tmp_path, &path, &dirs, sync_dir)
    }
}

impl CommitLog for LocalCommitLog {
    fn append(&mut self, bytes: &[u8]) -> Result<Position> {
        let position = self.size + 1;
        self.write_entry(position, bytes)?;
        self.size = position;
        debug!(position, bytes = bytes.len(), "appended commit log entry");
        Ok(position)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, position: Position) -> Result<Vec<u8>> {
        if position == 0 || position > self.size {
            return Err(QuadLogError::PositionOutOfRange {
                position,
                size: self.size,
            });
        }

        let path = self.entry_path(position);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(QuadLogError::Corruption {
                    position,
                    reason: format!("missing entry file {}", path.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        LogEntry::deserialize(&raw)
            .map(|entry| entry.data)
            .map_err(|defect| QuadLogError::Corruption {
                position,
                reason: defect.to_string(),
            })
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Rename the finished `tmp_path` onto `path` and sync `dirs`, innermost
/// first
///
/// Append is all-or-nothing: if a sync fails after the rename, the entry is
/// withdrawn again. An entry that cannot be withdrawn may already be durable,
/// which is reported as `Diverged`.
fn install_entry<F>(
    position: Position,
    tmp_path: &Path,
    path: &Path,
    dirs: &[&Path],
    sync: F,
) -> Result<()>
where
    F: Fn(&Path) -> Result<()>,
{
    if let Err(err) = fs::rename(tmp_path, path) {
        let _ = fs::remove_file(tmp_path);
        return Err(err.into());
    }

    for &dir in dirs {
        let Err(err) = sync(dir) else { continue };
        warn!(position, error = %err, "directory sync failed, withdrawing log entry");
        return match fs::remove_file(path) {
            Err(remove_err) if remove_err.kind() != ErrorKind::NotFound => {
                error!(position, error = %remove_err, "failed log entry could not be withdrawn");
                Err(QuadLogError::Diverged(format!(
                    "entry {} may be durable after a failed append: {}",
                    position, err
                )))
            }
            _ => {
                if let Some(&chapter_dir) = dirs.first() {
                    let _ = sync(chapter_dir);
                }
                Err(err)
            }
        };
    }
    Ok(())
}

/// Numbered children of `dir` named `<prefix><n>`, highest first
fn numbered_children(dir: &Path, prefix: &str, want_dir: bool) -> Result<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let file_type = item.file_type()?;
        if file_type.is_dir() != want_dir {
            continue;
        }
        let name = item.file_name();
        match name.to_str().and_then(|s| parse_numbered(s, prefix)) {
            Some(n) if n > 0 => found.push((n, item.path())),
            _ => {}
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found)
}

fn remove_stray_tmp_files(chapter_dir: &Path) -> Result<()> {
    for item in fs::read_dir(chapter_dir)? {
        let path = item?.path();
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TMP_SUFFIX));
        if is_tmp {
            warn!(path = %path.display(), "removing unfinished log entry");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Highest durable Position on disk
///
/// Walks volumes and chapters from the highest down and stops at the first
/// chapter holding an intact entry. A truncated tail entry was never
/// acknowledged: it is renamed to `tx-<P>.partial` and its Position reused.
/// A full-length entry that fails its checksum, or a second truncated entry
/// below the tail, is corruption.
fn discover_size(root: &Path, layout: &ShardLayout) -> Result<u64> {
    let mut damaged_tail: Option<(Position, PathBuf)> = None;

    for (volume, volume_dir) in numbered_children(root, "volume-", true)? {
        for (chapter, chapter_dir) in numbered_children(&volume_dir, "chapter-", true)? {
            remove_stray_tmp_files(&chapter_dir)?;

            for (position, path) in numbered_children(&chapter_dir, "tx-", false)? {
                let shard = layout.shard(position);
                if shard.volume != volume || shard.chapter != chapter {
                    return Err(QuadLogError::Corruption {
                        position,
                        reason: format!(
                            "entry found in volume-{}/chapter-{}, expected {}",
                            volume, chapter, shard
                        ),
                    });
                }

                match LogEntry::deserialize(&fs::read(&path)?) {
                    Ok(_) => {
                        if let Some((tail, tail_path)) = damaged_tail {
                            quarantine(tail, &tail_path)?;
                        }
                        return Ok(position);
                    }
                    Err(EntryDefect::Truncated) if damaged_tail.is_none() => {
                        damaged_tail = Some((position, path));
                    }
                    Err(defect) => {
                        return Err(QuadLogError::Corruption {
                            position,
                            reason: defect.to_string(),
                        });
                    }
                }
            }
        }
    }

    if let Some((tail, tail_path)) = damaged_tail {
        quarantine(tail, &tail_path)?;
    }
    Ok(0)
}

fn quarantine(position: Position, path: &Path) -> Result<()> {
    let quarantined = path.with_file_name(format!(
        "{}{}",
        ShardLayout::entry_file_name(position),
        PARTIAL_SUFFIX
    ));
    warn!(
        position,
        path = %quarantined.display(),
        "tail entry is truncated, treating it as not present"
    );
    fs::rename(path, &quarantined)?;
    Ok(())
}
