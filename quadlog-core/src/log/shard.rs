// log/shard.rs
// Position -> (volume, chapter) addressing

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuadLogError, Result};

use super::Position;

pub const DEFAULT_CHAPTER_CAPACITY: u64 = 1000;
pub const DEFAULT_CHAPTERS_PER_VOLUME: u64 = 1000;

/// Directory shard of one entry; both coordinates are 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shard {
    pub volume: u64,
    pub chapter: u64,
}

impl Shard {
    pub fn volume_dir_name(&self) -> String {
        format!("volume-{}", self.volume)
    }

    pub fn chapter_dir_name(&self) -> String {
        format!("chapter-{}", self.chapter)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.volume_dir_name(), self.chapter_dir_name())
    }
}

/// Fixed capacities of the two sharding levels
///
/// The shard of a Position depends on nothing but the Position and these
/// capacities, so there is no index to keep in sync with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    /// Entries per chapter
    pub chapter_capacity: u64,
    /// Chapters per volume
    pub chapters_per_volume: u64,
}

impl Default for ShardLayout {
    fn default() -> Self {
        ShardLayout {
            chapter_capacity: DEFAULT_CHAPTER_CAPACITY,
            chapters_per_volume: DEFAULT_CHAPTERS_PER_VOLUME,
        }
    }
}

impl ShardLayout {
    pub fn new(chapter_capacity: u64, chapters_per_volume: u64) -> Result<Self> {
        let layout = ShardLayout {
            chapter_capacity,
            chapters_per_volume,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chapter_capacity == 0 || self.chapters_per_volume == 0 {
            return Err(QuadLogError::Config(
                "shard capacities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Shard of `position` (positions start at 1)
    pub fn shard(&self, position: Position) -> Shard {
        let index = position.saturating_sub(1);
        let chapter_seq = index / self.chapter_capacity;
        Shard {
            volume: chapter_seq / self.chapters_per_volume + 1,
            chapter: chapter_seq % self.chapters_per_volume + 1,
        }
    }

    pub fn entry_file_name(position: Position) -> String {
        format!("tx-{}", position)
    }

    pub fn chapter_dir(&self, root: &Path, position: Position) -> PathBuf {
        let shard = self.shard(position);
        root.join(shard.volume_dir_name())
            .join(shard.chapter_dir_name())
    }

    /// `root/volume-V/chapter-C/tx-P`
    pub fn entry_path(&self, root: &Path, position: Position) -> PathBuf {
        self.chapter_dir(root, position)
            .join(Self::entry_file_name(position))
    }
}

/// Parse `<prefix><number>` directory and file names
pub(crate) fn parse_numbered(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_addresses_first_chapters() {
        let layout = ShardLayout::default();
        assert_eq!(layout.shard(1), Shard { volume: 1, chapter: 1 });
        assert_eq!(layout.shard(1000), Shard { volume: 1, chapter: 1 });
        assert_eq!(layout.shard(1001), Shard { volume: 1, chapter: 2 });
    }

    #[test]
    fn test_volume_rollover() {
        let layout = ShardLayout::new(10, 3).unwrap();
        assert_eq!(layout.shard(30), Shard { volume: 1, chapter: 3 });
        assert_eq!(layout.shard(31), Shard { volume: 2, chapter: 1 });
        assert_eq!(layout.shard(61), Shard { volume: 3, chapter: 1 });
    }

    #[test]
    fn test_entry_path() {
        let layout = ShardLayout::default();
        let path = layout.entry_path(Path::new("/log"), 1001);
        assert_eq!(path, PathBuf::from("/log/volume-1/chapter-2/tx-1001"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ShardLayout::new(0, 1).is_err());
        assert!(ShardLayout::new(1, 0).is_err());
    }

    #[test]
    fn test_parse_numbered() {
        assert_eq!(parse_numbered("volume-12", "volume-"), Some(12));
        assert_eq!(parse_numbered("tx-7.tmp", "tx-"), None);
        assert_eq!(parse_numbered("chapter-x", "chapter-"), None);
    }
}
