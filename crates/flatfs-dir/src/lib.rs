#![forbid(unsafe_code)]
//! Flat root-directory table.
//!
//! The volume has a single directory, "/", mapping file names to inode
//! numbers by position: entry `i` names the file whose inode number is `i`.
//! Entry 0 is the root itself and is never reallocated. The table is an
//! in-memory structure; persistence happens by writing [`Directory::to_bytes`]
//! through the ordinary file-write path into inode 0.
//!
//! Serialized form: all `max_files` name lengths as 4-byte fields, then all
//! `max_files` name buffers of [`NAME_MAX`] bytes, zero padded.

use flatfs_error::{FsError, Result};
use flatfs_types::{InodeNumber, NAME_MAX, ParseError, read_be_u32, write_be_u32};
use tracing::{debug, warn};

const ROOT_NAME: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    name_len: u32,
    name: [u8; NAME_MAX],
}

impl Entry {
    fn empty() -> Self {
        Self {
            name_len: 0,
            name: [0; NAME_MAX],
        }
    }

    fn named(name: &str) -> Self {
        let bytes = name.as_bytes();
        let take = bytes.len().min(NAME_MAX);
        let mut buf = [0_u8; NAME_MAX];
        buf[..take].copy_from_slice(&bytes[..take]);
        Self {
            name_len: take as u32,
            name: buf,
        }
    }

    fn in_use(&self) -> bool {
        self.name_len > 0
    }

    fn matches(&self, name: &str) -> bool {
        let bytes = name.as_bytes();
        let take = bytes.len().min(NAME_MAX);
        self.name_len as usize == take && self.name[..take] == bytes[..take]
    }
}

/// The single flat directory of a volume.
///
/// Holds one entry slot per inode the volume was formatted for.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<Entry>,
}

impl Directory {
    /// Fresh directory for a volume with `max_files` inodes. Entry 0 is
    /// bound to the root.
    #[must_use]
    pub fn new(max_files: u32) -> Self {
        let mut entries = vec![Entry::empty(); max_files.max(1) as usize];
        entries[0] = Entry::named(ROOT_NAME);
        Self { entries }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Bind `name` to the first unused entry and return its inode number.
    ///
    /// Names longer than [`NAME_MAX`] bytes are truncated. Does not check
    /// for duplicates; callers resolve before allocating.
    pub fn allocate(&mut self, name: &str) -> Result<InodeNumber> {
        for (inumber, entry) in self.entries.iter_mut().enumerate() {
            if !entry.in_use() {
                *entry = Entry::named(name);
                debug!(name, inumber, "directory entry allocated");
                return Ok(InodeNumber(inumber as u32));
            }
        }
        warn!(name, "directory full");
        Err(FsError::DirectoryFull)
    }

    /// Release the entry for `inumber`. Returns `false` when the number is
    /// out of range, the slot is already free, or it is the root entry.
    pub fn free(&mut self, inumber: InodeNumber) -> bool {
        if inumber == InodeNumber::ROOT {
            return false;
        }
        match self.entries.get_mut(inumber.0 as usize) {
            Some(entry) if entry.in_use() => {
                *entry = Entry::empty();
                debug!(inumber = inumber.0, "directory entry freed");
                true
            }
            _ => false,
        }
    }

    /// Look up `name`, honoring the same truncation as [`Directory::allocate`].
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<InodeNumber> {
        self.entries
            .iter()
            .position(|entry| entry.in_use() && entry.matches(name))
            .map(|inumber| InodeNumber(inumber as u32))
    }

    /// Names currently in the table, root included, with their inode numbers.
    #[must_use]
    pub fn list(&self) -> Vec<(InodeNumber, String)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.in_use())
            .map(|(inumber, entry)| {
                let name = String::from_utf8_lossy(&entry.name[..entry.name_len as usize]);
                (InodeNumber(inumber as u32), name.into_owned())
            })
            .collect()
    }

    /// Serialize for storage in the root file.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.entries.len();
        let mut bytes = vec![0_u8; count * 4 + count * NAME_MAX];
        for (i, entry) in self.entries.iter().enumerate() {
            // Sizes region is in-bounds by construction.
            let _ = write_be_u32(&mut bytes, i * 4, entry.name_len);
            let start = count * 4 + i * NAME_MAX;
            bytes[start..start + NAME_MAX].copy_from_slice(&entry.name);
        }
        bytes
    }

    /// Rebuild the table from the root file's content.
    ///
    /// `max_files` fixes the slot count; shorter input is an error, as is a
    /// recorded name length beyond [`NAME_MAX`].
    pub fn from_bytes(bytes: &[u8], max_files: u32) -> Result<Self> {
        let count = max_files.max(1) as usize;
        let expected = count * 4 + count * NAME_MAX;
        if bytes.len() < expected {
            return Err(FsError::Parse(
                ParseError::InsufficientData {
                    needed: expected,
                    offset: 0,
                    actual: bytes.len(),
                }
                .to_string(),
            ));
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let name_len = read_be_u32(bytes, i * 4).map_err(|e| FsError::Parse(e.to_string()))?;
            if name_len as usize > NAME_MAX {
                return Err(FsError::Parse(format!(
                    "directory entry {i} has name length {name_len}"
                )));
            }
            let start = count * 4 + i * NAME_MAX;
            let mut name = [0_u8; NAME_MAX];
            name.copy_from_slice(&bytes[start..start + NAME_MAX]);
            entries.push(Entry { name_len, name });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_binds_root_at_zero() {
        let dir = Directory::new(16);
        assert_eq!(dir.capacity(), 16);
        assert_eq!(dir.resolve("/"), Some(InodeNumber::ROOT));
        assert_eq!(dir.resolve("a.txt"), None);
    }

    #[test]
    fn allocate_is_first_fit() {
        let mut dir = Directory::new(8);
        assert_eq!(dir.allocate("a.txt").expect("alloc"), InodeNumber(1));
        assert_eq!(dir.allocate("b.txt").expect("alloc"), InodeNumber(2));

        assert!(dir.free(InodeNumber(1)));
        assert_eq!(dir.allocate("c.txt").expect("alloc"), InodeNumber(1));
        assert_eq!(dir.resolve("c.txt"), Some(InodeNumber(1)));
    }

    #[test]
    fn allocate_fails_when_full() {
        let mut dir = Directory::new(2);
        dir.allocate("a.txt").expect("alloc");
        assert!(matches!(dir.allocate("b.txt"), Err(FsError::DirectoryFull)));
    }

    #[test]
    fn long_names_are_truncated_consistently() {
        let long = "a".repeat(40);
        let mut dir = Directory::new(8);
        let inumber = dir.allocate(&long).expect("alloc");
        // Lookup with the full name and with its 30-byte prefix both hit.
        assert_eq!(dir.resolve(&long), Some(inumber));
        assert_eq!(dir.resolve(&long[..NAME_MAX]), Some(inumber));
        assert_eq!(dir.resolve(&long[..NAME_MAX - 1]), None);
    }

    #[test]
    fn root_entry_cannot_be_freed() {
        let mut dir = Directory::new(8);
        assert!(!dir.free(InodeNumber::ROOT));
        assert_eq!(dir.resolve("/"), Some(InodeNumber::ROOT));
    }

    #[test]
    fn free_rejects_unused_and_out_of_range() {
        let mut dir = Directory::new(4);
        assert!(!dir.free(InodeNumber(2)));
        assert!(!dir.free(InodeNumber(99)));
    }

    #[test]
    fn serialization_round_trip() {
        let mut dir = Directory::new(8);
        dir.allocate("a.txt").expect("alloc");
        dir.allocate("logs").expect("alloc");
        dir.free(InodeNumber(1));

        let bytes = dir.to_bytes();
        assert_eq!(bytes.len(), 8 * 4 + 8 * NAME_MAX);

        let restored = Directory::from_bytes(&bytes, 8).expect("parse");
        assert_eq!(restored.resolve("/"), Some(InodeNumber::ROOT));
        assert_eq!(restored.resolve("logs"), Some(InodeNumber(2)));
        assert_eq!(restored.resolve("a.txt"), None);
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        let dir = Directory::new(4);
        let bytes = dir.to_bytes();
        assert!(Directory::from_bytes(&bytes[..bytes.len() - 1], 4).is_err());
    }

    #[test]
    fn from_bytes_rejects_corrupt_name_length() {
        let dir = Directory::new(4);
        let mut bytes = dir.to_bytes();
        bytes[4..8].copy_from_slice(&31_u32.to_be_bytes());
        assert!(Directory::from_bytes(&bytes, 4).is_err());
    }

    #[test]
    fn list_reports_live_entries() {
        let mut dir = Directory::new(8);
        dir.allocate("a.txt").expect("alloc");
        dir.allocate("b.txt").expect("alloc");
        dir.free(InodeNumber(1));

        let listing = dir.list();
        assert_eq!(
            listing,
            vec![
                (InodeNumber(0), "/".to_owned()),
                (InodeNumber(2), "b.txt".to_owned()),
            ]
        );
    }
}
