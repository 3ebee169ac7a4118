#![forbid(unsafe_code)]
//! FlatFS engine.
//!
//! Ties the layers together: the open-file table arbitrates concurrent access
//! per inode, and [`FileSystem`] exposes the file operations — open, close,
//! read, write, seek, size, delete, format, sync — over any
//! [`BlockDevice`](flatfs_block::BlockDevice).

mod fs;
mod handle;
mod table;

pub use fs::FileSystem;
pub use handle::FileHandle;
pub use table::{Decision, FileTable, arbitrate};

pub use flatfs_block::{BlockDevice, ByteBlockDevice, FileByteDevice, MemDevice};
pub use flatfs_error::{FsError, Result};
pub use flatfs_ondisk::AccessState;
pub use flatfs_types::{BLOCK_SIZE, BlockId, InodeNumber, NAME_MAX};

use std::str::FromStr;

/// How a file is opened.
///
/// `Write` truncates on open and positions at offset 0; `Append` keeps the
/// content and positions at end of file. Both take the file exclusively.
/// `Read` shares the file with other readers and never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    /// Whether handles in this mode may mutate the file.
    #[must_use]
    pub fn allows_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "a" => Ok(Self::Append),
            other => Err(FsError::Format(format!("unknown open mode: {other}"))),
        }
    }
}

/// Origin for [`FileSystem::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Start,
    Current,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_parsing() {
        assert_eq!("r".parse::<OpenMode>().expect("r"), OpenMode::Read);
        assert_eq!("w".parse::<OpenMode>().expect("w"), OpenMode::Write);
        assert_eq!("a".parse::<OpenMode>().expect("a"), OpenMode::Append);
        assert!("w+".parse::<OpenMode>().is_err());
        assert!("".parse::<OpenMode>().is_err());
    }

    #[test]
    fn only_read_mode_is_read_only() {
        assert!(!OpenMode::Read.allows_write());
        assert!(OpenMode::Write.allows_write());
        assert!(OpenMode::Append.allows_write());
    }
}
