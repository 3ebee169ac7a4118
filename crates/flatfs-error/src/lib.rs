#![forbid(unsafe_code)]
//! Error types for FlatFS.
//!
//! # Error Taxonomy
//!
//! | Class | Variants | Surfaced as |
//! |-------|----------|-------------|
//! | Capacity | `VolumeExhausted`, `DirectoryFull`, `IndexExhausted` | sentinel failure, never fatal |
//! | Protocol | `BlockConflict`, `NonsequentialBlock`, `NoIndexBlock`, `IndexAlreadyBound`, `NotFound`, `WrongMode`, `SeekOutOfRange`, `InUse` | error result, logged, operation aborts |
//! | Boundary | `Io`, `Parse`, `Format`, `InvalidBlock` | error result |
//!
//! Contention is never an error: a conflicting open blocks on the file-table
//! monitor until it can be granted.
//!
//! This crate is intentionally independent of `flatfs-types`. `ParseError`
//! from the packing layer is converted to [`FsError::Parse`] at each consuming
//! crate boundary, keeping the dependency graph acyclic and this crate free of
//! format knowledge.

use thiserror::Error;

/// Unified error type returned by all FlatFS operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packing-layer error surfaced across a crate boundary.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural misuse of the device or volume geometry.
    #[error("invalid format: {0}")]
    Format(String),

    /// The free-block stack is empty.
    #[error("volume exhausted: no free blocks")]
    VolumeExhausted,

    /// Every directory slot is occupied.
    #[error("directory full")]
    DirectoryFull,

    /// The file already spans every slot of its indirect block.
    #[error("indirect block slots exhausted")]
    IndexExhausted,

    /// A data block is already registered at the target slot.
    #[error("block already registered at index {index}")]
    BlockConflict { index: usize },

    /// Direct slots must be filled left to right; an earlier slot is unset.
    #[error("nonsequential block registration at index {index}")]
    NonsequentialBlock { index: usize },

    /// The write reached the indirect range with no index block bound.
    #[error("no index block registered")]
    NoIndexBlock,

    /// A second index block registration was attempted.
    #[error("index block already bound")]
    IndexAlreadyBound,

    /// Named file does not exist (and the mode does not permit creation).
    #[error("not found: {0}")]
    NotFound(String),

    /// The handle's open mode forbids this operation.
    #[error("operation not permitted by open mode")]
    WrongMode,

    /// Seek target is negative or past end-of-file.
    #[error("seek out of range: position {position}, length {length}")]
    SeekOutOfRange { position: i64, length: u32 },

    /// Block id out of the volume's range.
    #[error("invalid block: {block}")]
    InvalidBlock { block: u32 },

    /// The inode is held by more than one open-file-table entry.
    #[error("file is in use")]
    InUse,
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        assert_eq!(
            FsError::VolumeExhausted.to_string(),
            "volume exhausted: no free blocks"
        );
        assert_eq!(
            FsError::BlockConflict { index: 3 }.to_string(),
            "block already registered at index 3"
        );
        assert_eq!(
            FsError::SeekOutOfRange {
                position: -4,
                length: 100
            }
            .to_string(),
            "seek out of range: position -4, length 100"
        );
        assert_eq!(
            FsError::NotFound("a.txt".into()).to_string(),
            "not found: a.txt"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: FsError = std::io::Error::other("boom").into();
        assert!(matches!(err, FsError::Io(_)));
    }
}
