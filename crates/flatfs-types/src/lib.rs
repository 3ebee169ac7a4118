#![forbid(unsafe_code)]
//! Shared identifiers, volume geometry constants, and byte-packing helpers.
//!
//! Everything on disk is big-endian. Block pointers are stored with a NULL
//! sentinel (`0xFFFF` for 2-byte pointers, `0xFFFF_FFFF` for 4-byte ones);
//! in memory they are `Option<BlockId>` so absence is explicit in the type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed device block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Bytes of one packed inode slot.
pub const INODE_SIZE: usize = 32;

/// Packed inode slots per block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Direct block pointers per inode.
pub const DIRECT_PTRS: usize = 11;

/// 2-byte pointer slots in one indirect block.
pub const INDEX_SLOTS: usize = BLOCK_SIZE / 2;

/// Maximum stored length of a directory entry name, in bytes.
pub const NAME_MAX: usize = 30;

/// On-disk NULL sentinel for 2-byte block pointers.
pub const NULL_PTR16: u16 = u16::MAX;

/// On-disk NULL sentinel for 4-byte block pointers.
pub const NULL_PTR32: u32 = u32::MAX;

/// Physical block index on the volume. Block 0 holds the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const SUPERBLOCK: Self = Self(0);

    /// Byte offset of this block on the underlying byte device.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * BLOCK_SIZE as u64
    }
}

/// Dense inode index in `[0, inode_region_blocks * INODES_PER_BLOCK)`.
///
/// Inode 0 is permanently bound to the root directory file `"/"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_be_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_be_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    let end = offset.checked_add(2).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    let dst = data
        .get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: 2,
            offset,
            actual: 0,
        })?;
    dst.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

#[inline]
pub fn write_be_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let end = offset.checked_add(4).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    let dst = data
        .get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: 4,
            offset,
            actual: 0,
        })?;
    dst.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Encode an optional block pointer into its 2-byte on-disk form.
///
/// Fails with `IntegerConversion` if the block id collides with the NULL
/// sentinel or does not fit 16 bits.
pub fn encode_ptr16(ptr: Option<BlockId>) -> Result<u16, ParseError> {
    match ptr {
        None => Ok(NULL_PTR16),
        Some(block) => {
            let raw = u16::try_from(block.0).map_err(|_| ParseError::IntegerConversion {
                field: "block_pointer",
            })?;
            if raw == NULL_PTR16 {
                return Err(ParseError::IntegerConversion {
                    field: "block_pointer",
                });
            }
            Ok(raw)
        }
    }
}

/// Decode a 2-byte on-disk block pointer.
#[must_use]
pub fn decode_ptr16(raw: u16) -> Option<BlockId> {
    if raw == NULL_PTR16 {
        None
    } else {
        Some(BlockId(u32::from(raw)))
    }
}

/// Encode an optional block pointer into its 4-byte on-disk form.
#[must_use]
pub fn encode_ptr32(ptr: Option<BlockId>) -> u32 {
    match ptr {
        None => NULL_PTR32,
        Some(block) => block.0,
    }
}

/// Decode a 4-byte on-disk block pointer.
#[must_use]
pub fn decode_ptr32(raw: u32) -> Option<BlockId> {
    if raw == NULL_PTR32 {
        None
    } else {
        Some(BlockId(raw))
    }
}
