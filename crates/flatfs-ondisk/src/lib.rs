#![forbid(unsafe_code)]
//! Bit-exact on-disk record layouts.
//!
//! Pure parsing crate — no I/O, no side effects. Covers the superblock
//! header in block 0, the per-inode access-state encoding, the free-block
//! next link, and the 2-byte pointer slots of an indirect block.
//!
//! Layout of block 0:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | `total_blocks` |
//! | 4 | 4 | `inode_region_blocks` |
//! | 8 | 4 | `free_list_head` (NULL sentinel when empty) |

use flatfs_types::{
    BLOCK_SIZE, BlockId, INDEX_SLOTS, ParseError, decode_ptr16, decode_ptr32, encode_ptr16,
    encode_ptr32, read_be_u16, read_be_u32, write_be_u16, write_be_u32,
};
use serde::{Deserialize, Serialize};

/// Per-inode access state, stored as a 2-byte field in the inode slot.
///
/// Governs the single-writer/multi-reader gate: readers may share a FREE or
/// SHARED inode, a writer holds it EXCLUSIVE, and a writer that found it busy
/// parks the PENDING_EXCLUSIVE marker so new readers queue behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessState {
    Free,
    Shared,
    Exclusive,
    PendingExclusive,
}

impl AccessState {
    /// On-disk encoding.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Free => 0,
            Self::Shared => 1,
            Self::Exclusive => 2,
            Self::PendingExclusive => 3,
        }
    }

    pub fn from_u16(raw: u16) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::Shared),
            2 => Ok(Self::Exclusive),
            3 => Ok(Self::PendingExclusive),
            _ => Err(ParseError::InvalidField {
                field: "access_state",
                reason: "must be 0..=3",
            }),
        }
    }
}

/// Superblock header persisted in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockHeader {
    pub total_blocks: u32,
    pub inode_region_blocks: u32,
    pub free_list_head: Option<BlockId>,
}

impl SuperblockHeader {
    pub fn parse(block: &[u8]) -> Result<Self, ParseError> {
        let total_blocks = read_be_u32(block, 0)?;
        let inode_region_blocks = read_be_u32(block, 4)?;
        let free_list_head = decode_ptr32(read_be_u32(block, 8)?);
        Ok(Self {
            total_blocks,
            inode_region_blocks,
            free_list_head,
        })
    }

    pub fn write_to(&self, block: &mut [u8]) -> Result<(), ParseError> {
        write_be_u32(block, 0, self.total_blocks)?;
        write_be_u32(block, 4, self.inode_region_blocks)?;
        write_be_u32(block, 8, encode_ptr32(self.free_list_head))?;
        Ok(())
    }
}

/// Read the next-free link stored in the first 4 bytes of a free block.
pub fn read_free_link(block: &[u8]) -> Result<Option<BlockId>, ParseError> {
    Ok(decode_ptr32(read_be_u32(block, 0)?))
}

/// Write the next-free link into the first 4 bytes of a free block body.
pub fn write_free_link(block: &mut [u8], next: Option<BlockId>) -> Result<(), ParseError> {
    write_be_u32(block, 0, encode_ptr32(next))
}

/// Read pointer slot `index` of an indirect block.
pub fn read_index_slot(block: &[u8], index: usize) -> Result<Option<BlockId>, ParseError> {
    if index >= INDEX_SLOTS {
        return Err(ParseError::InvalidField {
            field: "index_slot",
            reason: "out of range",
        });
    }
    Ok(decode_ptr16(read_be_u16(block, index * 2)?))
}

/// Write pointer slot `index` of an indirect block.
pub fn write_index_slot(
    block: &mut [u8],
    index: usize,
    ptr: Option<BlockId>,
) -> Result<(), ParseError> {
    if index >= INDEX_SLOTS {
        return Err(ParseError::InvalidField {
            field: "index_slot",
            reason: "out of range",
        });
    }
    write_be_u16(block, index * 2, encode_ptr16(ptr)?)
}

/// A freshly bound indirect block: every slot NULL.
#[must_use]
pub fn null_index_block() -> Vec<u8> {
    vec![0xFF_u8; BLOCK_SIZE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_state_round_trip() {
        for state in [
            AccessState::Free,
            AccessState::Shared,
            AccessState::Exclusive,
            AccessState::PendingExclusive,
        ] {
            assert_eq!(AccessState::from_u16(state.to_u16()), Ok(state));
        }
        assert!(AccessState::from_u16(4).is_err());
        assert!(AccessState::from_u16(u16::MAX).is_err());
    }

    #[test]
    fn superblock_header_round_trip() {
        let header = SuperblockHeader {
            total_blocks: 1000,
            inode_region_blocks: 4,
            free_list_head: Some(BlockId(5)),
        };
        let mut block = [0_u8; BLOCK_SIZE];
        header.write_to(&mut block).expect("write");
        assert_eq!(SuperblockHeader::parse(&block), Ok(header));
        // Bit-exact header bytes: 1000, 4, 5 big-endian.
        assert_eq!(&block[..12], &[0, 0, 3, 0xE8, 0, 0, 0, 4, 0, 0, 0, 5]);
    }

    #[test]
    fn superblock_null_head() {
        let header = SuperblockHeader {
            total_blocks: 16,
            inode_region_blocks: 1,
            free_list_head: None,
        };
        let mut block = [0_u8; BLOCK_SIZE];
        header.write_to(&mut block).expect("write");
        assert_eq!(&block[8..12], &[0xFF; 4]);
        assert_eq!(
            SuperblockHeader::parse(&block).expect("parse").free_list_head,
            None
        );
    }

    #[test]
    fn free_link_round_trip() {
        let mut block = [0_u8; BLOCK_SIZE];
        write_free_link(&mut block, Some(BlockId(77))).expect("write");
        assert_eq!(read_free_link(&block), Ok(Some(BlockId(77))));
        write_free_link(&mut block, None).expect("write");
        assert_eq!(read_free_link(&block), Ok(None));
    }

    #[test]
    fn index_slots_round_trip() {
        let mut block = null_index_block();
        for slot in 0..INDEX_SLOTS {
            assert_eq!(read_index_slot(&block, slot), Ok(None));
        }
        write_index_slot(&mut block, 0, Some(BlockId(9))).expect("write");
        write_index_slot(&mut block, INDEX_SLOTS - 1, Some(BlockId(10))).expect("write");
        assert_eq!(read_index_slot(&block, 0), Ok(Some(BlockId(9))));
        assert_eq!(read_index_slot(&block, INDEX_SLOTS - 1), Ok(Some(BlockId(10))));
        assert!(read_index_slot(&block, INDEX_SLOTS).is_err());
        assert!(write_index_slot(&mut block, INDEX_SLOTS, None).is_err());
    }
}
