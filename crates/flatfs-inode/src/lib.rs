#![forbid(unsafe_code)]
//! Inode records and block-address translation.
//!
//! Each inode occupies a fixed 32-byte slot in the inode region (16 slots
//! per block, starting at block 1). Persistence is whole-block
//! read-modify-write: the containing block is loaded, the slot patched, and
//! the block written back — never a partial-block write.
//!
//! The block map holds 11 direct pointers plus one indirect pointer. Direct
//! slots must be filled contiguously from index 0; the indirect pointer may
//! only be bound once all direct slots are set.

use flatfs_block::{BlockBuf, BlockDevice};
use flatfs_error::{FsError, Result};
use flatfs_types::{
    BLOCK_SIZE, BlockId, DIRECT_PTRS, INDEX_SLOTS, INODES_PER_BLOCK, INODE_SIZE, InodeNumber,
    ParseError, decode_ptr16, encode_ptr16, read_be_u16, read_be_u32, write_be_u16, write_be_u32,
};
use flatfs_ondisk::{
    AccessState, null_index_block, read_index_slot, write_index_slot,
};

/// Block of the inode region that holds `inumber`. Block 0 is the superblock.
#[must_use]
pub fn host_block(inumber: InodeNumber) -> BlockId {
    BlockId(inumber.0 / INODES_PER_BLOCK as u32 + 1)
}

/// Byte offset of the packed slot inside its host block.
#[must_use]
pub fn slot_offset(inumber: InodeNumber) -> usize {
    (inumber.0 as usize % INODES_PER_BLOCK) * INODE_SIZE
}

/// Outcome of registering a data block into the block map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The pointer was set; the caller may write file data into the block.
    Registered,
    /// The target slot already holds a block.
    Conflict,
    /// An earlier direct slot is still unset.
    Nonsequential,
    /// The offset falls in the indirect range but no index block is bound.
    NoIndex,
    /// The offset is beyond the reach of the indirect block.
    OutOfRange,
}

/// In-memory inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// File size in bytes.
    pub length: u32,
    /// Number of live open-file-table entries referencing this inode.
    pub open_count: u16,
    /// Reader/writer access state.
    pub state: AccessState,
    /// Direct block pointers, filled contiguously from index 0.
    pub direct: [Option<BlockId>; DIRECT_PTRS],
    /// Indirect block pointer; only set once all direct slots are.
    pub indirect: Option<BlockId>,
}

impl Default for Inode {
    fn default() -> Self {
        Self::new()
    }
}

impl Inode {
    /// A fresh unused inode: zero length, no holders, no blocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            length: 0,
            open_count: 0,
            state: AccessState::Free,
            direct: [None; DIRECT_PTRS],
            indirect: None,
        }
    }

    /// Parse a packed 32-byte slot.
    pub fn parse_slot(slot: &[u8]) -> std::result::Result<Self, ParseError> {
        let length = read_be_u32(slot, 0)?;
        let open_count = read_be_u16(slot, 4)?;
        let state = AccessState::from_u16(read_be_u16(slot, 6)?)?;
        let mut direct = [None; DIRECT_PTRS];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = decode_ptr16(read_be_u16(slot, 8 + i * 2)?);
        }
        let indirect = decode_ptr16(read_be_u16(slot, 8 + DIRECT_PTRS * 2)?);
        Ok(Self {
            length,
            open_count,
            state,
            direct,
            indirect,
        })
    }

    /// Encode into a packed 32-byte slot.
    pub fn write_slot(&self, slot: &mut [u8]) -> std::result::Result<(), ParseError> {
        write_be_u32(slot, 0, self.length)?;
        write_be_u16(slot, 4, self.open_count)?;
        write_be_u16(slot, 6, self.state.to_u16())?;
        for (i, ptr) in self.direct.iter().enumerate() {
            write_be_u16(slot, 8 + i * 2, encode_ptr16(*ptr)?)?;
        }
        write_be_u16(slot, 8 + DIRECT_PTRS * 2, encode_ptr16(self.indirect)?)?;
        Ok(())
    }

    /// Load the inode from its packed on-disk slot.
    pub fn load(dev: &dyn BlockDevice, inumber: InodeNumber) -> Result<Self> {
        let block = dev.read_block(host_block(inumber))?;
        let offset = slot_offset(inumber);
        Self::parse_slot(&block.as_slice()[offset..offset + INODE_SIZE])
            .map_err(|e| FsError::Parse(e.to_string()))
    }

    /// Persist the inode into its packed on-disk slot (whole-block RMW).
    pub fn store(&self, dev: &dyn BlockDevice, inumber: InodeNumber) -> Result<()> {
        let host = host_block(inumber);
        let mut block = dev.read_block(host)?;
        let offset = slot_offset(inumber);
        self.write_slot(&mut block.as_mut_slice()[offset..offset + INODE_SIZE])
            .map_err(|e| FsError::Parse(e.to_string()))?;
        dev.write_block(host, block.as_slice())
    }

    /// Translate a file-relative byte offset to a physical block id.
    ///
    /// Returns `Ok(None)` when no block is mapped at that offset.
    pub fn find_target_block(
        &self,
        dev: &dyn BlockDevice,
        offset: u32,
    ) -> Result<Option<BlockId>> {
        let index = offset as usize / BLOCK_SIZE;
        if index < DIRECT_PTRS {
            return Ok(self.direct[index]);
        }
        let Some(index_block) = self.indirect else {
            return Ok(None);
        };
        let slot = index - DIRECT_PTRS;
        if slot >= INDEX_SLOTS {
            return Ok(None);
        }
        let block = dev.read_block(index_block)?;
        read_index_slot(block.as_slice(), slot).map_err(|e| FsError::Parse(e.to_string()))
    }

    /// Register a newly allocated data block at the slot covering `offset`.
    ///
    /// Does not persist the inode; the caller persists once per operation.
    /// Writes through to the indirect block immediately when the slot lives
    /// there.
    pub fn register_target_block(
        &mut self,
        dev: &dyn BlockDevice,
        offset: u32,
        target: BlockId,
    ) -> Result<Registration> {
        let index = offset as usize / BLOCK_SIZE;

        if index < DIRECT_PTRS {
            if self.direct[index].is_some() {
                return Ok(Registration::Conflict);
            }
            if self.direct[..index].iter().any(Option::is_none) {
                return Ok(Registration::Nonsequential);
            }
            self.direct[index] = Some(target);
            return Ok(Registration::Registered);
        }

        let Some(index_block) = self.indirect else {
            return Ok(Registration::NoIndex);
        };
        let slot = index - DIRECT_PTRS;
        if slot >= INDEX_SLOTS {
            return Ok(Registration::OutOfRange);
        }

        let mut block = dev.read_block(index_block)?;
        let existing = read_index_slot(block.as_slice(), slot)
            .map_err(|e| FsError::Parse(e.to_string()))?;
        if existing.is_some() {
            return Ok(Registration::Conflict);
        }
        write_index_slot(block.as_mut_slice(), slot, Some(target))
            .map_err(|e| FsError::Parse(e.to_string()))?;
        dev.write_block(index_block, block.as_slice())?;
        Ok(Registration::Registered)
    }

    /// Bind the indirect pointer to a freshly allocated block.
    ///
    /// Fails (returns `Ok(false)`) if any direct slot is unset or an index
    /// block is already bound. On success the new index block is NULL-filled
    /// on disk before the pointer is set.
    pub fn register_index_block(
        &mut self,
        dev: &dyn BlockDevice,
        index_block: BlockId,
    ) -> Result<bool> {
        if self.direct.iter().any(Option::is_none) {
            return Ok(false);
        }
        if self.indirect.is_some() {
            return Ok(false);
        }
        dev.write_block(index_block, &null_index_block())?;
        self.indirect = Some(index_block);
        Ok(true)
    }

    /// Detach the indirect pointer, returning the index block's raw contents
    /// so the caller can walk and free the block ids it held.
    pub fn unregister_index_block(&mut self, dev: &dyn BlockDevice) -> Result<Option<BlockBuf>> {
        let Some(index_block) = self.indirect.take() else {
            return Ok(None);
        };
        let contents = dev.read_block(index_block)?;
        Ok(Some(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatfs_block::{ByteBlockDevice, MemDevice};
    use proptest::prelude::*;

    fn test_dev(blocks: usize) -> ByteBlockDevice<MemDevice> {
        ByteBlockDevice::new(MemDevice::with_blocks(blocks)).expect("device")
    }

    #[test]
    fn slot_math() {
        assert_eq!(host_block(InodeNumber(0)), BlockId(1));
        assert_eq!(host_block(InodeNumber(15)), BlockId(1));
        assert_eq!(host_block(InodeNumber(16)), BlockId(2));
        assert_eq!(slot_offset(InodeNumber(0)), 0);
        assert_eq!(slot_offset(InodeNumber(1)), 32);
        assert_eq!(slot_offset(InodeNumber(17)), 32);
    }

    #[test]
    fn store_load_round_trip() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        inode.length = 1234;
        inode.open_count = 2;
        inode.state = AccessState::Shared;
        inode.direct[0] = Some(BlockId(40));
        inode.direct[1] = Some(BlockId(41));

        inode.store(&dev, InodeNumber(5)).expect("store");
        let loaded = Inode::load(&dev, InodeNumber(5)).expect("load");
        assert_eq!(loaded, inode);

        // Neighbors in the same host block are untouched zero slots, which
        // parse as fresh inodes with pointer value 0 (not NULL) — the RMW
        // cycle must not have clobbered them.
        let neighbor = Inode::load(&dev, InodeNumber(4)).expect("neighbor");
        assert_eq!(neighbor.length, 0);
        assert_eq!(neighbor.state, AccessState::Free);
    }

    #[test]
    fn find_target_block_direct_range() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        inode.direct[0] = Some(BlockId(30));
        inode.direct[1] = Some(BlockId(31));

        assert_eq!(inode.find_target_block(&dev, 0).expect("find"), Some(BlockId(30)));
        assert_eq!(inode.find_target_block(&dev, 511).expect("find"), Some(BlockId(30)));
        assert_eq!(inode.find_target_block(&dev, 512).expect("find"), Some(BlockId(31)));
        assert_eq!(inode.find_target_block(&dev, 1024).expect("find"), None);
        // Indirect range with no index block bound.
        assert_eq!(
            inode
                .find_target_block(&dev, (DIRECT_PTRS * BLOCK_SIZE) as u32)
                .expect("find"),
            None
        );
    }

    #[test]
    fn register_direct_blocks_in_order() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        for i in 0..DIRECT_PTRS {
            let outcome = inode
                .register_target_block(&dev, (i * BLOCK_SIZE) as u32, BlockId(20 + i as u32))
                .expect("register");
            assert_eq!(outcome, Registration::Registered);
        }
        assert_eq!(inode.direct[10], Some(BlockId(30)));
    }

    #[test]
    fn register_conflict_leaves_inode_unchanged() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        inode.direct[0] = Some(BlockId(20));
        let before = inode.clone();

        let outcome = inode
            .register_target_block(&dev, 0, BlockId(99))
            .expect("register");
        assert_eq!(outcome, Registration::Conflict);
        assert_eq!(inode, before);
    }

    #[test]
    fn register_nonsequential_leaves_inode_unchanged() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        inode.direct[0] = Some(BlockId(20));
        inode.direct[1] = Some(BlockId(21));
        let before = inode.clone();

        // Index 3 while index 2 is unset.
        let outcome = inode
            .register_target_block(&dev, (3 * BLOCK_SIZE) as u32, BlockId(99))
            .expect("register");
        assert_eq!(outcome, Registration::Nonsequential);
        assert_eq!(inode, before);
    }

    #[test]
    fn indirect_registration_requires_index_block() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        for i in 0..DIRECT_PTRS {
            inode.direct[i] = Some(BlockId(20 + i as u32));
        }

        let offset = (DIRECT_PTRS * BLOCK_SIZE) as u32;
        assert_eq!(
            inode.register_target_block(&dev, offset, BlockId(50)).expect("register"),
            Registration::NoIndex
        );

        assert!(inode.register_index_block(&dev, BlockId(5)).expect("bind"));
        assert_eq!(
            inode.register_target_block(&dev, offset, BlockId(50)).expect("register"),
            Registration::Registered
        );
        assert_eq!(inode.find_target_block(&dev, offset).expect("find"), Some(BlockId(50)));

        // Same slot again is a conflict.
        assert_eq!(
            inode.register_target_block(&dev, offset, BlockId(51)).expect("register"),
            Registration::Conflict
        );
    }

    #[test]
    fn index_block_binding_rules() {
        let dev = test_dev(8);
        let mut inode = Inode::new();

        // Direct slots not yet full.
        assert!(!inode.register_index_block(&dev, BlockId(5)).expect("bind"));

        for i in 0..DIRECT_PTRS {
            inode.direct[i] = Some(BlockId(20 + i as u32));
        }
        assert!(inode.register_index_block(&dev, BlockId(5)).expect("bind"));

        // Second binding is rejected.
        assert!(!inode.register_index_block(&dev, BlockId(6)).expect("bind"));

        // The bound block was NULL-filled on disk.
        let raw = dev.read_block(BlockId(5)).expect("read");
        assert!(raw.as_slice().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn register_beyond_indirect_reach() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        for i in 0..DIRECT_PTRS {
            inode.direct[i] = Some(BlockId(20 + i as u32));
        }
        assert!(inode.register_index_block(&dev, BlockId(5)).expect("bind"));

        let offset = ((DIRECT_PTRS + INDEX_SLOTS) * BLOCK_SIZE) as u32;
        assert_eq!(
            inode.register_target_block(&dev, offset, BlockId(50)).expect("register"),
            Registration::OutOfRange
        );
        assert_eq!(inode.find_target_block(&dev, offset).expect("find"), None);
    }

    #[test]
    fn unregister_index_block_returns_contents() {
        let dev = test_dev(8);
        let mut inode = Inode::new();
        for i in 0..DIRECT_PTRS {
            inode.direct[i] = Some(BlockId(20 + i as u32));
        }
        assert!(inode.register_index_block(&dev, BlockId(5)).expect("bind"));
        let offset = (DIRECT_PTRS * BLOCK_SIZE) as u32;
        inode.register_target_block(&dev, offset, BlockId(50)).expect("register");

        let contents = inode
            .unregister_index_block(&dev)
            .expect("unregister")
            .expect("contents");
        assert_eq!(inode.indirect, None);
        assert_eq!(
            read_index_slot(contents.as_slice(), 0).expect("slot"),
            Some(BlockId(50))
        );

        assert!(inode.unregister_index_block(&dev).expect("unregister").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn slot_codec_round_trips(
            length in 0_u32..=u32::MAX,
            open_count in 0_u16..=u16::MAX,
            state_raw in 0_u16..4,
            filled in 0_usize..=DIRECT_PTRS,
            indirect_raw in proptest::option::of(0_u32..1000),
        ) {
            let mut inode = Inode::new();
            inode.length = length;
            inode.open_count = open_count;
            inode.state = AccessState::from_u16(state_raw).expect("state");
            for i in 0..filled {
                inode.direct[i] = Some(BlockId(100 + i as u32));
            }
            inode.indirect = indirect_raw.map(BlockId);

            let mut slot = [0_u8; INODE_SIZE];
            inode.write_slot(&mut slot).expect("encode");
            let parsed = Inode::parse_slot(&slot).expect("parse");
            prop_assert_eq!(parsed, inode);
        }
    }
}
