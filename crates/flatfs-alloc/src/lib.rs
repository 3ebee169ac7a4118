#![forbid(unsafe_code)]
//! Superblock bookkeeping and the free-space allocator.
//!
//! Free blocks form a disk-resident singly linked LIFO stack: the superblock
//! holds the head, and each free block stores the id of the next free block
//! in its first 4 bytes. Allocation and deallocation are O(1) device I/O and
//! the stack survives unmount. LIFO ordering is a deliberate simplification;
//! there is no locality optimization.

use flatfs_block::{BlockBuf, BlockDevice};
use flatfs_error::{FsError, Result};
use flatfs_inode::Inode;
use flatfs_ondisk::{SuperblockHeader, read_free_link, write_free_link};
use flatfs_types::{BlockId, INODES_PER_BLOCK};
use tracing::{debug, info, warn};

/// Inode count used when a superblock fails validation at mount.
pub const DEFAULT_INODE_COUNT: u32 = 64;

/// Superblock: volume geometry plus the free-list head.
///
/// One per mounted volume. Constructed by reading block 0; if the on-disk
/// values are inconsistent with the device, the volume is reformatted.
#[derive(Debug)]
pub struct SuperBlock {
    total_blocks: u32,
    inode_region_blocks: u32,
    free_list_head: Option<BlockId>,
}

impl SuperBlock {
    /// Read block 0 and validate it against the device size.
    ///
    /// A header is taken as valid when its block count matches the device,
    /// the inode region is non-empty, and the free-list head points past the
    /// inode region. Anything else triggers a reformat with
    /// [`DEFAULT_INODE_COUNT`] inodes.
    pub fn load(dev: &dyn BlockDevice) -> Result<Self> {
        let total_blocks = dev.block_count();
        let block = dev.read_block(BlockId::SUPERBLOCK)?;
        let header = SuperblockHeader::parse(block.as_slice())
            .map_err(|e| FsError::Parse(e.to_string()))?;

        let valid = header.total_blocks == total_blocks
            && header.inode_region_blocks > 0
            && header
                .free_list_head
                .is_some_and(|head| head.0 > header.inode_region_blocks);
        if valid {
            return Ok(Self {
                total_blocks,
                inode_region_blocks: header.inode_region_blocks,
                free_list_head: header.free_list_head,
            });
        }

        warn!(
            on_disk_total = header.total_blocks,
            device_total = total_blocks,
            "superblock inconsistent with device, reformatting"
        );
        let mut superblock = Self {
            total_blocks,
            inode_region_blocks: 0,
            free_list_head: None,
        };
        superblock.format(dev, DEFAULT_INODE_COUNT)?;
        Ok(superblock)
    }

    #[must_use]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    #[must_use]
    pub fn inode_region_blocks(&self) -> u32 {
        self.inode_region_blocks
    }

    /// Number of inode slots the region holds.
    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.inode_region_blocks * INODES_PER_BLOCK as u32
    }

    #[must_use]
    pub fn free_list_head(&self) -> Option<BlockId> {
        self.free_list_head
    }

    /// First block after the inode region.
    fn first_data_block(&self) -> u32 {
        1 + self.inode_region_blocks
    }

    /// Reformat the volume for at least `max_files` files.
    ///
    /// Resets every inode slot to the unused state, then rebuilds the free
    /// list over all blocks following the inode region through the last
    /// block, and persists the superblock.
    pub fn format(&mut self, dev: &dyn BlockDevice, max_files: u32) -> Result<()> {
        if max_files == 0 {
            return Err(FsError::Format("max_files must be at least 1".to_owned()));
        }
        let region_blocks = max_files.div_ceil(INODES_PER_BLOCK as u32);
        if region_blocks + 2 > self.total_blocks {
            return Err(FsError::Format(format!(
                "volume too small: {} blocks cannot hold an inode region of {region_blocks}",
                self.total_blocks
            )));
        }
        self.inode_region_blocks = region_blocks;

        // One host block of unused slots, replicated across the region.
        let mut region_block = BlockBuf::zeroed();
        let unused = Inode::new();
        for slot in 0..INODES_PER_BLOCK {
            unused
                .write_slot(&mut region_block.as_mut_slice()[slot * 32..(slot + 1) * 32])
                .map_err(|e| FsError::Parse(e.to_string()))?;
        }
        for block in 1..=region_blocks {
            dev.write_block(BlockId(block), region_block.as_slice())?;
        }

        // Chain every remaining block into the free stack; the last block
        // terminates with the NULL link.
        let first_free = self.first_data_block();
        for block in first_free..self.total_blocks {
            let next = if block + 1 < self.total_blocks {
                Some(BlockId(block + 1))
            } else {
                None
            };
            let mut body = BlockBuf::zeroed();
            write_free_link(body.as_mut_slice(), next)
                .map_err(|e| FsError::Parse(e.to_string()))?;
            dev.write_block(BlockId(block), body.as_slice())?;
        }
        self.free_list_head = if first_free < self.total_blocks {
            Some(BlockId(first_free))
        } else {
            None
        };

        self.sync(dev)?;
        info!(
            total_blocks = self.total_blocks,
            inode_region_blocks = self.inode_region_blocks,
            inodes = self.inode_count(),
            "volume formatted"
        );
        Ok(())
    }

    /// Write `total_blocks`, `inode_region_blocks`, and the free-list head
    /// back to block 0.
    pub fn sync(&self, dev: &dyn BlockDevice) -> Result<()> {
        let header = SuperblockHeader {
            total_blocks: self.total_blocks,
            inode_region_blocks: self.inode_region_blocks,
            free_list_head: self.free_list_head,
        };
        let mut block = BlockBuf::zeroed();
        header
            .write_to(block.as_mut_slice())
            .map_err(|e| FsError::Parse(e.to_string()))?;
        dev.write_block(BlockId::SUPERBLOCK, block.as_slice())?;
        debug!("superblock synchronized");
        Ok(())
    }

    /// Pop the head of the free stack and zero its on-disk content, so newly
    /// allocated blocks never leak stale next-pointers.
    pub fn allocate(&mut self, dev: &dyn BlockDevice) -> Result<BlockId> {
        let head = self.free_list_head.ok_or(FsError::VolumeExhausted)?;
        let body = dev.read_block(head)?;
        let next = read_free_link(body.as_slice()).map_err(|e| FsError::Parse(e.to_string()))?;
        dev.write_block(head, BlockBuf::zeroed().as_slice())?;
        self.free_list_head = next;
        debug!(block = head.0, "allocated block");
        Ok(head)
    }

    /// Zero-fill `block` and push it onto the free stack as the new head.
    pub fn release(&mut self, dev: &dyn BlockDevice, block: BlockId) -> Result<()> {
        if block.0 >= self.total_blocks {
            return Err(FsError::InvalidBlock { block: block.0 });
        }
        let mut body = BlockBuf::zeroed();
        write_free_link(body.as_mut_slice(), self.free_list_head)
            .map_err(|e| FsError::Parse(e.to_string()))?;
        dev.write_block(block, body.as_slice())?;
        self.free_list_head = Some(block);
        debug!(block = block.0, "released block");
        Ok(())
    }
}
