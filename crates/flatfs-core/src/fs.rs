//! File operations over a mounted volume.

use crate::handle::FileHandle;
use crate::table::FileTable;
use crate::{OpenMode, SeekWhence};
use flatfs_alloc::SuperBlock;
use flatfs_block::BlockDevice;
use flatfs_dir::Directory;
use flatfs_error::{FsError, Result};
use flatfs_inode::{Inode, Registration};
use flatfs_ondisk::read_index_slot;
use flatfs_types::{BLOCK_SIZE, BlockId, INDEX_SLOTS, InodeNumber};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A mounted FlatFS volume.
///
/// All operations are `&self` and thread-safe; per-file serialization is the
/// open-file table's job, volume-wide state sits behind its own locks.
pub struct FileSystem {
    dev: Arc<dyn BlockDevice>,
    superblock: parking_lot::Mutex<SuperBlock>,
    dir: Arc<parking_lot::Mutex<Directory>>,
    table: FileTable,
}

impl FileSystem {
    /// Mount the volume on `dev`.
    ///
    /// Loads (or, for an unformatted image, creates) the superblock and
    /// restores the directory from the root file's stored content.
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Self> {
        let superblock = SuperBlock::load(dev.as_ref())?;
        let dir = Arc::new(parking_lot::Mutex::new(Directory::new(
            superblock.inode_count(),
        )));
        let table = FileTable::new(Arc::clone(&dev), Arc::clone(&dir));
        let fs = Self {
            dev,
            superblock: parking_lot::Mutex::new(superblock),
            dir,
            table,
        };
        fs.restore_directory()?;
        info!(
            total_blocks = fs.total_blocks(),
            inodes = fs.inode_count(),
            "volume mounted"
        );
        Ok(fs)
    }

    fn restore_directory(&self) -> Result<()> {
        let handle = self.table.falloc("/", OpenMode::Read)?;
        let size = self.fsize(&handle) as usize;
        let mut bytes = vec![0_u8; size];
        let read = if size > 0 {
            self.read(&handle, &mut bytes)?
        } else {
            0
        };
        self.table.ffree(&handle)?;
        if read > 0 {
            bytes.truncate(read);
            *self.dir.lock() = Directory::from_bytes(&bytes, self.inode_count())?;
        }
        Ok(())
    }

    #[must_use]
    pub fn total_blocks(&self) -> u32 {
        self.superblock.lock().total_blocks()
    }

    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.superblock.lock().inode_count()
    }

    /// Directory listing: (inode number, name), root included.
    #[must_use]
    pub fn list(&self) -> Vec<(InodeNumber, String)> {
        self.dir.lock().list()
    }

    /// Number of open-file-table entries.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.table.len()
    }

    /// Open `name`, blocking until access can be granted.
    ///
    /// `Write` truncates the file after the grant; a file being truncated
    /// must have no other holder.
    pub fn open(&self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        let handle = self.table.falloc(name, mode)?;
        if mode == OpenMode::Write {
            if let Err(e) = self.truncate(&handle) {
                let _ = self.table.ffree(&handle);
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Drop one sharer of `handle`; the table entry is released when the
    /// last sharer closes. Returns `false` if the entry was already gone.
    pub fn close(&self, handle: FileHandle) -> Result<bool> {
        {
            let mut st = handle.state();
            st.refs = st.refs.saturating_sub(1);
            if st.refs > 0 {
                return Ok(true);
            }
        }
        self.table.ffree(&handle)
    }

    /// Read from the current seek position into `buf`.
    ///
    /// Stops at end of file or at an unmapped block; returns the byte count.
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        if handle.mode() != OpenMode::Read {
            return Err(FsError::WrongMode);
        }
        let mut st = handle.state();
        let mut done = 0_usize;
        while done < buf.len() && st.seek < st.inode.length {
            let offset = st.seek;
            let Some(target) = st.inode.find_target_block(self.dev.as_ref(), offset)? else {
                break;
            };
            let block = self.dev.read_block(target)?;
            let in_block = offset as usize % BLOCK_SIZE;
            let take = (BLOCK_SIZE - in_block)
                .min(buf.len() - done)
                .min((st.inode.length - offset) as usize);
            buf[done..done + take].copy_from_slice(&block.as_slice()[in_block..in_block + take]);
            done += take;
            st.seek += take as u32;
        }
        Ok(done)
    }

    /// Write `data` at the current seek position, extending the file as
    /// needed. Blocks are allocated on demand; the index block is bound
    /// automatically when the write crosses into the indirect range.
    pub fn write(&self, handle: &FileHandle, data: &[u8]) -> Result<usize> {
        if !handle.mode().allows_write() {
            return Err(FsError::WrongMode);
        }
        let mut st = handle.state();
        let mut done = 0_usize;
        while done < data.len() {
            let offset = st.seek;
            let target = match st.inode.find_target_block(self.dev.as_ref(), offset)? {
                Some(block) => block,
                None => self.map_new_block(&mut st.inode, offset)?,
            };
            // Read-modify-write. A device that cannot read back a block it
            // just mapped is unusable; halt rather than corrupt.
            let mut block = match self.dev.read_block(target) {
                Ok(block) => block,
                Err(e) => {
                    error!(block = target.0, error = %e, "read-back failed during write");
                    std::process::exit(2);
                }
            };
            let in_block = offset as usize % BLOCK_SIZE;
            let take = (BLOCK_SIZE - in_block).min(data.len() - done);
            block.as_mut_slice()[in_block..in_block + take]
                .copy_from_slice(&data[done..done + take]);
            self.dev.write_block(target, block.as_slice())?;
            done += take;
            st.seek += take as u32;
            if st.seek > st.inode.length {
                st.inode.length = st.seek;
            }
        }
        st.inode.store(self.dev.as_ref(), handle.inumber())?;
        Ok(done)
    }

    /// Allocate and register a data block for the byte at `offset`.
    ///
    /// A failed registration leaves the popped block off the free list.
    fn map_new_block(&self, inode: &mut Inode, offset: u32) -> Result<BlockId> {
        let target = self.superblock.lock().allocate(self.dev.as_ref())?;
        let index = offset as usize / BLOCK_SIZE;
        match inode.register_target_block(self.dev.as_ref(), offset, target)? {
            Registration::Registered => Ok(target),
            Registration::Conflict => {
                warn!(index, "target slot already holds a block");
                Err(FsError::BlockConflict { index })
            }
            Registration::Nonsequential => {
                warn!(index, "earlier direct slot unset");
                Err(FsError::NonsequentialBlock { index })
            }
            Registration::OutOfRange => {
                warn!(index, "file at maximum size");
                Err(FsError::IndexExhausted)
            }
            Registration::NoIndex => {
                let index_block = self.superblock.lock().allocate(self.dev.as_ref())?;
                if !inode.register_index_block(self.dev.as_ref(), index_block)? {
                    return Err(FsError::IndexAlreadyBound);
                }
                match inode.register_target_block(self.dev.as_ref(), offset, target)? {
                    Registration::Registered => Ok(target),
                    Registration::OutOfRange => Err(FsError::IndexExhausted),
                    _ => Err(FsError::NoIndexBlock),
                }
            }
        }
    }

    /// Move the seek pointer. The new position must land inside `0..=length`.
    pub fn seek(&self, handle: &FileHandle, offset: i64, whence: SeekWhence) -> Result<u32> {
        let mut st = handle.state();
        let base = match whence {
            SeekWhence::Start => 0,
            SeekWhence::Current => i64::from(st.seek),
            SeekWhence::End => i64::from(st.inode.length),
        };
        let position = base.saturating_add(offset);
        let length = st.inode.length;
        match u32::try_from(position) {
            Ok(p) if p <= length => {
                st.seek = p;
                Ok(p)
            }
            _ => Err(FsError::SeekOutOfRange { position, length }),
        }
    }

    /// Current size of the open file in bytes.
    #[must_use]
    pub fn fsize(&self, handle: &FileHandle) -> u32 {
        handle.state().inode.length
    }

    /// Delete `name`. Opens the file for writing first, so the call blocks
    /// while other holders exist and the data blocks are freed by the
    /// truncating open. Returns `false` when the file cannot be deleted.
    pub fn delete(&self, name: &str) -> bool {
        if name == "/" {
            return false;
        }
        let Ok(handle) = self.open(name, OpenMode::Write) else {
            return false;
        };
        let inumber = handle.inumber();
        self.close(handle).is_ok() && self.dir.lock().free(inumber)
    }

    /// Reformat the volume for `max_files` files, erasing all content.
    ///
    /// Spins until every open file is closed before touching the disk.
    pub fn format(&self, max_files: u32) -> Result<()> {
        while !self.table.is_empty() {
            std::thread::yield_now();
        }
        let mut superblock = self.superblock.lock();
        superblock.format(self.dev.as_ref(), max_files)?;
        *self.dir.lock() = Directory::new(superblock.inode_count());
        Ok(())
    }

    /// Persist the directory into the root file and flush the superblock
    /// and the device.
    pub fn sync(&self) -> Result<()> {
        let handle = self.open("/", OpenMode::Write)?;
        let bytes = self.dir.lock().to_bytes();
        self.write(&handle, &bytes)?;
        self.close(handle)?;
        self.superblock.lock().sync(self.dev.as_ref())?;
        self.dev.sync()
    }

    /// Release every data block of the open file and reset its length.
    ///
    /// Only a sole holder may truncate. The index block's pointer slots are
    /// walked and released; the index block itself is not returned to the
    /// free list.
    fn truncate(&self, handle: &FileHandle) -> Result<()> {
        let mut st = handle.state();
        if st.inode.open_count != 1 {
            return Err(FsError::InUse);
        }
        let mut superblock = self.superblock.lock();
        if let Some(contents) = st.inode.unregister_index_block(self.dev.as_ref())? {
            for slot in 0..INDEX_SLOTS {
                let ptr = read_index_slot(contents.as_slice(), slot)
                    .map_err(|e| FsError::Parse(e.to_string()))?;
                if let Some(block) = ptr {
                    superblock.release(self.dev.as_ref(), block)?;
                }
            }
        }
        for ptr in st.inode.direct.iter_mut() {
            if let Some(block) = ptr.take() {
                superblock.release(self.dev.as_ref(), block)?;
            }
        }
        drop(superblock);
        st.inode.length = 0;
        st.seek = 0;
        st.inode.store(self.dev.as_ref(), handle.inumber())
    }
}
