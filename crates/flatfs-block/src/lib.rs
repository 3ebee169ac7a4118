#![forbid(unsafe_code)]
//! Raw block device layer.
//!
//! Provides the `ByteDevice` and `BlockDevice` traits, a file-backed device
//! using pread/pwrite style I/O, an adapter that carves a byte device into
//! fixed 512-byte blocks, and an in-memory device for tests and tooling.

use flatfs_error::{FsError, Result};
use flatfs_types::{BLOCK_SIZE, BlockId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == `BLOCK_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// An all-zero block.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0_u8; BLOCK_SIZE],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(
                u64::try_from(buf.len())
                    .map_err(|_| FsError::Format("read length overflows u64".to_owned()))?,
            )
            .ok_or_else(|| FsError::Format("read range overflows u64".to_owned()))?;
        if end > self.len {
            return Err(FsError::Format(format!(
                "read out of bounds: offset={offset} len={} file_len={}",
                buf.len(),
                self.len
            )));
        }

        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(FsError::WrongMode);
        }
        let end = offset
            .checked_add(
                u64::try_from(buf.len())
                    .map_err(|_| FsError::Format("write length overflows u64".to_owned()))?,
            )
            .ok_or_else(|| FsError::Format("write range overflows u64".to_owned()))?;
        if end > self.len {
            return Err(FsError::Format(format!(
                "write out of bounds: offset={offset} len={} file_len={}",
                buf.len(),
                self.len
            )));
        }

        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory byte device. Backs test volumes and scratch images.
#[derive(Debug)]
pub struct MemDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemDevice {
    /// Create a zero-filled device spanning `blocks` whole blocks.
    #[must_use]
    pub fn with_blocks(blocks: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; blocks * BLOCK_SIZE]),
        }
    }
}

impl ByteDevice for MemDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset =
            usize::try_from(offset).map_err(|_| FsError::Format("offset overflow".into()))?;
        let end = offset
            .checked_add(buf.len())
            .ok_or_else(|| FsError::Format("range overflow".into()))?;
        let bytes = self.bytes.lock();
        if end > bytes.len() {
            return Err(FsError::Format("read out of bounds".into()));
        }
        buf.copy_from_slice(&bytes[offset..end]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let offset =
            usize::try_from(offset).map_err(|_| FsError::Format("offset overflow".into()))?;
        let end = offset
            .checked_add(buf.len())
            .ok_or_else(|| FsError::Format("range overflow".into()))?;
        let mut bytes = self.bytes.lock();
        if end > bytes.len() {
            return Err(FsError::Format("write out of bounds".into()));
        }
        bytes[offset..end].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed I/O interface over fixed `BLOCK_SIZE` sectors.
pub trait BlockDevice: Send + Sync {
    /// Read a block by id.
    fn read_block(&self, block: BlockId) -> Result<BlockBuf>;

    /// Write a block by id. `data.len()` MUST equal `BLOCK_SIZE`.
    fn write_block(&self, block: BlockId, data: &[u8]) -> Result<()>;

    /// Total number of blocks.
    fn block_count(&self) -> u32;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Adapter exposing a byte device as whole-block I/O.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_count: u32,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D) -> Result<Self> {
        let len = inner.len_bytes();
        let block_size = BLOCK_SIZE as u64;
        let remainder = len % block_size;
        if remainder != 0 {
            return Err(FsError::Format(format!(
                "image length is not block-aligned: len_bytes={len} remainder={remainder}"
            )));
        }
        let block_count = u32::try_from(len / block_size)
            .map_err(|_| FsError::Format("block count exceeds u32".to_owned()))?;
        Ok(Self { inner, block_count })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockId) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(FsError::InvalidBlock { block: block.0 });
        }

        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.inner.read_exact_at(block.byte_offset(), &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn write_block(&self, block: BlockId, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(FsError::Format(format!(
                "write_block data size mismatch: got={} expected={BLOCK_SIZE}",
                data.len()
            )));
        }
        if block.0 >= self.block_count {
            return Err(FsError::InvalidBlock { block: block.0 });
        }

        self.inner.write_all_at(block.byte_offset(), data)?;
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
