//! Open-file handles.

use crate::OpenMode;
use flatfs_inode::Inode;
use flatfs_types::InodeNumber;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Mutable per-handle state: the cached inode, the seek pointer, and the
/// reference count of threads sharing the handle.
#[derive(Debug)]
pub(crate) struct HandleState {
    pub inode: Inode,
    pub seek: u32,
    pub refs: u32,
}

#[derive(Debug)]
struct HandleInner {
    inumber: InodeNumber,
    mode: OpenMode,
    state: Mutex<HandleState>,
}

/// A live entry in the open-file table.
///
/// Cloning shares the same entry; pair extra sharers with
/// [`FileHandle::retain`] so close accounting stays balanced. The handle
/// carries its own copy of the inode, synchronized to disk at operation
/// boundaries.
#[derive(Debug, Clone)]
pub struct FileHandle {
    inner: Arc<HandleInner>,
}

impl FileHandle {
    pub(crate) fn new(inumber: InodeNumber, mode: OpenMode, inode: Inode, seek: u32) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                inumber,
                mode,
                state: Mutex::new(HandleState {
                    inode,
                    seek,
                    refs: 1,
                }),
            }),
        }
    }

    #[must_use]
    pub fn inumber(&self) -> InodeNumber {
        self.inner.inumber
    }

    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    /// Add a sharer. Each `retain` must be balanced by a close; the entry
    /// leaves the table only when the last sharer closes.
    pub fn retain(&self) {
        self.state().refs += 1;
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, HandleState> {
        self.inner.state.lock()
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
