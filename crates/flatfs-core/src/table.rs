//! Open-file table and access arbitration.
//!
//! The table is a monitor: one mutex guards the entry list, and a condition
//! variable parks openers whose access cannot be granted yet. Every release
//! wakes all waiters; each re-reads the inode from disk and re-evaluates.
//!
//! Arbitration itself is a pure function over (persisted state, requested
//! mode), so the policy is testable without any device.

use crate::handle::FileHandle;
use crate::OpenMode;
use flatfs_block::BlockDevice;
use flatfs_dir::Directory;
use flatfs_error::{FsError, Result};
use flatfs_inode::Inode;
use flatfs_ondisk::AccessState;
use flatfs_types::InodeNumber;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, trace};

/// What the arbitration policy decided for an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admit the opener; persist the new access state.
    Grant(AccessState),
    /// Park the opener. `update` is persisted first when a writer queues
    /// behind current holders.
    Wait { update: Option<AccessState> },
}

/// Access policy: single writer, many readers, writers queue with a marker.
///
/// | State \ Mode      | Read          | Write / Append                 |
/// |-------------------|---------------|--------------------------------|
/// | Free              | grant Shared  | grant Exclusive                |
/// | Shared            | grant Shared  | wait, mark PendingExclusive    |
/// | Exclusive         | wait          | wait, mark PendingExclusive    |
/// | PendingExclusive  | wait          | grant Exclusive                |
///
/// The marker keeps new readers from starving a queued writer.
#[must_use]
pub fn arbitrate(state: AccessState, mode: OpenMode) -> Decision {
    match (mode, state) {
        (OpenMode::Read, AccessState::Free | AccessState::Shared) => {
            Decision::Grant(AccessState::Shared)
        }
        (OpenMode::Read, AccessState::Exclusive | AccessState::PendingExclusive) => {
            Decision::Wait { update: None }
        }
        (_, AccessState::Free | AccessState::PendingExclusive) => {
            Decision::Grant(AccessState::Exclusive)
        }
        (_, AccessState::Shared | AccessState::Exclusive) => Decision::Wait {
            update: Some(AccessState::PendingExclusive),
        },
    }
}

/// System-wide table of open files.
pub struct FileTable {
    dev: Arc<dyn BlockDevice>,
    dir: Arc<parking_lot::Mutex<Directory>>,
    entries: Mutex<Vec<FileHandle>>,
    released: Condvar,
}

impl FileTable {
    pub(crate) fn new(dev: Arc<dyn BlockDevice>, dir: Arc<parking_lot::Mutex<Directory>>) -> Self {
        Self {
            dev,
            dir,
            entries: Mutex::new(Vec::new()),
            released: Condvar::new(),
        }
    }

    /// Allocate a table entry for `name`, blocking until access is granted.
    ///
    /// A missing file is an error for readers and is created through the
    /// directory for writers. On grant the inode's holder count and access
    /// state are persisted before the handle is returned.
    pub fn falloc(&self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let resolved = if name == "/" {
                Some(InodeNumber::ROOT)
            } else {
                self.dir.lock().resolve(name)
            };
            let inumber = match resolved {
                Some(inumber) => inumber,
                None => {
                    if mode == OpenMode::Read {
                        return Err(FsError::NotFound(name.to_owned()));
                    }
                    self.dir.lock().allocate(name)?;
                    // Re-resolve; the recycled slot normally arbitrates as
                    // Free, since the release that freed it reset the state.
                    // A stale Shared/Exclusive left by an overlapping release
                    // parks the creator here until the next release.
                    continue;
                }
            };

            let mut inode = Inode::load(self.dev.as_ref(), inumber)?;
            match arbitrate(inode.state, mode) {
                Decision::Grant(state) => {
                    inode.state = state;
                    inode.open_count = inode.open_count.saturating_add(1);
                    inode.store(self.dev.as_ref(), inumber)?;
                    let seek = if mode == OpenMode::Append { inode.length } else { 0 };
                    let handle = FileHandle::new(inumber, mode, inode, seek);
                    entries.push(handle.clone());
                    debug!(name, inumber = inumber.0, ?mode, "table entry granted");
                    return Ok(handle);
                }
                Decision::Wait { update } => {
                    if let Some(state) = update {
                        inode.state = state;
                        inode.store(self.dev.as_ref(), inumber)?;
                    }
                    trace!(name, inumber = inumber.0, ?mode, "open parked");
                    entries = self
                        .released
                        .wait(entries)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Remove `handle` from the table and release its inode.
    ///
    /// The handle's cached inode copy is what goes back to disk: the holder
    /// count drops by one and a Shared or Exclusive state resets to Free.
    /// The reset does not consult other holders, so a remaining reader's
    /// share (or a queued writer's marker) can be wiped by an earlier
    /// release. Returns `false` when the handle is not in the table.
    pub fn ffree(&self, handle: &FileHandle) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = entries.iter().position(|entry| entry.ptr_eq(handle)) else {
            return Ok(false);
        };
        entries.remove(position);
        {
            let mut st = handle.state();
            st.inode.open_count = st.inode.open_count.saturating_sub(1);
            if matches!(
                st.inode.state,
                AccessState::Shared | AccessState::Exclusive
            ) {
                st.inode.state = AccessState::Free;
            }
            st.inode.store(self.dev.as_ref(), handle.inumber())?;
        }
        drop(entries);
        debug!(inumber = handle.inumber().0, "table entry released");
        self.released.notify_all();
        Ok(true)
    }

    /// True when no file is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
