//! Reader lock table.
//!
//! The lock file holds a 16 byte header (magic, version, slot count) followed
//! by one 16 byte slot per reader: pid (u32), in-use flag (u32) and the txnid
//! of the snapshot the reader is bound to (u64, `READER_IDLE` when none).
//! Writers consult the table to find the oldest snapshot still in use before
//! reusing freed pages.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process;

use memmap2::{MmapMut, MmapOptions};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::constants::{LOCK_MAGIC, LOCK_VERSION, READER_IDLE};
use crate::error::{Error, Result};
use crate::page::{read_u32, read_u64, write_u32, write_u64};
use crate::types::ReaderInfo;

const HEADER_SIZE: usize = 16;
const SLOT_SIZE: usize = 16;
const SLOT_USED: u32 = 1;

/// Shared-memory reader table backed by the lock file
#[derive(Debug)]
pub(crate) struct ReaderTable {
    /// Lock file; holds the advisory lock for the environment's lifetime
    file: File,
    /// Mapping of the whole lock file
    map: MmapMut,
    /// Number of reader slots
    slots: usize,
    /// Whether this process holds the lock exclusively
    exclusive: bool,
    /// Our own process id
    pid: u32,
}

impl ReaderTable {
    /// Open or create the lock file at `path` with room for `max_readers`.
    ///
    /// Read-write environments take an exclusive lock, read-only ones a
    /// shared lock.
    pub(crate) fn open(path: &Path, max_readers: u32, mode: u32, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(mode)
            .open(path)?;

        // Fully qualified: std grew inherent File::try_lock* methods
        if read_only {
            fs2::FileExt::try_lock_shared(&file)?;
        } else {
            fs2::FileExt::try_lock_exclusive(&file)?;
        }

        let wanted = max_readers as usize;
        let len = file.metadata()?.len() as usize;
        let mut header = [0u8; HEADER_SIZE];
        let valid = len >= HEADER_SIZE && {
            use std::os::unix::fs::FileExt;
            file.read_exact_at(&mut header, 0)?;
            read_u32(&header, 0) == LOCK_MAGIC && read_u32(&header, 4) == LOCK_VERSION
        };
        let existing = read_u32(&header, 8) as usize;
        let reuse = valid
            && len >= HEADER_SIZE + existing * SLOT_SIZE
            && (existing == wanted || read_only);
        let slots = if reuse { existing } else { wanted };
        let size = HEADER_SIZE + slots * SLOT_SIZE;
        if !reuse {
            file.set_len(0)?;
            file.set_len(size as u64)?;
        }

        let mut map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        if !reuse {
            write_u32(&mut map, 0, LOCK_MAGIC);
            write_u32(&mut map, 4, LOCK_VERSION);
            write_u32(&mut map, 8, slots as u32);
        }

        Ok(ReaderTable {
            file,
            map,
            slots,
            exclusive: !read_only,
            pid: process::id(),
        })
    }

    fn slot_off(slot: usize) -> usize {
        HEADER_SIZE + slot * SLOT_SIZE
    }

    fn slot_used(&self, slot: usize) -> bool {
        read_u32(&self.map, Self::slot_off(slot) + 4) == SLOT_USED
    }

    fn slot_pid(&self, slot: usize) -> u32 {
        read_u32(&self.map, Self::slot_off(slot))
    }

    fn slot_txnid(&self, slot: usize) -> u64 {
        read_u64(&self.map, Self::slot_off(slot) + 8)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots
    }

    /// Claim a free slot for this process
    pub(crate) fn acquire(&mut self) -> Result<usize> {
        let slot = (0..self.slots)
            .find(|&s| !self.slot_used(s))
            .ok_or(Error::ReadersFull)?;
        let off = Self::slot_off(slot);
        write_u32(&mut self.map, off, self.pid);
        write_u32(&mut self.map, off + 4, SLOT_USED);
        write_u64(&mut self.map, off + 8, READER_IDLE);
        Ok(slot)
    }

    /// Bind a slot to a snapshot, or to none with `READER_IDLE`
    pub(crate) fn set_txnid(&mut self, slot: usize, txnid: u64) {
        write_u64(&mut self.map, Self::slot_off(slot) + 8, txnid);
    }

    pub(crate) fn release(&mut self, slot: usize) {
        let off = Self::slot_off(slot);
        self.map[off..off + SLOT_SIZE].fill(0);
    }

    /// Oldest snapshot any reader is bound to
    pub(crate) fn oldest(&self) -> Option<u64> {
        (0..self.slots)
            .filter(|&s| self.slot_used(s))
            .map(|s| self.slot_txnid(s))
            .filter(|&t| t != READER_IDLE)
            .min()
    }

    /// Number of occupied slots
    pub(crate) fn active(&self) -> usize {
        (0..self.slots).filter(|&s| self.slot_used(s)).count()
    }

    pub(crate) fn entries(&self) -> Vec<ReaderInfo> {
        (0..self.slots)
            .filter(|&s| self.slot_used(s))
            .map(|s| {
                let txnid = self.slot_txnid(s);
                ReaderInfo {
                    slot: s,
                    pid: self.slot_pid(s),
                    txnid: (txnid != READER_IDLE).then_some(txnid),
                }
            })
            .collect()
    }

    /// Clear slots left behind by other processes.
    ///
    /// While holding the exclusive lock no other process can have the
    /// environment open, so every foreign slot is stale; otherwise a slot is
    /// stale when `alive` reports its owner gone.
    pub(crate) fn sweep<F: Fn(u32) -> bool>(&mut self, alive: F) -> Result<usize> {
        let mut cleared = 0;
        for s in 0..self.slots {
            if !self.slot_used(s) {
                continue;
            }
            let pid = self.slot_pid(s);
            if pid != self.pid && (self.exclusive || !alive(pid)) {
                self.release(s);
                cleared += 1;
            }
        }
        if cleared > 0 {
            self.map.flush()?;
        }
        Ok(cleared)
    }

    #[cfg(test)]
    pub(crate) fn occupy(&mut self, pid: u32, txnid: u64) -> usize {
        let slot = self.acquire().unwrap();
        let off = Self::slot_off(slot);
        write_u32(&mut self.map, off, pid);
        self.set_txnid(slot, txnid);
        slot
    }
}

/// Whether a process with `pid` currently exists
pub(crate) fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());
    system.process(pid).is_some()
}

impl Drop for ReaderTable {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
