//! Per-process file descriptor table (spec.md §3, §6).
//!
//! spec.md scopes a VFS out of this kernel (§1's "out of scope"
//! collaborators); what's left on this side of the boundary is a
//! byte-addressable `File` handle abstraction an outer VFS/driver layer
//! satisfies. `FdTable` only tracks which numbers are live and which
//! object backs each one.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

/// Default FD table size allocated at process creation (spec.md §4.5).
pub const DEFAULT_FD_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// The file abstraction spec.md §1 treats as an external collaborator:
/// anything able to satisfy `read`/`write`/`seek`/`stat` over a byte
/// range. Concrete backing objects (console, pipe, regular file) are
/// supplied by whatever sits above this crate.
pub trait FileObject: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> KernelResult<usize>;
    fn write(&self, buf: &[u8]) -> KernelResult<usize>;
    fn seek(&self, pos: SeekFrom) -> KernelResult<u64>;
    fn stat(&self) -> KernelResult<FileStat>;
}

#[derive(Clone)]
pub struct FdEntry {
    pub flags: u32,
    pub object: Arc<dyn FileObject>,
}

pub struct FdTable {
    entries: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(DEFAULT_FD_CAPACITY);
        entries.resize_with(DEFAULT_FD_CAPACITY, || None);
        Self { entries }
    }

    /// Install `object` at the lowest free descriptor number.
    pub fn install(&mut self, object: Arc<dyn FileObject>, flags: u32) -> KernelResult<i32> {
        for (fd, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(FdEntry { flags, object });
                return Ok(fd as i32);
            }
        }
        Err(KernelError::TooMany)
    }

    pub fn get(&self, fd: i32) -> KernelResult<FdEntry> {
        if fd < 0 {
            return Err(KernelError::BadArgs);
        }
        self.entries
            .get(fd as usize)
            .and_then(|slot| slot.clone())
            .ok_or(KernelError::NoSuch)
    }

    pub fn close(&mut self, fd: i32) -> KernelResult<()> {
        if fd < 0 {
            return Err(KernelError::BadArgs);
        }
        let slot = self.entries.get_mut(fd as usize).ok_or(KernelError::NoSuch)?;
        if slot.take().is_none() {
            return Err(KernelError::NoSuch);
        }
        Ok(())
    }

    pub fn close_all(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
    }

    /// Fork inherits every open descriptor (spec.md §4.5's Fork algorithm).
    pub fn fork_clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;
    impl FileObject for Null {
        fn read(&self, _buf: &mut [u8]) -> KernelResult<usize> {
            Ok(0)
        }
        fn write(&self, buf: &[u8]) -> KernelResult<usize> {
            Ok(buf.len())
        }
        fn seek(&self, _pos: SeekFrom) -> KernelResult<u64> {
            Ok(0)
        }
        fn stat(&self) -> KernelResult<FileStat> {
            Ok(FileStat::default())
        }
    }

    #[test]
    fn install_reuses_lowest_free_slot() {
        let mut table = FdTable::new();
        let a = table.install(Arc::new(Null), 0).unwrap();
        let b = table.install(Arc::new(Null), 0).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        table.close(a).unwrap();
        let c = table.install(Arc::new(Null), 0).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn close_unknown_fd_errors() {
        let mut table = FdTable::new();
        assert!(table.close(5).is_err());
    }

    #[test]
    fn fork_clone_shares_underlying_objects() {
        let mut table = FdTable::new();
        let fd = table.install(Arc::new(Null), 0).unwrap();
        let clone = table.fork_clone();
        assert!(clone.get(fd).is_ok());
    }
}
