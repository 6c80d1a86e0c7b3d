//! Process control block (spec.md §3): the fixed attribute set every
//! process carries from creation to reaping, guarded by the single
//! per-process lock spec.md §5's lock hierarchy places above the FD
//! table lock.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::mm::vmm::AddressSpace;
use crate::process::fd::FdTable;
use crate::process::{ProcessId, ThreadId};
use crate::sync::{IrqSpinLock, IrqSpinLockGuard};

/// Process credentials (spec.md §3: "real/effective/saved uid and gid,
/// umask").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub ruid: u32,
    pub euid: u32,
    pub suid: u32,
    pub rgid: u32,
    pub egid: u32,
    pub sgid: u32,
    pub umask: u32,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            ruid: 0,
            euid: 0,
            suid: 0,
            rgid: 0,
            egid: 0,
            sgid: 0,
            umask: 0o022,
        }
    }
}

/// One entry of the 32-pointer signal-handler table (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalHandler {
    Default,
    Ignore,
    Handler(usize),
}

impl Default for SignalHandler {
    fn default() -> Self {
        SignalHandler::Default
    }
}

pub const MAX_SIGNAL_HANDLERS: usize = 32;

/// Everything about a process that isn't a standalone atomic, behind the
/// one lock spec.md §3 calls "per-process lock".
pub struct ProcessInner {
    pub pgid: u64,
    pub sid: u64,
    pub creds: Credentials,
    pub cwd: String,
    pub root: String,
    pub main_thread: Option<ThreadId>,
    pub address_space: Option<AddressSpace>,
    pub pending_signals: u64,
    pub signal_mask: u64,
    pub signal_handlers: [SignalHandler; MAX_SIGNAL_HANDLERS],
    pub cmdline: Vec<u8>,
    pub environ: Vec<u8>,
    pub comm: String,
    pub children: Vec<ProcessId>,
    /// Current program break (spec.md §6 `brk`), 0 until first grown.
    pub brk: u64,
}

pub struct Process {
    pub pid: ProcessId,
    pub ppid: ProcessId,
    pub start_tick: u64,
    pub fd_table: IrqSpinLock<FdTable>,
    pub user_us: AtomicU64,
    pub sys_us: AtomicU64,
    pub exit_code: AtomicI32,
    pub zombie: AtomicBool,
    inner: IrqSpinLock<ProcessInner>,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        ppid: ProcessId,
        comm: String,
        address_space: AddressSpace,
        start_tick: u64,
    ) -> Self {
        Self {
            pid,
            ppid,
            start_tick,
            fd_table: IrqSpinLock::new(FdTable::new()),
            user_us: AtomicU64::new(0),
            sys_us: AtomicU64::new(0),
            exit_code: AtomicI32::new(0),
            zombie: AtomicBool::new(false),
            inner: IrqSpinLock::new(ProcessInner {
                pgid: pid.0,
                sid: pid.0,
                creds: Credentials::default(),
                cwd: String::from("/"),
                root: String::from("/"),
                main_thread: None,
                address_space: Some(address_space),
                pending_signals: 0,
                signal_mask: 0,
                signal_handlers: [SignalHandler::default(); MAX_SIGNAL_HANDLERS],
                cmdline: Vec::new(),
                environ: Vec::new(),
                comm,
                children: Vec::new(),
                brk: 0,
            }),
        }
    }

    pub fn inner(&self) -> IrqSpinLockGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    /// Build a process with no backing address space, for use in host
    /// unit tests that never call `mm::init` (e.g. `process::table`'s).
    #[cfg(test)]
    pub(crate) fn new_for_test(pid: ProcessId, ppid: ProcessId) -> Self {
        Self {
            pid,
            ppid,
            start_tick: 0,
            fd_table: IrqSpinLock::new(FdTable::new()),
            user_us: AtomicU64::new(0),
            sys_us: AtomicU64::new(0),
            exit_code: AtomicI32::new(0),
            zombie: AtomicBool::new(false),
            inner: IrqSpinLock::new(ProcessInner {
                pgid: pid.0,
                sid: pid.0,
                creds: Credentials::default(),
                cwd: String::from("/"),
                root: String::from("/"),
                main_thread: None,
                address_space: None,
                pending_signals: 0,
                signal_mask: 0,
                signal_handlers: [SignalHandler::default(); MAX_SIGNAL_HANDLERS],
                cmdline: Vec::new(),
                environ: Vec::new(),
                comm: String::from("test"),
                children: Vec::new(),
                brk: 0,
            }),
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Acquire)
    }

    pub fn mark_zombie(&self, exit_code: i32) {
        self.exit_code.store(exit_code, Ordering::Release);
        self.zombie.store(true, Ordering::Release);
    }

    pub fn get_exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn add_cpu_time(&self, user_us: u64, sys_us: u64) {
        self.user_us.fetch_add(user_us, Ordering::Relaxed);
        self.sys_us.fetch_add(sys_us, Ordering::Relaxed);
    }

    /// Raise signal `signum` (1-63) as pending (spec.md §4.5 Signals).
    pub fn raise_signal(&self, signum: u32) {
        if signum == 0 || signum > 63 {
            return;
        }
        self.inner.lock().pending_signals |= 1u64 << (signum - 1);
    }

    /// Take the lowest-numbered pending, unmasked signal, if any.
    pub fn take_pending_signal(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        let deliverable = inner.pending_signals & !inner.signal_mask;
        if deliverable == 0 {
            return None;
        }
        let signum = deliverable.trailing_zeros() + 1;
        inner.pending_signals &= !(1u64 << (signum - 1));
        Some(signum)
    }

    pub fn add_child(&self, pid: ProcessId) {
        self.inner.lock().children.push(pid);
    }

    pub fn remove_child(&self, pid: ProcessId) {
        self.inner.lock().children.retain(|&p| p != pid);
    }

    pub fn children(&self) -> Vec<ProcessId> {
        self.inner.lock().children.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a `Process` without touching `mm::vmm` (no frame allocator or
    /// kernel address space exists in the host unit-test target).
    fn test_process() -> Process {
        Process {
            pid: ProcessId(1),
            ppid: ProcessId(0),
            start_tick: 0,
            fd_table: IrqSpinLock::new(FdTable::new()),
            user_us: AtomicU64::new(0),
            sys_us: AtomicU64::new(0),
            exit_code: AtomicI32::new(0),
            zombie: AtomicBool::new(false),
            inner: IrqSpinLock::new(ProcessInner {
                pgid: 1,
                sid: 1,
                creds: Credentials::default(),
                cwd: String::from("/"),
                root: String::from("/"),
                main_thread: None,
                address_space: None,
                pending_signals: 0,
                signal_mask: 0,
                signal_handlers: [SignalHandler::default(); MAX_SIGNAL_HANDLERS],
                cmdline: Vec::new(),
                environ: Vec::new(),
                comm: String::from("test"),
                children: Vec::new(),
                brk: 0,
            }),
        }
    }

    #[test]
    fn signal_round_trips_through_pending_bitset() {
        let p = test_process();
        assert!(p.take_pending_signal().is_none());
        p.raise_signal(15);
        assert_eq!(p.take_pending_signal(), Some(15));
        assert!(p.take_pending_signal().is_none());
    }

    #[test]
    fn masked_signal_is_not_delivered() {
        let p = test_process();
        p.inner().signal_mask = 1 << 14;
        p.raise_signal(15);
        assert!(p.take_pending_signal().is_none());
    }

    #[test]
    fn children_list_tracks_add_remove() {
        let p = test_process();
        p.add_child(ProcessId(2));
        p.add_child(ProcessId(3));
        assert_eq!(p.children(), alloc::vec![ProcessId(2), ProcessId(3)]);
        p.remove_child(ProcessId(2));
        assert_eq!(p.children(), alloc::vec![ProcessId(3)]);
    }
}
