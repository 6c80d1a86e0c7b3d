//! Global process table (spec.md §4.5): a PID-keyed map from `ProcessId`
//! to the shared, reference-counted `Process`, plus monotonic PID
//! allocation that skips PIDs still in use.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::error::{KernelError, KernelResult};
use crate::process::{Process, ProcessId, MAX_PROCESSES};
use crate::sync::IrqSpinLock;

static NEXT_PID: AtomicI64 = AtomicI64::new(1);

static TABLE: IrqSpinLock<BTreeMap<u64, Arc<Process>>> = IrqSpinLock::new(BTreeMap::new());

pub fn init() {
    NEXT_PID.store(1, Ordering::Relaxed);
    TABLE.lock().clear();
}

/// Allocate the next unused PID, wrapping past `i64::MAX` back to 1 and
/// skipping any PID still occupied (spec.md §4.5's monotonic-wrap-skip
/// rule). Fails once the table is at capacity.
pub fn alloc_pid() -> KernelResult<ProcessId> {
    let table = TABLE.lock();
    if table.len() >= MAX_PROCESSES {
        return Err(KernelError::Depleted);
    }
    for _ in 0..MAX_PROCESSES {
        let candidate = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        let candidate = if candidate <= 0 {
            NEXT_PID.store(2, Ordering::Relaxed);
            1
        } else {
            candidate
        };
        let pid = candidate as u64;
        if !table.contains_key(&pid) {
            return Ok(ProcessId(pid));
        }
    }
    Err(KernelError::TooMany)
}

pub fn insert(process: Arc<Process>) -> KernelResult<()> {
    let mut table = TABLE.lock();
    if table.len() >= MAX_PROCESSES {
        return Err(KernelError::Depleted);
    }
    if table.contains_key(&process.pid.0) {
        return Err(KernelError::Redefined);
    }
    table.insert(process.pid.0, process);
    Ok(())
}

pub fn get(pid: ProcessId) -> Option<Arc<Process>> {
    TABLE.lock().get(&pid.0).cloned()
}

pub fn remove(pid: ProcessId) -> Option<Arc<Process>> {
    TABLE.lock().remove(&pid.0)
}

pub fn exists(pid: ProcessId) -> bool {
    TABLE.lock().contains_key(&pid.0)
}

pub fn count() -> usize {
    TABLE.lock().len()
}

/// Every direct child of `pid`, per the child's own `ppid` field.
pub fn children_of(pid: ProcessId) -> alloc::vec::Vec<Arc<Process>> {
    TABLE
        .lock()
        .values()
        .filter(|p| p.ppid == pid)
        .cloned()
        .collect()
}

pub fn for_each<F: FnMut(&Arc<Process>)>(mut f: F) {
    for process in TABLE.lock().values() {
        f(process);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(pid: u64, ppid: u64) -> Arc<Process> {
        Arc::new(Process::new_for_test(ProcessId(pid), ProcessId(ppid)))
    }

    #[test]
    fn insert_get_remove_round_trip() {
        init();
        let p = bare(1, 0);
        insert(p.clone()).unwrap();
        assert!(exists(ProcessId(1)));
        assert_eq!(get(ProcessId(1)).unwrap().pid, ProcessId(1));
        assert!(remove(ProcessId(1)).is_some());
        assert!(!exists(ProcessId(1)));
    }

    #[test]
    fn insert_duplicate_pid_errors() {
        init();
        insert(bare(5, 0)).unwrap();
        assert!(matches!(insert(bare(5, 0)), Err(KernelError::Redefined)));
    }

    #[test]
    fn children_of_filters_by_ppid() {
        init();
        insert(bare(1, 0)).unwrap();
        insert(bare(2, 1)).unwrap();
        insert(bare(3, 1)).unwrap();
        insert(bare(4, 2)).unwrap();
        let kids = children_of(ProcessId(1));
        assert_eq!(kids.len(), 2);
    }

    #[test]
    fn alloc_pid_skips_in_use() {
        init();
        let first = alloc_pid().unwrap();
        insert(bare(first.0, 0)).unwrap();
        let second = alloc_pid().unwrap();
        assert_ne!(first, second);
    }
}
