//! Process and thread model (spec.md §3, §4.5): process control blocks,
//! the process table, fork/execve/exit/wait4, and signal delivery.
//!
//! A process here owns exactly one thread (the "main thread" spec.md §3
//! lists as a process attribute) — this kernel has no `clone`/pthread
//! entity, so "thread" and "process" are in 1:1 correspondence and the
//! scheduler's [`crate::sched::task::Task`] is addressed by the owning
//! process's [`ProcessId`].

extern crate alloc;

use alloc::sync::Arc;
use core::fmt;

pub mod exec;
pub mod exit;
pub mod fd;
pub mod fork;
pub mod pcb;
pub mod procfs;
pub mod table;
pub mod wait;

pub use pcb::Process;

/// Process table capacity (spec.md §4.5).
pub const MAX_PROCESSES: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bring up PID 1 (spec.md §4.5's "boot seeds PID 1 directly, bypassing
/// fork"): a kernel worker thread (spec.md §2), not a user thread — it
/// has no ELF image until it execs one, so it runs `init_entry` in ring 0
/// against its own freshly allocated kernel stack. Called once from
/// `kernel_main` after the scheduler is ready to receive a runnable task.
pub fn init(init_entry: usize) -> ProcessId {
    table::init();

    let space = crate::mm::vmm::AddressSpace::new().expect("init address space allocation failed");
    let pml4 = space.pml4_phys().as_u64();
    let pid = table::alloc_pid().expect("process table has room for PID 1");
    let process = Arc::new(Process::new(
        pid,
        pid,
        alloc::string::String::from("init"),
        space,
        crate::arch::x86_64::timer::get_ticks(),
    ));

    let kernel_stack_top = crate::sched::task::alloc_kernel_stack();
    let task = crate::sched::task::Task::new_kernel(pid, init_entry, kernel_stack_top, pml4);
    let tid = task.tid;
    process.inner().main_thread = Some(tid);

    table::insert(process).expect("process table has room for PID 1");

    let boxed = alloc::boxed::Box::new(task);
    let ptr = core::ptr::NonNull::new(alloc::boxed::Box::leak(boxed) as *mut crate::sched::task::Task)
        .expect("boxed task is never null");
    crate::sched::scheduler::enqueue(0, ptr);

    log::info!("process: table initialized, capacity {MAX_PROCESSES}; PID 1 seeded");
    pid
}

/// The [`ThreadId`] of the task currently running on this CPU, if any.
pub fn current_tid() -> Option<ThreadId> {
    let cpu = crate::sched::smp::current_cpu();
    let sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
    // SAFETY: `current` always points at a live Task owned by the
    // scheduler for as long as it is installed there.
    sched.current.map(|t| unsafe { t.as_ref().tid })
}

/// The [`ProcessId`] owning the task currently running on this CPU.
pub fn current_pid() -> Option<ProcessId> {
    let cpu = crate::sched::smp::current_cpu();
    let sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
    // SAFETY: see `current_tid`.
    sched.current.map(|t| unsafe { t.as_ref().parent_pid })
}

/// The [`Process`] owning the task currently running on this CPU.
pub fn current_process() -> Option<Arc<Process>> {
    current_pid().and_then(table::get)
}
