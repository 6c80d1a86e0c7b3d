//! Thread control block (spec.md §3's TCB entity).
//!
//! Adapted from the teacher's `sched/task.rs`: the `Priority` enum and
//! `CpuSet` bitmask idiom are kept, but `Priority` is cut down to the
//! spec's seven stride-scheduling classes and `TaskContext`'s
//! multi-architecture dispatch is dropped — this kernel only ever runs
//! `X86_64Context`.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::context::X86_64Context;
use crate::process::{ProcessId, ThreadId};

/// Seven priority classes, each with a stride (spec.md §4.4, §9's "no
/// fairness proof, reproducing it is mandatory for test-scenario
/// equivalence").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Kernel,
    Super,
    Ultra,
    High,
    Normal,
    Low,
    Idle,
}

impl Priority {
    pub const fn stride(self) -> u32 {
        match self {
            Priority::Kernel => 1,
            Priority::Super => 2,
            Priority::Ultra => 4,
            Priority::High => 8,
            Priority::Normal => 16,
            Priority::Low => 32,
            Priority::Idle => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadType {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    None,
    Sleep,
    Child,
    Fd,
}

/// 64-bit CPU affinity mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSet(u64);

impl CpuSet {
    pub const ALL: Self = Self(u64::MAX);

    pub const fn single(cpu: u8) -> Self {
        Self(1u64 << cpu)
    }

    pub const fn contains(self, cpu: u8) -> bool {
        self.0 & (1 << cpu) != 0
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Size of a freshly allocated kernel stack (spec.md §3).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Allocate a new kernel stack and return its top (highest address).
///
/// The allocation is heap-backed and leaked; the matching
/// [`free_kernel_stack`] call reclaims it once the owning task is
/// reaped in `scheduler::cleanup_zombies`.
pub fn alloc_kernel_stack() -> u64 {
    extern crate alloc;
    let stack = alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
    let base = alloc::boxed::Box::leak(stack).as_ptr() as u64;
    base + KERNEL_STACK_SIZE as u64
}

/// Reclaim a kernel stack previously returned by [`alloc_kernel_stack`].
///
/// # Safety
/// `stack_top` must be a value `alloc_kernel_stack` returned, and no one
/// may still be using the stack (the owning task must be fully detached
/// from every CPU's `current` slot and off every scheduler queue).
pub unsafe fn free_kernel_stack(stack_top: u64) {
    extern crate alloc;
    let base = (stack_top - KERNEL_STACK_SIZE as u64) as *mut u8;
    let slice = core::slice::from_raw_parts_mut(base, KERNEL_STACK_SIZE);
    drop(alloc::boxed::Box::from_raw(slice as *mut [u8]));
}

/// The scheduling unit (spec.md §3 "Thread control block").
pub struct Task {
    pub tid: ThreadId,
    pub parent_pid: ProcessId,
    pub thread_type: ThreadType,
    pub priority: Priority,
    pub state: TaskState,
    pub context: X86_64Context,
    pub kernel_stack_top: u64,
    pub user_stack_top: u64,
    pub stack_size: usize,
    /// Cached copy of the owning address space's PML4 physical address
    /// (invariant T2).
    pub page_directory: u64,
    pub cpu_affinity: CpuSet,
    pub last_cpu: Option<u8>,
    pub time_slice: u32,
    pub wakeup_tick: u64,
    pub wait_reason: WaitReason,
    pub exit_code: i32,
    /// Per-tick stride cooldown (spec.md §4.4's dispatch-time retry loop).
    pub cooldown: u32,
    pub next: Option<NonNull<Task>>,
    pub prev: Option<NonNull<Task>>,
}

impl Task {
    pub fn new_kernel(
        parent_pid: ProcessId,
        entry: usize,
        kernel_stack_top: u64,
        page_directory: u64,
    ) -> Self {
        Self {
            tid: alloc_tid(),
            parent_pid,
            thread_type: ThreadType::Kernel,
            priority: Priority::Kernel,
            state: TaskState::Ready,
            context: {
                let mut ctx = X86_64Context::new_kernel(entry, kernel_stack_top);
                ctx.cr3 = page_directory;
                ctx
            },
            kernel_stack_top,
            user_stack_top: 0,
            stack_size: 0,
            page_directory,
            cpu_affinity: CpuSet::ALL,
            last_cpu: None,
            time_slice: 0,
            wakeup_tick: 0,
            wait_reason: WaitReason::None,
            exit_code: 0,
            cooldown: 0,
            next: None,
            prev: None,
        }
    }

    pub fn new_user(
        parent_pid: ProcessId,
        entry: u64,
        user_stack_top: u64,
        kernel_stack_top: u64,
        page_directory: u64,
    ) -> Self {
        Self {
            tid: alloc_tid(),
            parent_pid,
            thread_type: ThreadType::User,
            priority: Priority::Normal,
            state: TaskState::Ready,
            context: {
                let mut ctx = X86_64Context::new_user(entry, user_stack_top);
                ctx.cr3 = page_directory;
                ctx
            },
            kernel_stack_top,
            user_stack_top,
            stack_size: 0,
            page_directory,
            cpu_affinity: CpuSet::ALL,
            last_cpu: None,
            time_slice: 0,
            wakeup_tick: 0,
            wait_reason: WaitReason::None,
            exit_code: 0,
            cooldown: 0,
            next: None,
            prev: None,
        }
    }

    pub fn can_run_on(&self, cpu: u8) -> bool {
        self.cpu_affinity.contains(cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_table_matches_spec() {
        assert_eq!(Priority::Kernel.stride(), 1);
        assert_eq!(Priority::Super.stride(), 2);
        assert_eq!(Priority::Ultra.stride(), 4);
        assert_eq!(Priority::High.stride(), 8);
        assert_eq!(Priority::Normal.stride(), 16);
        assert_eq!(Priority::Low.stride(), 32);
        assert_eq!(Priority::Idle.stride(), 64);
    }

    #[test]
    fn cpu_set_single_contains_only_that_cpu() {
        let set = CpuSet::single(3);
        assert!(set.contains(3));
        assert!(!set.contains(4));
    }
}
