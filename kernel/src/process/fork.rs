//! `fork()` (spec.md §4.5 Fork algorithm): eager, full copy of the
//! calling process's user address space, file descriptor table, and
//! signal disposition into a brand-new process and task.

extern crate alloc;

use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::arch::x86_64::syscall::current_frame;
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::AddressSpace;
use crate::process::{table, Process, ProcessId};
use crate::sched::scheduler;
use crate::sched::smp::current_cpu;
use crate::sched::task::{self, Task};

/// Fork the calling process, returning the child's `ProcessId` to the
/// parent. Must be called from within `int80_dispatch`'s call chain so a
/// live `SyscallFrame` is available to capture the caller's full register
/// state (spec.md §4.5: "the child resumes at the same instruction with a
/// return value of 0").
pub fn fork() -> KernelResult<ProcessId> {
    let parent = crate::process::current_process().ok_or(KernelError::NotInit)?;
    let parent_tid = crate::process::current_tid().ok_or(KernelError::NotInit)?;

    let frame_ptr = current_frame().ok_or(KernelError::BadSystemcall)?;
    // SAFETY: `current_frame` only returns `Some` while a syscall is
    // being dispatched on this CPU, for the duration of this call.
    let frame = unsafe { &*frame_ptr };
    // SAFETY: the trap context sits directly above the frame on the
    // stack, as `int80_entry` laid it out.
    let trap = unsafe { frame.trap_context() };

    let child_space = AddressSpace::new()?;
    {
        let parent_inner = parent.inner();
        let parent_space = parent_inner.address_space.as_ref().ok_or(KernelError::NotInit)?;
        parent_space.fork_user_half(&child_space)?;
    }
    let child_pml4 = child_space.pml4_phys().as_u64();

    let child_pid = table::alloc_pid()?;
    let comm = parent.inner().comm.clone();
    let child_process = Arc::new(Process::new(
        child_pid,
        parent.pid,
        comm,
        child_space,
        crate::arch::x86_64::timer::get_ticks(),
    ));

    {
        let parent_inner = parent.inner();
        let mut child_inner = child_process.inner();
        child_inner.cwd = parent_inner.cwd.clone();
        child_inner.root = parent_inner.root.clone();
        child_inner.creds = parent_inner.creds;
        child_inner.signal_mask = parent_inner.signal_mask;
        child_inner.signal_handlers = parent_inner.signal_handlers;
        child_inner.cmdline = parent_inner.cmdline.clone();
        child_inner.environ = parent_inner.environ.clone();
    }
    *child_process.fd_table.lock() = parent.fd_table.lock().fork_clone();

    let kernel_stack_top = task::alloc_kernel_stack();
    let mut child_task = Task::new_user(child_pid, trap.rip, trap.rsp, kernel_stack_top, child_pml4);
    child_task.priority = current_task_priority();
    copy_caller_registers(&mut child_task, frame, trap);
    child_task.context.set_return_value(0);

    let child_tid = child_task.tid;
    child_process.inner().main_thread = Some(child_tid);

    table::insert(child_process)?;
    parent.add_child(child_pid);

    let boxed = alloc::boxed::Box::new(child_task);
    let ptr = NonNull::new(alloc::boxed::Box::leak(boxed) as *mut Task).expect("boxed task is never null");
    scheduler::enqueue(current_cpu(), ptr);

    log::info!(
        "fork: pid={} tid={} -> child pid={} tid={}",
        parent.pid,
        parent_tid,
        child_pid,
        child_tid
    );
    Ok(child_pid)
}

/// The priority of the task currently running on this CPU — the parent
/// thread that just invoked `fork` (spec.md §4.5's "copy verbatim, then
/// override" list does not include Priority, so the child inherits it).
fn current_task_priority() -> task::Priority {
    let cpu = current_cpu();
    let sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
    // SAFETY: `current` points at the live task this CPU is running,
    // which is the parent thread executing this syscall.
    sched.current.map(|t| unsafe { t.as_ref().priority }).unwrap_or(task::Priority::Normal)
}

fn copy_caller_registers(
    child: &mut Task,
    frame: &crate::arch::x86_64::syscall::SyscallFrame,
    trap: &crate::arch::x86_64::syscall::TrapContext,
) {
    let ctx = &mut child.context;
    ctx.rdi = frame.rdi;
    ctx.rsi = frame.rsi;
    ctx.rdx = frame.rdx;
    ctx.r8 = frame.r8;
    ctx.r9 = frame.r9;
    ctx.r10 = frame.r10;
    ctx.rbx = frame.rbx;
    ctx.rbp = frame.rbp;
    ctx.r12 = frame.r12;
    ctx.r13 = frame.r13;
    ctx.r14 = frame.r14;
    ctx.r15 = frame.r15;
    ctx.rip = trap.rip;
    ctx.rsp = trap.rsp;
    // spec.md §4.5: the child's RFLAGS is fixed at 0x202 (interrupts
    // enabled, reserved bit 1 set), not copied from the parent's trap frame.
    ctx.rflags = 0x202;
    ctx.cs = trap.cs as u16;
    ctx.ss = trap.ss as u16;
}
