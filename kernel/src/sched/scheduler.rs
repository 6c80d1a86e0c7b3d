//! Per-tick scheduling dispatch (spec.md §4.4 "Per-tick handler").
//!
//! A direct, idiom-translated port of
//! `Kernel/AxeThreads/Scheduler.c`'s `Schedule`: acknowledge the timer,
//! save the outgoing thread's context and file it by disposition, run
//! `wake_sleeping`/`cleanup_zombies`, then pop the next Ready thread and
//! apply the stride-cooldown retry loop before dispatching it. Unlike the
//! teacher's CFS/RR/Hybrid-pluggable `Scheduler::pick_next_task`, there is
//! exactly one algorithm here — this kernel's Non-goals exclude scheduler
//! policy selection.
//!
//! The timer vector is a naked-asm trampoline (`on_tick_entry`), not an
//! `extern "x86-interrupt" fn`: the spec's TCB needs every GPR, and the
//! x86-interrupt ABI hides them from Rust code.

extern crate alloc;

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::arch::x86_64::context::{restore_fpu_state, save_fpu_state};
use crate::arch::x86_64::gdt::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
use crate::sched::queue::TaskPtr;
use crate::sched::smp::{self, PerCpuScheduler};
use crate::sched::task::{Task, TaskState, ThreadType, WaitReason};

/// Register frame as laid out by `on_tick_entry`'s pushes, followed by
/// the five words the CPU pushes automatically for a same-privilege
/// interrupt (RIP/CS/RFLAGS/RSP/SS).
#[repr(C)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Naked entry point for the LAPIC timer vector (0x20). Installed by
/// `idt.rs` via a raw handler address, the same way the syscall gate is.
///
/// # Safety
/// Only ever reached via the IDT's timer gate.
#[unsafe(naked)]
pub unsafe extern "C" fn on_tick_entry() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {handler}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        handler = sym on_tick_raw,
    );
}

fn save_frame_into_task(frame: &TrapFrame, task: &mut Task) {
    let ctx = &mut task.context;
    ctx.r15 = frame.r15;
    ctx.r14 = frame.r14;
    ctx.r13 = frame.r13;
    ctx.r12 = frame.r12;
    ctx.r11 = frame.r11;
    ctx.r10 = frame.r10;
    ctx.r9 = frame.r9;
    ctx.r8 = frame.r8;
    ctx.rbp = frame.rbp;
    ctx.rdi = frame.rdi;
    ctx.rsi = frame.rsi;
    ctx.rdx = frame.rdx;
    ctx.rcx = frame.rcx;
    ctx.rbx = frame.rbx;
    ctx.rax = frame.rax;
    ctx.rip = frame.rip;
    ctx.cs = frame.cs as u16;
    ctx.rflags = frame.rflags;
    ctx.rsp = frame.rsp;
    ctx.ss = frame.ss as u16;
    save_fpu_state(&mut ctx.fxsave);
}

fn load_task_into_frame(task: &Task, frame: &mut TrapFrame) {
    let ctx = &task.context;
    frame.r15 = ctx.r15;
    frame.r14 = ctx.r14;
    frame.r13 = ctx.r13;
    frame.r12 = ctx.r12;
    frame.r11 = ctx.r11;
    frame.r10 = ctx.r10;
    frame.r9 = ctx.r9;
    frame.r8 = ctx.r8;
    frame.rbp = ctx.rbp;
    frame.rdi = ctx.rdi;
    frame.rsi = ctx.rsi;
    frame.rdx = ctx.rdx;
    frame.rcx = ctx.rcx;
    frame.rbx = ctx.rbx;
    frame.rax = ctx.rax;
    frame.rip = ctx.rip;
    frame.cs = ctx.cs as u64;
    frame.rflags = ctx.rflags;
    frame.rsp = ctx.rsp;
    frame.ss = ctx.ss as u64;
    restore_fpu_state(&ctx.fxsave);
}

/// Scan the Sleeping queue; wake every thread whose `wakeup_tick` has
/// passed (spec.md §4.4: "for each TCB with `WakeupTime <= system_ticks`,
/// unlink and push to Ready tail").
fn wake_sleeping(sched: &mut PerCpuScheduler) {
    let now = crate::arch::x86_64::timer::get_ticks();
    let mut woken: Vec<TaskPtr> = Vec::new();
    sched
        .sleeping
        .drain_matching(|task| task.wakeup_tick <= now, |ptr| woken.push(ptr));
    for mut ptr in woken {
        // SAFETY: `ptr` just came off the Sleeping queue under this same
        // lock; nothing else can be touching it.
        let task = unsafe { ptr.as_mut() };
        task.state = TaskState::Ready;
        task.wait_reason = WaitReason::None;
        sched.ready.push_back(ptr);
    }
}

/// Drain the Zombie queue (spec.md §4.4: "freeing stacks and TCBs").
fn cleanup_zombies(sched: &mut PerCpuScheduler) {
    let mut reaped: Vec<TaskPtr> = Vec::new();
    sched.zombie.drain_matching(|_| true, |ptr| reaped.push(ptr));
    for ptr in reaped {
        // SAFETY: `ptr` just came off the Zombie queue under this CPU's
        // scheduler lock, so it is off every queue and not `current`
        // anywhere — nothing else can reference this TCB or its stack.
        unsafe {
            crate::sched::task::free_kernel_stack(ptr.as_ref().kernel_stack_top);
            drop(alloc::boxed::Box::from_raw(ptr.as_ptr()));
        }
    }
}

/// File the outgoing thread into the queue its post-tick state calls for
/// (spec.md §4.4's disposition table).
fn file_by_disposition(sched: &mut PerCpuScheduler, mut ptr: TaskPtr) {
    // SAFETY: `ptr` was `sched.current`, exclusively owned by this CPU's
    // scheduler lock.
    let task = unsafe { ptr.as_mut() };
    match task.state {
        TaskState::Running | TaskState::Ready => {
            task.state = TaskState::Ready;
            sched.ready.push_back(ptr);
        }
        TaskState::Terminated => {
            task.state = TaskState::Zombie;
            sched.zombie.push(ptr);
        }
        TaskState::Blocked => sched.waiting.push(ptr),
        TaskState::Sleeping => sched.sleeping.push(ptr),
        TaskState::Zombie => sched.zombie.push(ptr),
    }
}

/// The actual per-tick decision, called from `on_tick_entry` with a
/// pointer into the interrupted frame.
///
/// # Safety
/// `frame` must point at a live `TrapFrame` built by `on_tick_entry` on
/// the current kernel stack.
#[no_mangle]
extern "C" fn on_tick_raw(frame: *mut TrapFrame) {
    crate::arch::x86_64::apic::send_eoi();
    crate::arch::x86_64::timer::tick();

    // SAFETY: see function contract.
    let frame = unsafe { &mut *frame };

    let cpu = smp::current_cpu();
    let per_cpu = smp::per_cpu(cpu);
    let mut sched = per_cpu.scheduler.lock();

    if let Some(mut current) = sched.current.take() {
        // SAFETY: `current` is the TCB this CPU was just running.
        let task = unsafe { current.as_mut() };
        save_frame_into_task(frame, task);
        file_by_disposition(&mut sched, current);
    }

    wake_sleeping(&mut sched);
    cleanup_zombies(&mut sched);

    loop {
        let Some(mut next) = sched.ready.pop_front() else {
            // Nothing runnable: leave the interrupted frame untouched,
            // which resumes whatever was executing (the per-CPU idle
            // thread's HLT loop in steady state).
            sched.current = None;
            return;
        };

        // SAFETY: `next` just came off the Ready queue under this lock.
        let task = unsafe { next.as_mut() };

        match task.thread_type {
            ThreadType::User => {
                task.context.cs = USER_CODE_SELECTOR;
                task.context.ss = USER_DATA_SELECTOR;
            }
            ThreadType::Kernel => {
                task.context.cs = KERNEL_CODE_SELECTOR;
                task.context.ss = KERNEL_DATA_SELECTOR;
            }
        }

        if task.cooldown > 0 {
            task.cooldown -= 1;
            sched.ready.push_back(next);
            continue;
        }
        task.cooldown = task.priority.stride() - 1;

        task.state = TaskState::Running;
        task.last_cpu = Some(cpu as u8);
        load_task_into_frame(task, frame);
        // Coarse address-space switch (spec.md §7 recovery policy: "local
        // TLB flush + CR3 reload only", no cross-CPU shootdown). Skipped
        // when unchanged to avoid flushing the TLB on every same-process
        // reschedule.
        if task.context.cr3 != crate::mm::vmm::current_cr3() {
            crate::mm::vmm::load_cr3(task.context.cr3);
        }
        sched.current = Some(next);
        per_cpu
            .context_switches
            .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        return;
    }
}

/// Voluntary yield (spec.md §4.4: "the only cooperative suspension point
/// is `yield`, implemented by raising the timer vector via `int 0x20`").
pub fn yield_now() {
    unsafe {
        core::arch::asm!("int 0x20", options(nostack));
    }
}

/// Push a freshly-built TCB onto its target CPU's Ready queue.
pub fn enqueue(cpu: usize, task: NonNull<Task>) {
    smp::per_cpu(cpu).scheduler.lock().ready.push_back(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessId;

    #[test]
    fn disposition_files_terminated_as_zombie() {
        let mut sched = PerCpuScheduler::test_instance();
        let mut task = Task::new_kernel(ProcessId(0), 0, 0, 0);
        task.state = TaskState::Terminated;
        let boxed = alloc::boxed::Box::new(task);
        let ptr = NonNull::new(alloc::boxed::Box::leak(boxed) as *mut Task).unwrap();
        file_by_disposition(&mut sched, ptr);
        assert_eq!(sched.zombie.len(), 1);
    }
}
