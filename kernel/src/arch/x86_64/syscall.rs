//! `int 0x80` syscall gate entry point (spec.md §6 "Syscall ABI").
//!
//! The spec's ABI is the classic interrupt-based convention, not
//! `SYSCALL`/`SYSRET`: `int 0x80`, `RAX` = syscall number, arguments in
//! `RDI, RSI, RDX, R10, R8, R9`, return in `RAX`, negative values in
//! `[-4095, -1]` are errors. Adapted from the teacher's `syscall_entry`
//! naked-asm save/call/restore idiom (originally written for the
//! `SYSCALL` fast path) onto an interrupt-gate frame instead, since the
//! teacher's own `gs`-based per-CPU stack swap has no counterpart without
//! the `SYSCALL` instruction's automatic ring transition.
//!
//! The frame also captures the callee-saved registers (`rbx`, `rbp`,
//! `r12`-`r15`) even though the dispatcher itself never touches them:
//! `process::fork` needs a complete snapshot of the calling task's
//! register file to build the child's, and those six registers are
//! otherwise just live values spilled into this function's own stack
//! frame, unreachable from anywhere else.

#![allow(function_casts_as_integer)]

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sched::smp::MAX_CPUS;

/// Register frame captured on entry, in the order the entry stub pushes
/// them (low address first).
#[repr(C)]
pub struct SyscallFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r9: u64,
    pub r8: u64,
    pub r10: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rax: u64,
}

/// The registers the CPU itself pushes on an `int 0x80` ring transition,
/// sitting immediately above a `SyscallFrame` on the stack.
#[repr(C)]
pub struct TrapContext {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl SyscallFrame {
    /// The CPU-pushed trap context for this syscall.
    ///
    /// # Safety
    /// Only valid while `self` still refers to the live stack frame
    /// `int80_entry` built (i.e. from within `int80_dispatch` or a
    /// callee it invokes before returning).
    pub unsafe fn trap_context(&self) -> &TrapContext {
        unsafe { &*((self as *const SyscallFrame).add(1) as *const TrapContext) }
    }
}

/// Per-CPU pointer to the frame of the syscall currently being dispatched
/// on that CPU, 0 when none is in flight. Mirrors the per-CPU array idiom
/// `smp.rs`/`gdt.rs` use for data indexed by `current_cpu()`.
static CURRENT_FRAME: [AtomicUsize; MAX_CPUS] = [const { AtomicUsize::new(0) }; MAX_CPUS];

/// The in-flight syscall frame on this CPU, if a syscall is currently
/// being dispatched. Used by `process::fork` to capture the caller's
/// full register and trap state.
pub fn current_frame() -> Option<*const SyscallFrame> {
    let cpu = crate::sched::smp::current_cpu();
    let raw = CURRENT_FRAME[cpu].load(Ordering::Acquire);
    if raw == 0 {
        None
    } else {
        Some(raw as *const SyscallFrame)
    }
}

/// `int 0x80` entry stub: save the full register file, dispatch, write
/// the result back into the saved `RAX` slot, restore, and `iretq` back
/// to the caller.
///
/// # Safety
/// Installed directly as the IDT's raw handler address for vector 0x80
/// (`idt.rs`); must never be called except via that interrupt gate.
#[unsafe(naked)]
pub unsafe extern "C" fn int80_entry() {
    core::arch::naked_asm!(
        "push rax",
        "push rdi",
        "push rsi",
        "push rdx",
        "push r10",
        "push r8",
        "push r9",
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {handler}",
        "mov [rsp + 96], rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "pop r9",
        "pop r8",
        "pop r10",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rax",
        "iretq",
        handler = sym int80_dispatch,
    );
}

extern "C" fn int80_dispatch(frame: *mut SyscallFrame) -> u64 {
    let cpu = crate::sched::smp::current_cpu();
    CURRENT_FRAME[cpu].store(frame as usize, Ordering::Release);

    // SAFETY: `frame` points at the register block `int80_entry` just
    // pushed onto the current kernel stack; it outlives this call.
    let f = unsafe { &*frame };
    let result = crate::syscall::dispatch(f.rax, f.rdi, f.rsi, f.rdx, f.r10, f.r8, f.r9) as u64;

    CURRENT_FRAME[cpu].store(0, Ordering::Release);
    result
}
