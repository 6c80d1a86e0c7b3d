//! Saved CPU register context (spec.md §3 TCB attribute: "saved register
//! context (all GPRs, RIP, RSP, RFLAGS, segment selectors, 512-byte
//! FXSAVE area)") and the context switch that restores it.
//!
//! Kept from the teacher's `context.rs`: the field layout, the
//! `context_switch` naked-offset asm routine, and the FXSAVE/FXRSTOR
//! helpers. Dropped: the multi-architecture `ThreadContext`/`TaskContext`
//! dispatch layer (this kernel only ever runs `X86_64Context`, spec's
//! Non-goal on architecture portability), and the teacher's heap-pointer
//! `fpu_state`, replaced with the FXSAVE area embedded directly in the
//! TCB as the spec's data model calls for. Selectors are spec.md §4.3's
//! fixed GDT layout (`0x08/0x10/0x1B/0x23`), not the teacher's
//! (`0x08/0x10/0x2B/0x33`).

use core::arch::asm;

use super::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR};

/// 512-byte FXSAVE legacy area (x87/MMX/SSE state).
#[repr(C, align(16))]
#[derive(Clone)]
pub struct FxsaveArea(pub [u8; 512]);

impl FxsaveArea {
    pub const fn zeroed() -> Self {
        Self([0u8; 512])
    }
}

/// x86_64 CPU context (spec.md §3's TCB "saved register context").
#[repr(C)]
#[derive(Clone)]
pub struct X86_64Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,

    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,

    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,

    /// Cached PML4 physical address (the TCB's `page_directory`, per
    /// spec.md §3 T2, lives separately on `Task`; this copy is what
    /// `context_switch` actually loads into `CR3`).
    pub cr3: u64,

    pub fxsave: FxsaveArea,
}

/// `RFLAGS` with only the reserved bit 1 set (interrupts off).
const RFLAGS_IF_CLEAR: u64 = 0x002;
/// `RFLAGS` with IF set (spec.md §3 T3: "RFLAGS always has IF set on
/// preparation").
const RFLAGS_IF_SET: u64 = 0x202;

impl X86_64Context {
    fn blank(rip: u64, rsp: u64, rflags: u64, cs: u16, ss: u16) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            rsp,
            rip,
            rflags,
            cs,
            ss,
            ds: ss,
            es: ss,
            fs: 0,
            gs: 0,
            cr3: read_cr3(),
            fxsave: FxsaveArea::zeroed(),
        }
    }

    /// A kernel thread: Ring 0 selectors, entry runs with interrupts
    /// enabled once scheduled (T3/T4).
    pub fn new_kernel(entry_point: usize, kernel_stack_top: u64) -> Self {
        Self::blank(
            entry_point as u64,
            kernel_stack_top,
            RFLAGS_IF_SET,
            KERNEL_CODE_SELECTOR,
            KERNEL_DATA_SELECTOR,
        )
    }

    /// A user thread about to run for the first time via `iretq`: Ring 3
    /// selectors with RPL 3 already baked into the GDT constants.
    pub fn new_user(entry_point: u64, user_stack_top: u64) -> Self {
        let mut ctx = Self::blank(
            entry_point,
            user_stack_top,
            RFLAGS_IF_SET,
            USER_CODE_SELECTOR,
            USER_DATA_SELECTOR,
        );
        ctx.rflags = RFLAGS_IF_SET;
        ctx
    }

    pub fn set_return_value(&mut self, value: u64) {
        self.rax = value;
    }
}

fn read_cr3() -> u64 {
    let value: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Switch from `current`'s live register state into `next`.
///
/// # Safety
/// Must be called with interrupts disabled and with both pointers valid
/// for the duration of the call; `current` is written into, `next` is
/// only read.
#[no_mangle]
pub unsafe extern "C" fn context_switch(current: *mut X86_64Context, next: *const X86_64Context) {
    asm!(
        "mov [rdi + 0x00], r15",
        "mov [rdi + 0x08], r14",
        "mov [rdi + 0x10], r13",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r11",
        "mov [rdi + 0x28], r10",
        "mov [rdi + 0x30], r9",
        "mov [rdi + 0x38], r8",
        "mov [rdi + 0x40], rdi",
        "mov [rdi + 0x48], rsi",
        "mov [rdi + 0x50], rbp",
        "mov [rdi + 0x58], rbx",
        "mov [rdi + 0x60], rdx",
        "mov [rdi + 0x68], rcx",
        "mov [rdi + 0x70], rax",
        "mov [rdi + 0x78], rsp",
        "mov rax, [rsp]",
        "mov [rdi + 0x80], rax",
        "pushfq",
        "pop rax",
        "mov [rdi + 0x88], rax",
        in("rdi") current,
        in("rsi") next,
        lateout("rax") _,
        lateout("rcx") _,
        lateout("rdx") _,
    );

    asm!(
        "mov rax, [rsi + 0xA0]",
        "mov rcx, cr3",
        "cmp rax, rcx",
        "je 2f",
        "mov cr3, rax",
        "2:",
        "mov r15, [rsi + 0x00]",
        "mov r14, [rsi + 0x08]",
        "mov r13, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r11, [rsi + 0x20]",
        "mov r10, [rsi + 0x28]",
        "mov r9,  [rsi + 0x30]",
        "mov r8,  [rsi + 0x38]",
        "mov rdi, [rsi + 0x40]",
        "mov rbp, [rsi + 0x50]",
        "mov rbx, [rsi + 0x58]",
        "mov rdx, [rsi + 0x60]",
        "mov rcx, [rsi + 0x68]",
        "mov rax, [rsi + 0x70]",
        "push qword ptr [rsi + 0x88]",
        "popfq",
        "mov rsp, [rsi + 0x78]",
        "push qword ptr [rsi + 0x80]",
        "mov rsi, [rsi + 0x48]",
        "ret",
        in("rsi") next,
        lateout("rax") _,
        lateout("rcx") _,
        lateout("rdx") _,
        lateout("r8") _,
        lateout("r9") _,
        lateout("r10") _,
        lateout("r11") _,
        lateout("r12") _,
        lateout("r13") _,
        lateout("r14") _,
        lateout("r15") _,
    );
}

pub fn switch_context(from: &mut X86_64Context, to: &X86_64Context) {
    // SAFETY: both references are valid for the call and interrupts are
    // disabled by the caller (the per-tick scheduler handler).
    unsafe {
        context_switch(from as *mut _, to as *const _);
    }
}

pub fn save_fpu_state(state: &mut FxsaveArea) {
    // SAFETY: `state` is 16-byte aligned and 512 bytes, as FXSAVE requires.
    unsafe {
        asm!("fxsave [{}]", in(reg) state as *mut FxsaveArea);
    }
}

pub fn restore_fpu_state(state: &FxsaveArea) {
    // SAFETY: `state` holds a previously-saved FXSAVE image of the same
    // 512-byte, 16-byte-aligned shape.
    unsafe {
        asm!("fxrstor [{}]", in(reg) state as *const FxsaveArea);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_kernel_uses_kernel_selectors_and_enables_interrupts() {
        let ctx = X86_64Context::new_kernel(0x1000, 0x2000);
        assert_eq!(ctx.cs, KERNEL_CODE_SELECTOR);
        assert_eq!(ctx.ss, KERNEL_DATA_SELECTOR);
        assert_eq!(ctx.rflags & RFLAGS_IF_SET, RFLAGS_IF_SET);
    }

    #[test]
    fn new_user_uses_user_selectors() {
        let ctx = X86_64Context::new_user(0x4000_0000, 0x7FFF_0000);
        assert_eq!(ctx.cs, USER_CODE_SELECTOR);
        assert_eq!(ctx.ss, USER_DATA_SELECTOR);
    }
}
