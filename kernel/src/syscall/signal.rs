//! Signal syscalls (spec.md §6): `kill`/`sigaction` against the per-process
//! pending-signal bitset and handler table in [`crate::process::pcb`].

use crate::error::{KernelError, KernelResult};
use crate::process::exit::signals::{SIGKILL, SIGSTOP};
use crate::process::pcb::SignalHandler;
use crate::process::{self, ProcessId};

/// `kill(pid, signal)` (spec.md §6 `kill`).
pub fn sys_kill(pid: u64, signal: i32) -> KernelResult<usize> {
    process::exit::kill_process(ProcessId(pid), signal)?;
    Ok(0)
}

/// `sigaction(signum, handler, old_handler_ptr)`. `handler` is a raw user
/// instruction pointer (or 0/1 for `SIG_DFL`/`SIG_IGN`); the previous
/// handler, if any, is written back through `old_handler_ptr` as a u64
/// when non-zero.
pub fn sys_sigaction(signum: i32, handler: u64, old_handler_ptr: u64) -> KernelResult<usize> {
    if !(1..=31).contains(&signum) {
        return Err(KernelError::BadArgs);
    }
    if signum == SIGKILL || signum == SIGSTOP {
        return Err(KernelError::BadArgs);
    }

    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let idx = (signum - 1) as usize;

    let old = {
        let mut inner = process.inner();
        let old = inner.signal_handlers[idx];
        inner.signal_handlers[idx] = match handler {
            0 => SignalHandler::Default,
            1 => SignalHandler::Ignore,
            addr => SignalHandler::Handler(addr as usize),
        };
        old
    };

    if old_handler_ptr != 0 {
        let raw: u64 = match old {
            SignalHandler::Default => 0,
            SignalHandler::Ignore => 1,
            SignalHandler::Handler(addr) => addr as u64,
        };
        write_user_u64(old_handler_ptr, raw)?;
    }

    Ok(0)
}

fn write_user_u64(va: u64, value: u64) -> KernelResult<()> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let page_base = crate::mm::VirtAddr::new(va).align_down();
    let offset = (va - page_base.as_u64()) as usize;
    let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
    let dst = crate::mm::phys_to_virt(phys).as_mut_ptr::<u8>();
    // SAFETY: `dst` is the HHDM alias of a frame mapped writable into the
    // caller's address space; `offset` leaves room for a u64 (the caller
    // passes an 8-byte-aligned pointer per the SysV ABI).
    unsafe {
        core::ptr::write_unaligned(dst.add(offset) as *mut u64, value);
    }
    Ok(())
}
