//! Time syscalls (spec.md §6): `gettimeofday`, derived from the LAPIC tick
//! counter in [`crate::arch::x86_64::timer`] (spec.md §4.4).

use crate::arch::x86_64::timer::get_ticks;
use crate::error::{KernelError, KernelResult};

/// Steady-state tick rate the timer is calibrated to (spec.md §4.4).
const TICK_HZ: u64 = 1000;

/// `gettimeofday(tv_ptr)` — writes a `{u64 tv_sec, u64 tv_usec}` pair
/// derived from ticks-since-boot. There is no wall-clock source wired up
/// (spec.md §1 scopes RTC/CMOS out), so this reports uptime rather than
/// calendar time, matching what every other syscall in this kernel already
/// does with tick-derived timestamps.
pub fn sys_gettimeofday(tv_ptr: u64) -> KernelResult<usize> {
    if tv_ptr == 0 {
        return Err(KernelError::BadArgs);
    }

    let ticks = get_ticks();
    let tv_sec = ticks / TICK_HZ;
    let tv_usec = (ticks % TICK_HZ) * (1_000_000 / TICK_HZ);

    write_user_u64(tv_ptr, tv_sec)?;
    write_user_u64(tv_ptr + 8, tv_usec)?;
    Ok(0)
}

fn write_user_u64(va: u64, value: u64) -> KernelResult<()> {
    let process = crate::process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let page_base = crate::mm::VirtAddr::new(va).align_down();
    let offset = (va - page_base.as_u64()) as usize;
    let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
    let dst = crate::mm::phys_to_virt(phys).as_mut_ptr::<u8>();
    // SAFETY: `dst` is the HHDM alias of a frame mapped writable into the
    // caller's address space.
    unsafe {
        core::ptr::write_unaligned(dst.add(offset) as *mut u64, value);
    }
    Ok(())
}
