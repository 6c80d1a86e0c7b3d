//! Anonymous-memory syscalls (spec.md §6): `brk`/`mmap`/`munmap`.
//!
//! No VFS means no file-backed mappings — every `mmap` here is anonymous
//! and zero-filled, matching `MAP_ANONYMOUS` semantics unconditionally.

use crate::error::{KernelError, KernelResult};
use crate::mm::{PageFlags, VirtAddr};
use crate::process;

/// Top of the heap region `brk` grows into, chosen to sit well above the
/// fixed stack/argument regions `process::exec` maps (spec.md §4.6).
const HEAP_BASE: u64 = 0x0200_0000;
/// Upper bound on heap growth: 512 MiB, keeping a single process from
/// exhausting the frame allocator through `brk` alone.
const MAX_HEAP_SIZE: u64 = 512 * 1024 * 1024;

const PROT_WRITE: u32 = 0x2;
const PROT_EXEC: u32 = 0x4;

fn page_align_up(v: u64) -> u64 {
    (v + 0xFFF) & !0xFFF
}

/// `brk(addr)` — grow or shrink the process's heap (spec.md §6 `brk`). The
/// current break starts at `HEAP_BASE` and is tracked in
/// [`crate::process::pcb::ProcessInner::brk`].
pub fn sys_brk(addr: u64) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let mut inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let current = if inner.brk == 0 { HEAP_BASE } else { inner.brk };
    if addr == 0 {
        return Ok(current as usize);
    }
    if addr < HEAP_BASE || addr > HEAP_BASE + MAX_HEAP_SIZE {
        return Err(KernelError::TooBig);
    }

    let old_top = page_align_up(current);
    let new_top = page_align_up(addr);

    if new_top > old_top {
        let flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE | PageFlags::NOEXECUTE;
        space.map_range_zeroed(VirtAddr::new(old_top), (new_top - old_top) as usize, flags)?;
    } else if new_top < old_top {
        let mut cur = new_top;
        while cur < old_top {
            let _ = space.unmap_page(VirtAddr::new(cur));
            cur += 4096;
        }
    }

    inner.brk = addr;
    Ok(addr as usize)
}

/// `mmap(addr_hint, length, prot)` — anonymous, zero-filled mapping
/// (spec.md §6 `mmap`). `addr_hint` of 0 lets the caller pick; a non-zero
/// hint is honored verbatim (no `MAP_FIXED`/overlap negotiation, since
/// there is exactly one anonymous-mapping caller class here).
pub fn sys_mmap(addr_hint: u64, length: usize, prot: u32) -> KernelResult<usize> {
    if length == 0 {
        return Err(KernelError::BadArgs);
    }
    if prot & PROT_WRITE != 0 && prot & PROT_EXEC != 0 {
        return Err(KernelError::BadArgs);
    }

    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let mut inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let base = if addr_hint != 0 {
        addr_hint & !0xFFF
    } else {
        let top = page_align_up(if inner.brk == 0 { HEAP_BASE } else { inner.brk });
        top + 0x10_0000
    };

    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if prot & PROT_WRITE != 0 {
        flags |= PageFlags::WRITABLE;
    }
    if prot & PROT_EXEC == 0 {
        flags |= PageFlags::NOEXECUTE;
    }

    let map_len = page_align_up(length as u64) as usize;
    space.map_range_zeroed(VirtAddr::new(base), map_len, flags)?;

    Ok(base as usize)
}

/// `munmap(addr, length)` — tear down a range mapped by `sys_mmap`.
pub fn sys_munmap(addr: u64, length: usize) -> KernelResult<usize> {
    if addr & 0xFFF != 0 || length == 0 {
        return Err(KernelError::BadArgs);
    }

    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let map_len = page_align_up(length as u64);
    let mut cur = addr;
    let end = addr + map_len;
    while cur < end {
        let _ = space.unmap_page(VirtAddr::new(cur));
        cur += 4096;
    }
    Ok(0)
}
