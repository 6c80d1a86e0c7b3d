//! Address-space manager (spec.md §4.2): per-process 4-level page tables
//! sharing the kernel's upper half, built on `page_table`'s walk
//! primitives.
//!
//! Adapted from the teacher's `vmm.rs` and the CR3/TLB helpers the
//! teacher kept in `arch/x86_64/mmu.rs` — spec.md treats `switch_to`,
//! `flush_tlb` and `flush_all_tlb` as VMM contract operations, not
//! arch-layer primitives, so they live here instead.

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{get_table, Level, PageTable, VaIndices};
use crate::mm::{frame_allocator, phys_to_virt, PageFlags, PhysAddr, VirtAddr};

/// A process's (or the kernel's) address space: a PML4 plus a reference
/// count, matching the data model's "address space" entity.
pub struct AddressSpace {
    pml4_phys: PhysAddr,
    ref_count: usize,
}

static KERNEL_SPACE: Mutex<Option<PhysAddr>> = Mutex::new(None);

/// Build the kernel's own PML4: entries `[256..512]` are populated by
/// whatever the bootloader already mapped for kernel code/data, adopted
/// by re-reading the live `CR3` the bootloader left behind (spec.md §2:
/// "the BSP initializes PMM, then VMM (adopting the bootloader's CR3)").
pub fn init_kernel_space() {
    let phys = PhysAddr::new(read_cr3());
    *KERNEL_SPACE.lock() = Some(phys);
}

fn kernel_pml4_phys() -> PhysAddr {
    KERNEL_SPACE.lock().expect("mm::vmm::init_kernel_space not called")
}

/// Borrow a throwaway handle onto the live kernel address space. Any
/// mapping done through it lands in the shared upper half (PML4 entries
/// `256..512`), which every address space aliases per invariant I2 — so
/// it is visible everywhere, not just through this handle.
pub fn kernel_space() -> AddressSpace {
    AddressSpace {
        pml4_phys: kernel_pml4_phys(),
        ref_count: 1,
    }
}

impl AddressSpace {
    /// Allocate a fresh PML4, zero it, then copy the kernel's upper half
    /// (invariant I2).
    pub fn new() -> KernelResult<Self> {
        let frame = frame_allocator::alloc_frame().ok_or(KernelError::BadAlloc)?;
        let virt = phys_to_virt(frame);
        let table = PageTable::zeroed_at(virt);

        let kernel_phys = kernel_pml4_phys();
        // SAFETY: `kernel_phys` is the live kernel PML4, read-only here.
        let kernel_table = unsafe { PageTable::at(phys_to_virt(kernel_phys)) };
        table.entries[256..512].copy_from_slice(&kernel_table.entries[256..512]);

        Ok(Self {
            pml4_phys: frame,
            ref_count: 1,
        })
    }

    pub fn pml4_phys(&self) -> PhysAddr {
        self.pml4_phys
    }

    pub fn incref(&mut self) {
        self.ref_count += 1;
    }

    /// Returns true once the caller should actually destroy the space.
    pub fn decref(&mut self) -> bool {
        self.ref_count -= 1;
        self.ref_count == 0
    }

    /// Map a single 4 KiB leaf, creating intermediate tables as needed.
    pub fn map_page(&self, va: VirtAddr, pa: PhysAddr, flags: PageFlags) -> KernelResult<()> {
        if !pa.is_frame_aligned() {
            return Err(KernelError::NotCanonical);
        }
        let pt = get_table(self.pml4_phys, va, Level::Pt, true).ok_or(KernelError::BadAlloc)?;
        let idx = VaIndices::new(va);
        pt.entries[idx.pt].set(pa, flags);
        flush_tlb(va);
        Ok(())
    }

    /// Allocate fresh zeroed frames and map them across `[va, va+len)`
    /// (spec.md §4.2 and §4.6's `map_range_zeroed`).
    pub fn map_range_zeroed(&self, va: VirtAddr, len: usize, flags: PageFlags) -> KernelResult<()> {
        let start = va.align_down();
        let end = VirtAddr::new(va.as_u64() + len as u64).align_up();
        let mut mapped = Vec::new();

        let mut cursor = start;
        while cursor.as_u64() < end.as_u64() {
            let frame = match frame_allocator::alloc_frame() {
                Some(f) => f,
                None => {
                    // Roll back every frame mapped so far in this call
                    // (spec.md §7 recovery policy).
                    for (v, p) in mapped {
                        let _ = self.unmap_page(v);
                        let _ = frame_allocator::free_frame(p);
                    }
                    return Err(KernelError::BadAlloc);
                }
            };
            let frame_virt = phys_to_virt(frame);
            // SAFETY: `frame` was just allocated and is not yet mapped
            // anywhere else; zeroing it through its HHDM alias is safe.
            unsafe {
                core::ptr::write_bytes(frame_virt.as_mut_ptr::<u8>(), 0, crate::mm::FRAME_SIZE);
            }
            if let Err(e) = self.map_page(cursor, frame, flags) {
                let _ = frame_allocator::free_frame(frame);
                for (v, p) in mapped {
                    let _ = self.unmap_page(v);
                    let _ = frame_allocator::free_frame(p);
                }
                return Err(e);
            }
            mapped.push((cursor, frame));
            cursor = VirtAddr::new(cursor.as_u64() + crate::mm::FRAME_SIZE as u64);
        }
        Ok(())
    }

    pub fn unmap_page(&self, va: VirtAddr) -> KernelResult<()> {
        let pt = get_table(self.pml4_phys, va, Level::Pt, false).ok_or(KernelError::NoSuch)?;
        let idx = VaIndices::new(va);
        if !pt.entries[idx.pt].is_present() {
            return Err(KernelError::NoSuch);
        }
        pt.entries[idx.pt].clear();
        flush_tlb(va);
        Ok(())
    }

    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let pt = get_table(self.pml4_phys, va, Level::Pt, false)?;
        let idx = VaIndices::new(va);
        let entry = pt.entries[idx.pt];
        if !entry.is_present() {
            return None;
        }
        Some(PhysAddr::new(entry.addr().as_u64() + va.page_offset()))
    }

    /// Load this address space's PML4 into `CR3`.
    pub fn switch_to(&self) {
        write_cr3(self.pml4_phys.as_u64());
    }

    /// Deep-copy every present user-half leaf of `self` into `child`
    /// (spec.md §4.5 fork: "page-by-page user copy", Non-goals rule out
    /// copy-on-write). Walks the same lower-256-PML4-entries range
    /// `destroy` walks, but copies page contents instead of freeing
    /// frames. Intermediate tables are created on demand in `child` by
    /// `map_page`; only present 4 KiB leaves are copied (no huge pages
    /// are ever created by this kernel, so none are expected here).
    pub fn fork_user_half(&self, child: &AddressSpace) -> KernelResult<()> {
        let pml4 = unsafe { PageTable::at(phys_to_virt(self.pml4_phys)) };
        for pml4_idx in 0..256 {
            let pml4_entry = pml4.entries[pml4_idx];
            if !pml4_entry.is_present() {
                continue;
            }
            let pdpt = unsafe { PageTable::at(phys_to_virt(pml4_entry.addr())) };
            for pdpt_idx in 0..512 {
                let pdpt_entry = pdpt.entries[pdpt_idx];
                if !pdpt_entry.is_present() {
                    continue;
                }
                let pd = unsafe { PageTable::at(phys_to_virt(pdpt_entry.addr())) };
                for pd_idx in 0..512 {
                    let pd_entry = pd.entries[pd_idx];
                    if !pd_entry.is_present() {
                        continue;
                    }
                    let pt = unsafe { PageTable::at(phys_to_virt(pd_entry.addr())) };
                    for pt_idx in 0..512 {
                        let pt_entry = pt.entries[pt_idx];
                        if !pt_entry.is_present() {
                            continue;
                        }
                        let va = VirtAddr::new(
                            ((pml4_idx as u64) << 39)
                                | ((pdpt_idx as u64) << 30)
                                | ((pd_idx as u64) << 21)
                                | ((pt_idx as u64) << 12),
                        );
                        let new_frame = match frame_allocator::alloc_frame() {
                            Some(f) => f,
                            None => return Err(KernelError::BadAlloc),
                        };
                        // SAFETY: `new_frame` was just allocated and isn't
                        // mapped anywhere yet; the source frame is a live
                        // user page of an address space that isn't current
                        // on this CPU during fork.
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                phys_to_virt(pt_entry.addr()).as_ptr::<u8>(),
                                phys_to_virt(new_frame).as_mut_ptr::<u8>(),
                                crate::mm::FRAME_SIZE,
                            );
                        }
                        if let Err(e) = child.map_page(va, new_frame, pt_entry.flags()) {
                            let _ = frame_allocator::free_frame(new_frame);
                            return Err(e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk only the lower 256 PML4 entries; free every present leaf,
    /// then PT, PD, PDPT; never touch the shared upper half
    /// (spec.md §4.2 Destruction).
    pub fn destroy(mut self) {
        if !self.decref() {
            return;
        }
        // SAFETY: this address space is not current on any CPU by the
        // time `destroy` runs (the caller reaps it only after the owning
        // process is a fully-detached zombie).
        let pml4 = unsafe { PageTable::at(phys_to_virt(self.pml4_phys)) };
        for pml4_idx in 0..256 {
            let pml4_entry = pml4.entries[pml4_idx];
            if !pml4_entry.is_present() {
                continue;
            }
            let pdpt = unsafe { PageTable::at(phys_to_virt(pml4_entry.addr())) };
            for pdpt_idx in 0..512 {
                let pdpt_entry = pdpt.entries[pdpt_idx];
                if !pdpt_entry.is_present() || pdpt_entry.flags().contains(PageFlags::HUGEPAGE) {
                    continue;
                }
                let pd = unsafe { PageTable::at(phys_to_virt(pdpt_entry.addr())) };
                for pd_idx in 0..512 {
                    let pd_entry = pd.entries[pd_idx];
                    if !pd_entry.is_present() || pd_entry.flags().contains(PageFlags::HUGEPAGE) {
                        continue;
                    }
                    let pt = unsafe { PageTable::at(phys_to_virt(pd_entry.addr())) };
                    for pt_idx in 0..512 {
                        let pt_entry = pt.entries[pt_idx];
                        if pt_entry.is_present() {
                            let _ = frame_allocator::free_frame(pt_entry.addr());
                        }
                    }
                    let _ = frame_allocator::free_frame(pd_entry.addr());
                }
                let _ = frame_allocator::free_frame(pdpt_entry.addr());
            }
            let _ = frame_allocator::free_frame(pml4_entry.addr());
        }
        let _ = frame_allocator::free_frame(self.pml4_phys);
    }
}

pub fn flush_tlb(va: VirtAddr) {
    // SAFETY: `invlpg` only ever invalidates the TLB entry for `va`; it
    // has no effect beyond this CPU's translation caching.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

pub fn flush_all_tlb() {
    write_cr3(read_cr3());
}

/// The live CR3 value, as a raw PML4 physical address. Used by the
/// per-tick dispatcher to decide whether an address-space switch is
/// needed before resuming a thread (spec.md §4.4).
pub fn current_cr3() -> u64 {
    read_cr3()
}

/// Reload CR3 with a PML4 physical address a TCB cached at creation time.
///
/// # Safety (caller contract, not `unsafe fn` since CR3 is architecturally
/// just a register write)
/// `pml4_phys` must be the physical address of a PML4 this kernel built.
pub fn load_cr3(pml4_phys: u64) {
    write_cr3(pml4_phys);
}

fn read_cr3() -> u64 {
    let value: u64;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

fn write_cr3(value: u64) {
    // SAFETY: `value` is always a physical frame address of a PML4 this
    // kernel built and zero-initialized per spec's invariants.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) value, options(nomem, nostack, preserves_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose_present_bit() {
        let flags = PageFlags::WRITABLE | PageFlags::USER;
        assert!(!flags.contains(PageFlags::PRESENT));
        assert!(flags.contains(PageFlags::WRITABLE));
    }
}
