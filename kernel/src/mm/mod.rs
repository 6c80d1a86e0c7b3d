//! Memory management: physical frames, page tables, per-process address
//! spaces and the kernel heap.

pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod vmm;

use core::sync::atomic::{AtomicU64, Ordering};

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_frame_aligned(self) -> bool {
        self.0 & (FRAME_SIZE as u64 - 1) == 0
    }

    pub const fn frame_index(self) -> u64 {
        self.0 / FRAME_SIZE as u64
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// True if this address is in the user-canonical low half
    /// (`VA < 2^47`), per spec invariant I4.
    pub const fn is_user_canonical(self) -> bool {
        self.0 < (1u64 << 47)
    }

    pub const fn page_offset(self) -> u64 {
        self.0 & 0xFFF
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !0xFFF)
    }

    pub const fn align_up(self) -> Self {
        Self((self.0 + 0xFFF) & !0xFFF)
    }
}

pub const FRAME_SIZE: usize = 4096;

/// The kernel's user/kernel split: VAs below this are user-canonical low
/// half; at and above, the shared upper half (PML4 entries 256..512).
pub const KERNEL_VIRTUAL_BASE: u64 = 0xFFFF_8000_0000_0000;

/// HHDM offset, captured from the bootloader handshake at boot. All
/// `phys_to_virt`/`virt_to_phys` translation goes through this window.
static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// `phys_to_virt`: the HHDM alias of a physical address (spec.md §4.1).
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr(phys.0 + hhdm_offset())
}

/// `virt_to_phys`: valid only for HHDM-window virtual addresses.
pub fn virt_to_phys(virt: VirtAddr) -> Option<PhysAddr> {
    let offset = hhdm_offset();
    virt.0.checked_sub(offset).map(PhysAddr)
}

/// Flags composed into a leaf PTE (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(pub u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITETHROUGH: Self = Self(1 << 3);
    pub const CACHEDISABLE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGEPAGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NOEXECUTE: Self = Self(1 << 63);

    pub const NONE: Self = Self(0);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Entries reported by the bootloader memory map, classified per spec.md
/// §4.1's init algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Usable,
    KernelAndModules,
    Reserved,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: PhysAddr,
    pub len: u64,
    pub kind: RegionKind,
}

/// Kernel-wide memory bring-up: frame allocator, then kernel-space page
/// tables, then the heap. Mirrors spec.md §2's control flow ("BSP
/// initializes PMM, then VMM ... then the timer").
pub fn init(regions: &[MemoryRegion], hhdm_offset_value: u64) {
    set_hhdm_offset(hhdm_offset_value);
    frame_allocator::init(regions);
    vmm::init_kernel_space();
    #[cfg(target_os = "none")]
    heap::init();
    log::info!(
        "mm: {} frames free of {} total",
        frame_allocator::stats().free_frames,
        frame_allocator::stats().total_frames
    );
}
