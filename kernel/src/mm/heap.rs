//! Kernel heap bring-up.
//!
//! The teacher's slab allocator with per-CPU caches is out of scope — this
//! kernel's ambient allocator is `linked_list_allocator::LockedHeap`
//! (`lib.rs`'s `#[global_allocator]`), matching SPEC_FULL.md's ambient
//! stack. This module only maps the heap's backing memory and hands it to
//! the allocator, in the teacher's own init-then-`lock().init()` idiom.

use crate::mm::vmm;
use crate::mm::{PageFlags, VirtAddr};

/// Kernel heap virtual base, placed well above the HHDM window and any
/// identity-mapped bootloader regions.
const HEAP_START: u64 = 0xFFFF_C000_0000_0000;
const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[cfg(target_os = "none")]
pub fn init() {
    vmm::kernel_space()
        .map_range_zeroed(
            VirtAddr::new(HEAP_START),
            HEAP_SIZE,
            PageFlags::WRITABLE | PageFlags::NOEXECUTE,
        )
        .expect("failed to map kernel heap");

    // SAFETY: the range just mapped is freshly zeroed, writable, and not
    // aliased by anything else; `ALLOCATOR` has not been initialized yet.
    unsafe {
        crate::ALLOCATOR
            .lock()
            .init(HEAP_START as *mut u8, HEAP_SIZE);
    }
}
