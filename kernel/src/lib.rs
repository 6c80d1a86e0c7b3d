//! Core execution substrate of a monolithic x86-64 kernel: physical frame
//! allocator, four-level page-table VMM, SMP bring-up and descriptor
//! fabric, per-CPU timer-preemptible scheduler, process/thread model, and
//! the ELF64 loader that places a process on first run.

#![no_std]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// On the bare-metal kernel target, manage our own heap. On the host
// target (unit tests run via `cargo test`), delegate to the system
// allocator so ordinary `Vec`/`String`/`Box` work in test code.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod elf;
pub mod error;
pub mod log_service;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;

mod test_framework;

pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

/// Heap allocation error handler. Panic is intentional: heap allocation
/// failure in a `no_std` kernel is unrecoverable.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {layout:?}");
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[KERNEL PANIC] {info}");
    arch::halt();
}

#[cfg(all(target_os = "none", test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}
