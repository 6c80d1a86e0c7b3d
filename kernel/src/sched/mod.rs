//! Scheduling: thread control blocks, per-CPU queues, SMP bring-up and
//! the per-tick dispatcher (spec.md §3, §4.3, §4.4).

pub mod queue;
pub mod scheduler;
pub mod smp;
pub mod task;

use crate::process::ProcessId;
use task::Task;

/// Build the BSP's idle thread and seed CPU 0's Ready queue with it
/// (spec.md §4.4: "each CPU always has at least its idle thread ready").
/// Must run after `gdt::init_boot`/`idt::init` and before interrupts are
/// enabled on the BSP.
pub fn init(idle_entry: usize, idle_kernel_stack_top: u64, boot_page_directory: u64) {
    let mut idle = Task::new_kernel(
        ProcessId(0),
        idle_entry,
        idle_kernel_stack_top,
        boot_page_directory,
    );
    idle.priority = task::Priority::Idle;
    let boxed = alloc::boxed::Box::new(idle);
    let ptr = core::ptr::NonNull::new(alloc::boxed::Box::leak(boxed) as *mut Task)
        .expect("boxed idle task is never null");
    scheduler::enqueue(0, ptr);
    log::info!("[SCHED] idle thread seeded on CPU 0");
}

extern crate alloc;
