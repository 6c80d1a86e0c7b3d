//! Kernel entry point: BSP bring-up in the order spec.md §2 describes —
//! PMM, then VMM (adopting the bootloader's `CR3`), then GDT/IDT, then
//! the timer, then the scheduler — followed by AP bring-up and the
//! steady-state idle loop that the timer interrupt preempts out of.

#![no_std]
#![no_main]

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::{entry_point, BootInfo};

use strata_kernel::arch;
use strata_kernel::arch::x86_64::{apic, gdt, idt, timer};
use strata_kernel::mm::{self, MemoryRegion, PhysAddr, RegionKind};
use strata_kernel::sched;
use strata_kernel::sched::smp::{CpuEntry, SmpInfo};
use strata_kernel::{log_service, process, serial_println};

/// Request the bootloader map all physical memory at a dynamically
/// chosen virtual base, giving us the HHDM offset spec.md §4.1 needs.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Upper bound on memory-map entries copied off the bootloader's info
/// struct before the heap exists to hold a `Vec`.
const MAX_REGIONS: usize = 128;

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    log_service::init();
    serial_println!("strata-kernel booting");

    let hhdm_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    let mut regions = [MemoryRegion {
        base: PhysAddr::new(0),
        len: 0,
        kind: RegionKind::Reserved,
    }; MAX_REGIONS];
    let mut count = 0;
    for region in boot_info.memory_regions.iter() {
        if count >= MAX_REGIONS {
            log::warn!("mm: memory map has more than {MAX_REGIONS} entries, truncating");
            break;
        }
        let kind = match region.kind {
            bootloader_api::info::MemoryRegionKind::Usable => RegionKind::Usable,
            bootloader_api::info::MemoryRegionKind::Bootloader => RegionKind::KernelAndModules,
            _ => RegionKind::Reserved,
        };
        regions[count] = MemoryRegion {
            base: PhysAddr::new(region.start),
            len: region.end - region.start,
            kind,
        };
        count += 1;
    }

    mm::init(&regions[..count], hhdm_offset);

    arch::x86_64::init();
    apic::init().expect("APIC bring-up failed");

    let apic_hz = timer::calibrate_and_start(idt::TIMER_VECTOR);
    serial_println!("timer calibrated to {apic_hz} Hz");

    let boot_pml4 = mm::vmm::kernel_space().pml4_phys().as_u64();
    let idle_stack_top = gdt::get_kernel_stack(0);
    sched::init(kernel_idle as usize, idle_stack_top, boot_pml4);

    // Real AP topology comes from the bootloader's SMP info table, an
    // external collaborator out of scope per spec.md §1; absent that, the
    // table below carries only the BSP, so bring-up is a one-CPU subset
    // of spec.md §4.3's protocol rather than a no-op.
    let bsp_lapic_id = apic::read_id().unwrap_or(0);
    let smp_info = SmpInfo {
        bsp_lapic_id,
        entries: &[CpuEntry { lapic_id: bsp_lapic_id, goto_address: Default::default() }],
    };
    sched::smp::bring_up_aps(&smp_info, 0);

    process::init(kernel_worker_pid1 as usize);

    arch::enable_interrupts();
    loop {
        arch::idle();
    }
}

/// Entry point for PID 1's kernel worker thread (spec.md §2: "a kernel
/// worker thread becomes PID 1 and performs late init"). Mounting a
/// ramfs, spawning drivers, and exec'ing `/init` all need a VFS, which is
/// out of scope here (spec.md §1), so this idles in ring 0 once seeded.
extern "C" fn kernel_worker_pid1() -> ! {
    loop {
        arch::idle();
    }
}

/// Entry point for the per-CPU idle thread (spec.md §4.4: "if empty, idle
/// and return; CPU will HLT on IRET").
extern "C" fn kernel_idle() -> ! {
    loop {
        arch::idle();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[KERNEL PANIC] {info}");
    arch::halt();
}
