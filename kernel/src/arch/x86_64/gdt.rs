//! Per-CPU GDT/TSS fabric.
//!
//! spec.md §4.3 fixes the GDT layout: slot 0 null, 1 kernel code64, 2
//! kernel data64, 3 user data64, 4 user code64, 5-6 a per-CPU TSS
//! descriptor, giving selectors `0x08 / 0x10 / 0x1B / 0x23 / 0x28`.
//! Adapted from the teacher's single global `lazy_static!` GDT/TSS,
//! generalized to one block per CPU, each with its own kernel stack and
//! double-fault IST stack (teacher's `DOUBLE_FAULT_IST_INDEX`, kept as a
//! supplemented feature per SPEC_FULL.md §B).

use x86_64::instructions::segmentation::{Segment, CS, DS, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::sched::smp::MAX_CPUS;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_DATA_SELECTOR: u16 = 0x1B;
pub const USER_CODE_SELECTOR: u16 = 0x23;
pub const TSS_SELECTOR: u16 = 0x28;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const KERNEL_STACK_SIZE: usize = 4096 * 5;
const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

#[repr(align(16))]
struct Stack([u8; KERNEL_STACK_SIZE]);
#[repr(align(16))]
struct DfStack([u8; DOUBLE_FAULT_STACK_SIZE]);

static mut BOOT_STACKS: [Stack; MAX_CPUS] = [const { Stack([0; KERNEL_STACK_SIZE]) }; MAX_CPUS];
static mut DF_STACKS: [DfStack; MAX_CPUS] =
    [const { DfStack([0; DOUBLE_FAULT_STACK_SIZE]) }; MAX_CPUS];
static mut TSS: [TaskStateSegment; MAX_CPUS] = [const { TaskStateSegment::new() }; MAX_CPUS];
static mut GDT: [Option<GlobalDescriptorTable>; MAX_CPUS] = [const { None }; MAX_CPUS];

/// Build and load the GDT/TSS for the calling CPU. Must run once per CPU,
/// before that CPU's IDT is loaded (spec.md §4.3 AP bring-up step 4).
pub fn init_for_cpu(cpu: usize) {
    assert!(cpu < MAX_CPUS, "cpu id out of per-CPU block range");

    // SAFETY: each `cpu` index is written exactly once, by the CPU that
    // owns it, strictly before that CPU reads it back via the `'static`
    // references below; no other CPU touches this index.
    unsafe {
        let tss = &mut TSS[cpu];
        let rsp0_top =
            core::ptr::addr_of_mut!(BOOT_STACKS[cpu].0) as u64 + KERNEL_STACK_SIZE as u64;
        tss.privilege_stack_table[0] = VirtAddr::new(rsp0_top);

        let df_top =
            core::ptr::addr_of_mut!(DF_STACKS[cpu].0) as u64 + DOUBLE_FAULT_STACK_SIZE as u64;
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = VirtAddr::new(df_top);

        let tss_ref: &'static TaskStateSegment = &*(tss as *const TaskStateSegment);

        let mut gdt = GlobalDescriptorTable::new();
        let kcode = gdt.add_entry(Descriptor::kernel_code_segment());
        let kdata = gdt.add_entry(Descriptor::kernel_data_segment());
        let udata = gdt.add_entry(Descriptor::user_data_segment());
        let ucode = gdt.add_entry(Descriptor::user_code_segment());
        let tss_sel = gdt.add_entry(Descriptor::tss_segment(tss_ref));

        debug_assert_eq!(kcode.0, KERNEL_CODE_SELECTOR);
        debug_assert_eq!(kdata.0, KERNEL_DATA_SELECTOR);
        debug_assert_eq!(udata.0 | 3, USER_DATA_SELECTOR);
        debug_assert_eq!(ucode.0 | 3, USER_CODE_SELECTOR);
        debug_assert_eq!(tss_sel.0, TSS_SELECTOR);

        GDT[cpu] = Some(gdt);
        let gdt_ref: &'static GlobalDescriptorTable = &*(GDT[cpu].as_ref().unwrap() as *const _);
        gdt_ref.load();

        CS::set_reg(SegmentSelector::new(1, PrivilegeLevel::Ring0));
        SS::set_reg(SegmentSelector::new(2, PrivilegeLevel::Ring0));
        DS::set_reg(SegmentSelector::new(2, PrivilegeLevel::Ring0));
        load_tss(tss_sel);
    }
}

/// Boot-time init for the BSP (cpu 0), called before `sched::smp` exists.
pub fn init_boot() {
    init_for_cpu(0);
}

/// Update this CPU's TSS `RSP0`, used when a context switch hands the
/// incoming thread its own kernel stack.
pub fn set_kernel_stack(cpu: usize, stack_top: u64) {
    assert!(cpu < MAX_CPUS);
    // SAFETY: `privilege_stack_table[0]` is read by the CPU only on a ring
    // transition into the kernel; the owning CPU updates its own entry
    // between such transitions, never concurrently with itself.
    unsafe {
        TSS[cpu].privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

pub fn get_kernel_stack(cpu: usize) -> u64 {
    assert!(cpu < MAX_CPUS);
    // SAFETY: read-only snapshot of a value only the owning CPU mutates.
    unsafe { TSS[cpu].privilege_stack_table[0].as_u64() }
}
