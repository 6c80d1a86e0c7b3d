//! Interrupt Descriptor Table (spec.md §4.3 "IDT"):
//! 32 CPU-exception gates + 16 legacy IRQ gates + the timer vector (0x20
//! after remap) + the syscall vector (0x80). All gates are Interrupt
//! Gates using the kernel code selector; the double fault gate alone
//! switches onto the IST stack set up in `gdt.rs`.
//!
//! Kept from the teacher's `idt.rs`: the `lazy_static!` + `x86_64` crate
//! idiom, and its breakpoint/double-fault/page-fault/GPF handlers. Added:
//! the full legacy IRQ range, the syscall gate (Ring 3 callable via
//! `int 0x80`), and routing the timer interrupt into the scheduler
//! instead of just acknowledging it.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::arch::x86_64::{apic, gdt, syscall};
use crate::sched::scheduler;

/// Legacy IRQ base after the 8259 remap (`pic::PIC1_OFFSET`).
const IRQ_BASE: usize = 32;
/// LAPIC timer vector, same slot as the remapped legacy IRQ0.
pub const TIMER_VECTOR: u8 = 32;
pub const SYSCALL_VECTOR: u8 = 0x80;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_fp_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_fp_handler);

        // The timer gate is a raw naked-asm entry (`scheduler::on_tick_entry`),
        // not an `extern "x86-interrupt" fn`: the per-tick dispatcher needs
        // every GPR to save/restore full thread context, which the
        // x86-interrupt ABI doesn't expose.
        unsafe {
            idt[TIMER_VECTOR as usize]
                .set_handler_addr(VirtAddr::new(scheduler::on_tick_entry as u64));
        }
        for irq in 1..16usize {
            if IRQ_BASE + irq == TIMER_VECTOR as usize {
                continue;
            }
            idt[IRQ_BASE + irq].set_handler_fn(legacy_irq_handler);
        }

        // `int 0x80` must be reachable from Ring 3. The handler is a raw
        // naked-asm entry (`syscall::int80_entry`), not an
        // `extern "x86-interrupt" fn`, because it needs the full,
        // un-mangled register frame the spec's ABI passes arguments in.
        unsafe {
            idt[SYSCALL_VECTOR as usize]
                .set_handler_addr(VirtAddr::new(syscall::int80_entry as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }

        idt
    };
}

/// Load the shared IDT on the current CPU. Called once by the BSP during
/// `init`, and again by every AP during bring-up (spec.md §4.3 step 4).
pub fn load() {
    IDT.load();
}

pub fn init() {
    load();
}

macro_rules! fault_handler {
    ($name:ident, $msg:literal) => {
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
            panic!(concat!("EXCEPTION: ", $msg, "\n{:#?}"), stack_frame);
        }
    };
}

fault_handler!(divide_error_handler, "DIVIDE ERROR");
fault_handler!(debug_handler, "DEBUG");
fault_handler!(nmi_handler, "NON-MASKABLE INTERRUPT");
fault_handler!(overflow_handler, "OVERFLOW");
fault_handler!(bound_range_handler, "BOUND RANGE EXCEEDED");
fault_handler!(invalid_opcode_handler, "INVALID OPCODE");
fault_handler!(device_not_available_handler, "DEVICE NOT AVAILABLE");
fault_handler!(x87_fp_handler, "X87 FLOATING POINT");
fault_handler!(simd_fp_handler, "SIMD FLOATING POINT");

extern "x86-interrupt" fn machine_check_handler(stack_frame: InterruptStackFrame) -> ! {
    panic!("EXCEPTION: MACHINE CHECK\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_tss_handler(stack_frame: InterruptStackFrame, error_code: u64) {
    panic!("EXCEPTION: INVALID TSS ({error_code:#x})\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn segment_not_present_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: SEGMENT NOT PRESENT ({error_code:#x})\n{:#?}",
        stack_frame
    );
}

extern "x86-interrupt" fn stack_segment_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: STACK SEGMENT FAULT ({error_code:#x})\n{:#?}",
        stack_frame
    );
}

extern "x86-interrupt" fn alignment_check_handler(stack_frame: InterruptStackFrame, error_code: u64) {
    panic!(
        "EXCEPTION: ALIGNMENT CHECK ({error_code:#x})\n{:#?}",
        stack_frame
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    println!("EXCEPTION: PAGE FAULT");
    println!("Accessed Address: {:?}", Cr2::read());
    println!("Error Code: {:?}", error_code);
    println!("{:#?}", stack_frame);
    panic!("Page fault");
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    println!("EXCEPTION: GENERAL PROTECTION FAULT");
    println!("Error Code: {:#x}", error_code);
    println!("{:#?}", stack_frame);
    panic!("General protection fault");
}

/// Legacy 8259 IRQ gates. The PIC is masked after remap (spec.md §4.3:
/// "the legacy 8259 PIC is initialized, remapped to 32-47, and then
/// masked"), so these should not fire in practice; they exist to round
/// out the vector table and EOI defensively if one does.
extern "x86-interrupt" fn legacy_irq_handler(_stack_frame: InterruptStackFrame) {
    apic::send_eoi();
}
