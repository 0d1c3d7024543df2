//! Interrupt Descriptor Table: all 32 CPU exception vectors route into the
//! single BSOD dispatcher; IRQ vectors (32..=47, remapped by the PIC) route
//! into [`crate::irq`].

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use crate::panic::ExceptionContext;

/// First vector the remapped PICs deliver on, matching
/// [`crate::arch::x86_64::pic::PIC1_OFFSET`].
const IRQ_BASE: u8 = 32;

const PANIC_GENERAL_FAILURE: u64 = 0x1;
const PANIC_GENERAL_PROTECTION: u64 = 0x1E;
const PANIC_INVALID_OPCODE: u64 = 0x6B;
const PANIC_STACK_FAULT: u64 = 0x77;
const PANIC_PAGE_FAULT: u64 = 0x50;
const PANIC_DOUBLE_FAULT: u64 = 0x7F;

/// Per-vector BSOD stop code. The CPU's own hardware error code (where one
/// exists) is logged separately; the stop code shown on the BSOD identifies
/// the vector, not the hardware fault detail.
fn panic_code(vector: u8) -> u64 {
    match vector {
        12 => PANIC_STACK_FAULT,
        13 => PANIC_GENERAL_PROTECTION,
        6 => PANIC_INVALID_OPCODE,
        14 => PANIC_PAGE_FAULT,
        8 => PANIC_DOUBLE_FAULT,
        _ => PANIC_GENERAL_FAILURE,
    }
}

fn context(vector: u8, error_code: u64, name: &'static str, frame: &InterruptStackFrame) -> ExceptionContext {
    ExceptionContext {
        vector,
        error_code,
        name,
        rip: frame.instruction_pointer.as_u64(),
        rsp: frame.stack_pointer.as_u64(),
        rflags: frame.cpu_flags.bits(),
        rbp: current_rbp(),
    }
}

fn current_rbp() -> u64 {
    let rbp: u64;
    // SAFETY: reads a general-purpose register, no memory access.
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    rbp
}

/// Generates a non-diverging handler with no CPU-pushed error code.
macro_rules! exception_handler {
    ($fn_name:ident, $vector:expr, $name:expr) => {
        extern "x86-interrupt" fn $fn_name(frame: InterruptStackFrame) {
            crate::panic::panic_from_exception(context($vector, panic_code($vector), $name, &frame));
        }
    };
}

/// Generates a non-diverging handler for vectors that push a CPU error code.
macro_rules! exception_handler_ec {
    ($fn_name:ident, $vector:expr, $name:expr) => {
        extern "x86-interrupt" fn $fn_name(frame: InterruptStackFrame, error_code: u64) {
            log::error!("{}: hardware error code {:#x}", $name, error_code);
            crate::panic::panic_from_exception(context($vector, panic_code($vector), $name, &frame));
        }
    };
}

exception_handler!(divide_error_handler, 0, "Divide Error");
exception_handler!(debug_handler, 1, "Debug");
exception_handler!(nmi_handler, 2, "Non-Maskable Interrupt");
exception_handler!(breakpoint_handler, 3, "Breakpoint");
exception_handler!(overflow_handler, 4, "Overflow");
exception_handler!(bound_range_handler, 5, "Bound Range Exceeded");
exception_handler!(invalid_opcode_handler, 6, "Invalid Opcode");
exception_handler!(device_not_available_handler, 7, "Device Not Available");
exception_handler_ec!(invalid_tss_handler, 10, "Invalid TSS");
exception_handler_ec!(segment_not_present_handler, 11, "Segment Not Present");
exception_handler_ec!(stack_segment_fault_handler, 12, "Stack Segment Fault");
exception_handler_ec!(general_protection_fault_handler, 13, "General Protection Fault");
exception_handler!(x87_floating_point_handler, 16, "x87 Floating Point");
exception_handler_ec!(alignment_check_handler, 17, "Alignment Check");
exception_handler!(simd_floating_point_handler, 19, "SIMD Floating Point");
exception_handler!(virtualization_handler, 20, "Virtualization");
exception_handler_ec!(cp_protection_handler, 21, "Control Protection");
exception_handler_ec!(security_exception_handler, 30, "Security Exception");

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, error_code: u64) -> ! {
    log::error!("Double Fault: hardware error code {:#x}", error_code);
    crate::panic::panic_from_exception(context(8, panic_code(8), "Double Fault", &frame));
}

extern "x86-interrupt" fn machine_check_handler(frame: InterruptStackFrame) -> ! {
    crate::panic::panic_from_exception(context(18, panic_code(18), "Machine Check", &frame));
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: x86_64::structures::idt::PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let fault_addr = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    log::error!("page fault at {:#x}, hardware error code {:?}", fault_addr, error_code);
    crate::panic::panic_from_exception(context(14, panic_code(14), "Page Fault", &frame));
}

macro_rules! irq_handler {
    ($fn_name:ident, $line:expr) => {
        extern "x86-interrupt" fn $fn_name(_frame: InterruptStackFrame) {
            crate::irq::dispatch($line);
            crate::arch::x86_64::pic::send_eoi(IRQ_BASE + $line);
        }
    };
}

irq_handler!(irq0_handler, 0);
irq_handler!(irq1_handler, 1);
irq_handler!(irq2_handler, 2);
irq_handler!(irq3_handler, 3);
irq_handler!(irq4_handler, 4);
irq_handler!(irq5_handler, 5);
irq_handler!(irq6_handler, 6);
irq_handler!(irq7_handler, 7);
irq_handler!(irq8_handler, 8);
irq_handler!(irq9_handler, 9);
irq_handler!(irq10_handler, 10);
irq_handler!(irq11_handler, 11);
irq_handler!(irq12_handler, 12);
irq_handler!(irq13_handler, 13);
irq_handler!(irq14_handler, 14);
irq_handler!(irq15_handler, 15);

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
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_floating_point_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_floating_point_handler);
        idt.virtualization.set_handler_fn(virtualization_handler);
        idt.cp_protection_exception.set_handler_fn(cp_protection_handler);
        idt.security_exception.set_handler_fn(security_exception_handler);

        // SAFETY: DOUBLE_FAULT_IST_INDEX names a stack the GDT set up
        // specifically for this vector; it is never reused concurrently.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
            idt.machine_check
                .set_handler_fn(machine_check_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[(IRQ_BASE + 0) as usize].set_handler_fn(irq0_handler);
        idt[(IRQ_BASE + 1) as usize].set_handler_fn(irq1_handler);
        idt[(IRQ_BASE + 2) as usize].set_handler_fn(irq2_handler);
        idt[(IRQ_BASE + 3) as usize].set_handler_fn(irq3_handler);
        idt[(IRQ_BASE + 4) as usize].set_handler_fn(irq4_handler);
        idt[(IRQ_BASE + 5) as usize].set_handler_fn(irq5_handler);
        idt[(IRQ_BASE + 6) as usize].set_handler_fn(irq6_handler);
        idt[(IRQ_BASE + 7) as usize].set_handler_fn(irq7_handler);
        idt[(IRQ_BASE + 8) as usize].set_handler_fn(irq8_handler);
        idt[(IRQ_BASE + 9) as usize].set_handler_fn(irq9_handler);
        idt[(IRQ_BASE + 10) as usize].set_handler_fn(irq10_handler);
        idt[(IRQ_BASE + 11) as usize].set_handler_fn(irq11_handler);
        idt[(IRQ_BASE + 12) as usize].set_handler_fn(irq12_handler);
        idt[(IRQ_BASE + 13) as usize].set_handler_fn(irq13_handler);
        idt[(IRQ_BASE + 14) as usize].set_handler_fn(irq14_handler);
        idt[(IRQ_BASE + 15) as usize].set_handler_fn(irq15_handler);

        idt
    };
}

pub fn init() {
    IDT.load();
}
