//! Kernel library crate.
//!
//! `#![no_std]` on every target; the bare-metal (`target_os = "none"`) build
//! uses the custom test framework below for integration tests run under
//! QEMU with `isa-debug-exit`. Host-target unit tests (`cfg(test)` modules
//! scattered through the tree) use the ordinary `#[test]` harness instead.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod log_setup;
pub mod mm;
pub mod panic;
pub mod shell;
pub mod sync;
mod syscall;

/// Heap allocation failure is unrecoverable in a `no_std` kernel; the
/// `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic::bsod(format_args!("allocation error: {:?}", layout));
}

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    arch::x86_64::halt();
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_panic_handler(info)
}

/// A test function callable by the custom runner below. Blanket-implemented
/// for any `Fn()`, mirroring the standard `#[test]` harness's behaviour.
#[cfg(test)]
pub trait Testable {
    fn run(&self);
}

#[cfg(test)]
impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

#[cfg(test)]
pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[failed]\n{}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Write the exit code to the `isa-debug-exit` device port, which QEMU
/// interprets as a request to terminate with a matching process exit status.
#[cfg(test)]
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    // SAFETY: 0xf4 is the `isa-debug-exit` port configured in the QEMU
    // invocation this kernel is built for; writing to it is the documented
    // way to end the VM with this status.
    unsafe {
        crate::arch::x86_64::outl(0xf4, exit_code as u32);
    }
    loop {
        core::hint::spin_loop();
    }
}
