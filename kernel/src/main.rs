//! Kernel entry point.
//!
//! `_start` is reached directly by the bootloader in 64-bit mode with the
//! Multiboot2 magic in `edi` and the info-block pointer in `esi`, per the
//! System V calling convention `extern "C"` expects for a two-argument
//! function. Bring-up order follows the layer dependency chain: CPU
//! descriptor tables, then physical/virtual memory and the heap, then
//! drivers and their IRQ lines, then the VFS and FAT32 mount, then the
//! syscall gate, then the shell.

#![no_std]
#![no_main]

extern crate alloc;

use thuban_kernel::arch::x86_64::{self, multiboot};
use thuban_kernel::{config::BootConfig, drivers, fs, log_setup, panic, shell};

#[no_mangle]
pub extern "C" fn _start(magic: u32, info_addr: u64) -> ! {
    x86_64::init();

    // SAFETY: `info_addr` is the Multiboot2 info-block pointer the
    // bootloader placed in `esi`; it is never reclaimed, so the `'static`
    // borrows `BootInfo` hands back stay valid for the kernel's lifetime.
    let boot_info = unsafe { multiboot::parse(magic, info_addr) };

    let cmdline = boot_info.as_ref().and_then(|info| info.cmdline).unwrap_or("");
    let config = BootConfig::parse(cmdline);
    log_setup::init(config.log_level());

    log::info!("kernel: booting");

    let mem_bytes = boot_info.as_ref().map(|info| info.usable_bytes()).unwrap_or(0);
    if let Err(e) = thuban_kernel::mm::init(mem_bytes) {
        panic::bsod(format_args!("memory init failed: {}", e));
    }

    drivers::init();
    x86_64::enable_interrupts();

    if let Err(e) = fs::init(config.root_device()) {
        panic::bsod(format_args!("filesystem init failed: {}", e));
    }

    x86_64::syscall::init_syscall();

    log::info!("kernel: boot complete, starting shell");
    shell::run();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    panic::bsod(format_args!("{}", info));
}
