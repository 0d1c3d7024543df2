//! Device drivers.
//!
//! The keyboard is wired to IRQ1 here, once the IDT/PIC are up but before
//! interrupts are enabled. The ATA drive is probed synchronously at boot and
//! registered with the block-device layer under `"hda"`.

pub mod ata;
pub mod keyboard;

/// Bring up the drivers this kernel has: keyboard (IRQ1) and the primary ATA
/// drive.
pub fn init() {
    log::info!("drivers: initializing");

    keyboard::init();
    if let Err(e) = crate::irq::irq_register(1, keyboard::handle_irq) {
        log::error!("drivers: failed to register keyboard IRQ: {}", e);
    }

    ata::init();

    log::info!("drivers: initialized");
}
