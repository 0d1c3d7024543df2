//! `log`-crate backend: every record goes to the serial port; panics also
//! echo to the VGA console beneath the BSOD banner.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::arch::x86_64::serial;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial::with_port(|port| {
            let _ = writeln!(port, "{} {}: {}", record.level(), record.target(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Install the serial logger and set the maximum level. Idempotent only in
/// the sense that `log::set_logger` itself is idempotent (errors on a second
/// call); the kernel calls this exactly once during boot.
pub fn init(level: LevelFilter) {
    log::set_logger(&LOGGER).expect("logger already initialized");
    log::set_max_level(level);
}
