//! The `log` facade's concrete sink.
//!
//! spec.md names `log(level, msg)` as an out-of-scope, interface-only
//! collaborator; this module is that sink's concrete instance, installed
//! once at the top of `kernel_init` before any subsystem touches
//! hardware. Every other module calls `log::info!`/`log::warn!`/etc.
//! rather than writing to the serial port directly.

use log::{LevelFilter, Log, Metadata, Record};

use crate::serial_println;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!(
                "[{:>5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Install the kernel-wide logger. Must run exactly once, before any
/// subsystem that might call `log::info!`/`log::warn!`/etc.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .expect("log_service::init called more than once");
}
