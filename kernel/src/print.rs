//! `print!`/`println!` over the serial transport.
//!
//! These remain available for boot-time output before `log_service`
//! installs its logger, and for panic/fatal dumps, which must not depend
//! on a working heap allocator or the logger's lock-free path.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
