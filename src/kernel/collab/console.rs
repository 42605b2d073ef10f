// src/kernel/collab/console.rs
//! Console and serial output, with deadlock avoidance during a panic.
//!
//! The screen console is an optional sink set once at boot; the serial port
//! is always available and is what a first panic falls back to so a crash
//! is still visible even if the console lock is held.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;
use x86_64::instructions::port::{Port, PortReadOnly};

/// Panic escalation level: 0 normal, 1 first panic, 2+ recursive panic.
pub type PanicLevel = u8;

/// Normal operation.
pub const NORMAL: PanicLevel = 0;
/// First panic: console output is skipped, serial still written.
pub const FIRST_PANIC: PanicLevel = 1;
/// Second or later panic: all output suppressed to avoid an infinite loop.
pub const DOUBLE_PANIC: PanicLevel = 2;

static PANIC_LEVEL: AtomicU8 = AtomicU8::new(NORMAL);

/// Bumps the panic level by one, returning the level before the bump.
pub fn enter_panic() -> PanicLevel {
    PANIC_LEVEL.fetch_add(1, Ordering::Relaxed)
}

/// Anything the kernel can direct `console_print!` output to.
pub trait ConsoleSink: fmt::Write + Send + Sync {}
impl<T: fmt::Write + Send + Sync> ConsoleSink for T {}

static CONSOLE: Mutex<Option<&'static (dyn ConsoleSinkObject)>> = Mutex::new(None);

/// Object-safe wrapper so the console sink can be stored behind `dyn`.
pub trait ConsoleSinkObject: Send + Sync {
    /// Writes formatted output to the sink, best-effort.
    fn write(&self, args: fmt::Arguments);
}

/// Registers the screen console. Idempotent: a later caller is a no-op once
/// a sink is already installed — callers that need to replace it should
/// restart rather than overwrite, since two drivers racing for the console
/// slot is always a boot-sequencing bug, not a runtime condition.
pub fn set_console(sink: &'static dyn ConsoleSinkObject) {
    let mut guard = CONSOLE.lock();
    if guard.is_none() {
        *guard = Some(sink);
    }
}

/// Writes to the screen console, skipping output rather than blocking when:
/// the console lock is contended (`try_lock` failure), no console is
/// installed yet, or a panic is already in flight past the first level.
pub fn write_console(args: fmt::Arguments) {
    match PANIC_LEVEL.load(Ordering::Relaxed) {
        NORMAL => {
            if let Some(guard) = CONSOLE.try_lock() {
                if let Some(sink) = *guard {
                    sink.write(args);
                }
            }
        }
        FIRST_PANIC => write_debug(args),
        _ => {}
    }
}

/// Writes to the serial port (COM1), bypassing the console entirely. Used
/// directly by `debug_print!`/`debug_println!`, and as the fallback
/// `write_console` takes on a first panic.
pub fn write_debug(args: fmt::Arguments) {
    use fmt::Write;
    if PANIC_LEVEL.load(Ordering::Relaxed) <= DOUBLE_PANIC {
        if let Some(mut serial) = SERIAL1.try_lock() {
            let _ = serial.write_fmt(args);
        }
    }
}

/// UART 16550 serial port driver (COM1, 0x3F8).
pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: PortReadOnly<u8>,
}

impl SerialPort {
    /// Builds the COM1 driver at its fixed I/O base.
    #[must_use]
    pub const fn com1() -> Self {
        Self {
            data: Port::new(0x3F8),
            int_enable: Port::new(0x3F8 + 1),
            fifo_ctrl: Port::new(0x3F8 + 2),
            line_ctrl: Port::new(0x3F8 + 3),
            modem_ctrl: Port::new(0x3F8 + 4),
            line_status: PortReadOnly::new(0x3F8 + 5),
        }
    }

    /// Programs baud rate, line control and FIFO. Must run once at boot.
    ///
    /// # Safety
    ///
    /// Assumes this is the only owner of the COM1 I/O ports.
    pub unsafe fn init(&mut self) {
        // Safety: forwarded from the caller's contract above; these are the
        // fixed COM1 register offsets defined by the UART 16550 spec.
        unsafe {
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x80);
            self.data.write(0x03);
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x0B);
        }
    }

    fn is_tx_empty(&mut self) -> bool {
        // Safety: reading the line-status register has no precondition.
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.is_tx_empty() {
            core::hint::spin_loop();
        }
        // Safety: transmit buffer was just observed empty.
        unsafe {
            self.data.write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Global COM1 handle, const-initialized so it is usable before the heap exists.
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::com1());

/// Initializes the serial port. Must run once, early in boot.
///
/// # Safety
///
/// Must run before any other code touches the COM1 I/O ports.
pub unsafe fn init_serial() {
    // Safety: forwarded from the caller's contract above.
    unsafe {
        SERIAL1.lock().init();
    }
}

/// Bridges the `log` facade onto the serial debug sink, so error-context
/// reporting and any third-party crate using `log::*` land on the same
/// stream as `debug_println!` instead of a second, uncoordinated one.
struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            write_debug(format_args!("[{}] {}\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static SERIAL_LOGGER: SerialLogger = SerialLogger;

/// Installs [`SerialLogger`] as the global `log` sink. Idempotent: a second
/// call observes `SetLoggerError` and is ignored, since re-installing a
/// logger after boot is always a sequencing bug, not a runtime condition.
pub fn init_logger() {
    let _ = log::set_logger(&SERIAL_LOGGER).map(|()| log::set_max_level(log::LevelFilter::Trace));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_level_escalates_monotonically() {
        let before = PANIC_LEVEL.swap(NORMAL, Ordering::Relaxed);
        assert_eq!(enter_panic(), NORMAL);
        assert_eq!(enter_panic(), FIRST_PANIC);
        PANIC_LEVEL.store(before, Ordering::Relaxed);
    }
}
