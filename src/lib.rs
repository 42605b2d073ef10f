// src/lib.rs
//! Event-driven workflow kernel core.
//!
//! User processes submit typed events through shared-memory ring buffers;
//! the kernel routes each event through a configurable pipeline of
//! domain-specific decks, tracks DAG dependencies in the workflow engine,
//! and returns results via a completion ring. Scheduling is driven primarily
//! by workflow completion (cooperative yield), with timer preemption and a
//! watchdog as a backstop.

#![no_std]
#![feature(abi_x86_interrupt)]
#![cfg_attr(test, no_main)]
#![cfg_attr(test, feature(custom_test_frameworks))]
#![cfg_attr(test, test_runner(crate::test_runner))]
#![cfg_attr(test, reexport_test_harness_main = "test_main")]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod abi;
pub mod arch;
pub mod boot;
pub mod errors;
pub mod kernel;
pub mod qemu;

use core::panic::PanicInfo;

use arch::{ArchCpu, Cpu};

/// Global heap allocator backing every `alloc::` collection in the kernel.
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Heap initialization error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The heap has already been initialized once.
    AlreadyInitialized,
}

static HEAP_INITIALIZED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Initializes the kernel heap. Must run exactly once, during early boot.
///
/// # Safety
///
/// The caller must guarantee that `[heap_start, heap_start + heap_size)` is
/// mapped, writable, and not aliased by any other owner.
///
/// # Errors
///
/// Returns `HeapError::AlreadyInitialized` on a second call.
pub unsafe fn init_heap(heap_start: usize, heap_size: usize) -> Result<(), HeapError> {
    use core::sync::atomic::Ordering;

    if HEAP_INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(HeapError::AlreadyInitialized);
    }
    // Safety: forwarded from the caller's contract above.
    unsafe {
        ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
    }
    Ok(())
}

pub use qemu::{exit_qemu, QemuExitCode};

/// `console_print!` — user-visible screen output via the console driver.
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::kernel::collab::console::write_console(format_args!($($arg)*));
    }};
}

/// `console_println!` — screen output with a trailing newline.
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => ($crate::console_print!("{}\n", format_args!($($arg)*)));
}

/// `debug_print!` — serial-only diagnostic output, never shown on screen.
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {{
        $crate::kernel::collab::console::write_debug(format_args!($($arg)*));
    }};
}

/// `debug_println!` — serial-only diagnostic output with a trailing newline.
#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\n"));
    ($($arg:tt)*) => ($crate::debug_print!("{}\n", format_args!($($arg)*)));
}

/// Halts the CPU until the next interrupt, repeatedly.
///
/// Must only be called with interrupts enabled, otherwise the core wedges.
#[inline]
pub fn hlt_loop() -> ! {
    loop {
        ArchCpu::halt();
    }
}

/// Marker trait for the custom `#[test_case]` harness.
pub trait Testable {
    /// Runs the test, logging its name before and "ok" after.
    fn run(&self);
}

fn short_type_name<T>() -> &'static str {
    core::any::type_name::<T>().rsplit("::").next().unwrap_or("unknown")
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        debug_print!("[TEST] {} ... ", short_type_name::<T>());
        self();
        debug_println!("ok");
    }
}

/// Entry point for the `custom_test_frameworks` harness.
pub fn test_runner(tests: &[&dyn Testable]) {
    debug_println!("[TEST RUNNER] running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

/// Shared test panic handler: logs the panic and exits QEMU with a failure code.
#[inline(never)]
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    debug_println!("[TEST PANIC] {}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[cfg(test)]
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    test_main();
    hlt_loop();
}
