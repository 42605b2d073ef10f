// src/arch/mod.rs
//! Architecture glue: CPU primitives and the interrupt-shared frame layout.
//!
//! Everything the core consumes from the platform — pause/halt hints, the
//! timestamp counter, interrupt masking, and the saved-register frame that
//! both the notify trampoline and the scheduler's context switch touch — is
//! defined exactly once here, behind the [`Cpu`] trait. Descriptor tables,
//! interrupt stubs, the TSS and segment selectors are boot machinery outside
//! this core and are assumed already installed by the time [`Cpu`] is used.

use core::sync::atomic::{AtomicU64, Ordering};

/// CPU primitives consumed by the scheduler, the ring buffers and the decks.
///
/// A single definition avoids the core reaching for inline assembly anywhere
/// except this trait's x86_64 implementation.
pub trait Cpu {
    /// Halts until the next interrupt. Must be called with interrupts enabled.
    fn halt();

    /// Spin-loop hint used by the bounded result-ring retry in the Execution
    /// deck and by the SPSC ring buffers while waiting on a cursor.
    fn pause();

    /// Reads the timestamp counter.
    fn read_tsc() -> u64;

    /// Disables interrupts, returning whether they were enabled before.
    fn disable_interrupts() -> bool;

    /// Restores the interrupt-enable state returned by `disable_interrupts`.
    fn restore_interrupts(was_enabled: bool);
}

/// Runs `f` with interrupts disabled, restoring the previous state afterward.
///
/// Used to guard the handful of sequences (bucket-local routing updates,
/// ready-queue mutation) that must not be interrupted by the timer tick.
#[inline]
pub fn critical_section<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = ArchCpu::disable_interrupts();
    let result = f();
    ArchCpu::restore_interrupts(was_enabled);
    result
}

/// The saved CPU register frame, shared by the notify-syscall trampoline and
/// the scheduler's cooperative-yield context switch. Matches the layout an
/// `iretq` expects so that restoring a process's frame is indistinguishable
/// from returning from an interrupt.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CpuFrame {
    /// General-purpose registers, callee side, saved by the trampoline.
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    /// Instruction pointer to resume at.
    pub rip: u64,
    /// Code segment selector.
    pub cs: u64,
    /// Saved RFLAGS.
    pub rflags: u64,
    /// Stack pointer to resume with.
    pub rsp: u64,
    /// Stack segment selector.
    pub ss: u64,
}

bitflags::bitflags! {
    /// The subset of RFLAGS the kernel cares about when building a fresh frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        /// Interrupt enable flag.
        const INTERRUPT_ENABLE = 1 << 9;
        /// I/O privilege level, bit 0. IOPL 0 keeps user code off port I/O.
        const IOPL_0 = 0;
    }
}

impl CpuFrame {
    /// Builds the initial frame for a freshly created process: `rip` at the
    /// entry point, `rsp` at the top of its stack, interrupts enabled and
    /// IOPL 0, with the given user code/data segment selectors.
    #[must_use]
    pub const fn initial(rip: u64, rsp: u64, user_cs: u64, user_ss: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            rip,
            cs: user_cs,
            rflags: RFlags::INTERRUPT_ENABLE.bits(),
            rsp,
            ss: user_ss,
        }
    }
}

/// Timestamp-counter frequency, in ticks per millisecond, computed once at
/// boot from CPUID leaf 0x15/0x16 (falling back to a calibration spin). Used
/// to convert timer delays expressed in milliseconds into TSC deltas instead
/// of hardcoding a fixed GHz constant.
static TSC_TICKS_PER_MS: AtomicU64 = AtomicU64::new(0);

/// Records the measured TSC frequency. Called once during boot.
pub fn set_tsc_frequency_khz(khz: u64) {
    TSC_TICKS_PER_MS.store(khz.max(1), Ordering::Relaxed);
}

/// Ticks-per-millisecond, or a conservative 1 GHz fallback if boot
/// calibration has not run yet (keeps unit tests off real hardware honest).
#[must_use]
pub fn tsc_ticks_per_ms() -> u64 {
    let v = TSC_TICKS_PER_MS.load(Ordering::Relaxed);
    if v == 0 {
        1_000_000
    } else {
        v
    }
}

/// Converts a millisecond delay into a TSC tick count using the calibrated
/// frequency, replacing a hardcoded-GHz constant with a boot-time value.
#[must_use]
pub fn ms_to_tsc_ticks(ms: u64) -> u64 {
    ms.saturating_mul(tsc_ticks_per_ms())
}

/// Calibrates and records the TSC frequency from CPUID leaf 0x15 (TSC/core
/// crystal clock), falling back to leaf 0x16's base processor frequency, and
/// finally to a conservative 1 GHz default if the CPU reports neither. Meant
/// to run once during boot, before any timer delay is converted to ticks.
pub fn calibrate_tsc_frequency_khz() -> u64 {
    use raw_cpuid::CpuId;

    let cpuid = CpuId::new();
    let khz = cpuid
        .get_tsc_info()
        .and_then(|info| info.tsc_frequency())
        .map(|hz| hz / 1_000)
        .or_else(|| {
            cpuid
                .get_processor_frequency_info()
                .map(|info| u64::from(info.processor_base_frequency()) * 1_000)
        })
        .unwrap_or(1_000_000);

    set_tsc_frequency_khz(khz);
    khz
}

/// x86_64 `Cpu` implementation used by the rest of the core.
pub struct ArchCpu;

impl Cpu for ArchCpu {
    #[inline]
    fn halt() {
        x86_64::instructions::hlt();
    }

    #[inline]
    fn pause() {
        core::hint::spin_loop();
    }

    #[inline]
    fn read_tsc() -> u64 {
        // Safety: RDTSC has no preconditions beyond being on x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[inline]
    fn disable_interrupts() -> bool {
        let was_enabled = x86_64::instructions::interrupts::are_enabled();
        x86_64::instructions::interrupts::disable();
        was_enabled
    }

    #[inline]
    fn restore_interrupts(was_enabled: bool) {
        if was_enabled {
            x86_64::instructions::interrupts::enable();
        }
    }
}
