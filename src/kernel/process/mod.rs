// src/kernel/process/mod.rs
//! Process control blocks and the fixed-size process table.
//!
//! A process owns one address space, one event/result ring pair, and at
//! most one active workflow. Lifecycle transitions (create/enter-usermode/
//! destroy) live in [`lifecycle`]; this module is the data model and the
//! table that indexes it by pid.

pub mod lifecycle;

use alloc::vec::Vec;

use crate::abi::ring::{RingEvent, RingResult};
use crate::arch::CpuFrame;
use crate::errors::ErrorCode;
use crate::kernel::collab::mm::AddressSpace;
use crate::kernel::ring_buffer::SpscRing;

/// Fixed process-table capacity. A `ProcessTableFull` error surfaces past it
/// instead of growing unboundedly.
pub const MAX_PROCESSES: usize = 64;

/// Per-process event/result ring capacity. Power of two per `SpscRing`.
pub const RING_CAPACITY: usize = 64;

/// Watchdog: a process idle this many ticks since its last syscall is killed.
pub const WATCHDOG_IDLE_TICKS: u64 = 1000;

/// Process identifier. Monotonic, never reused within a boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// A process's scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    /// Parked in `notify::wait`, resumed by the completion interrupt.
    Waiting,
    Terminated,
}

/// A process control block.
pub struct Process {
    pub pid: ProcessId,
    pub state: ProcessState,
    /// Saved register frame, valid whenever the process is not `Running`.
    pub frame: CpuFrame,
    pub address_space: AddressSpace,
    /// Virtual base of the mapped event ring (user-produced, kernel-consumed).
    pub event_ring_base: u64,
    /// Virtual base of the mapped result ring (kernel-produced, user-consumed).
    pub result_ring_base: u64,
    /// User-produced, kernel-consumed submissions. Kernel-side mirror of the
    /// page mapped at `event_ring_base`; the mapping itself is boot/MMU
    /// machinery outside this core.
    pub event_ring: SpscRing<RingEvent>,
    /// Kernel-produced, user-consumed completions. Mirrors `result_ring_base`.
    pub result_ring: SpscRing<RingResult>,
    /// The workflow this process most recently activated, if any.
    pub current_workflow_id: Option<u64>,
    /// Set by the completion interrupt, cleared once `notify::wait` observes it.
    pub completion_ready: bool,
    /// TSC tick of the last syscall entry, consulted by the watchdog.
    pub last_syscall_tick: u64,
    pub syscall_count: u64,
}

impl Process {
    /// A freshly created process, `Ready` at `entry`/`stack_top`, with no
    /// ring pages mapped yet.
    #[must_use]
    pub fn new(
        pid: ProcessId,
        address_space: AddressSpace,
        entry: u64,
        stack_top: u64,
        user_cs: u64,
        user_ss: u64,
        now_tick: u64,
    ) -> Self {
        Self {
            pid,
            state: ProcessState::Ready,
            frame: CpuFrame::initial(entry, stack_top, user_cs, user_ss),
            address_space,
            event_ring_base: 0,
            result_ring_base: 0,
            event_ring: SpscRing::new(RING_CAPACITY),
            result_ring: SpscRing::new(RING_CAPACITY),
            current_workflow_id: None,
            completion_ready: false,
            last_syscall_tick: now_tick,
            syscall_count: 0,
        }
    }

    /// Records a syscall entry: bumps the count and refreshes the watchdog
    /// deadline so `is_watchdog_expired` measures idle time since this call.
    pub fn record_syscall(&mut self, now_tick: u64) {
        self.syscall_count += 1;
        self.last_syscall_tick = now_tick;
    }

    /// Whether this process has been idle (no syscall) past the watchdog
    /// deadline as of `now_tick`.
    #[must_use]
    pub fn is_watchdog_expired(&self, now_tick: u64) -> bool {
        now_tick.saturating_sub(self.last_syscall_tick) > WATCHDOG_IDLE_TICKS
    }
}

/// The process-wide table, indexed by pid. A `Vec` rather than a fixed
/// array: pids are assigned densely from 1, and lookups walk the small live
/// set rather than index by raw pid (terminated processes are reaped and
/// removed, so pid and table position diverge over time).
pub struct ProcessTable {
    processes: Vec<Process>,
    next_pid: u64,
    current: Option<ProcessId>,
}

impl ProcessTable {
    /// An empty table; pids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { processes: Vec::new(), next_pid: 1, current: None }
    }

    /// Allocates a pid and inserts `process` under it.
    ///
    /// # Errors
    ///
    /// Returns `ProcessTableFull` once [`MAX_PROCESSES`] live entries exist.
    pub fn insert(&mut self, build: impl FnOnce(ProcessId) -> Process) -> Result<ProcessId, ErrorCode> {
        if self.processes.len() >= MAX_PROCESSES {
            return Err(ErrorCode::ProcessTableFull);
        }
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        self.processes.push(build(pid));
        Ok(pid)
    }

    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    #[must_use]
    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn set_current(&mut self, pid: Option<ProcessId>) {
        self.current = pid;
    }

    /// Every process currently `Ready`.
    pub fn ready(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter().filter(|p| matches!(p.state, ProcessState::Ready))
    }

    /// Every live process, any state.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    /// Every live process, any state, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.iter_mut()
    }

    /// Removes a terminated process from the table (reap).
    pub fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        let idx = self.processes.iter().position(|p| p.pid == pid)?;
        if self.current == Some(pid) {
            self.current = None;
        }
        Some(self.processes.remove(idx))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_process(pid: ProcessId) -> Process {
        Process::new(pid, AddressSpace(0), 0x4000_0000, 0x5000_0000, 0x23, 0x1b, 0)
    }

    #[test]
    fn insert_assigns_increasing_pids() {
        let mut table = ProcessTable::new();
        let a = table.insert(new_process).unwrap();
        let b = table.insert(new_process).unwrap();
        assert_eq!(a, ProcessId(1));
        assert_eq!(b, ProcessId(2));
    }

    #[test]
    fn table_full_past_max_processes() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.insert(new_process).unwrap();
        }
        assert_eq!(table.insert(new_process), Err(ErrorCode::ProcessTableFull));
    }

    #[test]
    fn remove_clears_current_if_it_was_current() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();
        table.set_current(Some(pid));
        table.remove(pid);
        assert_eq!(table.current(), None);
        assert!(table.get(pid).is_none());
    }

    #[test]
    fn watchdog_expires_only_past_the_idle_threshold() {
        let process = new_process(ProcessId(1));
        assert!(!process.is_watchdog_expired(WATCHDOG_IDLE_TICKS));
        assert!(process.is_watchdog_expired(WATCHDOG_IDLE_TICKS + 1));
    }
}
