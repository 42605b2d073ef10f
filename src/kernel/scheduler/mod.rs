// src/kernel/scheduler/mod.rs
//! Cooperative round-robin scheduler: selection among `Ready` processes,
//! yield, the completion-interrupt wakeup, and the watchdog timer tick.
//!
//! Selection is index-after-current over the process table's ready set,
//! adapted for a cooperative, syscall-driven model: there is no preemption
//! here, only `notify::Yield` handing control back voluntarily and the
//! watchdog reclaiming a process that stopped calling in.

use alloc::vec::Vec;

use super::process::{ProcessId, ProcessState, ProcessTable};

/// How often (in ticks) the watchdog sweep runs.
pub const WATCHDOG_CHECK_INTERVAL_TICKS: u64 = 100;

/// The scheduler's state: which pid ran last (for round-robin fairness),
/// plus any pid that yielded while `Terminated` and is still waiting on
/// `process_destroy` to reclaim its resources.
pub struct Scheduler {
    current: Option<ProcessId>,
    exited: Vec<ProcessId>,
}

impl Scheduler {
    /// A fresh scheduler with nothing scheduled yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None, exited: Vec::new() }
    }

    /// Picks the next `Ready` process after whichever ran last, wrapping
    /// around. `None` if nothing is ready.
    pub fn schedule(&mut self, table: &ProcessTable) -> Option<ProcessId> {
        let ready: Vec<ProcessId> = table.ready().map(|p| p.pid).collect();
        if ready.is_empty() {
            return None;
        }
        let next_index = match self.current {
            Some(current) => ready.iter().position(|&pid| pid == current).map_or(0, |i| (i + 1) % ready.len()),
            None => 0,
        };
        let next = ready[next_index];
        self.current = Some(next);
        Some(next)
    }

    /// Cooperative yield: `pid` goes back to `Ready` and the scheduler picks
    /// whoever is next. A `pid` observed `Terminated` (via `notify::Exit`)
    /// is not re-enqueued; it is recorded in `exited` instead, the same
    /// split the watchdog kill makes between flagging a process dead and
    /// reclaiming what it owned (see `take_exited`).
    pub fn yield_now(&mut self, table: &mut ProcessTable, pid: ProcessId) -> Option<ProcessId> {
        if let Some(process) = table.get_mut(pid) {
            match process.state {
                ProcessState::Running => process.state = ProcessState::Ready,
                ProcessState::Terminated => {
                    self.exited.push(pid);
                    if self.current == Some(pid) {
                        self.current = None;
                    }
                }
                _ => {}
            }
        }
        self.schedule(table)
    }

    /// Drains every pid that yielded while `Terminated` since the last call,
    /// for the caller to reclaim via `process_destroy`.
    pub fn take_exited(&mut self) -> Vec<ProcessId> {
        core::mem::take(&mut self.exited)
    }

    /// Parks `pid` in `Waiting`, e.g. a `notify::Wait` call with nothing
    /// outstanding to report yet.
    pub fn park_waiting(&mut self, table: &mut ProcessTable, pid: ProcessId) {
        if let Some(process) = table.get_mut(pid) {
            process.state = ProcessState::Waiting;
        }
        if self.current == Some(pid) {
            self.current = None;
        }
    }

    /// The completion interrupt handler: flags `pid`'s result as ready and,
    /// if it was parked in `Wait`, moves it back to `Ready`.
    pub fn on_completion_interrupt(&mut self, table: &mut ProcessTable, pid: ProcessId) {
        if let Some(process) = table.get_mut(pid) {
            process.completion_ready = true;
            if matches!(process.state, ProcessState::Waiting) {
                process.state = ProcessState::Ready;
            }
        }
    }

    /// The periodic timer tick. Every [`WATCHDOG_CHECK_INTERVAL_TICKS`]
    /// ticks, marks `Terminated` any non-terminated process that has not
    /// made a syscall within the watchdog deadline, returning the pids
    /// killed so the caller can run `process_destroy` to reclaim their
    /// resources. A no-op on ticks that don't land on the sweep interval.
    pub fn timer_tick(&mut self, table: &mut ProcessTable, now_tick: u64) -> Vec<ProcessId> {
        if now_tick % WATCHDOG_CHECK_INTERVAL_TICKS != 0 {
            return Vec::new();
        }
        let mut killed = Vec::new();
        for process in table.iter_mut() {
            if matches!(process.state, ProcessState::Terminated) {
                continue;
            }
            if process.is_watchdog_expired(now_tick) {
                process.state = ProcessState::Terminated;
                killed.push(process.pid);
            }
        }
        for pid in &killed {
            if self.current == Some(*pid) {
                self.current = None;
            }
        }
        killed
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::collab::mm::AddressSpace;
    use crate::kernel::process::Process;

    fn ready_process(pid: ProcessId, now_tick: u64) -> Process {
        let mut p = Process::new(pid, AddressSpace(0), 0, 0, 0x23, 0x1b, now_tick);
        p.state = ProcessState::Ready;
        p
    }

    #[test]
    fn schedule_wraps_round_robin_over_ready_processes() {
        let mut table = ProcessTable::new();
        let a = table.insert(|pid| ready_process(pid, 0)).unwrap();
        let b = table.insert(|pid| ready_process(pid, 0)).unwrap();
        let c = table.insert(|pid| ready_process(pid, 0)).unwrap();

        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.schedule(&table), Some(a));
        assert_eq!(scheduler.schedule(&table), Some(b));
        assert_eq!(scheduler.schedule(&table), Some(c));
        assert_eq!(scheduler.schedule(&table), Some(a));
    }

    #[test]
    fn completion_interrupt_wakes_a_waiting_process() {
        let mut table = ProcessTable::new();
        let pid = table.insert(|pid| ready_process(pid, 0)).unwrap();
        let mut scheduler = Scheduler::new();

        scheduler.park_waiting(&mut table, pid);
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Waiting);

        scheduler.on_completion_interrupt(&mut table, pid);
        let process = table.get(pid).unwrap();
        assert_eq!(process.state, ProcessState::Ready);
        assert!(process.completion_ready);
    }

    #[test]
    fn watchdog_kills_only_on_its_sweep_interval() {
        let mut table = ProcessTable::new();
        let pid = table.insert(|pid| ready_process(pid, 0)).unwrap();
        let mut scheduler = Scheduler::new();

        let killed = scheduler.timer_tick(&mut table, super::WATCHDOG_CHECK_INTERVAL_TICKS - 1);
        assert!(killed.is_empty());
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Ready);

        let killed = scheduler.timer_tick(&mut table, crate::kernel::process::WATCHDOG_IDLE_TICKS + super::WATCHDOG_CHECK_INTERVAL_TICKS);
        assert_eq!(killed, alloc::vec![pid]);
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Terminated);
    }

    #[test]
    fn watchdog_leaves_recently_active_processes_alone() {
        let mut table = ProcessTable::new();
        let now = 5_000;
        let pid = table.insert(|pid| ready_process(pid, now)).unwrap();
        let mut scheduler = Scheduler::new();

        let killed = scheduler.timer_tick(&mut table, now + super::WATCHDOG_CHECK_INTERVAL_TICKS);
        assert!(killed.is_empty());
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn yield_on_a_terminated_process_records_it_for_reaping_instead_of_re_enqueuing() {
        let mut table = ProcessTable::new();
        let pid = table.insert(|pid| ready_process(pid, 0)).unwrap();
        table.get_mut(pid).unwrap().state = ProcessState::Terminated;
        let mut scheduler = Scheduler::new();

        scheduler.yield_now(&mut table, pid);

        assert_eq!(table.get(pid).unwrap().state, ProcessState::Terminated);
        assert_eq!(scheduler.take_exited(), alloc::vec![pid]);
        assert!(scheduler.take_exited().is_empty(), "take_exited should drain, not just peek");
    }

    #[test]
    fn yield_on_a_running_process_still_re_enqueues_it_as_ready() {
        let mut table = ProcessTable::new();
        let pid = table.insert(|pid| ready_process(pid, 0)).unwrap();
        table.get_mut(pid).unwrap().state = ProcessState::Running;
        let mut scheduler = Scheduler::new();

        scheduler.yield_now(&mut table, pid);

        assert_eq!(table.get(pid).unwrap().state, ProcessState::Ready);
        assert!(scheduler.take_exited().is_empty());
    }
}
