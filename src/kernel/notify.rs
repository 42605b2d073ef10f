// src/kernel/notify.rs
//! The single syscall's dispatch: ties `NotifyArgs`/`NotifyOutcome` to the
//! routing table, the workflow engine, the process table and the scheduler.
//!
//! Every call passes through [`dispatch`], which records the syscall on the
//! calling process (resetting its watchdog deadline) before acting on the
//! requested op. This is the only place outside `decks`/`guide` that touches
//! more than one subsystem at once: it is the seam between user-facing ABI
//! and kernel-internal state.

use crate::abi::notify::{NotifyArgs, NotifyOp, NotifyOutcome};
use crate::abi::result::CompactResult;
use crate::errors::ErrorCode;
use crate::kernel::process::{ProcessId, ProcessState, ProcessTable};
use crate::kernel::routing::RoutingTable;
use crate::kernel::scheduler::Scheduler;
use crate::kernel::workflow::WorkflowEngine;

/// Dispatches one `notify` call from `pid`, returning the ABI-encoded result.
pub fn dispatch(
    pid: ProcessId,
    args: NotifyArgs,
    table: &mut ProcessTable,
    routing: &RoutingTable,
    workflows: &WorkflowEngine,
    scheduler: &mut Scheduler,
    now_tick: u64,
) -> CompactResult {
    if let Some(process) = table.get_mut(pid) {
        process.record_syscall(now_tick);
    } else {
        return CompactResult::err(ErrorCode::ProcessNotFound);
    }

    let outcome = match args.op {
        NotifyOp::Submit => submit(pid, table, routing, now_tick),
        NotifyOp::Wait => wait(pid, table, scheduler),
        NotifyOp::Poll => poll(args.workflow_id, workflows),
        NotifyOp::Yield => {
            scheduler.yield_now(table, pid);
            Ok(NotifyOutcome::Acknowledged)
        }
        NotifyOp::Exit => {
            exit(pid, table, scheduler);
            Ok(NotifyOutcome::Acknowledged)
        }
    };

    match outcome {
        Ok(outcome) => CompactResult::ok(outcome.into_raw()),
        Err(code) => CompactResult::err(code),
    }
}

/// Drains every event currently queued in `pid`'s event ring into the
/// routing table, timestamping each with `now_tick`.
fn submit(pid: ProcessId, table: &mut ProcessTable, routing: &RoutingTable, now_tick: u64) -> Result<NotifyOutcome, ErrorCode> {
    let process = table.get_mut(pid).ok_or(ErrorCode::ProcessNotFound)?;
    let mut count = 0u32;
    while let Ok(event) = process.event_ring.pop() {
        routing.insert(event, now_tick);
        count += 1;
    }
    Ok(NotifyOutcome::Submitted(count))
}

/// If a completion is already waiting, clears it and returns immediately.
/// Otherwise parks the caller in `Waiting` until the completion interrupt
/// wakes it; the caller observes that wakeup on its next `notify::Wait`.
fn wait(pid: ProcessId, table: &mut ProcessTable, scheduler: &mut Scheduler) -> Result<NotifyOutcome, ErrorCode> {
    let process = table.get_mut(pid).ok_or(ErrorCode::ProcessNotFound)?;
    if process.completion_ready {
        process.completion_ready = false;
        return Ok(NotifyOutcome::Woken);
    }
    scheduler.park_waiting(table, pid);
    Ok(NotifyOutcome::Woken)
}

/// Reports whether the named workflow has reached a terminal state.
fn poll(workflow_id: u64, workflows: &WorkflowEngine) -> Result<NotifyOutcome, ErrorCode> {
    let terminal = workflows.is_terminal(workflow_id).ok_or(ErrorCode::WorkflowNotFound)?;
    Ok(NotifyOutcome::Status(u8::from(!terminal)))
}

/// Marks `pid` terminated and hands the CPU to the next ready process. The
/// caller reaps the process's resources separately via `process_destroy`,
/// the same split the watchdog kill already makes between flagging a
/// process dead and reclaiming what it owned.
fn exit(pid: ProcessId, table: &mut ProcessTable, scheduler: &mut Scheduler) {
    if let Some(process) = table.get_mut(pid) {
        process.state = ProcessState::Terminated;
    }
    scheduler.yield_now(table, pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ring::RingEvent;
    use crate::kernel::collab::mm::AddressSpace;
    use crate::kernel::process::Process;

    fn new_process(pid: ProcessId) -> Process {
        let mut p = Process::new(pid, AddressSpace(0), 0, 0, 0x23, 0x1b, 0);
        p.state = ProcessState::Running;
        p
    }

    #[test]
    fn submit_drains_the_event_ring_into_routing() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();
        table.get_mut(pid).unwrap().event_ring.push(RingEvent::new(0, 1, [0; 8], &[])).unwrap();
        table.get_mut(pid).unwrap().event_ring.push(RingEvent::new(0, 2, [0; 8], &[])).unwrap();

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Submit };

        let result = dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 10);
        assert_eq!(result.into_result().unwrap(), 2);
        assert_eq!(routing.len(), 2);
        assert_eq!(table.get(pid).unwrap().syscall_count, 1);
    }

    #[test]
    fn wait_returns_immediately_when_completion_already_ready() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();
        table.get_mut(pid).unwrap().completion_ready = true;

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Wait };

        dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert!(!table.get(pid).unwrap().completion_ready);
    }

    #[test]
    fn wait_parks_the_caller_when_nothing_is_ready() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Wait };

        dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Waiting);
    }

    #[test]
    fn poll_reports_status_one_while_still_running() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();
        let workflows = WorkflowEngine::new();
        let routing = RoutingTable::new();
        let mut scheduler = Scheduler::new();

        let workflow_id = workflows.register("w", pid.0, [0; 8], alloc::vec::Vec::new()).unwrap();
        workflows.activate(workflow_id, &[], &routing, 0).unwrap();

        let args = NotifyArgs { workflow_id, op: NotifyOp::Poll };
        let result = dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(result.into_result().unwrap(), 1);
    }

    #[test]
    fn poll_unknown_workflow_reports_not_found() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();
        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();

        let args = NotifyArgs { workflow_id: 999, op: NotifyOp::Poll };
        let result = dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::WorkflowNotFound);
    }

    #[test]
    fn yield_hands_off_to_the_next_ready_process() {
        let mut table = ProcessTable::new();
        let a = table.insert(new_process).unwrap();
        table.insert(|pid| {
            let mut p = new_process(pid);
            p.state = ProcessState::Ready;
            p
        }).unwrap();

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Yield };

        dispatch(a, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(table.get(a).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn exit_terminates_the_caller() {
        let mut table = ProcessTable::new();
        let pid = table.insert(new_process).unwrap();

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Exit };

        dispatch(pid, args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Terminated);
        assert_eq!(scheduler.take_exited(), alloc::vec![pid], "exit must hand the pid off for process_destroy");
    }

    #[test]
    fn unknown_pid_reports_not_found() {
        let mut table = ProcessTable::new();
        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let mut scheduler = Scheduler::new();
        let args = NotifyArgs { workflow_id: 0, op: NotifyOp::Yield };

        let result = dispatch(ProcessId(999), args, &mut table, &routing, &workflows, &mut scheduler, 0);
        assert_eq!(result.into_result().unwrap_err().code(), ErrorCode::ProcessNotFound);
    }
}
