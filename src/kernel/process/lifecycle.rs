// src/kernel/process/lifecycle.rs
//! Process lifecycle: create, enter usermode, destroy.
//!
//! Create allocates resources and builds the control block; destroy marks
//! terminated and releases what was allocated. Built on the
//! `VirtualMemoryManager`/`PhysicalAllocator` traits instead of walking
//! `x86_64` page tables directly, since this core never owns a concrete
//! paging implementation.

use crate::errors::ErrorCode;
use crate::kernel::collab::mm::{MapFlags, PhysicalAllocator, VirtualMemoryManager};
use crate::kernel::routing::RoutingTable;
use crate::kernel::workflow::WorkflowEngine;

use super::{Process, ProcessId, ProcessState, ProcessTable};

/// Fixed user-space virtual addresses the event/result rings are mapped at.
/// One page each is enough for the ring's backing `SpscRing` bookkeeping;
/// the rings themselves live kernel-side per [`Process`].
pub const EVENT_RING_VADDR: u64 = 0x0000_6000_0000_0000;
pub const RESULT_RING_VADDR: u64 = 0x0000_6000_0000_1000;

/// User code/data segment selectors, RPL 3 (kernel descriptors at indices
/// 1-2, user at 3-4).
pub const USER_CS: u64 = 0x23;
pub const USER_SS: u64 = 0x1b;

/// Creates a process: a fresh address space with the two ring pages mapped
/// user-accessible, added to `table` in `Ready` state.
///
/// # Errors
///
/// `ProcessTableFull` if the table is at [`super::MAX_PROCESSES`];
/// `OutOfMemory` if the physical allocator cannot supply the ring pages.
pub fn process_create(
    table: &mut ProcessTable,
    vmm: &dyn VirtualMemoryManager,
    allocator: &dyn PhysicalAllocator,
    entry: u64,
    stack_top: u64,
    now_tick: u64,
) -> Result<ProcessId, ErrorCode> {
    let address_space = vmm.create_context();

    let event_phys = allocator.alloc(1).ok_or(ErrorCode::OutOfMemory)?;
    let result_phys = match allocator.alloc(1) {
        Some(phys) => phys,
        None => {
            allocator.free(event_phys, 1);
            return Err(ErrorCode::OutOfMemory);
        }
    };

    let map_result = vmm
        .map(address_space, EVENT_RING_VADDR, event_phys, 1, MapFlags::USER_RW)
        .and_then(|()| vmm.map(address_space, RESULT_RING_VADDR, result_phys, 1, MapFlags::USER_RW));

    if map_result.is_err() {
        allocator.free(event_phys, 1);
        allocator.free(result_phys, 1);
        vmm.destroy(address_space);
        return Err(ErrorCode::OutOfMemory);
    }

    let pid = table.insert(|pid| {
        let mut process = Process::new(pid, address_space, entry, stack_top, USER_CS, USER_SS, now_tick);
        process.event_ring_base = EVENT_RING_VADDR;
        process.result_ring_base = RESULT_RING_VADDR;
        process
    });

    if pid.is_err() {
        vmm.destroy(address_space);
    }
    pid
}

/// Marks `pid` as the scheduler's current process and `Running`. The actual
/// `iretq`/`sysret` into user code is arch trampoline machinery outside this
/// core; this call only updates the bookkeeping the scheduler and notify
/// dispatch rely on.
///
/// # Errors
///
/// `ProcessNotFound` if `pid` is not in `table`.
pub fn process_enter_usermode(table: &mut ProcessTable, pid: ProcessId) -> Result<(), ErrorCode> {
    let process = table.get_mut(pid).ok_or(ErrorCode::ProcessNotFound)?;
    process.state = ProcessState::Running;
    table.set_current(Some(pid));
    Ok(())
}

/// Tears down `pid`: destroys its address space (reclaiming every mapped
/// page, including any `Mapped` deck result never transferred to a
/// workflow node) and removes it from the table.
///
/// # Errors
///
/// `ProcessNotFound` if `pid` is not in `table`.
pub fn process_destroy(
    table: &mut ProcessTable,
    vmm: &dyn VirtualMemoryManager,
    _routing: &RoutingTable,
    _workflows: &WorkflowEngine,
    pid: ProcessId,
) -> Result<(), ErrorCode> {
    let process = table.get_mut(pid).ok_or(ErrorCode::ProcessNotFound)?;
    process.state = ProcessState::Terminated;
    let address_space = process.address_space;

    vmm.destroy(address_space);
    table.remove(pid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::decks::test_support::stub_collaborators;

    #[test]
    fn process_create_maps_both_ring_pages_and_inserts_ready() {
        let mut table = ProcessTable::new();
        let collab = stub_collaborators();
        let pid = process_create(&mut table, collab.vmm, collab.allocator, 0x4000_0000, 0x5000_0000, 0).unwrap();

        let process = table.get(pid).unwrap();
        assert_eq!(process.event_ring_base, EVENT_RING_VADDR);
        assert_eq!(process.result_ring_base, RESULT_RING_VADDR);
        assert_eq!(process.state, ProcessState::Ready);
    }

    #[test]
    fn enter_usermode_sets_running_and_current() {
        let mut table = ProcessTable::new();
        let collab = stub_collaborators();
        let pid = process_create(&mut table, collab.vmm, collab.allocator, 0, 0, 0).unwrap();

        process_enter_usermode(&mut table, pid).unwrap();

        assert_eq!(table.current(), Some(pid));
        assert_eq!(table.get(pid).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn destroy_removes_the_process_from_the_table() {
        let mut table = ProcessTable::new();
        let collab = stub_collaborators();
        let pid = process_create(&mut table, collab.vmm, collab.allocator, 0, 0, 0).unwrap();

        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        process_destroy(&mut table, collab.vmm, &routing, &workflows, pid).unwrap();

        assert!(table.get(pid).is_none());
    }

    #[test]
    fn destroy_unknown_pid_reports_not_found() {
        let mut table = ProcessTable::new();
        let routing = RoutingTable::new();
        let workflows = WorkflowEngine::new();
        let collab = stub_collaborators();
        assert_eq!(
            process_destroy(&mut table, collab.vmm, &routing, &workflows, ProcessId(999)),
            Err(ErrorCode::ProcessNotFound)
        );
    }
}
