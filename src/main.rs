// src/main.rs
//! Boot entry point: heap and TSC bring-up, the concrete collaborators
//! `boot` provides, and the kernel idle loop tying the Guide scan, the
//! workflow engine's retry/cleanup sweeps and the scheduler together.
//!
//! Descriptor tables, the syscall entry stub and interrupt handlers are
//! boot machinery this core does not model (see `kernel::collab`'s module
//! doc); without them there is no real path into usermode yet, so this loop
//! only drives the scan/schedule/watchdog cycle against whatever is already
//! queued, and halts between ticks.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, Ordering};

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use bootloader_api::{entry_point, BootInfo};
use spin::Mutex;

use guide_kernel::abi::ring::RingResult;
use guide_kernel::arch::{self, ArchCpu, Cpu};
use guide_kernel::boot::{BumpFrameAllocator, OffsetVmm, RamTagFilesystem};
use guide_kernel::kernel::collab::console;
use guide_kernel::kernel::decks::execution::{CompletionReport, ExecutionSink};
use guide_kernel::kernel::decks::Collaborators;
use guide_kernel::kernel::guide::Guide;
use guide_kernel::kernel::process::lifecycle::process_destroy;
use guide_kernel::kernel::process::{ProcessId, ProcessTable};
use guide_kernel::kernel::routing::RoutingTable;
use guide_kernel::kernel::scheduler::Scheduler;
use guide_kernel::kernel::workflow::WorkflowEngine;
use guide_kernel::{debug_println, hlt_loop};

/// Smallest usable region accepted for the heap: the routing table, decks
/// and workflow engine all grow through the same global allocator.
const MIN_HEAP_SIZE: u64 = 8 * 1024 * 1024;
const SAFE_MEMORY_START: u64 = 0x0010_0000;
const PAGE_SIZE: u64 = 0x1000;

/// How long a terminal workflow's context lingers before `cleanup_completed`
/// reclaims it, in TSC ticks.
const WORKFLOW_CLEANUP_AGE_TICKS: u64 = 50_000;

static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

static ROUTING: RoutingTable = RoutingTable::new();
static WORKFLOWS: WorkflowEngine = WorkflowEngine::new();
static GUIDE: Guide = Guide::new();
static FS: RamTagFilesystem = RamTagFilesystem::new();

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    // Safety: `boot_info` is `&'static mut` by the bootloader's contract and
    // this function never returns, so the underlying `MemoryRegions` really
    // does live for the rest of boot; only the reborrow's lifetime needs help.
    let regions: &'static MemoryRegions = unsafe { &*(core::ptr::addr_of!(boot_info.memory_regions)) };
    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    let (heap_phys_start, heap_size, heap_pages) =
        pick_heap_region(regions).expect("no usable region large enough for the heap");
    let heap_virt_start = phys_mem_offset + heap_phys_start;
    // Safety: `[heap_phys_start, heap_phys_start + heap_size)` is a `Usable`
    // region the bootloader reported and nothing else claims; its virtual
    // alias through the physical-memory window is already mapped.
    unsafe {
        guide_kernel::init_heap(heap_virt_start as usize, heap_size as usize).expect("heap already initialized");
    }

    // Safety: runs once, before anything else touches the COM1 ports.
    unsafe { console::init_serial() };
    console::init_logger();
    debug_println!("boot: heap at {:#x}, {} bytes", heap_virt_start, heap_size);

    let khz = arch::calibrate_tsc_frequency_khz();
    debug_println!("boot: tsc calibrated to {} kHz", khz);

    // Safety: `regions` describes memory this kernel now owns exclusively;
    // `heap_pages` leading frames are already spoken for by the heap above.
    let frame_allocator: &'static BumpFrameAllocator =
        Box::leak(Box::new(unsafe { BumpFrameAllocator::init(regions, heap_pages) }));
    // Safety: runs once, against the level-4 table Cr3 currently points at.
    let vmm: &'static OffsetVmm = Box::leak(Box::new(unsafe { OffsetVmm::init(phys_mem_offset, frame_allocator) }));

    let collab = Collaborators { allocator: frame_allocator, vmm, fs: &FS };

    let table = Mutex::new(ProcessTable::new());
    let scheduler = Mutex::new(Scheduler::new());
    let now_tick = AtomicU64::new(0);

    let sink = KernelSink { table: &table, scheduler: &scheduler, workflows: &WORKFLOWS, routing: &ROUTING, now_tick: &now_tick };

    debug_println!("boot: entering kernel idle loop");

    loop {
        let tick = ArchCpu::read_tsc();
        now_tick.store(tick, Ordering::Relaxed);

        GUIDE.scan(&ROUTING, &collab, &sink, tick);
        WORKFLOWS.poll_retries(&ROUTING, tick);
        WORKFLOWS.cleanup_completed(tick, WORKFLOW_CLEANUP_AGE_TICKS);

        {
            let mut table = table.lock();
            let mut scheduler = scheduler.lock();
            for pid in scheduler.timer_tick(&mut table, tick) {
                debug_println!("watchdog killed pid {}", pid.0);
                let _ = process_destroy(&mut table, vmm, &ROUTING, &WORKFLOWS, pid);
            }
            for pid in scheduler.take_exited() {
                debug_println!("reaping exited pid {}", pid.0);
                let _ = process_destroy(&mut table, vmm, &ROUTING, &WORKFLOWS, pid);
            }
            scheduler.schedule(&table);
        }

        ArchCpu::halt();
    }
}

/// Picks the first `Usable` region at or after the 1 MiB floor big enough
/// for the heap. Returns its physical start, the page-rounded size reserved,
/// and the page count, so `BumpFrameAllocator` can skip exactly that many
/// frames and never hand the heap's own backing memory out to a process.
fn pick_heap_region(regions: &MemoryRegions) -> Option<(u64, u64, usize)> {
    for region in regions.iter() {
        if region.kind != MemoryRegionKind::Usable {
            continue;
        }
        let start = region.start.max(SAFE_MEMORY_START) & !(PAGE_SIZE - 1);
        let end = region.end & !(PAGE_SIZE - 1);
        if end <= start || end - start < MIN_HEAP_SIZE {
            continue;
        }
        let size = end - start;
        Some((start, size, (size / PAGE_SIZE) as usize))
    }
    .into_iter()
    .next()
}

/// Ties the Execution deck's callbacks back to the process table, scheduler
/// and workflow engine — the collaborator `ExecutionSink` exists to let the
/// decks stay ignorant of process/scheduler types entirely.
struct KernelSink<'a> {
    table: &'a Mutex<ProcessTable>,
    scheduler: &'a Mutex<Scheduler>,
    workflows: &'a WorkflowEngine,
    routing: &'a RoutingTable,
    now_tick: &'a AtomicU64,
}

impl ExecutionSink for KernelSink<'_> {
    fn push_result(&self, result: RingResult) -> Result<(), ()> {
        let pid = self.workflows.owner_pid(result.workflow_id).map(ProcessId).ok_or(())?;
        let mut table = self.table.lock();
        let process = table.get_mut(pid).ok_or(())?;
        process.result_ring.push(result).map_err(|_| ())
    }

    fn raise_completion_interrupt(&self) {
        // Carries no event context by design (mirrors one shared IRQ line);
        // the per-process wake happens in `notify_workflow` below, which
        // does know which workflow just completed.
    }

    fn notify_workflow(&self, report: CompletionReport) {
        if let Some(pid) = self.workflows.owner_pid(report.workflow_id).map(ProcessId) {
            let mut table = self.table.lock();
            let mut scheduler = self.scheduler.lock();
            scheduler.on_completion_interrupt(&mut table, pid);
        }
        let now_tick = self.now_tick.load(Ordering::Relaxed);
        self.workflows.on_event_completed(report.event_id, report.result_bytes(), report.error_code, self.routing, now_tick);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    console::enter_panic();
    debug_println!("panic: {}", info);
    hlt_loop();
}
