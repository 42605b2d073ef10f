// src/kernel/workflow/mod.rs
//! The workflow engine: DAG registration, activation, completion handling
//! and retry/error policy.
//!
//! The registry is a single spinlock over a map keyed by monotonically
//! increasing workflow id, the same "slab via map" shape the routing table
//! uses in place of an intrusive list — ids are never reused, so a stale id
//! simply misses the map instead of needing a generation counter.

pub mod node;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

pub use node::{ExecutionContext, WorkflowNode, MAX_DEPENDENCIES, MAX_NODES};

use crate::abi::ring::RingEvent;
use crate::arch::ms_to_tsc_ticks;
use crate::errors::ErrorCode;
use crate::kernel::routing::RoutingTable;

/// A workflow's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Registered,
    Ready,
    Running,
    Completed,
    Error,
}

/// What happens to the rest of a workflow when a node fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the whole workflow immediately.
    Abort,
    /// Leave every other node running undisturbed.
    Continue,
    /// Mark every (transitive) dependent node errored with `WorkflowDependencyFailed`.
    Skip,
    /// Retry is driven entirely by `RetryConfig`; this variant exists only
    /// to name the case already handled before error policy is consulted.
    Retry,
}

/// Retry policy for transient node failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max: u32,
    pub base_delay_ms: u64,
    pub exponential: bool,
}

impl RetryConfig {
    /// The default a freshly registered workflow gets.
    pub const DEFAULT: Self = Self { enabled: true, max: 3, base_delay_ms: 100, exponential: true };

    fn delay_for(&self, retry_count: u32) -> u64 {
        if self.exponential {
            self.base_delay_ms.saturating_mul(1u64 << retry_count.saturating_sub(1).min(20))
        } else {
            self.base_delay_ms
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A registered DAG of events, owned by a process.
pub struct Workflow {
    pub workflow_id: u64,
    pub name: String,
    pub owner_pid: u64,
    pub route: [u8; 8],
    pub nodes: Vec<WorkflowNode>,
    pub state: WorkflowState,
    pub context: Option<ExecutionContext>,
    pub error_policy: ErrorPolicy,
    pub retry_config: RetryConfig,
    pub final_result: Vec<u8>,
    /// Set at registration: whether the DAG has more than one independent
    /// root, meaning `activate` submits more than one node in its first
    /// batch instead of draining a single chain one dependency at a time.
    pub parallel_safe: bool,
}

impl Workflow {
    /// Whether every node has reached a terminal state.
    fn all_nodes_terminal(&self) -> bool {
        self.nodes.iter().all(WorkflowNode::is_terminal)
    }

    /// Whether any node ended in `error`.
    fn any_node_errored(&self) -> bool {
        self.nodes.iter().any(|n| n.error)
    }
}

/// A DAG is parallel-safe when more than one node has no dependencies: those
/// roots submit together on activation with nothing ordering one before the
/// other.
fn analyse_parallel_safe(nodes: &[WorkflowNode]) -> bool {
    nodes.iter().filter(|n| n.dependencies.iter().all(Option::is_none)).count() > 1
}

/// A node awaiting a timer-scheduled resubmission after a transient failure.
struct PendingRetry {
    workflow_id: u64,
    node_index: u8,
    expires_at_tick: u64,
}

/// The process-wide workflow engine: registry, event-to-node index, and the
/// retry timer queue.
pub struct WorkflowEngine {
    workflows: Mutex<BTreeMap<u64, Workflow>>,
    next_id: AtomicU64,
    event_index: Mutex<BTreeMap<u64, (u64, u8)>>,
    pending_retries: Mutex<Vec<PendingRetry>>,
}

impl WorkflowEngine {
    /// An empty engine; workflow ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            workflows: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            event_index: Mutex::new(BTreeMap::new()),
            pending_retries: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new workflow, returning its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `nodes` exceeds [`MAX_NODES`].
    pub fn register(
        &self,
        name: &str,
        owner_pid: u64,
        route: [u8; 8],
        nodes: Vec<WorkflowNode>,
    ) -> Result<u64, ErrorCode> {
        if nodes.len() > MAX_NODES {
            return Err(ErrorCode::InvalidParameter);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let parallel_safe = analyse_parallel_safe(&nodes);
        let workflow = Workflow {
            workflow_id: id,
            name: String::from(name),
            owner_pid,
            route,
            nodes,
            state: WorkflowState::Registered,
            context: None,
            error_policy: ErrorPolicy::Abort,
            retry_config: RetryConfig::DEFAULT,
            final_result: Vec::new(),
            parallel_safe,
        };
        self.workflows.lock().insert(id, workflow);
        Ok(id)
    }

    /// Overrides the error policy for an already-registered workflow.
    pub fn set_error_policy(&self, workflow_id: u64, policy: ErrorPolicy) -> bool {
        self.with_workflow_mut(workflow_id, |w| w.error_policy = policy).is_some()
    }

    /// Overrides the retry configuration for an already-registered workflow.
    pub fn set_retry_config(&self, workflow_id: u64, config: RetryConfig) -> bool {
        self.with_workflow_mut(workflow_id, |w| w.retry_config = config).is_some()
    }

    fn with_workflow_mut<R>(&self, workflow_id: u64, f: impl FnOnce(&mut Workflow) -> R) -> Option<R> {
        self.workflows.lock().get_mut(&workflow_id).map(f)
    }

    /// Activates a workflow: resets node state, copies `params` into node 0,
    /// allocates an execution context, and submits every initially-ready node.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if `workflow_id` is not registered.
    pub fn activate(
        &self,
        workflow_id: u64,
        params: &[u8],
        table: &RoutingTable,
        now_tick: u64,
    ) -> Result<(), ErrorCode> {
        let mut workflows = self.workflows.lock();
        let workflow = workflows.get_mut(&workflow_id).ok_or(ErrorCode::WorkflowNotFound)?;

        for node in &mut workflow.nodes {
            node.reset();
        }
        if let (Some(first), false) = (workflow.nodes.first_mut(), params.is_empty()) {
            first.data = params.to_vec();
        }
        workflow.context = Some(ExecutionContext::new(workflow.nodes.len() as u32, now_tick));
        workflow.state = WorkflowState::Running;

        let mut event_index = self.event_index.lock();
        submit_ready_nodes(workflow, table, &mut event_index, now_tick);
        Ok(())
    }

    /// The completion callback invoked by the Execution deck once a node's
    /// routing entry has finished (successfully or not).
    pub fn on_event_completed(
        &self,
        event_id: u64,
        result: &[u8],
        error_code: Option<ErrorCode>,
        table: &RoutingTable,
        now_tick: u64,
    ) {
        let Some((workflow_id, node_index)) = self.event_index.lock().remove(&event_id) else { return };
        let mut workflows = self.workflows.lock();
        let Some(workflow) = workflows.get_mut(&workflow_id) else { return };
        let Some(node) = workflow.nodes.get_mut(node_index as usize) else { return };

        match error_code {
            None => {
                node.completed = true;
                node.result = result.to_vec();
                node.event_id = None;
                if let Some(ctx) = &mut workflow.context {
                    ctx.completed_events += 1;
                    ctx.running_events = ctx.running_events.saturating_sub(1);
                }
            }
            Some(code) => {
                let retry_eligible =
                    workflow.retry_config.enabled && code.is_transient() && node.retry_count < workflow.retry_config.max;
                if retry_eligible {
                    node.retry_count += 1;
                    let delay_ms = workflow.retry_config.delay_for(node.retry_count);
                    node.event_id = None;
                    if let Some(ctx) = &mut workflow.context {
                        ctx.running_events = ctx.running_events.saturating_sub(1);
                    }
                    self.pending_retries.lock().push(PendingRetry {
                        workflow_id,
                        node_index,
                        expires_at_tick: now_tick + ms_to_tsc_ticks(delay_ms),
                    });
                } else {
                    node.error = true;
                    node.last_error_code = Some(code);
                    node.event_id = None;
                    if let Some(ctx) = &mut workflow.context {
                        ctx.error_events += 1;
                        ctx.running_events = ctx.running_events.saturating_sub(1);
                        ctx.failed_node_index.get_or_insert(node_index);
                    }
                    apply_error_policy(workflow);
                }
            }
        }

        if !matches!(workflow.state, WorkflowState::Error) {
            let mut event_index = self.event_index.lock();
            submit_ready_nodes(workflow, table, &mut event_index, now_tick);
        }

        if workflow.all_nodes_terminal() {
            workflow.state = if workflow.any_node_errored() { WorkflowState::Error } else { WorkflowState::Completed };
        }
    }

    /// Resubmits every retry whose backoff has expired as of `now_tick`.
    /// Called once per Guide scan, mirroring `HardwareDeck::poll_timers`.
    pub fn poll_retries(&self, table: &RoutingTable, now_tick: u64) {
        let due: Vec<PendingRetry> = {
            let mut pending = self.pending_retries.lock();
            let (due, rest): (Vec<_>, Vec<_>) = core::mem::take(&mut *pending).into_iter().partition(|r| r.expires_at_tick <= now_tick);
            *pending = rest;
            due
        };

        for retry in due {
            let mut workflows = self.workflows.lock();
            let Some(workflow) = workflows.get_mut(&retry.workflow_id) else { continue };
            if matches!(workflow.state, WorkflowState::Error) {
                continue;
            }
            let mut event_index = self.event_index.lock();
            submit_one(workflow, retry.node_index, table, &mut event_index, now_tick);
        }
    }

    /// Reaps terminal workflows whose execution context has aged past
    /// `max_age_ticks`, freeing the context and the final result buffer
    /// while keeping the workflow record available for re-activation.
    pub fn cleanup_completed(&self, now_tick: u64, max_age_ticks: u64) {
        for workflow in self.workflows.lock().values_mut() {
            if !matches!(workflow.state, WorkflowState::Completed | WorkflowState::Error) {
                continue;
            }
            let Some(ctx) = workflow.context else { continue };
            if now_tick.saturating_sub(ctx.activation_time) <= max_age_ticks {
                continue;
            }
            workflow.final_result = workflow
                .nodes
                .iter()
                .rev()
                .find(|n| n.completed)
                .map(|n| n.result.clone())
                .unwrap_or_default();
            workflow.context = None;
        }
    }

    /// Whether `workflow_id` has reached a terminal state. `None` if unknown.
    #[must_use]
    pub fn is_terminal(&self, workflow_id: u64) -> Option<bool> {
        self.workflows
            .lock()
            .get(&workflow_id)
            .map(|w| matches!(w.state, WorkflowState::Completed | WorkflowState::Error))
    }

    /// The workflow's current state, if registered.
    #[must_use]
    pub fn state_of(&self, workflow_id: u64) -> Option<WorkflowState> {
        self.workflows.lock().get(&workflow_id).map(|w| w.state)
    }

    /// The pid that owns `workflow_id`, used to route a completion back to
    /// the right process's result ring and wait queue.
    #[must_use]
    pub fn owner_pid(&self, workflow_id: u64) -> Option<u64> {
        self.workflows.lock().get(&workflow_id).map(|w| w.owner_pid)
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn submit_ready_nodes(
    workflow: &mut Workflow,
    table: &RoutingTable,
    event_index: &mut BTreeMap<u64, (u64, u8)>,
    now_tick: u64,
) {
    let ready: Vec<u8> = workflow
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_ready(&workflow.nodes))
        .map(|(i, _)| i as u8)
        .collect();
    for index in ready {
        submit_one(workflow, index, table, event_index, now_tick);
    }
}

fn submit_one(
    workflow: &mut Workflow,
    node_index: u8,
    table: &RoutingTable,
    event_index: &mut BTreeMap<u64, (u64, u8)>,
    now_tick: u64,
) {
    let workflow_id = workflow.workflow_id;
    let route = workflow.route;
    let Some(node) = workflow.nodes.get_mut(node_index as usize) else { return };
    let event = RingEvent::new(workflow_id, node.event_type, route, &node.data);
    let event_id = table.insert(event, now_tick);
    node.event_id = Some(event_id);
    event_index.insert(event_id, (workflow_id, node_index));
    if let Some(ctx) = &mut workflow.context {
        ctx.running_events += 1;
    }
}

fn apply_error_policy(workflow: &mut Workflow) {
    match workflow.error_policy {
        ErrorPolicy::Abort => workflow.state = WorkflowState::Error,
        ErrorPolicy::Continue | ErrorPolicy::Retry => {}
        ErrorPolicy::Skip => propagate_dependency_failure(&mut workflow.nodes),
    }
}

fn propagate_dependency_failure(nodes: &mut [WorkflowNode]) {
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..nodes.len() {
            if nodes[i].is_terminal() {
                continue;
            }
            let failed_dep = nodes[i]
                .dependencies
                .iter()
                .flatten()
                .any(|&dep| nodes.get(dep as usize).is_some_and(|n| n.error));
            if failed_dep {
                nodes[i].error = true;
                nodes[i].last_error_code = Some(ErrorCode::WorkflowDependencyFailed);
                changed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_hardware_node_workflow(engine: &WorkflowEngine) -> u64 {
        let node = WorkflowNode::new(
            crate::kernel::decks::hardware::event_type::TIMER_GET_TICKS,
            b"",
            &[],
        );
        engine
            .register("single-node", 1, [3, 0, 0, 0, 0, 0, 0, 0], alloc::vec![node])
            .unwrap()
    }

    #[test]
    fn activate_submits_every_initially_ready_node() {
        let engine = WorkflowEngine::new();
        let table = RoutingTable::new();
        let workflow_id = single_hardware_node_workflow(&engine);
        engine.activate(workflow_id, b"", &table, 0).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn on_event_completed_marks_node_and_completes_workflow() {
        let engine = WorkflowEngine::new();
        let table = RoutingTable::new();
        let workflow_id = single_hardware_node_workflow(&engine);
        engine.activate(workflow_id, b"", &table, 0).unwrap();

        let event_id = engine.event_index.lock().keys().next().copied().unwrap();
        table.remove(event_id);
        engine.on_event_completed(event_id, &7u64.to_le_bytes(), None, &table, 0);

        assert_eq!(engine.is_terminal(workflow_id), Some(true));
        assert_eq!(engine.state_of(workflow_id), Some(WorkflowState::Completed));
    }

    #[test]
    fn chain_of_two_nodes_runs_second_after_first_completes() {
        let engine = WorkflowEngine::new();
        let table = RoutingTable::new();
        let first = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_CRC32, b"abc", &[]);
        let second = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_DJB2, b"abc", &[0]);
        let workflow_id = engine.register("chain", 1, [1, 0, 0, 0, 0, 0, 0, 0], alloc::vec![first, second]).unwrap();
        engine.activate(workflow_id, b"", &table, 0).unwrap();

        assert_eq!(table.len(), 1);
        let event_id = engine.event_index.lock().keys().next().copied().unwrap();
        table.remove(event_id);
        engine.on_event_completed(event_id, &crate::kernel::decks::operations::crc32(b"abc").to_le_bytes(), None, &table, 0);

        assert_eq!(table.len(), 1, "second node submitted after the first's entry was removed");
        assert_ne!(engine.state_of(workflow_id), Some(WorkflowState::Completed));
    }

    #[test]
    fn abort_policy_stops_the_workflow_on_permanent_error() {
        let engine = WorkflowEngine::new();
        let table = RoutingTable::new();
        let first = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_CRC32, b"abc", &[]);
        let second = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_DJB2, b"abc", &[0]);
        let workflow_id = engine.register("abort-chain", 1, [1, 0, 0, 0, 0, 0, 0, 0], alloc::vec![first, second]).unwrap();
        engine.activate(workflow_id, b"", &table, 0).unwrap();

        let event_id = engine.event_index.lock().keys().next().copied().unwrap();
        table.remove(event_id);
        engine.on_event_completed(event_id, &[], Some(ErrorCode::OperationsInvalidInput), &table, 0);

        assert_eq!(engine.state_of(workflow_id), Some(WorkflowState::Error));
        assert_eq!(table.len(), 0, "Abort policy must not submit the dependent node");
    }

    #[test]
    fn transient_error_schedules_a_retry_instead_of_resubmitting_immediately() {
        let engine = WorkflowEngine::new();
        let table = RoutingTable::new();
        let workflow_id = single_hardware_node_workflow(&engine);
        engine.activate(workflow_id, b"", &table, 0).unwrap();
        let event_id = engine.event_index.lock().keys().next().copied().unwrap();
        table.remove(event_id);

        engine.on_event_completed(event_id, &[], Some(ErrorCode::Timeout), &table, 0);
        assert_eq!(table.len(), 0, "no immediate resubmission");
        assert_eq!(engine.pending_retries.lock().len(), 1);

        engine.poll_retries(&table, 0);
        assert_eq!(table.len(), 0, "backoff has not expired yet");

        engine.poll_retries(&table, crate::arch::ms_to_tsc_ticks(100) + 1);
        assert_eq!(table.len(), 1, "retry submitted once backoff elapsed");
    }

    #[test]
    fn register_marks_multiple_independent_roots_parallel_safe() {
        let engine = WorkflowEngine::new();
        let a = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_CRC32, b"a", &[]);
        let b = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_CRC32, b"b", &[]);
        let workflow_id = engine.register("fan-out", 1, [0; 8], alloc::vec![a, b]).unwrap();

        assert!(engine.workflows.lock().get(&workflow_id).unwrap().parallel_safe);
    }

    #[test]
    fn register_marks_a_single_chain_not_parallel_safe() {
        let engine = WorkflowEngine::new();
        let workflow_id = single_hardware_node_workflow(&engine);
        let chained = WorkflowNode::new(crate::kernel::decks::operations::event_type::HASH_DJB2, b"", &[0]);
        let chain_id =
            engine.register("chain-only", 1, [0; 8], alloc::vec![WorkflowNode::new(101, b"", &[]), chained]).unwrap();

        assert!(!engine.workflows.lock().get(&workflow_id).unwrap().parallel_safe, "single root");
        assert!(!engine.workflows.lock().get(&chain_id).unwrap().parallel_safe, "one root feeding one dependent");
    }
}
