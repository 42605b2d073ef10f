// src/kernel/workflow/node.rs
//! Workflow node and execution-context bookkeeping.

use alloc::vec::Vec;

use crate::abi::ring::MAX_PAYLOAD;
use crate::errors::ErrorCode;

/// Maximum dependency count per node.
pub const MAX_DEPENDENCIES: usize = 8;
/// Maximum node count per workflow.
pub const MAX_NODES: usize = 16;

/// One DAG node inside a [`super::Workflow`]. State resets on every activation.
#[derive(Debug, Clone)]
pub struct WorkflowNode {
    /// Deck-dispatched event type this node submits.
    pub event_type: u32,
    /// Inline payload copied into the submitted `RingEvent`.
    pub data: Vec<u8>,
    /// Indices of nodes that must be terminal before this one can submit.
    pub dependencies: [Option<u8>; MAX_DEPENDENCIES],
    /// Set once the node's routing entry has reached Execution successfully.
    pub completed: bool,
    /// Set once the node has failed terminally (no further retry).
    pub error: bool,
    /// Number of retries attempted so far.
    pub retry_count: u32,
    /// The error code from the most recent failed attempt.
    pub last_error_code: Option<ErrorCode>,
    /// The routing-table event id this node is currently waiting on, if submitted.
    pub event_id: Option<u64>,
    /// The result payload, once completed and not yet consumed.
    pub result: Vec<u8>,
}

impl WorkflowNode {
    /// A fresh node with `event_type`, `data` and the given dependency indices.
    #[must_use]
    pub fn new(event_type: u32, data: &[u8], dependencies: &[u8]) -> Self {
        let mut deps = [None; MAX_DEPENDENCIES];
        for (slot, &dep) in deps.iter_mut().zip(dependencies.iter()) {
            *slot = Some(dep);
        }
        let mut buf = data.to_vec();
        buf.truncate(MAX_PAYLOAD);
        Self {
            event_type,
            data: buf,
            dependencies: deps,
            completed: false,
            error: false,
            retry_count: 0,
            last_error_code: None,
            event_id: None,
            result: Vec::new(),
        }
    }

    /// Resets per-activation state, keeping `event_type`/`data`/`dependencies`.
    pub fn reset(&mut self) {
        self.completed = false;
        self.error = false;
        self.retry_count = 0;
        self.last_error_code = None;
        self.event_id = None;
        self.result.clear();
    }

    /// Whether this node is in a terminal state (completed or errored).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed || self.error
    }

    /// Whether every dependency of this node is terminal-and-successful.
    #[must_use]
    pub fn dependencies_satisfied(&self, nodes: &[WorkflowNode]) -> bool {
        self.dependencies.iter().flatten().all(|&dep| nodes.get(dep as usize).is_some_and(|n| n.completed))
    }

    /// Whether this node is ready to submit: not yet submitted, not
    /// terminal, and every dependency has completed.
    #[must_use]
    pub fn is_ready(&self, nodes: &[WorkflowNode]) -> bool {
        self.event_id.is_none() && !self.is_terminal() && self.dependencies_satisfied(nodes)
    }
}

/// Per-activation bookkeeping allocated on activate, freed on cleanup.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    /// TSC timestamp of the activation that created this context.
    pub activation_time: u64,
    pub total_events: u32,
    pub completed_events: u32,
    pub running_events: u32,
    pub error_events: u32,
    /// Index of the first node to fail, if any.
    pub failed_node_index: Option<u8>,
}

impl ExecutionContext {
    /// A fresh context for `total_events` nodes, activated at `activation_time`.
    #[must_use]
    pub const fn new(total_events: u32, activation_time: u64) -> Self {
        Self {
            activation_time,
            total_events,
            completed_events: 0,
            running_events: 0,
            error_events: 0,
            failed_node_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_with_no_dependencies_is_immediately_ready() {
        let nodes = Vec::new();
        let node = WorkflowNode::new(101, b"abc", &[]);
        assert!(node.is_ready(&nodes));
    }

    #[test]
    fn node_waits_on_incomplete_dependency() {
        let dep = WorkflowNode::new(100, b"", &[]);
        let nodes = alloc::vec![dep];
        let node = WorkflowNode::new(101, b"", &[0]);
        assert!(!node.is_ready(&nodes));
    }

    #[test]
    fn node_becomes_ready_once_dependency_completes() {
        let mut dep = WorkflowNode::new(100, b"", &[]);
        dep.completed = true;
        let nodes = alloc::vec![dep];
        let node = WorkflowNode::new(101, b"", &[0]);
        assert!(node.is_ready(&nodes));
    }

    #[test]
    fn reset_clears_completion_state_but_keeps_definition() {
        let mut node = WorkflowNode::new(101, b"xyz", &[]);
        node.completed = true;
        node.retry_count = 2;
        node.reset();
        assert!(!node.completed);
        assert_eq!(node.retry_count, 0);
        assert_eq!(node.data, b"xyz");
    }
}
