//! The task-tree data model: atomic, sequential, parallel, and conditional
//! nodes, plus the outcome and status types the orchestrator tracks.

use crate::payload::HandlerResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type Condition = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AtomicTask {
    pub id: String,
    pub agent_id: String,
    pub input: serde_json::Value,
    pub timeout_ms: Option<u64>,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct CompositeTask {
    pub id: String,
    pub children: Vec<TaskNode>,
}

#[derive(Clone)]
pub struct ConditionalTask {
    pub id: String,
    pub condition: Condition,
    pub context: serde_json::Value,
    pub subtasks: Vec<TaskNode>,
}

/// A node in the workflow's task tree. `Sequential`/`Parallel` share the
/// composite shape; `Conditional` carries its own branch selection.
#[derive(Clone)]
pub enum TaskNode {
    Atomic(AtomicTask),
    Sequential(CompositeTask),
    Parallel(CompositeTask),
    Conditional(ConditionalTask),
}

impl TaskNode {
    pub fn id(&self) -> &str {
        match self {
            TaskNode::Atomic(t) => &t.id,
            TaskNode::Sequential(t) | TaskNode::Parallel(t) => &t.id,
            TaskNode::Conditional(t) => &t.id,
        }
    }
}

/// Either a leaf handler result or the per-child outcome map of a
/// composite node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutput {
    Leaf(HandlerResult),
    Composite(HashMap<String, TaskOutcome>),
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: TaskOutput,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn ok(output: TaskOutput) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, output: TaskOutput) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Workflow state only ever moves forward; a terminal status cannot be
    /// re-entered into `Pending`/`Running`.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_rejects_further_transitions() {
        assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::Running));
        assert!(!WorkflowStatus::Cancelled.can_transition_to(WorkflowStatus::Completed));
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Completed));
    }
}
