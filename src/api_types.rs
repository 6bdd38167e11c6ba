//! DTOs for an embedding HTTP layer. The HTTP edge itself is out of scope
//! for this crate, but these are defined here so such a layer has
//! something concrete to serialize rather than redefining them at the
//! edge, matching how the teacher's `api/mod.rs` reuses its own request/
//! response structs instead of the raw domain types.

use crate::kernel::AgentStatusSnapshot;
use crate::orchestrator::task::{TaskOutcome, WorkflowStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub agent_id: String,
    pub input: serde_json::Value,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub outcome: Option<TaskOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentListing {
    pub agents: Vec<AgentStatusSnapshot>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub stored_workflows: usize,
    pub max_stored_workflows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_response_serializes_with_snake_case_status() {
        let response = TaskStatusResponse {
            workflow_id: "w1".to_string(),
            status: WorkflowStatus::Running,
            outcome: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "running");
    }
}
