//! Internal lifecycle event bus. Orchestrator state transitions are
//! published here for observers (the AuditLogger, embedding callers, tests).

use crate::bus::MessageBus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Queued,
    Started,
    Step,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub workflow_id: String,
    pub task_id: String,
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: LifecycleKind,
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    pub fn new(workflow_id: impl Into<String>, task_id: impl Into<String>, kind: LifecycleKind) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent_id: None,
            timestamp: Utc::now(),
            kind,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Channel every event for this workflow is also published on, in
    /// addition to a global `task.<kind>` channel.
    pub fn workflow_channel(workflow_id: &str) -> String {
        format!("workflow:{workflow_id}")
    }
}

pub type EventBus = MessageBus<LifecycleEvent>;
