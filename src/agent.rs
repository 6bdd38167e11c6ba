//! Agent records and the handler traits the Kernel invokes.

use crate::payload::{HandlerInput, HandlerResult};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Recognized permission vocabulary. Permissions remain free-form strings
/// per the data model; these constants exist to avoid typos at call sites.
pub mod permission {
    pub const IPC_SEND: &str = "ipc:send";
    pub const IPC_SEND_TAG: &str = "ipc:send:tag";
    pub const IPC_SEND_BROADCAST: &str = "ipc:send:broadcast";
    pub const IPC_RECEIVE: &str = "ipc:receive";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const EXECUTE: &str = "execute";
    pub const NETWORK: &str = "network";
    pub const SYSTEM: &str = "system";
}

/// Cooperative, single-suspension-point cancellation signal shared by every
/// handler invocation belonging to one workflow.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Passed alongside a [`HandlerInput`] into every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub workflow_id: String,
    pub task_id: String,
    pub signal: CancellationToken,
}

#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, input: HandlerInput, ctx: HandlerContext) -> Result<HandlerResult>;
}

#[async_trait]
pub trait OnMessageHandler: Send + Sync {
    async fn on_message(&self, msg: crate::ipc::IpcMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Uninitialized,
    Idle,
    Busy,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A registered agent. Exclusively owned by the [`crate::registry::AgentRegistry`];
/// every other component holds only the agent's id.
pub struct Agent {
    pub id: String,
    pub name: String,
    pub model: Option<String>,
    pub state: AgentState,
    pub tags: Vec<String>,
    pub permissions: HashSet<String>,
    pub metadata: AgentMetadata,
    pub handler: Arc<dyn AgentHandler>,
    pub on_message: Option<Arc<dyn OnMessageHandler>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: None,
            state: AgentState::Uninitialized,
            tags: Vec::new(),
            permissions: HashSet::new(),
            metadata: AgentMetadata::default(),
            handler,
            on_message: None,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_on_message(mut self, handler: Arc<dyn OnMessageHandler>) -> Self {
        self.on_message = Some(handler);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn has_permission(&self, perm: &str) -> bool {
        self.permissions.contains(perm)
    }

    pub fn has_any_permission(&self, perms: &[&str]) -> bool {
        perms.iter().any(|p| self.permissions.contains(*p))
    }
}
