//! Bounded ring buffer of audit events with an optional external sink.

use crate::constants::DEFAULT_AUDIT_READ_LIMIT;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventType {
    ToolCall,
    ToolTimeout,
    PermissionDenied,
    RateLimitExceeded,
    ExecutionError,
    TaskEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub agent_id: Option<String>,
    pub tool_name: Option<String>,
    pub task_id: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            agent_id: None,
            tool_name: None,
            task_id: None,
            details,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Opaque append-only sink for audit events (disk, remote log service, …).
/// The kernel never reads back through this interface; replay/query is out
/// of scope.
#[async_trait]
pub trait Store: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<()>;
}

/// In-memory `Store`, useful for embedding callers and tests that want to
/// observe what would have been persisted.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<AuditEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEvent> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        self.entries.lock().await.push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub tool_name: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub limit: Option<usize>,
}

pub struct AuditLogger {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
    store: Option<Arc<dyn Store>>,
}

impl AuditLogger {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
            store: None,
        }
    }

    pub fn with_store(max_events: usize, store: Arc<dyn Store>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
            store: Some(store),
        }
    }

    pub async fn add_event(&self, event: AuditEvent) {
        {
            let mut events = self.events.lock().await;
            if events.len() >= self.max_events {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.append(&event).await {
                tracing::warn!("audit store append failed: {e}");
            }
        }
    }

    /// Newest-last filtered read, defaulting to the last
    /// [`DEFAULT_AUDIT_READ_LIMIT`] matching events.
    pub async fn read(&self, filter: AuditFilter) -> Vec<AuditEvent> {
        let events = self.events.lock().await;
        let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_READ_LIMIT);
        let matching: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                filter
                    .agent_id
                    .as_ref()
                    .map(|a| e.agent_id.as_deref() == Some(a.as_str()))
                    .unwrap_or(true)
                    && filter
                        .tool_name
                        .as_ref()
                        .map(|t| e.tool_name.as_deref() == Some(t.as_str()))
                        .unwrap_or(true)
                    && filter
                        .event_type
                        .map(|t| e.event_type == t)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();

        if matching.len() > limit {
            matching[matching.len() - limit..].to_vec()
        } else {
            matching
        }
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
