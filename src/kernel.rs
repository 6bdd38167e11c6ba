//! Binds the registry, IPC, orchestrator, memory/tool/model managers,
//! audit log and event bus into one process-wide object.

use crate::agent::Agent;
use crate::api_types::{AgentListing, QueueStatus, TaskStatusResponse};
use crate::audit::AuditLogger;
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::ipc::IpcManager;
use crate::memory::MemoryManager;
use crate::model::ModelManager;
use crate::orchestrator::task::{TaskOutcome, WorkflowStatus};
use crate::orchestrator::Orchestrator;
use crate::registry::{AgentLookup, AgentRegistry};
use crate::tools::ToolManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub id: String,
    pub name: String,
    pub state: crate::agent::AgentState,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub uptime_ms: u64,
    pub agent_count: usize,
    pub agents: Vec<AgentStatusSnapshot>,
}

pub struct Kernel {
    pub registry: Arc<AgentRegistry>,
    pub ipc: Arc<IpcManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<MemoryManager>,
    pub tools: Arc<ToolManager>,
    pub models: Arc<ModelManager>,
    pub audit: Arc<AuditLogger>,
    started_at: DateTime<Utc>,
    subscriptions: Mutex<HashMap<String, u64>>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let audit = Arc::new(AuditLogger::new(config.audit.max_events));
        let lookup: Arc<dyn AgentLookup> = registry.clone();

        Self {
            ipc: Arc::new(IpcManager::new(lookup.clone(), config.ipc.clone())),
            orchestrator: Arc::new(Orchestrator::new(lookup, config.orchestrator.clone())),
            memory: Arc::new(MemoryManager::new(config.memory.clone())),
            tools: Arc::new(ToolManager::new(config.tool.clone(), audit.clone())),
            models: Arc::new(ModelManager::new()),
            audit,
            registry,
            started_at: Utc::now(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_agent(&self, agent: Agent) -> Result<()> {
        self.registry.register(agent).await
    }

    /// Subscribes the agent to its `agent:<id>` IPC channel and marks it
    /// idle. If the agent declared an `on_message` handler, it is invoked
    /// for every delivered envelope.
    pub async fn start_agent(&self, id: &str) -> Result<()> {
        let agent = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| KernelError::agent_not_found(id))?;

        let on_message = agent.read().await.on_message.clone();
        let sub_id = self
            .ipc
            .subscribe_agent(id, move |msg| {
                if let Some(handler) = on_message.clone() {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.on_message(msg).await;
                    });
                }
            })
            .await;
        self.subscriptions.lock().await.insert(id.to_string(), sub_id);

        agent.write().await.state = crate::agent::AgentState::Idle;
        Ok(())
    }

    pub async fn stop_agent(&self, id: &str) -> Result<()> {
        let agent = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| KernelError::agent_not_found(id))?;

        if let Some(sub_id) = self.subscriptions.lock().await.remove(id) {
            self.ipc.unsubscribe_agent(id, sub_id).await;
        }
        agent.write().await.state = crate::agent::AgentState::Stopped;
        Ok(())
    }

    pub async fn dispatch_task(&self, root: crate::orchestrator::task::TaskNode) -> Result<(String, TaskOutcome)> {
        self.orchestrator.dispatch_task(root).await
    }

    pub async fn workflow_status(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        self.orchestrator.workflow_status(workflow_id).await
    }

    pub async fn task_status(&self, workflow_id: &str) -> Option<TaskStatusResponse> {
        let status = self.orchestrator.workflow_status(workflow_id).await?;
        let outcome = self.orchestrator.workflow_outcome(workflow_id).await;
        Some(TaskStatusResponse {
            workflow_id: workflow_id.to_string(),
            status,
            outcome,
        })
    }

    pub async fn agent_listing(&self) -> AgentListing {
        let status = self.system_status().await;
        AgentListing {
            count: status.agents.len(),
            agents: status.agents,
        }
    }

    pub async fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            stored_workflows: self.orchestrator.stored_workflow_count().await,
            max_stored_workflows: self.orchestrator.max_stored_workflows(),
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let agents = self.registry.get_all().await;
        let mut snapshots = Vec::with_capacity(agents.len());
        for agent in &agents {
            let agent = agent.read().await;
            snapshots.push(AgentStatusSnapshot {
                id: agent.id.clone(),
                name: agent.name.clone(),
                state: agent.state,
                tags: agent.tags.clone(),
            });
        }
        SystemStatus {
            uptime_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
            agent_count: snapshots.len(),
            agents: snapshots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentHandler, HandlerContext};
    use crate::payload::{HandlerInput, HandlerResult};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
            Ok(HandlerResult::text("noop", "ok"))
        }
    }

    #[tokio::test]
    async fn start_and_stop_agent_update_state() {
        let kernel = Kernel::new(KernelConfig::default());
        kernel
            .register_agent(Agent::new("a1", "Agent One", Arc::new(NoopHandler)))
            .await
            .unwrap();

        kernel.start_agent("a1").await.unwrap();
        let status = kernel.system_status().await;
        assert_eq!(status.agents[0].state, crate::agent::AgentState::Idle);

        kernel.stop_agent("a1").await.unwrap();
        let status = kernel.system_status().await;
        assert_eq!(status.agents[0].state, crate::agent::AgentState::Stopped);
    }

    #[tokio::test]
    async fn queue_status_and_task_status_reflect_dispatched_workflow() {
        let kernel = Kernel::new(KernelConfig::default());
        kernel
            .register_agent(Agent::new("a1", "Agent One", Arc::new(NoopHandler)))
            .await
            .unwrap();

        let root = crate::orchestrator::task::TaskNode::Atomic(crate::orchestrator::task::AtomicTask {
            id: "t1".to_string(),
            agent_id: "a1".to_string(),
            input: serde_json::Value::Null,
            timeout_ms: None,
            retries: 0,
        });
        let (workflow_id, _) = kernel.dispatch_task(root).await.unwrap();

        let status = kernel.task_status(&workflow_id).await.unwrap();
        assert_eq!(status.workflow_id, workflow_id);
        assert!(status.outcome.is_some());

        let queue = kernel.queue_status().await;
        assert_eq!(queue.stored_workflows, 1);

        let listing = kernel.agent_listing().await;
        assert_eq!(listing.count, 1);
    }

    #[tokio::test]
    async fn system_status_reports_registered_agent_count() {
        let kernel = Kernel::new(KernelConfig::default());
        kernel
            .register_agent(Agent::new("a1", "Agent One", Arc::new(NoopHandler)))
            .await
            .unwrap();
        kernel
            .register_agent(Agent::new("a2", "Agent Two", Arc::new(NoopHandler)))
            .await
            .unwrap();

        let status = kernel.system_status().await;
        assert_eq!(status.agent_count, 2);
    }
}
