//! Expands and executes task trees against registered agents, emitting
//! lifecycle events and retaining a bounded history of past workflows.

pub mod task;

use crate::agent::{CancellationToken, HandlerContext};
use crate::config::OrchestratorConfig;
use crate::error::{KernelError, Result};
use crate::events::{EventBus, LifecycleEvent, LifecycleKind};
use crate::payload::HandlerInput;
use crate::registry::AgentLookup;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use task::{AtomicTask, CompositeTask, ConditionalTask, TaskNode, TaskOutcome, TaskOutput, WorkflowStatus};
use uuid::Uuid;

pub struct Workflow {
    pub id: String,
    pub status: WorkflowStatus,
    pub cancellation: CancellationToken,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<TaskOutcome>,
}

impl Workflow {
    /// Applies the transition only if `WorkflowStatus::can_transition_to`
    /// allows it; a no-op terminal-state re-entry returns false.
    fn transition_to(&mut self, next: WorkflowStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

struct WorkflowStore {
    order: VecDeque<String>,
    workflows: HashMap<String, Workflow>,
    max_stored: usize,
}

impl WorkflowStore {
    fn insert(&mut self, workflow: Workflow) {
        if self.order.len() >= self.max_stored {
            if let Some(oldest) = self.order.pop_front() {
                self.workflows.remove(&oldest);
            }
        }
        self.order.push_back(workflow.id.clone());
        self.workflows.insert(workflow.id.clone(), workflow);
    }
}

pub struct Orchestrator {
    registry: Arc<dyn AgentLookup>,
    store: tokio::sync::RwLock<WorkflowStore>,
    pub events: EventBus,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<dyn AgentLookup>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            store: tokio::sync::RwLock::new(WorkflowStore {
                order: VecDeque::new(),
                workflows: HashMap::new(),
                max_stored: config.max_stored_workflows,
            }),
            events: EventBus::new(),
            config,
        }
    }

    async fn emit(&self, workflow_id: &str, task_id: &str, agent_id: Option<&str>, kind: LifecycleKind, data: serde_json::Value) {
        let mut event = LifecycleEvent::new(workflow_id, task_id, kind).with_data(data);
        if let Some(agent_id) = agent_id {
            event = event.with_agent(agent_id);
        }
        self.events.publish(&LifecycleEvent::workflow_channel(workflow_id), event.clone()).await;
        self.events.publish(&format!("task.{kind_str}", kind_str = kind_channel(kind)), event).await;
    }

    pub async fn workflow_status(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        self.store.read().await.workflows.get(workflow_id).map(|w| w.status)
    }

    pub async fn workflow_outcome(&self, workflow_id: &str) -> Option<TaskOutcome> {
        self.store.read().await.workflows.get(workflow_id).and_then(|w| w.outcome.clone())
    }

    pub async fn active_workflow_ids(&self) -> Vec<String> {
        self.store.read().await.order.iter().cloned().collect()
    }

    pub async fn stored_workflow_count(&self) -> usize {
        self.store.read().await.order.len()
    }

    pub fn max_stored_workflows(&self) -> usize {
        self.config.max_stored_workflows
    }

    /// Marks the workflow cancelled and signals its token; in-flight
    /// handlers observe the signal at their next suspension point.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let workflow = store
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| KernelError::NotFound(format!("workflow '{workflow_id}' not found")))?;
        if !workflow.status.can_transition_to(WorkflowStatus::Cancelled) {
            return Ok(());
        }
        workflow.cancellation.cancel();
        Ok(())
    }

    pub async fn dispatch_task(&self, root: TaskNode) -> Result<(String, TaskOutcome)> {
        let workflow_id = Uuid::new_v4().to_string();
        let cancellation = CancellationToken::new();
        {
            let mut store = self.store.write().await;
            store.insert(Workflow {
                id: workflow_id.clone(),
                status: WorkflowStatus::Pending,
                cancellation: cancellation.clone(),
                created_at: Utc::now(),
                outcome: None,
            });
        }
        self.emit(&workflow_id, root.id(), None, LifecycleKind::Queued, serde_json::Value::Null)
            .await;

        {
            let mut store = self.store.write().await;
            if let Some(workflow) = store.workflows.get_mut(&workflow_id) {
                workflow.transition_to(WorkflowStatus::Running);
            }
        }
        self.emit(&workflow_id, root.id(), None, LifecycleKind::Started, serde_json::Value::Null)
            .await;

        let outcome = self
            .execute_node(&workflow_id, &root, &cancellation, serde_json::Value::Null)
            .await;

        let final_status = if cancellation.is_cancelled() {
            WorkflowStatus::Cancelled
        } else if outcome.success {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        let final_kind = match final_status {
            WorkflowStatus::Cancelled => LifecycleKind::Cancelled,
            WorkflowStatus::Completed => LifecycleKind::Completed,
            _ => LifecycleKind::Failed,
        };

        {
            let mut store = self.store.write().await;
            if let Some(workflow) = store.workflows.get_mut(&workflow_id) {
                workflow.transition_to(final_status);
                workflow.outcome = Some(outcome.clone());
            }
        }
        self.emit(&workflow_id, root.id(), None, final_kind, serde_json::Value::Null)
            .await;

        Ok((workflow_id, outcome))
    }

    fn execute_node<'a>(
        &'a self,
        workflow_id: &'a str,
        node: &'a TaskNode,
        token: &'a CancellationToken,
        context: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>> {
        Box::pin(async move {
            if token.is_cancelled() {
                return TaskOutcome::failed("cancelled", TaskOutput::None);
            }
            match node {
                TaskNode::Atomic(task) => self.execute_atomic(workflow_id, task, token, context).await,
                TaskNode::Sequential(composite) => {
                    self.execute_sequential(workflow_id, composite, token, context).await
                }
                TaskNode::Parallel(composite) => {
                    self.execute_parallel(workflow_id, composite, token, context).await
                }
                TaskNode::Conditional(conditional) => {
                    self.execute_conditional(workflow_id, conditional, token).await
                }
            }
        })
    }

    async fn execute_atomic(
        &self,
        workflow_id: &str,
        task: &AtomicTask,
        token: &CancellationToken,
        context: serde_json::Value,
    ) -> TaskOutcome {
        let agent = match self.registry.get(&task.agent_id).await {
            Some(a) => a,
            None => {
                return TaskOutcome::failed(
                    format!("agent '{}' not found", task.agent_id),
                    TaskOutput::None,
                )
            }
        };

        self.emit(
            workflow_id,
            &task.id,
            Some(&task.agent_id),
            LifecycleKind::Started,
            serde_json::Value::Null,
        )
        .await;

        let timeout_ms = task.timeout_ms.unwrap_or(self.config.atomic_timeout_ms);
        let mut retries_left = task.retries;
        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        loop {
            if token.is_cancelled() {
                return TaskOutcome::failed("cancelled", TaskOutput::None);
            }

            let mut input = HandlerInput::default();
            input.context = Some(merge_context(task.input.clone(), &context));

            let ctx = HandlerContext {
                workflow_id: workflow_id.to_string(),
                task_id: task.id.clone(),
                signal: token.clone(),
            };

            let handler = agent.read().await.handler.clone();
            let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), handler.handle(input, ctx)).await;

            match outcome {
                Ok(Ok(result)) => {
                    self.emit(
                        workflow_id,
                        &task.id,
                        Some(&task.agent_id),
                        LifecycleKind::Completed,
                        serde_json::Value::Null,
                    )
                    .await;
                    return TaskOutcome::ok(TaskOutput::Leaf(result));
                }
                // Synchronous failures (permission, rate-limit, validation,
                // not-found, duplicate) are not retried; only timeout,
                // cancelled and execution-error are task-level outcomes
                // subject to retry policy.
                Ok(Err(e)) if !e.is_task_outcome() => {
                    self.emit(
                        workflow_id,
                        &task.id,
                        Some(&task.agent_id),
                        LifecycleKind::Failed,
                        serde_json::json!({ "error": e.to_string() }),
                    )
                    .await;
                    return TaskOutcome::failed(e.to_string(), TaskOutput::None);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("handler exceeded {timeout_ms}ms"),
            }

            if retries_left == 0 {
                self.emit(
                    workflow_id,
                    &task.id,
                    Some(&task.agent_id),
                    LifecycleKind::Failed,
                    serde_json::json!({ "error": last_error }),
                )
                .await;
                return TaskOutcome::failed(last_error, TaskOutput::None);
            }

            retries_left -= 1;
            let backoff = (self.config.retry_backoff_base_ms.saturating_mul(1u64 << attempt))
                .min(self.config.retry_backoff_cap_ms);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            attempt += 1;
        }
    }

    async fn execute_sequential(
        &self,
        workflow_id: &str,
        composite: &CompositeTask,
        token: &CancellationToken,
        context: serde_json::Value,
    ) -> TaskOutcome {
        let mut results = HashMap::new();
        let mut carry_forward = context;

        for child in &composite.children {
            let outcome = self.execute_node(workflow_id, child, token, carry_forward.clone()).await;
            let failed = !outcome.success;
            if let TaskOutput::Leaf(result) = &outcome.output {
                carry_forward = serde_json::to_value(result).unwrap_or(serde_json::Value::Null);
            }
            let error = outcome.error.clone();
            results.insert(child.id().to_string(), outcome);
            if failed {
                return TaskOutcome::failed(
                    error.unwrap_or_else(|| "sequential child failed".to_string()),
                    TaskOutput::Composite(results),
                );
            }
        }
        TaskOutcome::ok(TaskOutput::Composite(results))
    }

    async fn execute_parallel(
        &self,
        workflow_id: &str,
        composite: &CompositeTask,
        token: &CancellationToken,
        context: serde_json::Value,
    ) -> TaskOutcome {
        let futures = composite
            .children
            .iter()
            .map(|child| self.execute_node(workflow_id, child, token, context.clone()));
        let outcomes = futures::future::join_all(futures).await;

        let mut results = HashMap::new();
        let mut any_failed = false;
        for (child, outcome) in composite.children.iter().zip(outcomes.into_iter()) {
            if !outcome.success {
                any_failed = true;
            }
            results.insert(child.id().to_string(), outcome);
        }

        if any_failed {
            TaskOutcome::failed("one or more parallel children failed", TaskOutput::Composite(results))
        } else {
            TaskOutcome::ok(TaskOutput::Composite(results))
        }
    }

    async fn execute_conditional(
        &self,
        workflow_id: &str,
        conditional: &ConditionalTask,
        token: &CancellationToken,
    ) -> TaskOutcome {
        let branch_index = if (conditional.condition)(&conditional.context) { 0 } else { 1 };
        match conditional.subtasks.get(branch_index) {
            Some(branch) => self.execute_node(workflow_id, branch, token, serde_json::Value::Null).await,
            None => TaskOutcome::ok(TaskOutput::None),
        }
    }
}

fn merge_context(task_input: serde_json::Value, carry_forward: &serde_json::Value) -> serde_json::Value {
    if carry_forward.is_null() {
        return task_input;
    }
    serde_json::json!({ "input": task_input, "previous": carry_forward })
}

fn kind_channel(kind: LifecycleKind) -> &'static str {
    match kind {
        LifecycleKind::Queued => "queued",
        LifecycleKind::Started => "started",
        LifecycleKind::Step => "step",
        LifecycleKind::Progress => "progress",
        LifecycleKind::Completed => "completed",
        LifecycleKind::Failed => "failed",
        LifecycleKind::Cancelled => "cancelled",
    }
}

#[cfg(test)]
#[path = "tests/unit.rs"]
mod unit_tests;

#[cfg(test)]
#[path = "tests/integration.rs"]
mod integration_tests;
