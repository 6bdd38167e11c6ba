use super::super::task::{AtomicTask, TaskNode};
use super::super::Orchestrator;
use crate::agent::{Agent, AgentHandler, HandlerContext};
use crate::config::OrchestratorConfig;
use crate::error::{KernelError, Result};
use crate::payload::{HandlerInput, HandlerResult};
use crate::registry::AgentRegistry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingHandler {
    calls: Arc<AtomicUsize>,
    fail_until: usize,
}

#[async_trait]
impl AgentHandler for CountingHandler {
    async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_until {
            Err(KernelError::ExecutionError("transient failure".to_string()))
        } else {
            Ok(HandlerResult::text("worker", "done"))
        }
    }
}

struct SynchronousFailureHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentHandler for SynchronousFailureHandler {
    async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(KernelError::PermissionDenied("not allowed".to_string()))
    }
}

struct SlowHandler;

#[async_trait]
impl AgentHandler for SlowHandler {
    async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(HandlerResult::text("worker", "too slow"))
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        atomic_timeout_ms: 50,
        retry_backoff_base_ms: 5,
        retry_backoff_cap_ms: 20,
        max_stored_workflows: 10,
    }
}

#[tokio::test]
async fn atomic_task_retries_then_succeeds() {
    let registry = Arc::new(AgentRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(Agent::new(
            "worker",
            "worker",
            Arc::new(CountingHandler {
                calls: calls.clone(),
                fail_until: 2,
            }),
        ))
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(registry, fast_config());
    let root = TaskNode::Atomic(AtomicTask {
        id: "t1".to_string(),
        agent_id: "worker".to_string(),
        input: serde_json::Value::Null,
        timeout_ms: None,
        retries: 3,
    });

    let (_workflow_id, outcome) = orchestrator.dispatch_task(root).await.unwrap();
    assert!(outcome.success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn atomic_task_exhausts_retries_and_fails() {
    let registry = Arc::new(AgentRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(Agent::new(
            "worker",
            "worker",
            Arc::new(CountingHandler {
                calls: calls.clone(),
                fail_until: 100,
            }),
        ))
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(registry, fast_config());
    let root = TaskNode::Atomic(AtomicTask {
        id: "t1".to_string(),
        agent_id: "worker".to_string(),
        input: serde_json::Value::Null,
        timeout_ms: None,
        retries: 1,
    });

    let (_workflow_id, outcome) = orchestrator.dispatch_task(root).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn synchronous_failure_is_not_retried() {
    let registry = Arc::new(AgentRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(Agent::new(
            "worker",
            "worker",
            Arc::new(SynchronousFailureHandler { calls: calls.clone() }),
        ))
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(registry, fast_config());
    let root = TaskNode::Atomic(AtomicTask {
        id: "t1".to_string(),
        agent_id: "worker".to_string(),
        input: serde_json::Value::Null,
        timeout_ms: None,
        retries: 5,
    });

    let (_workflow_id, outcome) = orchestrator.dispatch_task(root).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_agent_fails_without_invoking_anything() {
    let registry = Arc::new(AgentRegistry::new());
    let orchestrator = Orchestrator::new(registry, fast_config());
    let root = TaskNode::Atomic(AtomicTask {
        id: "t1".to_string(),
        agent_id: "ghost".to_string(),
        input: serde_json::Value::Null,
        timeout_ms: None,
        retries: 0,
    });

    let (_workflow_id, outcome) = orchestrator.dispatch_task(root).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn handler_exceeding_timeout_is_reported_as_failure() {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(Agent::new("worker", "worker", Arc::new(SlowHandler)))
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(registry, fast_config());
    let root = TaskNode::Atomic(AtomicTask {
        id: "t1".to_string(),
        agent_id: "worker".to_string(),
        input: serde_json::Value::Null,
        timeout_ms: None,
        retries: 0,
    });

    let (_workflow_id, outcome) = orchestrator.dispatch_task(root).await.unwrap();
    assert!(!outcome.success);
}
