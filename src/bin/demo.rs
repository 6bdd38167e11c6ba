//! Minimal embedding example: registers one agent, starts it, and dispatches
//! a single atomic task through the kernel.

use agent_kernel::agent::{Agent, AgentHandler, HandlerContext};
use agent_kernel::config::KernelConfig;
use agent_kernel::error::Result;
use agent_kernel::kernel::Kernel;
use agent_kernel::orchestrator::task::{AtomicTask, TaskNode};
use agent_kernel::payload::{HandlerInput, HandlerResult};
use async_trait::async_trait;
use std::sync::Arc;

struct GreeterHandler;

#[async_trait]
impl AgentHandler for GreeterHandler {
    async fn handle(&self, input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
        let who = input
            .context
            .and_then(|c| c.get("name").and_then(|v| v.as_str().map(String::from)))
            .unwrap_or_else(|| "world".to_string());
        Ok(HandlerResult::text("greeter", format!("hello, {who}")))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let kernel = Kernel::new(KernelConfig::default());
    kernel
        .register_agent(Agent::new("greeter", "Greeter", Arc::new(GreeterHandler)))
        .await
        .expect("register agent");
    kernel.start_agent("greeter").await.expect("start agent");

    let root = TaskNode::Atomic(AtomicTask {
        id: "greet".to_string(),
        agent_id: "greeter".to_string(),
        input: serde_json::json!({ "name": "spiral" }),
        timeout_ms: None,
        retries: 0,
    });

    let (workflow_id, outcome) = kernel.dispatch_task(root).await.expect("dispatch task");
    tracing::info!(workflow_id, success = outcome.success, "workflow finished");
    println!("{:?}", outcome.output);
}
