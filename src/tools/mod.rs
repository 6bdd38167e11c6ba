//! Capability-gated tool invocation: registration, per-agent grants,
//! per-tool rate limiting, timeout-wrapped execution, and audit records.

use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::config::ToolConfig;
use crate::error::{KernelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolType {
    Filesystem,
    Network,
    Shell,
    Custom(String),
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub reasons: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reasons: Vec::new(),
        }
    }

    pub fn invalid(reasons: Vec<String>) -> Self {
        Self {
            valid: false,
            reasons,
        }
    }
}

#[async_trait]
pub trait BaseTool: Send + Sync {
    fn name(&self) -> &str;
    fn tool_type(&self) -> ToolType;
    fn description(&self) -> &str;
    fn required_permissions(&self) -> Vec<String> {
        Vec::new()
    }
    fn timeout_ms(&self) -> Option<u64> {
        None
    }
    fn rate_limit_per_minute(&self) -> Option<u32> {
        None
    }
    async fn validate(&self, args: &serde_json::Value) -> ValidationResult;
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value>;
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolStats {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub total_latency_ms: u64,
}

impl ToolStats {
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ToolRateLimitState {
    calls: Vec<Instant>,
}

pub struct ToolManager {
    config: ToolConfig,
    tools: RwLock<HashMap<String, Arc<dyn BaseTool>>>,
    permissions: RwLock<HashMap<String, HashSet<String>>>,
    rate_limits: RwLock<HashMap<String, ToolRateLimitState>>,
    stats: RwLock<HashMap<String, ToolStats>>,
    audit: Arc<AuditLogger>,
}

impl ToolManager {
    pub fn new(config: ToolConfig, audit: Arc<AuditLogger>) -> Self {
        Self {
            config,
            tools: RwLock::new(HashMap::new()),
            permissions: RwLock::new(HashMap::new()),
            rate_limits: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub async fn register_tool(&self, tool: Arc<dyn BaseTool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name.clone(), tool);
        self.stats.write().await.entry(name).or_default();
    }

    pub async fn grant(&self, agent_id: &str, tool_name: &str) {
        self.permissions
            .write()
            .await
            .entry(agent_id.to_string())
            .or_default()
            .insert(tool_name.to_string());
    }

    pub async fn revoke(&self, agent_id: &str, tool_name: &str) {
        if let Some(granted) = self.permissions.write().await.get_mut(agent_id) {
            granted.remove(tool_name);
        }
    }

    async fn is_granted(&self, agent_id: &str, tool_name: &str) -> bool {
        self.permissions
            .read()
            .await
            .get(agent_id)
            .map(|g| g.contains(tool_name))
            .unwrap_or(false)
    }

    async fn check_rate_limit(&self, tool: &Arc<dyn BaseTool>) -> bool {
        let limit = match tool.rate_limit_per_minute() {
            Some(l) => l,
            None => return true,
        };
        let window = Duration::from_millis(crate::constants::TOOL_RATE_LIMIT_WINDOW_MS);
        let now = Instant::now();
        let mut limits = self.rate_limits.write().await;
        let state = limits.entry(tool.name().to_string()).or_default();
        state.calls.retain(|t| now.duration_since(*t) < window);
        if state.calls.len() as u32 >= limit {
            false
        } else {
            state.calls.push(now);
            true
        }
    }

    async fn record(&self, tool_name: &str, success: bool, timed_out: bool, latency_ms: u64) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(tool_name.to_string()).or_default();
        entry.total_calls += 1;
        entry.total_latency_ms += latency_ms;
        if timed_out {
            entry.timeouts += 1;
        }
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub async fn stats_for(&self, tool_name: &str) -> Option<ToolStats> {
        self.stats.read().await.get(tool_name).cloned()
    }

    pub async fn call_tool(
        &self,
        agent_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        timeout_override_ms: Option<u64>,
    ) -> Result<serde_json::Value> {
        let tool = self
            .tools
            .read()
            .await
            .get(tool_name)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(format!("unknown tool '{tool_name}'")))?;

        if !self.is_granted(agent_id, tool_name).await {
            self.audit
                .add_event(
                    AuditEvent::new(AuditEventType::PermissionDenied, serde_json::Value::Null)
                        .with_agent(agent_id)
                        .with_tool(tool_name),
                )
                .await;
            return Err(KernelError::PermissionDenied(format!(
                "agent '{agent_id}' was not granted tool '{tool_name}'"
            )));
        }

        if !self.check_rate_limit(&tool).await {
            self.audit
                .add_event(
                    AuditEvent::new(AuditEventType::RateLimitExceeded, serde_json::Value::Null)
                        .with_agent(agent_id)
                        .with_tool(tool_name),
                )
                .await;
            return Err(KernelError::RateLimitExceeded(format!(
                "tool '{tool_name}' rate limit exceeded"
            )));
        }

        let validation = tool.validate(&args).await;
        if !validation.valid {
            return Err(KernelError::ValidationFailed(validation.reasons.join("; ")));
        }

        let timeout_ms = timeout_override_ms
            .or_else(|| tool.timeout_ms())
            .unwrap_or(self.config.default_timeout_ms);
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            tool.execute(args),
        )
        .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(value)) => {
                self.record(tool_name, true, false, latency_ms).await;
                self.audit
                    .add_event(
                        AuditEvent::new(AuditEventType::ToolCall, serde_json::json!({ "latency_ms": latency_ms }))
                            .with_agent(agent_id)
                            .with_tool(tool_name),
                    )
                    .await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(tool_name, false, false, latency_ms).await;
                self.audit
                    .add_event(
                        AuditEvent::new(AuditEventType::ExecutionError, serde_json::json!({ "error": e.to_string() }))
                            .with_agent(agent_id)
                            .with_tool(tool_name),
                    )
                    .await;
                Err(e)
            }
            Err(_) => {
                self.record(tool_name, false, true, latency_ms).await;
                self.audit
                    .add_event(
                        AuditEvent::new(AuditEventType::ToolTimeout, serde_json::Value::Null)
                            .with_agent(agent_id)
                            .with_tool(tool_name),
                    )
                    .await;
                Err(KernelError::Timeout(format!(
                    "tool '{tool_name}' exceeded {timeout_ms}ms"
                )))
            }
        };
        result
    }
}
