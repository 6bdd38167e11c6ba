//! Model backend registry, routing, and fallback-aware generation.

use crate::error::{KernelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Ollama,
    Remote,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> BackendKind;
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult>;
    async fn is_healthy(&self) -> bool;
    fn capabilities(&self) -> Vec<String>;
}

/// Consecutive-failure health tracking, modeled on a circuit breaker: after
/// `failure_threshold` consecutive failures the backend is treated as
/// unhealthy until `recovery_after` elapses since the last failure, at which
/// point it is retried (half-open).
struct HealthTracker {
    failure_threshold: u32,
    recovery_after: std::time::Duration,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_after: std::time::Duration::from_secs(60),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
    }

    async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            let mut opened_at = self.opened_at.write().await;
            if opened_at.is_none() {
                *opened_at = Some(Instant::now());
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        let opened_at = self.opened_at.read().await;
        match *opened_at {
            None => true,
            Some(at) => Instant::now().duration_since(at) >= self.recovery_after,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_errors: u64,
    pub average_latency_ms: f64,
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
}

impl ModelStats {
    fn record_success(&mut self, latency_ms: u64, tokens: u32) {
        let total_latency = self.average_latency_ms * self.total_requests as f64 + latency_ms as f64;
        self.total_requests += 1;
        self.average_latency_ms = total_latency / self.total_requests as f64;
        self.total_tokens += tokens as u64;
        self.last_used = Some(chrono::Utc::now());
    }

    fn record_error(&mut self) {
        self.total_requests += 1;
        self.total_errors += 1;
        self.last_used = Some(chrono::Utc::now());
    }
}

pub type RouteCondition = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub struct RoutingRule {
    pub name: String,
    pub condition: RouteCondition,
    pub fallbacks: Vec<String>,
}

struct BackendEntry {
    backend: Arc<dyn ModelBackend>,
    health: HealthTracker,
    stats: RwLock<ModelStats>,
}

pub struct ModelManager {
    order: RwLock<Vec<String>>,
    backends: RwLock<HashMap<String, BackendEntry>>,
    default_backend: RwLock<Option<String>>,
    routing_rules: RwLock<Vec<RoutingRule>>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self {
            order: RwLock::new(Vec::new()),
            backends: RwLock::new(HashMap::new()),
            default_backend: RwLock::new(None),
            routing_rules: RwLock::new(Vec::new()),
        }
    }

    pub async fn register_backend(&self, backend: Arc<dyn ModelBackend>) {
        let name = backend.name().to_string();
        self.order.write().await.push(name.clone());
        self.backends.write().await.insert(
            name,
            BackendEntry {
                backend,
                health: HealthTracker::new(),
                stats: RwLock::new(ModelStats::default()),
            },
        );
    }

    pub async fn set_default(&self, name: &str) {
        *self.default_backend.write().await = Some(name.to_string());
    }

    pub async fn add_routing_rule(&self, rule: RoutingRule) {
        self.routing_rules.write().await.push(rule);
    }

    /// Resolves the backend name to invoke per the three-step policy:
    /// matching route, then `preferLocal`, then the default.
    pub async fn select_model(&self, agent_id: &str, task_type: &str, prefer_local: bool) -> Result<String> {
        let backends = self.backends.read().await;
        let rules = self.routing_rules.read().await;

        for rule in rules.iter() {
            if (rule.condition)(agent_id, task_type) {
                // primary name is implied by rule.name; fall back to rule.fallbacks.
                if backends.contains_key(&rule.name) {
                    return Ok(rule.name.clone());
                }
                for fallback in &rule.fallbacks {
                    if backends.contains_key(fallback) {
                        return Ok(fallback.clone());
                    }
                }
            }
        }

        if prefer_local {
            let order = self.order.read().await;
            for name in order.iter() {
                if let Some(entry) = backends.get(name) {
                    if matches!(entry.backend.kind(), BackendKind::Local | BackendKind::Ollama) {
                        return Ok(name.clone());
                    }
                }
            }
        }

        self.default_backend
            .read()
            .await
            .clone()
            .ok_or_else(|| KernelError::NotFound("no default model backend configured".to_string()))
    }

    /// Iterates backends by descending `total_requests`, skipping unhealthy
    /// ones, attempting generation on the first healthy backend and falling
    /// through to the next on error.
    pub async fn generate_with_fallback(
        &self,
        request: GenerationRequest,
        _agent_id: &str,
        _task_type: &str,
    ) -> Result<GenerationResult> {
        let order = self.order.read().await.clone();
        let backends = self.backends.read().await;

        let mut candidates: Vec<&String> = order.iter().collect();
        {
            let mut with_counts = Vec::new();
            for name in candidates {
                let count = backends.get(name).unwrap().stats.read().await.total_requests;
                with_counts.push((name, count));
            }
            with_counts.sort_by(|a, b| b.1.cmp(&a.1));
            candidates = with_counts.into_iter().map(|(n, _)| n).collect();
        }

        let mut last_error: Option<KernelError> = None;
        for name in candidates {
            let entry = backends.get(name).unwrap();
            if !entry.health.is_healthy().await || !entry.backend.is_healthy().await {
                continue;
            }

            let start = Instant::now();
            match entry.backend.generate(request.clone()).await {
                Ok(result) => {
                    entry.health.record_success().await;
                    let latency_ms = start.elapsed().as_millis() as u64;
                    entry
                        .stats
                        .write()
                        .await
                        .record_success(latency_ms, result.tokens_used.unwrap_or(0));
                    return Ok(result);
                }
                Err(e) => {
                    entry.health.record_failure().await;
                    entry.stats.write().await.record_error();
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| KernelError::NotFound("no model backend available".to_string())))
    }

    pub async fn stats_for(&self, name: &str) -> Option<ModelStats> {
        let backends = self.backends.read().await;
        match backends.get(name) {
            Some(entry) => Some(entry.stats.read().await.clone()),
            None => None,
        }
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}
