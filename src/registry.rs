//! Holds agent records; lookup by id and by tag, in stable registration order.

use crate::agent::Agent;
use crate::error::{KernelError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Narrow view the Orchestrator depends on instead of holding a reference
/// back to the Kernel or the concrete registry.
#[async_trait]
pub trait AgentLookup: Send + Sync {
    async fn get(&self, id: &str) -> Option<Arc<RwLock<Agent>>>;
    async fn get_by_tag(&self, tag: &str) -> Vec<Arc<RwLock<Agent>>>;
}

struct RegistryInner {
    order: Vec<String>,
    agents: HashMap<String, Arc<RwLock<Agent>>>,
}

#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                order: Vec::new(),
                agents: HashMap::new(),
            })),
        }
    }

    pub async fn register(&self, agent: Agent) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&agent.id) {
            return Err(KernelError::Duplicate(format!(
                "agent '{}' already registered",
                agent.id
            )));
        }
        info!("registering agent: {} ({})", agent.id, agent.name);
        inner.order.push(agent.id.clone());
        inner.agents.insert(agent.id.clone(), Arc::new(RwLock::new(agent)));
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.agents.remove(id).is_none() {
            return Err(KernelError::agent_not_found(id));
        }
        inner.order.retain(|existing| existing != id);
        info!("unregistered agent: {}", id);
        Ok(())
    }

    pub async fn get_all(&self) -> Vec<Arc<RwLock<Agent>>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentLookup for AgentRegistry {
    async fn get(&self, id: &str) -> Option<Arc<RwLock<Agent>>> {
        let inner = self.inner.read().await;
        inner.agents.get(id).cloned()
    }

    async fn get_by_tag(&self, tag: &str) -> Vec<Arc<RwLock<Agent>>> {
        let inner = self.inner.read().await;
        let mut matches = Vec::new();
        for id in &inner.order {
            if let Some(agent) = inner.agents.get(id) {
                if agent.read().await.has_tag(tag) {
                    matches.push(agent.clone());
                }
            }
        }
        debug!("{} agent(s) match tag '{}'", matches.len(), tag);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentHandler;
    use crate::payload::{HandlerInput, HandlerResult};
    use crate::agent::HandlerContext;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
            Ok(HandlerResult::text("noop", "ok"))
        }
    }

    fn agent(id: &str, tags: &[&str]) -> Agent {
        Agent::new(id, id, Arc::new(NoopHandler)).with_tags(tags.to_vec())
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", &[])).await.unwrap();
        let err = registry.register(agent("a1", &[])).await.unwrap_err();
        assert!(matches!(err, KernelError::Duplicate(_)));
    }

    #[tokio::test]
    async fn get_by_tag_preserves_registration_order() {
        let registry = AgentRegistry::new();
        registry.register(agent("a3", &["team"])).await.unwrap();
        registry.register(agent("a1", &["team"])).await.unwrap();
        registry.register(agent("a2", &["other"])).await.unwrap();

        let matches = registry.get_by_tag("team").await;
        let ids: Vec<String> = {
            let mut out = Vec::new();
            for m in &matches {
                out.push(m.read().await.id.clone());
            }
            out
        };
        assert_eq!(ids, vec!["a3".to_string(), "a1".to_string()]);
    }

    #[tokio::test]
    async fn unregister_removes_from_lookup() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", &[])).await.unwrap();
        registry.unregister("a1").await.unwrap();
        assert!(registry.get("a1").await.is_none());
        assert!(registry.unregister("a1").await.is_err());
    }
}
