//! Permissioned, rate-limited, ACL-filtered inter-agent messaging.

use crate::agent::permission;
use crate::bus::MessageBus;
use crate::config::IpcConfig;
use crate::constants::BROADCAST_TAG;
use crate::error::{KernelError, Result};
use crate::payload::Payload;
use crate::registry::AgentLookup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

const SYSTEM_SENDER: &str = "system";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    pub id: String,
    pub from: String,
    pub to: Option<String>,
    pub tag: Option<String>,
    pub msg_type: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct RateLimitState {
    count: u32,
    window_start: Option<Instant>,
}

/// Per-recipient tag allow/deny list. Absent entry and `Some(empty)` both
/// mean "accept every tag"; see [`TagAcl::accepts`].
#[derive(Debug, Clone, Default)]
pub struct TagAcl {
    allowed: Option<HashSet<String>>,
    denied: HashSet<String>,
}

impl TagAcl {
    fn accepts(&self, tag: &str) -> bool {
        if self.denied.contains(tag) {
            return false;
        }
        match &self.allowed {
            None => true,
            Some(set) if set.is_empty() => true,
            Some(set) => set.contains(tag),
        }
    }

    fn grant(&mut self, tag: &str) {
        self.denied.remove(tag);
        self.allowed.get_or_insert_with(HashSet::new).insert(tag.to_string());
    }

    fn revoke(&mut self, tag: &str) {
        if let Some(set) = &mut self.allowed {
            set.remove(tag);
        }
    }

    fn deny(&mut self, tag: &str) {
        if let Some(set) = &mut self.allowed {
            set.remove(tag);
        }
        self.denied.insert(tag.to_string());
    }

    fn undeny(&mut self, tag: &str) {
        self.denied.remove(tag);
    }
}

pub struct IpcManager {
    registry: Arc<dyn AgentLookup>,
    config: IpcConfig,
    inboxes: Mutex<HashMap<String, Vec<IpcMessage>>>,
    rate_limits: Mutex<HashMap<String, RateLimitState>>,
    acls: Mutex<HashMap<String, TagAcl>>,
    /// Per-recipient channel `agent:<id>` and the global `broadcast` channel.
    agent_bus: MessageBus<IpcMessage>,
    /// Per-tag batch channel `tag:<tag>`.
    tag_bus: MessageBus<Vec<IpcMessage>>,
}

impl IpcManager {
    pub fn new(registry: Arc<dyn AgentLookup>, config: IpcConfig) -> Self {
        Self {
            registry,
            config,
            inboxes: Mutex::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
            acls: Mutex::new(HashMap::new()),
            agent_bus: MessageBus::new(),
            tag_bus: MessageBus::new(),
        }
    }

    pub fn agent_channel(id: &str) -> String {
        format!("agent:{id}")
    }

    pub fn tag_channel(tag: &str) -> String {
        format!("tag:{tag}")
    }

    pub async fn subscribe_agent(
        &self,
        id: &str,
        handler: impl Fn(IpcMessage) + Send + Sync + 'static,
    ) -> u64 {
        self.agent_bus.subscribe(&Self::agent_channel(id), handler).await
    }

    pub async fn unsubscribe_agent(&self, id: &str, sub_id: u64) {
        self.agent_bus.unsubscribe(&Self::agent_channel(id), sub_id).await;
    }

    async fn check_rate_limit(&self, from: &str) -> Result<()> {
        if from == SYSTEM_SENDER {
            return Ok(());
        }
        let mut limits = self.rate_limits.lock().await;
        let state = limits.entry(from.to_string()).or_default();
        let now = Instant::now();
        let window = std::time::Duration::from_millis(self.config.window_ms);

        let elapsed = match state.window_start {
            Some(start) => now.duration_since(start) >= window,
            None => true,
        };
        if elapsed {
            state.window_start = Some(now);
            state.count = 0;
        }
        if state.count >= self.config.max_per_window {
            return Err(KernelError::RateLimitExceeded(format!(
                "sender '{from}' exceeded {} messages per {}ms",
                self.config.max_per_window, self.config.window_ms
            )));
        }
        state.count += 1;
        Ok(())
    }

    async fn check_sender_perms(&self, from: &str, required: &[&str]) -> Result<()> {
        if from == SYSTEM_SENDER {
            return Ok(());
        }
        let agent = self
            .registry
            .get(from)
            .await
            .ok_or_else(|| KernelError::agent_not_found(from))?;
        let agent = agent.read().await;
        if !agent.has_any_permission(required) {
            return Err(KernelError::PermissionDenied(format!(
                "agent '{from}' lacks any of {required:?}"
            )));
        }
        Ok(())
    }

    /// Core direct-send contract per §4.3. `require_receive` controls whether
    /// an existing receiver lacking `ipc:receive` fails the call or is
    /// silently skipped (used by tag/broadcast fan-out).
    pub async fn send_to_agent(
        &self,
        from: &str,
        to: &str,
        msg_type: &str,
        payload: Payload,
        required_sender_perms: &[&str],
        require_receive: bool,
    ) -> Result<Option<IpcMessage>> {
        self.check_sender_perms(from, required_sender_perms).await?;
        self.check_rate_limit(from).await?;

        if let Some(receiver) = self.registry.get(to).await {
            let receiver = receiver.read().await;
            if !receiver.has_permission(permission::IPC_RECEIVE) {
                if require_receive {
                    return Err(KernelError::PermissionDenied(format!(
                        "receiver '{to}' not permitted to receive"
                    )));
                }
                return Ok(None);
            }
        }

        let message = IpcMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: Some(to.to_string()),
            tag: None,
            msg_type: msg_type.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        {
            let mut inboxes = self.inboxes.lock().await;
            inboxes.entry(to.to_string()).or_default().push(message.clone());
        }
        self.agent_bus.publish(&Self::agent_channel(to), message.clone()).await;
        Ok(Some(message))
    }

    pub async fn send(
        &self,
        from: &str,
        to: &str,
        msg_type: &str,
        payload: Payload,
    ) -> Result<Option<IpcMessage>> {
        self.send_to_agent(from, to, msg_type, payload, &[permission::IPC_SEND], true)
            .await
    }

    async fn can_receive_tag(&self, agent_id: &str, tag: &str) -> bool {
        let acls = self.acls.lock().await;
        match acls.get(agent_id) {
            Some(acl) => acl.accepts(tag),
            None => true,
        }
    }

    pub async fn send_to_tag(
        &self,
        from: &str,
        tag: &str,
        msg_type: &str,
        payload: Payload,
    ) -> Result<Vec<IpcMessage>> {
        self.check_sender_perms(from, &[permission::IPC_SEND, permission::IPC_SEND_TAG])
            .await?;

        let recipients = self.registry.get_by_tag(tag).await;
        let mut delivered = Vec::new();
        for recipient in recipients {
            let recipient_id = recipient.read().await.id.clone();
            if from != SYSTEM_SENDER && recipient_id == from && tag == BROADCAST_TAG {
                continue;
            }
            if !self.can_receive_tag(&recipient_id, tag).await {
                continue;
            }
            if let Some(msg) = self
                .send_to_agent(
                    from,
                    &recipient_id,
                    msg_type,
                    payload.clone(),
                    &[permission::IPC_SEND, permission::IPC_SEND_TAG],
                    false,
                )
                .await?
            {
                delivered.push(msg);
            }
        }
        self.tag_bus
            .publish(&Self::tag_channel(tag), delivered.clone())
            .await;
        Ok(delivered)
    }

    /// Identical to [`Self::send_to_tag`] using the reserved `"broadcast"`
    /// tag; additionally publishes one synthetic envelope on `broadcast`
    /// and the sender never receives its own message.
    pub async fn broadcast(
        &self,
        from: &str,
        msg_type: &str,
        payload: Payload,
    ) -> Result<Vec<IpcMessage>> {
        self.check_sender_perms(from, &[permission::IPC_SEND, permission::IPC_SEND_BROADCAST])
            .await?;

        let recipients = self.registry.get_by_tag(BROADCAST_TAG).await;
        let mut delivered = Vec::new();
        for recipient in recipients {
            let recipient_id = recipient.read().await.id.clone();
            if recipient_id == from {
                continue;
            }
            if !self.can_receive_tag(&recipient_id, BROADCAST_TAG).await {
                continue;
            }
            if let Some(msg) = self
                .send_to_agent(
                    from,
                    &recipient_id,
                    msg_type,
                    payload.clone(),
                    &[permission::IPC_SEND, permission::IPC_SEND_BROADCAST],
                    false,
                )
                .await?
            {
                delivered.push(msg);
            }
        }
        self.tag_bus
            .publish(&Self::tag_channel(BROADCAST_TAG), delivered.clone())
            .await;

        // Both `to` and `tag` are unset on the broadcast envelope itself; the
        // reserved "broadcast" channel name carries the routing/ACL meaning
        // that an ordinary tagged send would otherwise put in `tag`.
        let envelope = IpcMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: None,
            tag: None,
            msg_type: msg_type.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.agent_bus.publish("broadcast", envelope).await;
        Ok(delivered)
    }

    pub async fn get_inbox(&self, agent_id: &str) -> Vec<IpcMessage> {
        let inboxes = self.inboxes.lock().await;
        inboxes.get(agent_id).cloned().unwrap_or_default()
    }

    pub async fn grant_tag_permission(&self, agent_id: &str, tag: &str) {
        let mut acls = self.acls.lock().await;
        acls.entry(agent_id.to_string()).or_default().grant(tag);
    }

    pub async fn revoke_tag_permission(&self, agent_id: &str, tag: &str) {
        let mut acls = self.acls.lock().await;
        if let Some(acl) = acls.get_mut(agent_id) {
            acl.revoke(tag);
        }
    }

    pub async fn deny_tag(&self, agent_id: &str, tag: &str) {
        let mut acls = self.acls.lock().await;
        acls.entry(agent_id.to_string()).or_default().deny(tag);
    }

    pub async fn undeny_tag(&self, agent_id: &str, tag: &str) {
        let mut acls = self.acls.lock().await;
        if let Some(acl) = acls.get_mut(agent_id) {
            acl.undeny(tag);
        }
    }

    pub async fn clear_tag_acl(&self, agent_id: &str) {
        let mut acls = self.acls.lock().await;
        acls.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentHandler, HandlerContext};
    use crate::payload::HandlerInput;
    use crate::payload::HandlerResult;
    use crate::registry::AgentRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn handle(&self, _input: HandlerInput, _ctx: HandlerContext) -> Result<HandlerResult> {
            Ok(HandlerResult::text("noop", "ok"))
        }
    }

    async fn registry_with(agents: Vec<Agent>) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());
        for a in agents {
            registry.register(a).await.unwrap();
        }
        registry
    }

    fn agent(id: &str, tags: &[&str], perms: &[&str]) -> Agent {
        Agent::new(id, id, Arc::new(NoopHandler))
            .with_tags(tags.to_vec())
            .with_permissions(perms.to_vec())
    }

    #[tokio::test]
    async fn direct_send_delivers_to_inbox_and_publishes() {
        let registry = registry_with(vec![
            agent("a1", &[], &[permission::IPC_SEND]),
            agent("a2", &[], &[permission::IPC_RECEIVE]),
        ])
        .await;
        let ipc = IpcManager::new(registry, IpcConfig::default());

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        ipc.subscribe_agent("a2", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        ipc.send("a1", "a2", "greeting", Payload::text("hello"))
            .await
            .unwrap();

        let inbox = ipc.get_inbox("a2").await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].payload.as_text(), Some("hello"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sender_without_permission_is_rejected() {
        let registry = registry_with(vec![
            agent("a1", &[], &[]),
            agent("a2", &[], &[permission::IPC_RECEIVE]),
        ])
        .await;
        let ipc = IpcManager::new(registry, IpcConfig::default());
        let err = ipc
            .send("a1", "a2", "greeting", Payload::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_quota_and_resets_after_window() {
        let registry = registry_with(vec![
            agent("a1", &[], &[permission::IPC_SEND]),
            agent("a2", &[], &[permission::IPC_RECEIVE]),
        ])
        .await;
        let ipc = IpcManager::new(
            registry,
            IpcConfig {
                max_per_window: 2,
                window_ms: 50,
            },
        );

        ipc.send("a1", "a2", "t", Payload::text("1")).await.unwrap();
        ipc.send("a1", "a2", "t", Payload::text("2")).await.unwrap();
        let err = ipc.send("a1", "a2", "t", Payload::text("3")).await.unwrap_err();
        assert!(matches!(err, KernelError::RateLimitExceeded(_)));

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        ipc.send("a1", "a2", "t", Payload::text("4")).await.unwrap();
    }

    #[tokio::test]
    async fn tag_acl_deny_wins_over_allow() {
        let registry = registry_with(vec![
            agent("a1", &[], &[permission::IPC_SEND, permission::IPC_SEND_TAG]),
            agent("a2", &["team"], &[permission::IPC_RECEIVE]),
        ])
        .await;
        let ipc = IpcManager::new(registry, IpcConfig::default());

        ipc.grant_tag_permission("a2", "team").await;
        ipc.deny_tag("a2", "team").await;

        let delivered = ipc
            .send_to_tag("a1", "team", "t", Payload::text("x"))
            .await
            .unwrap();
        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_respects_acl() {
        let registry = registry_with(vec![
            agent(
                "a1",
                &[crate::constants::BROADCAST_TAG],
                &[permission::IPC_SEND, permission::IPC_SEND_BROADCAST, permission::IPC_RECEIVE],
            ),
            agent(
                "a2",
                &[crate::constants::BROADCAST_TAG],
                &[permission::IPC_RECEIVE],
            ),
        ])
        .await;
        let ipc = IpcManager::new(registry, IpcConfig::default());

        let delivered = ipc
            .broadcast("a1", "announce", Payload::text("hi all"))
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to.as_deref(), Some("a2"));
        assert!(ipc.get_inbox("a1").await.is_empty());
    }
}
