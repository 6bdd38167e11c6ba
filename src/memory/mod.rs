//! Per-agent isolated memory: short/long-term stores with FIFO overflow,
//! composable query filters, and a cross-agent ACL gating read/write.

pub mod vector;

use crate::config::MemoryConfig;
use crate::error::{KernelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use vector::{BagOfWordsEmbedder, Embedder, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub entry_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(entry_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub entry_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub keyword: Option<String>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    fn matches(&self, entry: &MemoryEntry) -> bool {
        self.entry_type
            .as_ref()
            .map(|t| &entry.entry_type == t)
            .unwrap_or(true)
            && self.since.map(|s| entry.timestamp >= s).unwrap_or(true)
            && self
                .keyword
                .as_ref()
                .map(|k| entry.content.to_lowercase().contains(&k.to_lowercase()))
                .unwrap_or(true)
    }

    fn apply(&self, entries: &[MemoryEntry]) -> Vec<MemoryEntry> {
        let mut matching: Vec<MemoryEntry> =
            entries.iter().filter(|e| self.matches(e)).cloned().collect();
        if let Some(limit) = self.limit {
            if matching.len() > limit {
                matching = matching.split_off(matching.len() - limit);
            }
        }
        matching
    }
}

/// Snapshot used for `export`/`import`; captures both stores exactly so the
/// round trip reproduces the original state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub short_term: Vec<MemoryEntry>,
    pub long_term: Vec<MemoryEntry>,
}

/// A single agent's isolated memory. Short-term overflows FIFO into
/// long-term once it exceeds `capacity`.
pub struct AgentMemory {
    capacity: usize,
    short_term: RwLock<Vec<MemoryEntry>>,
    long_term: RwLock<Vec<MemoryEntry>>,
}

impl AgentMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            short_term: RwLock::new(Vec::new()),
            long_term: RwLock::new(Vec::new()),
        }
    }

    pub async fn remember_short(&self, entry: MemoryEntry) {
        let mut short = self.short_term.write().await;
        short.push(entry);
        if short.len() > self.capacity {
            let overflow = short.remove(0);
            drop(short);
            self.long_term.write().await.push(overflow);
        }
    }

    pub async fn remember_long(&self, entry: MemoryEntry) {
        self.long_term.write().await.push(entry);
    }

    pub async fn query_short(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        query.apply(&self.short_term.read().await)
    }

    pub async fn query_long(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        query.apply(&self.long_term.read().await)
    }

    pub async fn query_all(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        let mut combined = self.short_term.read().await.clone();
        combined.extend(self.long_term.read().await.clone());
        combined.sort_by_key(|e| e.timestamp);
        query.apply(&combined)
    }

    /// Last `limit` entries across both stores, chronological, formatted as
    /// `[type] content` lines.
    pub async fn get_context(&self, limit: usize) -> String {
        let entries = self
            .query_all(&MemoryQuery {
                limit: Some(limit),
                ..Default::default()
            })
            .await;
        entries
            .iter()
            .map(|e| format!("[{}] {}", e.entry_type, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn clear_short_term(&self) {
        self.short_term.write().await.clear();
    }

    pub async fn clear_all(&self) {
        self.short_term.write().await.clear();
        self.long_term.write().await.clear();
    }

    pub async fn export(&self) -> MemorySnapshot {
        MemorySnapshot {
            short_term: self.short_term.read().await.clone(),
            long_term: self.long_term.read().await.clone(),
        }
    }

    pub async fn import(&self, snapshot: MemorySnapshot) {
        *self.short_term.write().await = snapshot.short_term;
        *self.long_term.write().await = snapshot.long_term;
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryAcl {
    can_read_from: HashSet<String>,
    can_write_to: HashSet<String>,
}

/// Owns every agent's [`AgentMemory`] plus the cross-agent read/write ACL
/// and, when enabled, a shared [`VectorStore`] index.
pub struct MemoryManager {
    config: MemoryConfig,
    memories: RwLock<HashMap<String, AgentMemory>>,
    acls: RwLock<HashMap<String, MemoryAcl>>,
    vector_store: VectorStore,
    embedder: Box<dyn Embedder>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            memories: RwLock::new(HashMap::new()),
            acls: RwLock::new(HashMap::new()),
            vector_store: VectorStore::new(),
            embedder: Box::new(BagOfWordsEmbedder),
        }
    }

    async fn ensure_agent(&self, agent_id: &str) {
        let mut memories = self.memories.write().await;
        memories
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentMemory::new(self.config.max_short_term_size));
        let mut acls = self.acls.write().await;
        acls.entry(agent_id.to_string()).or_insert_with(|| MemoryAcl {
            can_read_from: HashSet::from([agent_id.to_string()]),
            can_write_to: HashSet::from([agent_id.to_string()]),
        });
    }

    async fn check_read(&self, caller: &str, target: &str) -> Result<()> {
        self.ensure_agent(target).await;
        let acls = self.acls.read().await;
        let permitted = acls
            .get(target)
            .map(|acl| acl.can_read_from.contains(caller))
            .unwrap_or(false);
        if permitted {
            Ok(())
        } else {
            Err(KernelError::PermissionDenied(format!(
                "'{caller}' may not read memory of '{target}'"
            )))
        }
    }

    async fn check_write(&self, caller: &str, target: &str) -> Result<()> {
        self.ensure_agent(target).await;
        let acls = self.acls.read().await;
        let permitted = acls
            .get(target)
            .map(|acl| acl.can_write_to.contains(caller))
            .unwrap_or(false);
        if permitted {
            Ok(())
        } else {
            Err(KernelError::PermissionDenied(format!(
                "'{caller}' may not write memory of '{target}'"
            )))
        }
    }

    pub async fn share_memory_read(&self, from: &str, to: &str) {
        self.ensure_agent(to).await;
        let mut acls = self.acls.write().await;
        acls.entry(to.to_string()).or_default().can_read_from.insert(from.to_string());
    }

    pub async fn revoke_memory_read(&self, from: &str, to: &str) {
        self.ensure_agent(to).await;
        let mut acls = self.acls.write().await;
        if let Some(acl) = acls.get_mut(to) {
            acl.can_read_from.remove(from);
        }
    }

    pub async fn share_memory_write(&self, from: &str, to: &str) {
        self.ensure_agent(to).await;
        let mut acls = self.acls.write().await;
        acls.entry(to.to_string()).or_default().can_write_to.insert(from.to_string());
    }

    pub async fn revoke_memory_write(&self, from: &str, to: &str) {
        self.ensure_agent(to).await;
        let mut acls = self.acls.write().await;
        if let Some(acl) = acls.get_mut(to) {
            acl.can_write_to.remove(from);
        }
    }

    pub async fn remember_short(&self, caller: &str, target: &str, entry: MemoryEntry) -> Result<()> {
        self.check_write(caller, target).await?;
        self.index_if_enabled(target, &entry).await;
        self.ensure_agent(target).await;
        let memories = self.memories.read().await;
        memories.get(target).unwrap().remember_short(entry).await;
        Ok(())
    }

    pub async fn remember_long(&self, caller: &str, target: &str, entry: MemoryEntry) -> Result<()> {
        self.check_write(caller, target).await?;
        self.index_if_enabled(target, &entry).await;
        self.ensure_agent(target).await;
        let memories = self.memories.read().await;
        memories.get(target).unwrap().remember_long(entry).await;
        Ok(())
    }

    async fn index_if_enabled(&self, owner: &str, entry: &MemoryEntry) {
        if !self.config.enable_vector_search {
            return;
        }
        let embedding = self.embedder.embed(&entry.content);
        self.vector_store
            .add(vector::Vector {
                id: uuid::Uuid::new_v4().to_string(),
                text: entry.content.clone(),
                embedding,
                metadata: HashMap::from([
                    ("ownerAgentId".to_string(), owner.to_string()),
                    ("type".to_string(), entry.entry_type.clone()),
                ]),
            })
            .await;
    }

    pub async fn query(&self, caller: &str, target: &str, query: MemoryQuery) -> Result<Vec<MemoryEntry>> {
        self.check_read(caller, target).await?;
        let memories = self.memories.read().await;
        Ok(memories.get(target).unwrap().query_all(&query).await)
    }

    pub async fn get_context(&self, caller: &str, target: &str, limit: usize) -> Result<String> {
        self.check_read(caller, target).await?;
        let memories = self.memories.read().await;
        Ok(memories.get(target).unwrap().get_context(limit).await)
    }

    pub async fn export(&self, caller: &str, target: &str) -> Result<MemorySnapshot> {
        self.check_read(caller, target).await?;
        let memories = self.memories.read().await;
        Ok(memories.get(target).unwrap().export().await)
    }

    pub async fn import(&self, caller: &str, target: &str, snapshot: MemorySnapshot) -> Result<()> {
        self.check_write(caller, target).await?;
        let memories = self.memories.read().await;
        memories.get(target).unwrap().import(snapshot).await;
        Ok(())
    }

    /// Embeds `query`, ranks every stored vector, then filters hits down to
    /// those the caller is permitted to read.
    pub async fn semantic_search(&self, caller: &str, query: &str, k: usize) -> Result<Vec<vector::SearchHit>> {
        if !self.config.enable_vector_search {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query);
        let hits = self.vector_store.search(&embedding, self.vector_store.size().await).await?;

        let acls = self.acls.read().await;
        let mut filtered = Vec::new();
        for hit in hits {
            let owner = hit.vector.metadata.get("ownerAgentId").cloned().unwrap_or_default();
            let permitted = acls
                .get(&owner)
                .map(|acl| acl.can_read_from.contains(caller))
                .unwrap_or(owner == caller);
            if permitted {
                filtered.push(hit);
            }
            if filtered.len() >= k {
                break;
            }
        }
        Ok(filtered)
    }
}
