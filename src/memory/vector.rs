//! Optional similarity-search index over memory entries. The embedder is a
//! stub: a deterministic bag-of-words hash, not a real model backend.

use crate::constants::EMBEDDING_DIMENSIONS;
use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Hashes each word into one of [`EMBEDDING_DIMENSIONS`] buckets and counts
/// occurrences, then L2-normalizes. Good enough to rank lexical overlap;
/// not a semantic embedding.
pub struct BagOfWordsEmbedder;

impl Embedder for BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; EMBEDDING_DIMENSIONS];
        for word in text.to_lowercase().split_whitespace() {
            let bucket = simple_hash(word) % EMBEDDING_DIMENSIONS;
            buckets[bucket] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for b in &mut buckets {
                *b /= norm;
            }
        }
        buckets
    }
}

fn simple_hash(word: &str) -> usize {
    let mut hash: u64 = 5381;
    for byte in word.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash as usize
}

/// Degenerate zero-magnitude vectors yield similarity 0; mismatched
/// dimensions are a precondition violation and raise instead.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(KernelError::ValidationFailed(format!(
            "cannot compare vectors of differing dimension ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot / (norm_a * norm_b))
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub vector: Vector,
    pub score: f32,
}

pub struct VectorStore {
    vectors: RwLock<Vec<Vector>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(Vec::new()),
        }
    }

    pub async fn add(&self, vector: Vector) {
        self.vectors.write().await.push(vector);
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut vectors = self.vectors.write().await;
        let before = vectors.len();
        vectors.retain(|v| v.id != id);
        vectors.len() != before
    }

    pub async fn get(&self, id: &str) -> Option<Vector> {
        self.vectors.read().await.iter().find(|v| v.id == id).cloned()
    }

    pub async fn get_all(&self) -> Vec<Vector> {
        self.vectors.read().await.clone()
    }

    pub async fn clear(&self) {
        self.vectors.write().await.clear();
    }

    pub async fn size(&self) -> usize {
        self.vectors.read().await.len()
    }

    /// Ranks every stored vector against `query` by cosine similarity,
    /// descending, returning the top `k`. Raises if any stored embedding's
    /// dimension does not match `query`'s.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let vectors = self.vectors.read().await;
        let mut hits: Vec<SearchHit> = Vec::with_capacity(vectors.len());
        for v in vectors.iter() {
            let score = cosine_similarity(query, &v.embedding)?;
            hits.push(SearchHit {
                vector: v.clone(),
                score,
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = BagOfWordsEmbedder;
        assert_eq!(embedder.embed("hello world"), embedder.embed("hello world"));
    }

    #[tokio::test]
    async fn search_ranks_closer_text_higher() {
        let store = VectorStore::new();
        let embedder = BagOfWordsEmbedder;
        store
            .add(Vector {
                id: "1".to_string(),
                text: "rust async runtime".to_string(),
                embedding: embedder.embed("rust async runtime"),
                metadata: HashMap::new(),
            })
            .await;
        store
            .add(Vector {
                id: "2".to_string(),
                text: "baking sourdough bread".to_string(),
                embedding: embedder.embed("baking sourdough bread"),
                metadata: HashMap::new(),
            })
            .await;

        let query = embedder.embed("async rust runtime");
        let hits = store.search(&query, 1).await.unwrap();
        assert_eq!(hits[0].vector.id, "1");
    }

    #[tokio::test]
    async fn search_raises_on_dimension_mismatch() {
        let store = VectorStore::new();
        store
            .add(Vector {
                id: "1".to_string(),
                text: "short".to_string(),
                embedding: vec![1.0, 0.0],
                metadata: HashMap::new(),
            })
            .await;

        let err = store.search(&[1.0, 0.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, KernelError::ValidationFailed(_)));
    }
}
