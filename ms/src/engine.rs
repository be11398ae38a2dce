//! High-level memory facade: composite-scored retrieval and ingest

use chrono::Utc;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::embeddings::{EmbeddingProvider, cosine_similarity};
use crate::ingest::{Turn, ingest_turn};
use crate::scoring::{Strategy, composite_score, recency_score};
use crate::store::MemoryStore;
use crate::types::{KnowledgeFact, StoreError};

/// Whether a retrieved item came from the memory table or the knowledge cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Memory,
    Fact,
}

/// A ranked retrieval result
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub id: String,
    pub content: String,
    pub score: f64,
    pub kind: ItemKind,
    pub importance: f64,
    pub tags: Vec<String>,
    pub created_at: String,
}

/// Retrieval engine over the store plus an optional embedding backend.
///
/// Without an embedder the similarity term is zero and ranking degrades to
/// recency and importance.
pub struct MemoryEngine {
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryEngine {
    pub fn new(store: Arc<MemoryStore>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Ingest one conversation turn through chunking and dedup.
    pub fn ingest(&self, turn: &Turn) -> Result<Vec<String>, StoreError> {
        ingest_turn(&self.store, self.embedder.as_deref(), turn)
    }

    /// Embed and store a verified fact in the knowledge cache.
    pub fn store_fact(&self, fact_text: &str, verified_by: &str, confidence: f64) -> Result<String, StoreError> {
        let embedding = self.embed_opt(fact_text);
        let mut fact = KnowledgeFact::new(fact_text, verified_by, confidence);
        fact.embedding = embedding;
        self.store.store_fact(&fact)?;
        Ok(fact.id)
    }

    /// Retrieve the top `limit` memories for a query, ranked by the
    /// strategy's composite score. Ties break newer-first.
    pub fn retrieve(&self, query: &str, strategy: Strategy, limit: usize) -> Result<Vec<RetrievedItem>, StoreError> {
        self.retrieve_inner(query, strategy, limit, false)
    }

    /// As [`retrieve`](Self::retrieve), with knowledge-cache facts merged in
    /// (tagged [`ItemKind::Fact`] and access-touched).
    pub fn retrieve_with_facts(
        &self,
        query: &str,
        strategy: Strategy,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, StoreError> {
        self.retrieve_inner(query, strategy, limit, true)
    }

    fn retrieve_inner(
        &self,
        query: &str,
        strategy: Strategy,
        limit: usize,
        include_facts: bool,
    ) -> Result<Vec<RetrievedItem>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embed_opt(query);
        let now = Utc::now();
        let mut items = Vec::new();

        for entry in self.store.memories_with_embeddings()? {
            let similarity = match (&query_embedding, &entry.embedding) {
                (Some(q), Some(v)) => cosine_similarity(q, v).clamp(0.0, 1.0) as f64,
                _ => 0.0,
            };
            let recency = recency_score(&entry.created_at, now);
            items.push(RetrievedItem {
                score: composite_score(similarity, recency, entry.importance, strategy),
                id: entry.id,
                content: entry.content,
                kind: ItemKind::Memory,
                importance: entry.importance,
                tags: entry.tags,
                created_at: entry.created_at,
            });
        }

        if include_facts {
            for fact in self.store.facts_with_embeddings()? {
                let similarity = match (&query_embedding, &fact.embedding) {
                    (Some(q), Some(v)) => cosine_similarity(q, v).clamp(0.0, 1.0) as f64,
                    _ => 0.0,
                };
                let created = fact.verified_at.clone().unwrap_or_default();
                let recency = recency_score(&created, now);
                items.push(RetrievedItem {
                    score: composite_score(similarity, recency, fact.confidence, strategy),
                    id: fact.id,
                    content: fact.fact,
                    kind: ItemKind::Fact,
                    importance: fact.confidence,
                    tags: Vec::new(),
                    created_at: created,
                });
            }
        }

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        items.truncate(limit);

        // For the recency strategy, make sure the newest rows surface even
        // when the query has nothing in common with them
        if strategy == Strategy::Recency {
            for entry in self.store.recent_memories(limit.min(3))? {
                if items.iter().any(|i| i.id == entry.id) {
                    continue;
                }
                let recency = recency_score(&entry.created_at, now);
                items.push(RetrievedItem {
                    score: composite_score(0.0, recency, entry.importance, strategy),
                    id: entry.id,
                    content: entry.content,
                    kind: ItemKind::Memory,
                    importance: entry.importance,
                    tags: entry.tags,
                    created_at: entry.created_at,
                });
            }
            items.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            items.truncate(limit);
        }

        // Record accesses on what we hand back
        for item in &items {
            match item.kind {
                ItemKind::Memory => self.store.bump_access(&item.id)?,
                ItemKind::Fact => self.store.touch_fact(&item.id)?,
            }
        }

        debug!(query_len = query.len(), results = items.len(), "Retrieval complete");
        Ok(items)
    }

    fn embed_opt(&self, text: &str) -> Option<Vec<f32>> {
        self.embedder.as_ref().and_then(|e| e.embed(text).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::l2_normalize;
    use crate::types::MemoryEntry;
    use chrono::Duration;
    use tempfile::TempDir;

    struct AxisEmbedder;

    /// Maps known words onto fixed axes so similarity is predictable.
    impl EmbeddingProvider for AxisEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
            let mut v = vec![0.0f32; 4];
            let lower = text.to_lowercase();
            if lower.contains("python") {
                v[0] = 1.0;
            }
            if lower.contains("rust") {
                v[1] = 1.0;
            }
            if lower.contains("coffee") {
                v[2] = 1.0;
            }
            if v.iter().all(|x| *x == 0.0) {
                v[3] = 1.0;
            }
            l2_normalize(&mut v);
            Ok(v)
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn engine(temp: &TempDir) -> MemoryEngine {
        let store = Arc::new(MemoryStore::open(temp.path().join("memory.db")).unwrap());
        MemoryEngine::new(store, Some(Arc::new(AxisEmbedder)))
    }

    fn seed(engine: &MemoryEngine, content: &str, importance: f64, days_old: i64) {
        let created = (Utc::now() - Duration::days(days_old)).to_rfc3339();
        let mut entry = MemoryEntry::new(content, "brain")
            .with_embedding(AxisEmbedder.embed(content).ok())
            .with_importance(importance);
        entry.created_at = created.clone();
        entry.updated_at = created;
        engine.store().insert_memory(&entry).unwrap();
    }

    #[test]
    fn test_empty_store_returns_empty() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        assert!(engine.retrieve("anything", Strategy::Balanced, 5).unwrap().is_empty());
    }

    #[test]
    fn test_similar_content_ranks_first() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        seed(&engine, "user likes python scripting", 0.5, 1);
        seed(&engine, "user drinks coffee at 9am", 0.5, 1);

        let results = engine.retrieve("anything about python?", Strategy::Balanced, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("python"));
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_importance_strategy_prefers_important() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        // Same similarity and age; only importance differs
        seed(&engine, "rust decision one", 0.2, 5);
        seed(&engine, "rust decision two", 0.9, 5);

        let results = engine.retrieve("rust", Strategy::Importance, 2).unwrap();
        assert!(results[0].content.contains("two"));
    }

    #[test]
    fn test_recency_strategy_surfaces_new_rows() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        seed(&engine, "python note from long ago", 0.9, 60);
        seed(&engine, "coffee note from today", 0.2, 0);

        let results = engine.retrieve("python", Strategy::Recency, 2).unwrap();
        assert!(results.iter().any(|r| r.content.contains("coffee")));
    }

    #[test]
    fn test_facts_merged_and_touched() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        seed(&engine, "user likes python", 0.5, 1);
        let fact_id = engine.store_fact("python released in 1991", "verifier", 0.9).unwrap();

        let results = engine.retrieve_with_facts("python history", Strategy::Balanced, 5).unwrap();
        let fact = results.iter().find(|r| r.kind == ItemKind::Fact).unwrap();
        assert_eq!(fact.id, fact_id);

        // Access recorded
        let stored = engine.store().get_fact(&fact_id).unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
    }

    #[test]
    fn test_retrieval_bumps_memory_access() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);

        seed(&engine, "user likes rust", 0.5, 0);
        let results = engine.retrieve("rust", Strategy::Balanced, 1).unwrap();
        let entry = engine.store().get_memory(&results[0].id).unwrap().unwrap();
        assert_eq!(entry.access_count, 1);
    }
}
