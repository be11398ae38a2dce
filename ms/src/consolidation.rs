//! Periodic consolidation of old short-term memories
//!
//! Clusters week-old short-term rows by embedding similarity, merges each
//! cluster into one long-term row, links the members to it, and deletes
//! them. The `consolidated_into` links stay behind as the audit trail even
//! though they now point at deleted rows.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::info;

use crate::embeddings::cosine_similarity;
use crate::store::MemoryStore;
use crate::types::{MemoryEntry, MemoryLink, MemoryTier, StoreError};
use uuid::Uuid;

/// Short-term rows older than this many days are consolidation candidates
pub const DEFAULT_AGE_DAYS: i64 = 7;

/// Members join a cluster at or above this cosine to the seed
pub const CLUSTER_THRESHOLD: f32 = 0.7;

/// Standard tier prunes short-term rows below this importance
pub const PRUNE_THRESHOLD: f64 = 0.3;

/// Merged content keeps at most this many unique sentences
const MAX_SENTENCES: usize = 20;

/// Consolidation depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaintenanceTier {
    /// Cluster-merge only
    #[default]
    Full,
    /// Cluster-merge plus low-importance pruning
    Standard,
}

impl FromStr for MaintenanceTier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(MaintenanceTier::Full),
            "standard" => Ok(MaintenanceTier::Standard),
            other => Err(StoreError::Invalid(format!("unknown tier: {other}"))),
        }
    }
}

/// Counts reported by a consolidation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationSummary {
    /// Member rows folded into merged rows (and deleted)
    pub consolidated: usize,
    /// Clusters of size >= 2
    pub clusters: usize,
    /// Short-term rows pruned (standard tier only)
    pub pruned: usize,
}

/// Run one consolidation pass. Dry-run reports counts without mutating.
pub fn run_consolidation(
    store: &MemoryStore,
    tier: MaintenanceTier,
    dry_run: bool,
) -> Result<ConsolidationSummary, StoreError> {
    let mut summary = ConsolidationSummary::default();

    let cutoff = (Utc::now() - Duration::days(DEFAULT_AGE_DAYS)).to_rfc3339();
    let old = store.short_term_older_than(&cutoff)?;

    let clusters = cluster_memories(&old, CLUSTER_THRESHOLD);
    summary.clusters = clusters.iter().filter(|c| c.len() >= 2).count();

    for cluster in clusters {
        if cluster.len() < 2 {
            continue;
        }
        summary.consolidated += cluster.len();
        if dry_run {
            continue;
        }

        let merged = summarize_cluster(&cluster);
        let best = cluster
            .iter()
            .max_by(|a, b| a.importance.partial_cmp(&b.importance).unwrap_or(std::cmp::Ordering::Equal))
            .expect("cluster is non-empty");

        let now = Utc::now().to_rfc3339();
        let member_ids: Vec<&str> = cluster.iter().map(|m| m.id.as_str()).collect();
        let merged_entry = MemoryEntry {
            id: format!("mem_{}", &Uuid::now_v7().simple().to_string()[..12]),
            content: merged,
            embedding: best.embedding.clone(),
            tier: MemoryTier::LongTerm,
            importance: best.importance,
            tags: best.tags.clone(),
            created_at: now.clone(),
            updated_at: now,
            access_count: 0,
            source_agent: best.source_agent.clone(),
            metadata: serde_json::json!({ "consolidated_from": member_ids }),
        };
        store.insert_memory(&merged_entry)?;

        for member in &cluster {
            store.add_link(&MemoryLink::new(
                member.id.clone(),
                merged_entry.id.clone(),
                "consolidated_into",
                1.0,
            ))?;
            store.delete_memory(&member.id)?;
        }
    }

    if tier == MaintenanceTier::Standard {
        summary.pruned = if dry_run {
            store.count_short_term_below(PRUNE_THRESHOLD)? as usize
        } else {
            store.prune_short_term_below(PRUNE_THRESHOLD)?
        };
    }

    info!(
        consolidated = summary.consolidated,
        clusters = summary.clusters,
        pruned = summary.pruned,
        dry_run,
        "Consolidation pass complete"
    );
    Ok(summary)
}

/// Greedy seed clustering: the earliest unclustered row seeds a cluster and
/// attracts every later row within the cosine threshold. Rows without
/// embeddings are skipped.
pub fn cluster_memories(memories: &[MemoryEntry], threshold: f32) -> Vec<Vec<MemoryEntry>> {
    let mut used: HashSet<usize> = HashSet::new();
    let mut clusters = Vec::new();

    for (i, seed) in memories.iter().enumerate() {
        if used.contains(&i) {
            continue;
        }
        let Some(seed_embedding) = &seed.embedding else {
            continue;
        };

        let mut cluster = vec![seed.clone()];
        used.insert(i);

        for (j, candidate) in memories.iter().enumerate().skip(i + 1) {
            if used.contains(&j) {
                continue;
            }
            let Some(candidate_embedding) = &candidate.embedding else {
                continue;
            };
            if cosine_similarity(seed_embedding, candidate_embedding) >= threshold {
                cluster.push(candidate.clone());
                used.insert(j);
            }
        }

        clusters.push(cluster);
    }

    clusters
}

/// Extractive merge: unique sentences across the cluster, case-insensitive
/// dedup, capped, terminal period guaranteed.
pub fn summarize_cluster(cluster: &[MemoryEntry]) -> String {
    if cluster.len() == 1 {
        return cluster[0].content.clone();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut sentences = Vec::new();

    for member in cluster {
        for sentence in member.content.split(". ") {
            let sentence = sentence.trim().trim_end_matches('.');
            if sentence.is_empty() {
                continue;
            }
            if seen.insert(sentence.to_lowercase()) {
                sentences.push(sentence.to_string());
            }
        }
    }

    sentences.truncate(MAX_SENTENCES);
    let mut summary = sentences.join(". ");
    if !summary.ends_with('.') {
        summary.push('.');
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::l2_normalize;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> MemoryStore {
        MemoryStore::open(temp.path().join("memory.db")).unwrap()
    }

    fn aged_entry(content: &str, embedding: Vec<f32>, importance: f64, days_old: i64) -> MemoryEntry {
        let created = (Utc::now() - Duration::days(days_old)).to_rfc3339();
        let mut entry = MemoryEntry::new(content, "brain")
            .with_embedding(Some(embedding))
            .with_importance(importance);
        entry.created_at = created.clone();
        entry.updated_at = created;
        entry
    }

    fn axis(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[i] = 1.0;
        v
    }

    fn near_axis(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.08f32; dims];
        v[i] = 1.0;
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_clustering_groups_similar() {
        let memories = vec![
            aged_entry("python tips one", axis(0, 4), 0.5, 10),
            aged_entry("python tips two", near_axis(0, 4), 0.5, 9),
            aged_entry("coffee ritual", axis(1, 4), 0.5, 8),
        ];

        let clusters = cluster_memories(&memories, CLUSTER_THRESHOLD);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1].len(), 1);
    }

    #[test]
    fn test_clustering_skips_null_embeddings() {
        let mut no_vector = aged_entry("orphan", axis(0, 4), 0.5, 10);
        no_vector.embedding = None;
        let memories = vec![no_vector, aged_entry("seed", axis(0, 4), 0.5, 10)];

        let clusters = cluster_memories(&memories, CLUSTER_THRESHOLD);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 1);
    }

    #[test]
    fn test_summarize_dedups_sentences() {
        let cluster = vec![
            aged_entry("User likes tea. User works late", axis(0, 4), 0.5, 10),
            aged_entry("user likes tea. User owns a cat", axis(0, 4), 0.5, 10),
        ];

        let summary = summarize_cluster(&cluster);
        assert_eq!(summary.to_lowercase().matches("user likes tea").count(), 1);
        assert!(summary.contains("works late"));
        assert!(summary.contains("owns a cat"));
        assert!(summary.ends_with('.'));
    }

    #[test]
    fn test_consolidation_merges_and_links() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let a = aged_entry("python tips one", axis(0, 4), 0.4, 10);
        let b = aged_entry("python tips two", near_axis(0, 4), 0.8, 9);
        store.insert_memory(&a).unwrap();
        store.insert_memory(&b).unwrap();

        let summary = run_consolidation(&store, MaintenanceTier::Full, false).unwrap();
        assert_eq!(summary.clusters, 1);
        assert_eq!(summary.consolidated, 2);

        // Members gone, merged row present and long-term
        assert!(store.get_memory(&a.id).unwrap().is_none());
        assert!(store.get_memory(&b.id).unwrap().is_none());

        let remaining = store.recent_memories(10).unwrap();
        assert_eq!(remaining.len(), 1);
        let merged = &remaining[0];
        assert_eq!(merged.tier, MemoryTier::LongTerm);
        assert!((merged.importance - 0.8).abs() < 1e-9);
        assert_eq!(merged.metadata["consolidated_from"].as_array().unwrap().len(), 2);

        // Audit links survive the member deletes
        let links = store.links_for(&a.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relation_type, "consolidated_into");
        assert_eq!(links[0].memory_id_b, merged.id);
    }

    #[test]
    fn test_fresh_rows_left_alone() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.insert_memory(&aged_entry("fresh one", axis(0, 4), 0.5, 1)).unwrap();
        store.insert_memory(&aged_entry("fresh two", near_axis(0, 4), 0.5, 1)).unwrap();

        let summary = run_consolidation(&store, MaintenanceTier::Full, false).unwrap();
        assert_eq!(summary.consolidated, 0);
        assert_eq!(store.count_memories().unwrap(), 2);
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.insert_memory(&aged_entry("old one", axis(0, 4), 0.1, 10)).unwrap();
        store.insert_memory(&aged_entry("old two", near_axis(0, 4), 0.5, 10)).unwrap();

        let summary = run_consolidation(&store, MaintenanceTier::Standard, true).unwrap();
        assert_eq!(summary.consolidated, 2);
        assert_eq!(summary.pruned, 1);
        assert_eq!(store.count_memories().unwrap(), 2);
    }

    #[test]
    fn test_standard_tier_prunes_low_importance() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.insert_memory(&aged_entry("noise", axis(0, 4), 0.1, 2)).unwrap();
        store.insert_memory(&aged_entry("keeper", axis(1, 4), 0.9, 2)).unwrap();

        let summary = run_consolidation(&store, MaintenanceTier::Standard, false).unwrap();
        assert_eq!(summary.pruned, 1);
        assert_eq!(store.count_memories().unwrap(), 1);

        // Full tier would have kept it
        let remaining = store.recent_memories(10).unwrap();
        assert_eq!(remaining[0].content, "keeper");
    }
}
