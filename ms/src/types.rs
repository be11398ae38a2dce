//! Core entity types for the memory store

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors from memory store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Memory tier - short-term rows are candidates for consolidation into
/// long-term rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(MemoryTier::ShortTerm),
            "long_term" => Ok(MemoryTier::LongTerm),
            other => Err(StoreError::Invalid(format!("unknown tier: {other}"))),
        }
    }
}

/// A single stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    /// Unit-normalized f32 vector; None for rows whose embedding failed.
    /// Rows without an embedding are excluded from similarity search.
    pub embedding: Option<Vec<f32>>,
    pub tier: MemoryTier,
    pub importance: f64,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub access_count: i64,
    pub source_agent: String,
    pub metadata: serde_json::Value,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, source_agent: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: format!("mem_{}", &Uuid::now_v7().simple().to_string()[..12]),
            content: content.into(),
            embedding: None,
            tier: MemoryTier::ShortTerm,
            importance: 0.5,
            tags: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            access_count: 0,
            source_agent: source_agent.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A verified fact in the knowledge cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub id: String,
    pub fact: String,
    pub embedding: Option<Vec<f32>>,
    pub source: Option<String>,
    pub verified_by: Option<String>,
    pub verified_at: Option<String>,
    pub confidence: f64,
    pub last_accessed_at: Option<String>,
    pub access_count: i64,
    pub metadata: serde_json::Value,
}

impl KnowledgeFact {
    pub fn new(fact: impl Into<String>, verified_by: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: format!("fact_{}", &Uuid::now_v7().simple().to_string()[..12]),
            fact: fact.into(),
            embedding: None,
            source: None,
            verified_by: Some(verified_by.into()),
            verified_at: Some(Utc::now().to_rfc3339()),
            confidence: confidence.clamp(0.0, 1.0),
            last_accessed_at: None,
            access_count: 0,
            metadata: serde_json::json!({}),
        }
    }

    /// Permanent facts (confidence 1.0) are exempt from graduation mutation.
    pub fn is_permanent(&self) -> bool {
        self.confidence >= 1.0
    }

    pub fn contradicted(&self) -> bool {
        self.metadata
            .get("contradicted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn needs_reverify(&self) -> bool {
        self.metadata
            .get("needs_reverify")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A directed, typed link between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub memory_id_a: String,
    pub memory_id_b: String,
    pub relation_type: String,
    pub strength: f64,
    pub created_at: String,
}

impl MemoryLink {
    pub fn new(a: impl Into<String>, b: impl Into<String>, relation_type: impl Into<String>, strength: f64) -> Self {
        Self {
            memory_id_a: a.into(),
            memory_id_b: b.into(),
            relation_type: relation_type.into(),
            strength: strength.clamp(0.0, 1.0),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// One row per LLM call for cost accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
}
