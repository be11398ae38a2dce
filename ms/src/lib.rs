//! MemStore - two-tier memory engine
//!
//! Persistent memory substrate for the orchestrator: a SQLite store of
//! embedded memories and verified knowledge facts, composite-scored
//! retrieval, dedup-aware ingest, and the cron-driven maintenance passes
//! (consolidation, graduation, refresh).
//!
//! # Modules
//!
//! - [`store`] - SQLite schema and typed accessors
//! - [`embeddings`] - embedding provider trait and vector helpers
//! - [`scoring`] - recency/importance/similarity composite scoring and dedup
//! - [`engine`] - the high-level retrieve/ingest facade
//! - [`consolidation`] - periodic cluster-merge of old short-term memories
//! - [`graduation`] - knowledge fact promotion, decay, and refresh flagging

pub mod cli;
pub mod consolidation;
pub mod embeddings;
pub mod engine;
pub mod graduation;
pub mod ingest;
pub mod scoring;
pub mod store;
pub mod types;

pub use embeddings::{
    DEFAULT_EMBEDDING_DIMENSION, EmbeddingProvider, cosine_similarity, deserialize_embedding, l2_normalize,
    serialize_embedding,
};
pub use engine::{ItemKind, MemoryEngine, RetrievedItem};
pub use ingest::Turn;
pub use scoring::{DedupVerdict, Strategy, composite_score, dedup_verdict, importance_from_signals, recency_score};
pub use store::{MemoryStore, UsageTotals};
pub use types::{KnowledgeFact, MemoryEntry, MemoryLink, MemoryTier, StoreError, UsageRecord};
