//! Composite retrieval scoring and duplicate classification

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::embeddings::cosine_similarity;
use crate::types::StoreError;

/// Cosine at or above this is an exact duplicate
pub const EXACT_DUP_THRESHOLD: f32 = 0.95;

/// Cosine at or above this (but below exact) is a near duplicate
pub const NEAR_DUP_THRESHOLD: f32 = 0.85;

/// Recency half-life: a week-old memory scores 0.5
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Retrieval ranking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Balanced,
    Recency,
    Importance,
}

impl Strategy {
    /// (similarity, recency, importance) weights
    pub fn weights(&self) -> (f64, f64, f64) {
        match self {
            Strategy::Balanced => (0.50, 0.25, 0.25),
            Strategy::Recency => (0.30, 0.55, 0.15),
            Strategy::Importance => (0.35, 0.15, 0.50),
        }
    }
}

impl FromStr for Strategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Strategy::Balanced),
            "recent" | "recency" => Ok(Strategy::Recency),
            "importance" => Ok(Strategy::Importance),
            other => Err(StoreError::Invalid(format!("unknown strategy: {other}"))),
        }
    }
}

/// Exponential-decay recency score: 1 now, 0.5 at one week, approaching 0.
/// Unparseable timestamps score 0.
pub fn recency_score(created_at: &str, now: DateTime<Utc>) -> f64 {
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return 0.0;
    };
    let age_days = (now - created.with_timezone(&Utc)).num_seconds().max(0) as f64 / 86_400.0;
    (-std::f64::consts::LN_2 * age_days / RECENCY_HALF_LIFE_DAYS).exp()
}

/// Importance from signal flags. Base 0.2; signal floors take the maximum.
pub fn importance_from_signals(signals: &[String]) -> f64 {
    let mut importance: f64 = 0.2;
    for signal in signals {
        let floor = match signal.as_str() {
            "user_correction" => 0.9,
            "error_correction" => 0.8,
            "preference" | "user_preference" | "decision" => 0.7,
            "user_explicit" | "repeated" => 0.6,
            _ => 0.2,
        };
        importance = importance.max(floor);
    }
    importance
}

/// Weighted composite of similarity, recency, and importance per strategy.
pub fn composite_score(similarity: f64, recency: f64, importance: f64, strategy: Strategy) -> f64 {
    let (ws, wr, wi) = strategy.weights();
    ws * similarity.clamp(0.0, 1.0) + wr * recency.clamp(0.0, 1.0) + wi * importance.clamp(0.0, 1.0)
}

/// Classification of a new embedding against existing rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    /// Do not store; boost the matched row instead
    ExactDup { id: String },
    /// Store, and link `related_to` the matched row
    NearDup { id: String },
    Unique,
}

/// Compare a new embedding against candidate (id, vector) pairs by max
/// cosine.
pub fn dedup_verdict(embedding: &[f32], candidates: &[(String, Vec<f32>)]) -> DedupVerdict {
    let mut best: Option<(&str, f32)> = None;
    for (id, candidate) in candidates {
        let sim = cosine_similarity(embedding, candidate);
        if best.map(|(_, s)| sim > s).unwrap_or(true) {
            best = Some((id, sim));
        }
    }

    match best {
        Some((id, sim)) if sim >= EXACT_DUP_THRESHOLD => DedupVerdict::ExactDup { id: id.to_string() },
        Some((id, sim)) if sim >= NEAR_DUP_THRESHOLD => DedupVerdict::NearDup { id: id.to_string() },
        _ => DedupVerdict::Unique,
    }
}
