//! Knowledge fact graduation: promotion, decay, and refresh flagging

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::store::MemoryStore;
use crate::types::{KnowledgeFact, StoreError};

/// Counts reported by a graduation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraduationSummary {
    pub promoted: usize,
    pub decayed: usize,
    pub flagged_for_reverify: usize,
}

/// Counts reported by a refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub flagged: usize,
    pub already_permanent: usize,
    pub skipped: usize,
}

fn days_since(timestamp: Option<&str>, now: DateTime<Utc>, missing: i64) -> i64 {
    timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| (now - t.with_timezone(&Utc)).num_days())
        .unwrap_or(missing)
}

/// Apply graduation rules to every non-permanent fact.
///
/// Promotion to permanent (1.0) requires sustained access over a long
/// verified age with no contradictions; lighter use promotes to 0.95;
/// half a year without access decays confidence by 0.1. A fact dropping
/// below 0.5 is flagged for re-verification.
///
/// Idempotent absent access/verification changes: a decay stamps
/// `last_decayed_at`, and the next decay step waits another 180 days from
/// that stamp.
pub fn run_graduation(store: &MemoryStore) -> Result<GraduationSummary, StoreError> {
    let now = Utc::now();
    let mut summary = GraduationSummary::default();

    for fact in store.list_facts()? {
        if fact.is_permanent() {
            continue;
        }

        let age_days = days_since(fact.verified_at.as_deref(), now, 0);
        let stale_days = days_since(fact.last_accessed_at.as_deref(), now, 999);
        let last_decay = fact.metadata.get("last_decayed_at").and_then(|v| v.as_str());
        let decay_gap_days = days_since(last_decay, now, i64::MAX);
        let contradicted = fact.contradicted();

        let mut new_confidence = fact.confidence;
        let mut metadata = fact.metadata.clone();
        let mut changed = false;

        if fact.access_count >= 10 && age_days > 90 && !contradicted {
            new_confidence = 1.0;
            summary.promoted += 1;
            changed = true;
        } else if fact.access_count >= 3 && age_days > 30 && !contradicted && fact.confidence < 0.95 {
            new_confidence = 0.95;
            summary.promoted += 1;
            changed = true;
        } else if stale_days > 180 && fact.confidence < 1.0 && decay_gap_days > 180 {
            new_confidence = ((fact.confidence - 0.1).max(0.0) * 100.0).round() / 100.0;
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert("last_decayed_at".to_string(), serde_json::json!(now.to_rfc3339()));
            }
            summary.decayed += 1;
            changed = true;
        }

        if new_confidence < 0.5 && !fact.needs_reverify() {
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert("needs_reverify".to_string(), serde_json::json!(true));
            }
            summary.flagged_for_reverify += 1;
            changed = true;
        }

        if changed {
            store.update_fact_confidence(&fact.id, new_confidence, &metadata)?;
            info!(
                fact = %fact.id,
                old = fact.confidence,
                new = new_confidence,
                access_count = fact.access_count,
                age_days,
                "Graduation applied"
            );
        }
    }

    info!(?summary, "Graduation complete");
    Ok(summary)
}

/// Monthly refresh: flag old facts the user still touches. Purely a
/// flagging pass, no confidence mutation.
pub fn run_refresh(store: &MemoryStore) -> Result<RefreshSummary, StoreError> {
    let now = Utc::now();
    let mut summary = RefreshSummary::default();

    for fact in store.list_facts()? {
        if fact.is_permanent() {
            summary.already_permanent += 1;
            continue;
        }
        if fact.needs_reverify() {
            summary.skipped += 1;
            continue;
        }

        let age_days = days_since(fact.verified_at.as_deref(), now, 0);
        let recently_accessed = fact
            .last_accessed_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| (now - t.with_timezone(&Utc)) <= Duration::days(30))
            .unwrap_or(false);

        if age_days > 90 && recently_accessed {
            let mut metadata = fact.metadata.clone();
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert("needs_reverify".to_string(), serde_json::json!(true));
            }
            store.update_fact_metadata(&fact.id, &metadata)?;
            summary.flagged += 1;
        } else {
            summary.skipped += 1;
        }
    }

    info!(?summary, "Knowledge refresh complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> MemoryStore {
        MemoryStore::open(temp.path().join("memory.db")).unwrap()
    }

    fn fact(confidence: f64, access_count: i64, age_days: i64, stale_days: Option<i64>) -> KnowledgeFact {
        let now = Utc::now();
        let mut fact = KnowledgeFact::new("a fact", "verifier", confidence);
        fact.access_count = access_count;
        fact.verified_at = Some((now - Duration::days(age_days)).to_rfc3339());
        fact.last_accessed_at = stale_days.map(|d| (now - Duration::days(d)).to_rfc3339());
        fact
    }

    #[test]
    fn test_promotion_to_permanent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let f = fact(0.9, 12, 120, Some(5));
        store.store_fact(&f).unwrap();

        let summary = run_graduation(&store).unwrap();
        assert_eq!(summary.promoted, 1);
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_promotion_to_established() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let f = fact(0.8, 5, 45, Some(5));
        store.store_fact(&f).unwrap();

        run_graduation(&store).unwrap();
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_contradicted_never_promotes() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut f = fact(0.9, 12, 120, Some(5));
        f.metadata = serde_json::json!({"contradicted": true});
        store.store_fact(&f).unwrap();

        let summary = run_graduation(&store).unwrap();
        assert_eq!(summary.promoted, 0);
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_stale_fact_decays() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let f = fact(0.8, 1, 200, Some(200));
        store.store_fact(&f).unwrap();

        let summary = run_graduation(&store).unwrap();
        assert_eq!(summary.decayed, 1);
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_decay_below_half_flags_reverify() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let f = fact(0.55, 0, 200, None);
        store.store_fact(&f).unwrap();

        let summary = run_graduation(&store).unwrap();
        assert_eq!(summary.decayed, 1);
        assert_eq!(summary.flagged_for_reverify, 1);
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 0.45).abs() < 1e-9);
        assert!(updated.needs_reverify());
    }

    #[test]
    fn test_permanent_facts_untouched() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let f = fact(1.0, 0, 400, None);
        store.store_fact(&f).unwrap();

        let summary = run_graduation(&store).unwrap();
        assert_eq!(summary, GraduationSummary::default());
        let updated = store.get_fact(&f.id).unwrap().unwrap();
        assert!((updated.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_graduation_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.store_fact(&fact(0.8, 5, 45, Some(5))).unwrap();
        store.store_fact(&fact(0.8, 1, 200, Some(200))).unwrap();

        run_graduation(&store).unwrap();
        let first: Vec<f64> = store.list_facts().unwrap().iter().map(|f| f.confidence).collect();

        run_graduation(&store).unwrap();
        let second: Vec<f64> = store.list_facts().unwrap().iter().map(|f| f.confidence).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_refresh_flags_old_but_active() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        // Old and recently accessed - flagged
        let active = fact(0.9, 2, 120, Some(10));
        // Old but dormant - skipped
        let dormant = fact(0.9, 2, 120, Some(60));
        // Permanent - exempt
        let permanent = fact(1.0, 2, 120, Some(10));
        store.store_fact(&active).unwrap();
        store.store_fact(&dormant).unwrap();
        store.store_fact(&permanent).unwrap();

        let summary = run_refresh(&store).unwrap();
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.already_permanent, 1);
        assert_eq!(summary.skipped, 1);

        assert!(store.get_fact(&active.id).unwrap().unwrap().needs_reverify());
        assert!(!store.get_fact(&dormant.id).unwrap().unwrap().needs_reverify());
        // Confidence untouched by refresh
        assert!((store.get_fact(&active.id).unwrap().unwrap().confidence - 0.9).abs() < 1e-9);
    }
}
