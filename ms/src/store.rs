//! SQLite schema and typed accessors for the memory database

use chrono::Utc;
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::embeddings::{deserialize_embedding, serialize_embedding};
use crate::types::{KnowledgeFact, MemoryEntry, MemoryLink, MemoryTier, StoreError, UsageRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    tier TEXT CHECK(tier IN ('short_term', 'long_term')) DEFAULT 'short_term',
    importance REAL DEFAULT 0.5,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    access_count INTEGER DEFAULT 0,
    source_agent TEXT,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS knowledge_cache (
    id TEXT PRIMARY KEY,
    fact TEXT NOT NULL,
    embedding BLOB,
    source TEXT,
    verified_by TEXT,
    verified_at TEXT,
    confidence REAL DEFAULT 0.8,
    metadata TEXT,
    last_accessed_at TEXT,
    access_count INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS memory_links (
    memory_id_a TEXT NOT NULL,
    memory_id_b TEXT NOT NULL,
    relation_type TEXT,
    strength REAL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (memory_id_a, memory_id_b, relation_type)
);

CREATE TABLE IF NOT EXISTS usage_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent TEXT NOT NULL,
    model TEXT NOT NULL,
    provider TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 1,
    error TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    agent TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_tier ON memories(tier);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_links_a ON memory_links(memory_id_a);
CREATE INDEX IF NOT EXISTS idx_links_b ON memory_links(memory_id_b);
CREATE INDEX IF NOT EXISTS idx_usage_created ON usage_log(created_at);
CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at);
";

/// Aggregate token usage over a window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub calls: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub failures: i64,
}

/// Store-wide counts for status displays
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub memories: i64,
    pub short_term: i64,
    pub long_term: i64,
    pub facts: i64,
    pub links: i64,
}

/// An activity log row
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub event_type: String,
    pub agent: String,
    pub detail: String,
    pub created_at: String,
}

/// Advisory lock guarding cron maintenance against the daemon. Released on
/// drop.
pub struct MaintenanceLock {
    file: File,
}

impl Drop for MaintenanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The memory database: memories, knowledge facts, links, usage, activity.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MemoryStore {
    /// Open or create the store. Schema init is idempotent; missing
    /// graduation columns on older databases are added in place.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        Self::migrate(&conn)?;

        debug!(path = %path.display(), "Opened memory store");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Add graduation columns to knowledge_cache if an older schema lacks
    /// them. SQLite has no IF NOT EXISTS for columns, so inspect table_info.
    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        let existing: HashSet<String> = {
            let mut stmt = conn.prepare("PRAGMA table_info(knowledge_cache)")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            rows.collect::<Result<HashSet<_>, _>>()?
        };

        if !existing.contains("last_accessed_at") {
            conn.execute("ALTER TABLE knowledge_cache ADD COLUMN last_accessed_at TEXT", [])?;
        }
        if !existing.contains("access_count") {
            conn.execute("ALTER TABLE knowledge_cache ADD COLUMN access_count INTEGER DEFAULT 0", [])?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Take the exclusive maintenance lock (blocking). Cron runners hold this
    /// across a pass so the daemon and overlapping crons don't interleave
    /// mutations.
    pub fn maintenance_lock(&self) -> Result<MaintenanceLock, StoreError> {
        let lock_path = self.db_path.with_extension("lock");
        let file = File::create(&lock_path)?;
        file.lock_exclusive()?;
        Ok(MaintenanceLock { file })
    }

    // --- memories ---

    pub fn insert_memory(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO memories (id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.id,
                entry.content,
                entry.embedding.as_deref().map(serialize_embedding),
                entry.tier.as_str(),
                entry.importance,
                serde_json::to_string(&entry.tags)?,
                entry.created_at,
                entry.updated_at,
                entry.access_count,
                entry.source_agent,
                entry.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.query_row(
            "SELECT id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata
             FROM memories WHERE id = ?1",
            params![id],
            row_to_memory,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// All rows with a non-null embedding, for the linear-scan retrieval path.
    pub fn memories_with_embeddings(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata
             FROM memories WHERE embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map([], row_to_memory)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest rows first, embedded or not.
    pub fn recent_memories(&self, limit: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata
             FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_memory)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// (id, embedding) of the most recent embedded rows - the dedup window.
    pub fn recent_embedded(&self, limit: usize) -> Result<Vec<(String, Vec<f32>)>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM memories WHERE embedding IS NOT NULL
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, String>(0)?, deserialize_embedding(&blob)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Raise a row's importance (capped at 1.0) and touch updated_at. Used
    /// when an exact duplicate arrives.
    pub fn boost_importance(&self, id: &str, delta: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE memories SET importance = MIN(1.0, importance + ?1), updated_at = ?2 WHERE id = ?3",
            params![delta, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Increment a row's access counter.
    pub fn bump_access(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute("UPDATE memories SET access_count = access_count + 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn delete_memory(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Short-term rows created before the cutoff - consolidation candidates.
    pub fn short_term_older_than(&self, cutoff: &str) -> Result<Vec<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata
             FROM memories WHERE tier = 'short_term' AND created_at < ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![cutoff], row_to_memory)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete short-term rows below an importance threshold. Returns count.
    pub fn prune_short_term_below(&self, threshold: f64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count = conn.execute(
            "DELETE FROM memories WHERE tier = 'short_term' AND importance < ?1",
            params![threshold],
        )?;
        Ok(count)
    }

    pub fn count_short_term_below(&self, threshold: f64) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE tier = 'short_term' AND importance < ?1",
            params![threshold],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_memories(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_memories_since(&self, cutoff: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE created_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- links ---

    /// Insert a link; the (a, b, relation) triple is unique, re-inserts are
    /// ignored.
    pub fn add_link(&self, link: &MemoryLink) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO memory_links (memory_id_a, memory_id_b, relation_type, strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![link.memory_id_a, link.memory_id_b, link.relation_type, link.strength, link.created_at],
        )?;
        Ok(())
    }

    /// Links touching a memory id, either direction.
    pub fn links_for(&self, id: &str) -> Result<Vec<MemoryLink>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT memory_id_a, memory_id_b, relation_type, strength, created_at
             FROM memory_links WHERE memory_id_a = ?1 OR memory_id_b = ?1",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(MemoryLink {
                    memory_id_a: row.get(0)?,
                    memory_id_b: row.get(1)?,
                    relation_type: row.get(2)?,
                    strength: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Memories ranked by how many `related_to` links point at them.
    pub fn top_linked_memories(&self, limit: usize) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.content, COUNT(*) as link_count
             FROM memory_links ml JOIN memories m ON m.id = ml.memory_id_a
             WHERE ml.relation_type = 'related_to'
             GROUP BY ml.memory_id_a ORDER BY link_count DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recent rows at or above an importance floor, newest first.
    pub fn high_importance_since(&self, cutoff: &str, floor: f64, limit: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, tier, importance, tags, created_at, updated_at, access_count, source_agent, metadata
             FROM memories WHERE created_at >= ?1 AND importance >= ?2
             ORDER BY importance DESC, created_at DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![cutoff, floor, limit as i64], row_to_memory)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- knowledge cache ---

    pub fn store_fact(&self, fact: &KnowledgeFact) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO knowledge_cache (id, fact, embedding, source, verified_by, verified_at, confidence, metadata, last_accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fact.id,
                fact.fact,
                fact.embedding.as_deref().map(serialize_embedding),
                fact.source,
                fact.verified_by,
                fact.verified_at,
                fact.confidence,
                fact.metadata.to_string(),
                fact.last_accessed_at,
                fact.access_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_fact(&self, id: &str) -> Result<Option<KnowledgeFact>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.query_row(
            "SELECT id, fact, embedding, source, verified_by, verified_at, confidence, metadata, last_accessed_at, access_count
             FROM knowledge_cache WHERE id = ?1",
            params![id],
            row_to_fact,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_facts(&self) -> Result<Vec<KnowledgeFact>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, fact, embedding, source, verified_by, verified_at, confidence, metadata, last_accessed_at, access_count
             FROM knowledge_cache",
        )?;
        let rows = stmt.query_map([], row_to_fact)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn facts_with_embeddings(&self) -> Result<Vec<KnowledgeFact>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, fact, embedding, source, verified_by, verified_at, confidence, metadata, last_accessed_at, access_count
             FROM knowledge_cache WHERE embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map([], row_to_fact)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record an access: bump the counter and stamp last_accessed_at.
    pub fn touch_fact(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE knowledge_cache SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Graduation writes confidence and metadata together.
    pub fn update_fact_confidence(
        &self,
        id: &str,
        confidence: f64,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE knowledge_cache SET confidence = ?1, metadata = ?2 WHERE id = ?3",
            params![confidence, metadata.to_string(), id],
        )?;
        Ok(())
    }

    pub fn update_fact_metadata(&self, id: &str, metadata: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "UPDATE knowledge_cache SET metadata = ?1 WHERE id = ?2",
            params![metadata.to_string(), id],
        )?;
        Ok(())
    }

    // --- usage & activity ---

    pub fn log_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO usage_log (agent, model, provider, input_tokens, output_tokens, duration_ms, success, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.agent,
                record.model,
                record.provider,
                record.input_tokens,
                record.output_tokens,
                record.duration_ms,
                record.success as i64,
                record.error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn usage_since(&self, cutoff: &str) -> Result<UsageTotals, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let totals = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
             FROM usage_log WHERE created_at >= ?1",
            params![cutoff],
            |row| {
                Ok(UsageTotals {
                    calls: row.get(0)?,
                    input_tokens: row.get(1)?,
                    output_tokens: row.get(2)?,
                    failures: row.get(3)?,
                })
            },
        )?;
        Ok(totals)
    }

    pub fn usage_by_agent_since(&self, cutoff: &str) -> Result<Vec<(String, UsageTotals)>, StoreError> {
        self.usage_grouped_since("agent", cutoff)
    }

    pub fn usage_by_provider_since(&self, cutoff: &str) -> Result<Vec<(String, UsageTotals)>, StoreError> {
        self.usage_grouped_since("provider", cutoff)
    }

    fn usage_grouped_since(&self, column: &str, cutoff: &str) -> Result<Vec<(String, UsageTotals)>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        // `column` is one of two fixed identifiers, never user input
        let sql = format!(
            "SELECT {column}, COUNT(*), COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
             FROM usage_log WHERE created_at >= ?1 GROUP BY {column} ORDER BY {column} ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    UsageTotals {
                        calls: row.get(1)?,
                        input_tokens: row.get(2)?,
                        output_tokens: row.get(3)?,
                        failures: row.get(4)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn log_activity(&self, event_type: &str, agent: &str, detail: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO activity_log (event_type, agent, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![event_type, agent, detail, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT event_type, agent, detail, created_at FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ActivityEvent {
                    event_type: row.get(0)?,
                    agent: row.get(1)?,
                    detail: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<MemoryStats, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let (memories, short_term, long_term): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN tier = 'short_term' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN tier = 'long_term' THEN 1 ELSE 0 END), 0)
             FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let facts: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_cache", [], |row| row.get(0))?;
        let links: i64 = conn.query_row("SELECT COUNT(*) FROM memory_links", [], |row| row.get(0))?;
        Ok(MemoryStats {
            memories,
            short_term,
            long_term,
            facts,
            links,
        })
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let tier_raw: String = row.get(3)?;
    let tags_raw: Option<String> = row.get(5)?;
    let metadata_raw: Option<String> = row.get(10)?;

    Ok(MemoryEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        embedding: row.get::<_, Option<Vec<u8>>>(2)?.map(|b| deserialize_embedding(&b)),
        tier: MemoryTier::from_str(&tier_raw).unwrap_or(MemoryTier::ShortTerm),
        importance: row.get(4)?,
        tags: tags_raw
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        access_count: row.get(8)?,
        source_agent: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        metadata: metadata_raw
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| serde_json::json!({})),
    })
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<KnowledgeFact> {
    let metadata_raw: Option<String> = row.get(7)?;

    Ok(KnowledgeFact {
        id: row.get(0)?,
        fact: row.get(1)?,
        embedding: row.get::<_, Option<Vec<u8>>>(2)?.map(|b| deserialize_embedding(&b)),
        source: row.get(3)?,
        verified_by: row.get(4)?,
        verified_at: row.get(5)?,
        confidence: row.get(6)?,
        metadata: metadata_raw
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| serde_json::json!({})),
        last_accessed_at: row.get(8)?,
        access_count: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::l2_normalize;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> MemoryStore {
        MemoryStore::open(temp.path().join("memory.db")).unwrap()
    }

    fn unit_vec(dims: usize, seed: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dims).map(|i| ((i + seed) % 7) as f32 + 1.0).collect();
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_memory_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let entry = MemoryEntry::new("user prefers rust", "brain")
            .with_embedding(Some(unit_vec(8, 1)))
            .with_importance(0.7)
            .with_tags(vec!["preference".to_string()]);
        store.insert_memory(&entry).unwrap();

        let back = store.get_memory(&entry.id).unwrap().unwrap();
        assert_eq!(back.content, "user prefers rust");
        assert_eq!(back.tier, MemoryTier::ShortTerm);
        assert_eq!(back.tags, vec!["preference"]);
        assert_eq!(back.embedding.unwrap(), entry.embedding.unwrap());
    }

    #[test]
    fn test_embedding_norm_invariant() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        for seed in 0..5 {
            let entry = MemoryEntry::new(format!("note {seed}"), "brain").with_embedding(Some(unit_vec(16, seed)));
            store.insert_memory(&entry).unwrap();
        }

        for entry in store.memories_with_embeddings().unwrap() {
            let v = entry.embedding.unwrap();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_null_embedding_excluded_from_scan() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        store.insert_memory(&MemoryEntry::new("no vector", "brain")).unwrap();
        store
            .insert_memory(&MemoryEntry::new("has vector", "brain").with_embedding(Some(unit_vec(8, 3))))
            .unwrap();

        assert_eq!(store.count_memories().unwrap(), 2);
        let embedded = store.memories_with_embeddings().unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].content, "has vector");
    }

    #[test]
    fn test_boost_importance_caps_at_one() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let entry = MemoryEntry::new("x", "brain").with_importance(0.95);
        store.insert_memory(&entry).unwrap();
        store.boost_importance(&entry.id, 0.1).unwrap();

        let back = store.get_memory(&entry.id).unwrap().unwrap();
        assert!((back.importance - 1.0).abs() < 1e-9);
        assert!(back.updated_at >= entry.updated_at);
    }

    #[test]
    fn test_link_unique_per_relation() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let link = MemoryLink::new("a", "b", "related_to", 1.0);
        store.add_link(&link).unwrap();
        store.add_link(&link).unwrap();
        store.add_link(&MemoryLink::new("a", "b", "consolidated_into", 1.0)).unwrap();

        assert_eq!(store.links_for("a").unwrap().len(), 2);
    }

    #[test]
    fn test_fact_round_trip_and_touch() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let fact = KnowledgeFact::new("sqlite uses wal", "verifier", 0.85);
        store.store_fact(&fact).unwrap();
        store.touch_fact(&fact.id).unwrap();
        store.touch_fact(&fact.id).unwrap();

        let back = store.get_fact(&fact.id).unwrap().unwrap();
        assert_eq!(back.access_count, 2);
        assert!(back.last_accessed_at.is_some());
        assert!((back.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_open_twice_preserves_data() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.db");

        let entry = MemoryEntry::new("survives reopen", "brain");
        {
            let store = MemoryStore::open(&path).unwrap();
            store.insert_memory(&entry).unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.count_memories().unwrap(), 1);
        assert!(store.get_memory(&entry.id).unwrap().is_some());
    }

    #[test]
    fn test_usage_aggregation() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        store
            .log_usage(&UsageRecord {
                agent: "brain".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                provider: "anthropic".to_string(),
                input_tokens: 100,
                output_tokens: 50,
                duration_ms: 900,
                success: true,
                error: None,
            })
            .unwrap();
        store
            .log_usage(&UsageRecord {
                agent: "guardian".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                provider: "anthropic".to_string(),
                input_tokens: 10,
                output_tokens: 0,
                duration_ms: 100,
                success: false,
                error: Some("timeout".to_string()),
            })
            .unwrap();

        let totals = store.usage_since("2000-01-01T00:00:00Z").unwrap();
        assert_eq!(totals.calls, 2);
        assert_eq!(totals.input_tokens, 110);
        assert_eq!(totals.failures, 1);

        let by_agent = store.usage_by_agent_since("2000-01-01T00:00:00Z").unwrap();
        assert_eq!(by_agent.len(), 2);
        assert_eq!(by_agent[0].0, "brain");
    }

    #[test]
    fn test_maintenance_lock_excludes() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let lock = store.maintenance_lock().unwrap();
        // A second exclusive try on the same file must fail while held
        let lock_path = store.db_path().with_extension("lock");
        let second = File::create(&lock_path).unwrap();
        assert!(second.try_lock_exclusive().is_err());
        drop(lock);
        assert!(second.try_lock_exclusive().is_ok());
    }
}
