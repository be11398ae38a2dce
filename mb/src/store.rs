//! SQLite-backed message queue

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::{AgentRole, BusError, BusMessage, MessageStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS message_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    from_agent TEXT NOT NULL,
    to_agent TEXT NOT NULL,
    action TEXT NOT NULL,
    payload TEXT,
    context TEXT,
    constraints TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    result TEXT,
    error TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_mq_to_status ON message_queue(to_agent, status);
CREATE INDEX IF NOT EXISTS idx_mq_task_id ON message_queue(task_id);
";

/// Durable FIFO of typed messages.
///
/// A single process owns the writer side; the guardian reads concurrently
/// through WAL. Per-recipient delivery order follows the monotonic rowid.
pub struct MessageBus {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MessageBus {
    /// Open or create the bus database. Schema init is idempotent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        // journal_mode returns a row, so query_row instead of execute
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "Opened message bus");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Append a message with status=pending. Returns the rowid.
    pub fn send(&self, msg: &BusMessage) -> Result<i64, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        conn.execute(
            "INSERT INTO message_queue
             (task_id, from_agent, to_agent, action, payload, context, constraints, status, result, error, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                msg.task_id,
                msg.from_agent.as_str(),
                msg.to_agent.as_str(),
                msg.action,
                msg.payload.to_string(),
                msg.context.to_string(),
                msg.constraints.to_string(),
                msg.status.as_str(),
                msg.result.as_ref().map(|r| r.to_string()),
                msg.error,
                msg.metadata.to_string(),
                msg.created_at,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Return up to `limit` pending messages addressed to `role`, atomically
    /// transitioning them to in_progress. Delivery follows send order.
    pub fn receive(&self, role: AgentRole, limit: usize) -> Result<Vec<BusMessage>, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, task_id, from_agent, to_agent, action, payload, context, constraints, status, result, error, metadata, created_at
             FROM message_queue WHERE to_agent = ?1 AND status = 'pending' ORDER BY id ASC LIMIT ?2",
        )?;
        let rows: Vec<(i64, BusMessage)> = stmt
            .query_map(params![role.as_str(), limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row_to_message_at(row, 1)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let now = Utc::now().to_rfc3339();
        let mut messages = Vec::with_capacity(rows.len());
        for (id, mut msg) in rows {
            conn.execute(
                "UPDATE message_queue SET status = 'in_progress', updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            msg.status = MessageStatus::InProgress;
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Update status (and optionally result/error) on the latest row for a task.
    pub fn update_status(
        &self,
        task_id: &str,
        status: MessageStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        conn.execute(
            "UPDATE message_queue SET status = ?1, result = COALESCE(?2, result), error = COALESCE(?3, error), updated_at = ?4
             WHERE id = (SELECT MAX(id) FROM message_queue WHERE task_id = ?5)",
            params![
                status.as_str(),
                result.map(|r| r.to_string()),
                error,
                Utc::now().to_rfc3339(),
                task_id,
            ],
        )?;
        Ok(())
    }

    /// Fetch the latest row for a task_id.
    pub fn get_task(&self, task_id: &str) -> Result<Option<BusMessage>, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        conn.query_row(
            "SELECT task_id, from_agent, to_agent, action, payload, context, constraints, status, result, error, metadata, created_at
             FROM message_queue WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
            params![task_id],
            |row| row_to_message_at(row, 0),
        )
        .optional()
        .map_err(BusError::from)
    }

    /// Read rows above a high-water mark, excluding a sender. Used by the
    /// guardian intercept loop. Returns (rowid, message) pairs in id order.
    pub fn scan_after(
        &self,
        after_id: i64,
        exclude_sender: AgentRole,
        limit: usize,
    ) -> Result<Vec<(i64, BusMessage)>, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, task_id, from_agent, to_agent, action, payload, context, constraints, status, result, error, metadata, created_at
             FROM message_queue WHERE id > ?1 AND from_agent != ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![after_id, exclude_sender.as_str(), limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row_to_message_at(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Merge a key into the metadata of the latest row for a task. Used by
    /// the guardian to attach FLAG issues without changing status.
    pub fn attach_metadata(&self, task_id: &str, key: &str, value: serde_json::Value) -> Result<(), BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        let existing: Option<String> = conn
            .query_row(
                "SELECT metadata FROM message_queue WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut metadata: serde_json::Value = existing
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert(key.to_string(), value);
        }

        conn.execute(
            "UPDATE message_queue SET metadata = ?1, updated_at = ?2
             WHERE id = (SELECT MAX(id) FROM message_queue WHERE task_id = ?3)",
            params![metadata.to_string(), Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(())
    }

    /// Count of rows per status, for the inspection CLI.
    pub fn status_counts(&self) -> Result<Vec<(String, i64)>, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM message_queue GROUP BY status ORDER BY status ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent rows, newest first, for the inspection CLI.
    pub fn recent(&self, limit: usize) -> Result<Vec<(i64, BusMessage)>, BusError> {
        let conn = self.conn.lock().expect("bus lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, task_id, from_agent, to_agent, action, payload, context, constraints, status, result, error, metadata, created_at
             FROM message_queue ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row_to_message_at(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Decode a message starting at column `base` (task_id first).
fn row_to_message_at(row: &Row<'_>, base: usize) -> rusqlite::Result<BusMessage> {
    let parse_json = |s: Option<String>| {
        s.and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    };

    let from_raw: String = row.get(base + 1)?;
    let to_raw: String = row.get(base + 2)?;
    let status_raw: String = row.get(base + 7)?;

    let invalid = |text: String| {
        rusqlite::Error::FromSqlConversionFailure(
            base,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, text)),
        )
    };

    Ok(BusMessage {
        task_id: row.get(base)?,
        from_agent: AgentRole::from_str(&from_raw).map_err(|e| invalid(e.to_string()))?,
        to_agent: AgentRole::from_str(&to_raw).map_err(|e| invalid(e.to_string()))?,
        action: row.get(base + 3)?,
        payload: parse_json(row.get(base + 4)?),
        context: parse_json(row.get(base + 5)?),
        constraints: parse_json(row.get(base + 6)?),
        status: MessageStatus::from_str(&status_raw).map_err(|e| invalid(e.to_string()))?,
        result: row
            .get::<_, Option<String>>(base + 8)?
            .and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get(base + 9)?,
        metadata: parse_json(row.get(base + 10)?),
        created_at: row.get(base + 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_bus(temp: &TempDir) -> MessageBus {
        MessageBus::open(temp.path().join("bus.db")).unwrap()
    }

    #[test]
    fn test_send_receive_in_order() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        let m1 = BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build")
            .with_payload(serde_json::json!({"n": 1}));
        let m2 = BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build")
            .with_payload(serde_json::json!({"n": 2}));
        bus.send(&m1).unwrap();
        bus.send(&m2).unwrap();

        let received = bus.receive(AgentRole::Builder, 10).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].task_id, m1.task_id);
        assert_eq!(received[1].task_id, m2.task_id);
        assert_eq!(received[0].status, MessageStatus::InProgress);

        // Already claimed - nothing left
        assert!(bus.receive(AgentRole::Builder, 10).unwrap().is_empty());
    }

    #[test]
    fn test_receive_filters_by_recipient() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        bus.send(&BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build"))
            .unwrap();
        bus.send(&BusMessage::new(AgentRole::Brain, AgentRole::Verifier, "verify"))
            .unwrap();

        let for_verifier = bus.receive(AgentRole::Verifier, 10).unwrap();
        assert_eq!(for_verifier.len(), 1);
        assert_eq!(for_verifier[0].action, "verify");
    }

    #[test]
    fn test_update_status_and_get_task() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        let msg = BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build");
        bus.send(&msg).unwrap();

        bus.update_status(
            &msg.task_id,
            MessageStatus::Completed,
            Some(&serde_json::json!({"content": "done"})),
            None,
        )
        .unwrap();

        let latest = bus.get_task(&msg.task_id).unwrap().unwrap();
        assert_eq!(latest.status, MessageStatus::Completed);
        assert_eq!(latest.result.unwrap()["content"], "done");
    }

    #[test]
    fn test_blocked_requires_error() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        let msg = BusMessage::new(AgentRole::Builder, AgentRole::Brain, "build_result");
        bus.send(&msg).unwrap();
        bus.update_status(&msg.task_id, MessageStatus::Blocked, None, Some("secret leak"))
            .unwrap();

        let latest = bus.get_task(&msg.task_id).unwrap().unwrap();
        assert_eq!(latest.status, MessageStatus::Blocked);
        assert!(latest.error.as_deref().map(|e| !e.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_scan_after_excludes_sender() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        bus.send(&BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build"))
            .unwrap();
        bus.send(&BusMessage::new(AgentRole::Guardian, AgentRole::Brain, "audit_result"))
            .unwrap();
        bus.send(&BusMessage::new(AgentRole::Builder, AgentRole::Brain, "build_result"))
            .unwrap();

        let scanned = bus.scan_after(0, AgentRole::Guardian, 20).unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned.iter().all(|(_, m)| m.from_agent != AgentRole::Guardian));

        // High-water mark advances
        let last_id = scanned.last().unwrap().0;
        assert!(bus.scan_after(last_id, AgentRole::Guardian, 20).unwrap().is_empty());
    }

    #[test]
    fn test_attach_metadata_preserves_status() {
        let temp = TempDir::new().unwrap();
        let bus = open_bus(&temp);

        let msg = BusMessage::new(AgentRole::Builder, AgentRole::Brain, "build_result");
        bus.send(&msg).unwrap();
        bus.update_status(&msg.task_id, MessageStatus::Completed, None, None).unwrap();

        bus.attach_metadata(
            &msg.task_id,
            "guardian_flags",
            serde_json::json!([{"severity": "medium", "description": "budget at 51%"}]),
        )
        .unwrap();

        let latest = bus.get_task(&msg.task_id).unwrap().unwrap();
        assert_eq!(latest.status, MessageStatus::Completed);
        assert_eq!(latest.metadata["guardian_flags"][0]["severity"], "medium");
    }

    #[test]
    fn test_open_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bus.db");

        {
            let bus = MessageBus::open(&path).unwrap();
            bus.send(&BusMessage::new(AgentRole::Brain, AgentRole::Builder, "build"))
                .unwrap();
        }

        // Re-open and confirm data survived schema re-init
        let bus = MessageBus::open(&path).unwrap();
        let counts = bus.status_counts().unwrap();
        assert_eq!(counts, vec![("pending".to_string(), 1)]);
    }
}
