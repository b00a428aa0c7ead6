use super::traits::{MemoryStore, OutcomeRecord, RejectionRecord};
use crate::engine::decision::TriggerFamily;
use crate::engine::scheduler::CommandStatus;
use crate::error::StoreError;
use crate::platform::{ActionKind, ActionTarget};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// SQLite-backed memory store. Append-only tables for terminal command
/// outcomes and scheduler rejections; the recency query backs the state
/// tracker's read path.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    const SCHEMA_V1: i64 = 1;

    pub fn new(workspace_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace_dir)?;
        let conn = Connection::open(workspace_dir.join("magpie.db"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= Self::SCHEMA_V1 {
            return Ok(());
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outcomes (
                rowid_pk    INTEGER PRIMARY KEY AUTOINCREMENT,
                command_id  TEXT NOT NULL,
                persona_id  TEXT NOT NULL,
                kind        TEXT NOT NULL,
                trigger_family TEXT NOT NULL,
                target      TEXT NOT NULL,
                status      TEXT NOT NULL,
                attempts    INTEGER NOT NULL,
                platform_id TEXT,
                error       TEXT,
                latency_ms  INTEGER,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_persona_time
                ON outcomes(persona_id, recorded_at);
            CREATE TABLE IF NOT EXISTS rejections (
                rowid_pk        INTEGER PRIMARY KEY AUTOINCREMENT,
                persona_id      TEXT NOT NULL,
                kind            TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                reason          TEXT NOT NULL,
                recorded_at     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rejections_persona_time
                ON rejections(persona_id, recorded_at);
            PRAGMA user_version = 1;",
        )?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("bad timestamp {raw}: {e}")))
}

fn outcome_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutcome> {
    Ok(RawOutcome {
        command_id: row.get(0)?,
        persona_id: row.get(1)?,
        kind: row.get(2)?,
        trigger: row.get(3)?,
        target: row.get(4)?,
        status: row.get(5)?,
        attempts: row.get(6)?,
        platform_id: row.get(7)?,
        error: row.get(8)?,
        latency_ms: row.get(9)?,
        recorded_at: row.get(10)?,
    })
}

struct RawOutcome {
    command_id: String,
    persona_id: String,
    kind: String,
    trigger: String,
    target: String,
    status: String,
    attempts: u32,
    platform_id: Option<String>,
    error: Option<String>,
    latency_ms: Option<u64>,
    recorded_at: String,
}

impl RawOutcome {
    fn into_record(self) -> Result<OutcomeRecord, StoreError> {
        Ok(OutcomeRecord {
            kind: ActionKind::from_str(&self.kind)
                .map_err(|_| StoreError::Query(format!("unknown kind: {}", self.kind)))?,
            trigger: TriggerFamily::from_str(&self.trigger)
                .map_err(|_| StoreError::Query(format!("unknown trigger: {}", self.trigger)))?,
            target: ActionTarget::parse(&self.target),
            status: CommandStatus::from_str(&self.status)
                .map_err(|_| StoreError::Query(format!("unknown status: {}", self.status)))?,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            command_id: self.command_id,
            persona_id: self.persona_id,
            attempts: self.attempts,
            platform_id: self.platform_id,
            error: self.error,
            latency_ms: self.latency_ms,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn append_outcome(&self, record: OutcomeRecord) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Append(format!("lock error: {e}")))?;

        conn.execute(
            "INSERT INTO outcomes (command_id, persona_id, kind, trigger_family, target,
                                   status, attempts, platform_id, error, latency_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.command_id,
                record.persona_id,
                record.kind.to_string(),
                record.trigger.to_string(),
                record.target.to_string(),
                record.status.to_string(),
                record.attempts,
                record.platform_id,
                record.error,
                record.latency_ms,
                record.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn append_rejection(&self, record: RejectionRecord) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Append(format!("lock error: {e}")))?;

        conn.execute(
            "INSERT INTO rejections (persona_id, kind, idempotency_key, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.persona_id,
                record.kind.to_string(),
                record.idempotency_key,
                record.reason,
                record.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn recent_outcomes(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(format!("lock error: {e}")))?;

        let mut stmt = conn.prepare(
            "SELECT command_id, persona_id, kind, trigger_family, target, status,
                    attempts, platform_id, error, latency_ms, recorded_at
             FROM outcomes
             WHERE persona_id = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![persona_id, since.to_rfc3339(), limit as i64],
            outcome_from_row,
        )?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    async fn recent_rejections(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RejectionRecord>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(format!("lock error: {e}")))?;

        let mut stmt = conn.prepare(
            "SELECT persona_id, kind, idempotency_key, reason, recorded_at
             FROM rejections
             WHERE persona_id = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![persona_id, since.to_rfc3339(), limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (persona, kind, key, reason, recorded_at) = row?;
            records.push(RejectionRecord {
                persona_id: persona,
                kind: ActionKind::from_str(&kind)
                    .map_err(|_| StoreError::Query(format!("unknown kind: {kind}")))?,
                idempotency_key: key,
                reason,
                recorded_at: parse_timestamp(&recorded_at)?,
            });
        }
        Ok(records)
    }
}
