use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use stagecast_core::TurnRecord;
use std::path::Path;
use thiserror::Error;

pub const TURN_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("turn {turn_id} not found in session {session_id}")]
    NotFound { session_id: String, turn_id: String },
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Read side used by replay, write side used by the live recorder.
pub trait TurnStore {
    fn fetch_turn(&self, session_id: &str, turn_id: &str) -> Result<TurnRecord, StorageError>;
    fn save_turn(&self, record: &TurnRecord) -> Result<(), StorageError>;
}

pub struct SqliteTurnStore {
    conn: Connection,
}

impl SqliteTurnStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > TURN_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: TURN_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_turn_store.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn turns_for_session(&self, session_id: &str) -> Result<Vec<TurnRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT record_json
            FROM turns
            WHERE session_id = ?1
            ORDER BY rowid ASC
            ",
        )?;
        let rows = stmt.query_map([session_id], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode_record(&row?)?);
        }
        Ok(records)
    }

    pub fn turn_count(&self, session_id: &str) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?)
    }
}

impl TurnStore for SqliteTurnStore {
    fn fetch_turn(&self, session_id: &str, turn_id: &str) -> Result<TurnRecord, StorageError> {
        let record_json: Option<String> = self
            .conn
            .query_row(
                "
                SELECT record_json
                FROM turns
                WHERE session_id = ?1 AND turn_id = ?2
                ",
                params![session_id, turn_id],
                |row| row.get(0),
            )
            .optional()?;

        match record_json {
            Some(raw) => decode_record(&raw),
            None => Err(StorageError::NotFound {
                session_id: session_id.to_string(),
                turn_id: turn_id.to_string(),
            }),
        }
    }

    fn save_turn(&self, record: &TurnRecord) -> Result<(), StorageError> {
        let record_json = serde_json::to_string(record)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO turns (
                session_id,
                turn_id,
                profile_type,
                status,
                record_json,
                stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id, turn_id) DO UPDATE SET
                profile_type = excluded.profile_type,
                status = excluded.status,
                record_json = excluded.record_json,
                stored_at = excluded.stored_at
            ",
            params![
                record.session_id,
                record.turn_id,
                record.profile_type.as_str(),
                record.status.as_str(),
                record_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn decode_record(raw: &str) -> Result<TurnRecord, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecast_core::{ProfileType, StoredEvent, TurnStatus};
    use tempfile::NamedTempFile;

    fn sample_record(turn_id: &str, status: TurnStatus) -> TurnRecord {
        let mut record = TurnRecord::new("session-a", turn_id, ProfileType::ToolEnabled, status);
        record.input_tokens = 120;
        record.output_tokens = 45;
        record.execution_trace = Some(vec![
            StoredEvent::new("plan_generated", json!({"phase_count": 2})),
            StoredEvent::new("phase_start", json!({"phase_num": 1, "goal": "Inspect"})),
        ]);
        record
    }

    #[test]
    fn migrate_sets_schema_version_and_is_idempotent() {
        let store = SqliteTurnStore::open_in_memory().expect("open");
        assert_eq!(store.schema_version().expect("version"), TURN_SCHEMA_VERSION);
        store.migrate().expect("second migrate");
        assert_eq!(store.schema_version().expect("version"), TURN_SCHEMA_VERSION);
    }

    #[test]
    fn saved_turn_is_fetched_back_unchanged() {
        let store = SqliteTurnStore::open_in_memory().expect("open");
        let record = sample_record("turn-1", TurnStatus::Completed);
        store.save_turn(&record).expect("save");

        let fetched = store.fetch_turn("session-a", "turn-1").expect("fetch");
        assert_eq!(fetched, record);
    }

    #[test]
    fn saving_again_replaces_the_stored_record() {
        let store = SqliteTurnStore::open_in_memory().expect("open");
        store
            .save_turn(&sample_record("turn-1", TurnStatus::Running))
            .expect("save running");
        store
            .save_turn(&sample_record("turn-1", TurnStatus::Cancelled))
            .expect("save cancelled");

        assert_eq!(store.turn_count("session-a").expect("count"), 1);
        let fetched = store.fetch_turn("session-a", "turn-1").expect("fetch");
        assert_eq!(fetched.status, TurnStatus::Cancelled);
    }

    #[test]
    fn missing_turn_reports_not_found() {
        let store = SqliteTurnStore::open_in_memory().expect("open");
        let err = store
            .fetch_turn("session-a", "nope")
            .expect_err("missing turn");
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn turns_for_session_keeps_insertion_order_across_reopen() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let store = SqliteTurnStore::open(file.path()).expect("open");
            store
                .save_turn(&sample_record("turn-b", TurnStatus::Completed))
                .expect("save b");
            store
                .save_turn(&sample_record("turn-a", TurnStatus::Error))
                .expect("save a");
        }
        let store = SqliteTurnStore::open(file.path()).expect("reopen");
        let turns = store.turns_for_session("session-a").expect("list");
        let ids: Vec<&str> = turns.iter().map(|turn| turn.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["turn-b", "turn-a"]);
        assert!(store.turns_for_session("other").expect("list").is_empty());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 99", [])
                .expect("bump version");
        }
        let err = SqliteTurnStore::open(file.path())
            .err()
            .expect("newer schema rejected");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 99, .. }
        ));
    }
}
