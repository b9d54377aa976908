use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use crate::conclusion::{ConclusionKey, ConclusionRecord};
use crate::now_s;

/// Destination for conclusion records. Each key is written at most once.
pub trait ConclusionSink: Send {
    /// Writes every entry or none of them. Fails if any key already exists.
    fn persist_all(&mut self, entries: &[(ConclusionKey, ConclusionRecord)]) -> Result<()>;

    fn persist(&mut self, key: &ConclusionKey, record: &ConclusionRecord) -> Result<()> {
        self.persist_all(&[(key.clone(), record.clone())])
    }
}

pub struct SqliteConclusionStore {
    conn: Connection,
}

impl SqliteConclusionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS conclusions (
              key TEXT PRIMARY KEY,
              report_id TEXT NOT NULL,
              kickboard_index INTEGER,
              created_at INTEGER NOT NULL,
              result TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conclusions_report ON conclusions(report_id);
            "#,
        )?;
        Ok(())
    }

    pub fn get(&self, key: &ConclusionKey) -> Result<Option<ConclusionRecord>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM conclusions WHERE key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    pub fn records_for_report(&self, report_id: &str) -> Result<Vec<ConclusionRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM conclusions WHERE report_id = ?1 ORDER BY key ASC")?;
        let payloads = stmt
            .query_map(params![report_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM conclusions", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl ConclusionSink for SqliteConclusionStore {
    fn persist_all(&mut self, entries: &[(ConclusionKey, ConclusionRecord)]) -> Result<()> {
        let created_at = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("current time exceeds i64 range"))?;
        // Dropping the transaction on an early return rolls it back.
        let tx = self.conn.transaction()?;
        for (key, record) in entries {
            let key_text = key.to_string();
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conclusions WHERE key = ?1",
                    params![key_text],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(anyhow!("conclusion {} already persisted", key_text));
            }

            let kickboard_index = key
                .kickboard()
                .map(i64::try_from)
                .transpose()
                .map_err(|_| anyhow!("kickboard index exceeds i64 range"))?;
            let result = serde_json::to_value(record.result)?
                .as_str()
                .unwrap_or_default()
                .to_string();
            let payload_json = serde_json::to_string(record)?;

            tx.execute(
                r#"
                INSERT INTO conclusions(key, report_id, kickboard_index, created_at, result, payload_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    key_text,
                    key.report_id(),
                    kickboard_index,
                    created_at,
                    result,
                    payload_json
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryConclusionStore {
    records: BTreeMap<String, ConclusionRecord>,
}

impl InMemoryConclusionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConclusionKey) -> Option<&ConclusionRecord> {
        self.records.get(&key.to_string())
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ConclusionSink for InMemoryConclusionStore {
    fn persist_all(&mut self, entries: &[(ConclusionKey, ConclusionRecord)]) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for (key, _) in entries {
            let key_text = key.to_string();
            if self.records.contains_key(&key_text) || !seen.insert(key_text.clone()) {
                return Err(anyhow!("conclusion {} already persisted", key_text));
            }
        }
        for (key, record) in entries {
            self.records.insert(key.to_string(), record.clone());
        }
        Ok(())
    }
}
