use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SimError};
use crate::journal::validate_key;

use super::ledger::LedgerEntry;
use super::store::{missing, RunStore};

/// Ledger rows in an embedded SQLite database. One connection behind a
/// mutex, so writes are serialized across all runs.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS ledger (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                op TEXT NOT NULL,
                entry TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );
            COMMIT;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn load(conn: &Connection, run_id: &str) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare("SELECT seq, entry FROM ledger WHERE run_id = ?1 ORDER BY seq")?;
    let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(1))?;
    let mut out = Vec::new();
    for (n, row) in rows.enumerate() {
        let entry = serde_json::from_str(&row?).map_err(|e| SimError::CorruptLedger {
            run_id: run_id.to_string(),
            reason: format!("row {}: {}", n + 1, e),
        })?;
        out.push(entry);
    }
    Ok(out)
}

fn insert(conn: &Connection, run_id: &str, start_seq: usize, entries: &[LedgerEntry]) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        conn.execute(
            "INSERT INTO ledger (run_id, seq, op, entry) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                (start_seq + i) as i64,
                entry.op(),
                serde_json::to_string(entry)?
            ],
        )?;
    }
    Ok(())
}

impl RunStore for SqliteRunStore {
    fn create(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        validate_key(run_id)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM ledger WHERE run_id = ?1 LIMIT 1", params![run_id], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(SimError::DuplicateRun(run_id.to_string()));
        }
        insert(&tx, run_id, 0, entries)?;
        tx.commit()?;
        Ok(())
    }

    fn update(
        &self,
        run_id: &str,
        build: &mut dyn FnMut(&[LedgerEntry]) -> Result<Vec<LedgerEntry>>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = load(&tx, run_id)?;
        if current.is_empty() {
            return Err(missing(run_id));
        }
        let more = build(&current)?;
        insert(&tx, run_id, current.len(), &more)?;
        tx.commit()?;
        Ok(())
    }

    fn entries(&self, run_id: &str) -> Result<Option<Vec<LedgerEntry>>> {
        let conn = self.conn();
        let entries = load(&conn, run_id)?;
        Ok(if entries.is_empty() { None } else { Some(entries) })
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT run_id FROM ledger ORDER BY run_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::Difficulty;
    use crate::run::RunStatus;

    fn opened(run_id: &str) -> LedgerEntry {
        LedgerEntry::RunOpened {
            run_id: run_id.into(),
            scenario_id: "ddos".into(),
            seed: 3,
            difficulty: Difficulty::Expert,
            bound: Some(1),
            base_interval: 60.0,
            start_time: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_sqlite_store_contract() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.create("run-a", &[opened("run-a")]).unwrap();
        assert!(matches!(store.create("run-a", &[]), Err(SimError::DuplicateRun(_))));
        store
            .append(
                "run-a",
                LedgerEntry::Status {
                    run_id: "run-a".into(),
                    status: RunStatus::Aborted,
                },
            )
            .unwrap();
        assert!(matches!(
            store.append("run-x", LedgerEntry::Hint { run_id: "run-x".into() }),
            Err(SimError::NotFound(_))
        ));
        let entries = store.entries("run-a").unwrap().unwrap();
        assert_eq!(entries[0], opened("run-a"));
        assert_eq!(entries[1].op(), "status");
        assert!(store.entries("run-x").unwrap().is_none());
        assert_eq!(store.run_ids().unwrap(), vec!["run-a".to_string()]);
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.sqlite");
        SqliteRunStore::open(&path).unwrap().create("run-a", &[opened("run-a")]).unwrap();
        let store = SqliteRunStore::open(&path).unwrap();
        assert_eq!(store.entries("run-a").unwrap().unwrap().len(), 1);
    }
}
