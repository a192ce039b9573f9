use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Result, SimError};
use crate::journal::{validate_key, Journal};

use super::ledger::{parse_lines, LedgerEntry};

/// Durable per-run ledger storage.
///
/// Implementations serialize writes per run id. `update` runs its closure
/// under that run's lock, so a check against the current entries and the
/// append that follows it are atomic.
pub trait RunStore: Send + Sync {
    /// Write the first entries of a new run. `DuplicateRun` if it exists.
    fn create(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()>;

    /// Append whatever `build` returns given the run's current entries.
    /// `NotFound` if the run does not exist.
    fn update(
        &self,
        run_id: &str,
        build: &mut dyn FnMut(&[LedgerEntry]) -> Result<Vec<LedgerEntry>>,
    ) -> Result<()>;

    fn entries(&self, run_id: &str) -> Result<Option<Vec<LedgerEntry>>>;

    fn run_ids(&self) -> Result<Vec<String>>;

    fn append(&self, run_id: &str, entry: LedgerEntry) -> Result<()> {
        let mut entry = Some(entry);
        self.update(run_id, &mut |_| Ok(entry.take().into_iter().collect()))
    }
}

pub(crate) fn missing(run_id: &str) -> SimError {
    SimError::NotFound(format!("run {}", run_id))
}

fn encode(entries: &[LedgerEntry]) -> Result<Vec<String>> {
    entries
        .iter()
        .map(|e| serde_json::to_string(e).map_err(SimError::from))
        .collect()
}

/// One `<run_id>.jsonl` file per run.
#[derive(Debug)]
pub struct JsonlRunStore {
    journal: Journal,
}

impl JsonlRunStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            journal: Journal::open(dir)?,
        })
    }
}

impl RunStore for JsonlRunStore {
    fn create(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        let lines = encode(entries)?;
        self.journal.append_with(run_id, |n| {
            if n > 0 {
                return Err(SimError::DuplicateRun(run_id.to_string()));
            }
            Ok(lines)
        })?;
        Ok(())
    }

    fn update(
        &self,
        run_id: &str,
        build: &mut dyn FnMut(&[LedgerEntry]) -> Result<Vec<LedgerEntry>>,
    ) -> Result<()> {
        self.journal.update_with(run_id, |lines| {
            if lines.is_empty() {
                return Err(missing(run_id));
            }
            let current = parse_lines(run_id, lines)?;
            encode(&build(&current)?)
        })?;
        Ok(())
    }

    fn entries(&self, run_id: &str) -> Result<Option<Vec<LedgerEntry>>> {
        match self.journal.read(run_id)? {
            Some(lines) => Ok(Some(parse_lines(run_id, &lines)?)),
            None => Ok(None),
        }
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        self.journal.keys()
    }
}

/// In-process store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, Vec<LedgerEntry>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn create(&self, run_id: &str, entries: &[LedgerEntry]) -> Result<()> {
        validate_key(run_id)?;
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        if runs.contains_key(run_id) {
            return Err(SimError::DuplicateRun(run_id.to_string()));
        }
        runs.insert(run_id.to_string(), entries.to_vec());
        Ok(())
    }

    fn update(
        &self,
        run_id: &str,
        build: &mut dyn FnMut(&[LedgerEntry]) -> Result<Vec<LedgerEntry>>,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let entries = runs.get_mut(run_id).ok_or_else(|| missing(run_id))?;
        let more = build(entries)?;
        entries.extend(more);
        Ok(())
    }

    fn entries(&self, run_id: &str) -> Result<Option<Vec<LedgerEntry>>> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(runs.get(run_id).cloned())
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
