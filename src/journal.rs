//! Append-only JSON-lines files, one per key, under a directory.
//!
//! Writes to the same key are serialized by a per-key lock; different keys
//! never contend beyond the brief map lookup. Each record is written with a
//! single `write_all` of `line + "\n"` and flushed, so readers holding the
//! same lock never observe a torn line.
//!
//! No file handle outlives the call that opened it, and a key's lock is
//! dropped once nobody is using it. Reads and failed writes never create a
//! file.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, SimError};

/// Per-key lock. Files are opened for each append and closed after it.
type Slot = Arc<Mutex<()>>;

#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn count_lines(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut n = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

/// Keys become file names, so they may not contain path syntax.
pub fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(SimError::InvalidRunId(key.to_string()))
    }
}

impl Journal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", key))
    }

    fn slot(&self, key: &str) -> Result<Slot> {
        validate_key(key)?;
        let mut slots = lock(&self.slots);
        Ok(Arc::clone(slots.entry(key.to_string()).or_default()))
    }

    /// Drop the key's lock from the map if no other caller holds it.
    fn release(&self, key: &str, slot: Slot) {
        let mut slots = lock(&self.slots);
        // One reference in the map, one here.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }

    fn with_slot<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let slot = self.slot(key)?;
        let res = {
            let _guard = lock(&slot);
            f()
        };
        self.release(key, slot);
        res
    }

    /// Append lines for `key` while holding its lock. `build` sees how many
    /// records the key already has and returns the lines to write. Nothing
    /// is created on disk unless `build` returns at least one line.
    pub fn append_with<F>(&self, key: &str, build: F) -> Result<u64>
    where
        F: FnOnce(u64) -> Result<Vec<String>>,
    {
        let path = self.path(key);
        self.with_slot(key, || {
            let n = count_lines(&path)?;
            let lines = build(n)?;
            if lines.is_empty() {
                return Ok(n);
            }
            let mut buf = Vec::new();
            for line in &lines {
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&buf)?;
            file.flush()?;
            Ok(n + lines.len() as u64)
        })
    }

    /// Like `append_with`, but `build` sees the existing records themselves.
    /// Read and write happen under the same lock.
    pub fn update_with<F>(&self, key: &str, build: F) -> Result<u64>
    where
        F: FnOnce(&[String]) -> Result<Vec<String>>,
    {
        let path = self.path(key);
        self.append_with(key, |n| {
            let existing = if n == 0 { Vec::new() } else { read_lines(&path)? };
            build(&existing)
        })
    }

    /// All records for `key`, or `None` if the key has never been written.
    pub fn read(&self, key: &str) -> Result<Option<Vec<String>>> {
        let path = self.path(key);
        self.with_slot(key, || {
            if !path.exists() {
                return Ok(None);
            }
            let lines = read_lines(&path)?;
            Ok(if lines.is_empty() { None } else { Some(lines) })
        })
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Keys with at least one record, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if count_lines(&path)? > 0 {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
