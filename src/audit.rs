//! Per-run audit trail.
//!
//! Append-only: events can be added and read back, never edited or removed.
//! Sequence numbers are per run, start at 0 and have no gaps.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::difficulty::Difficulty;
use crate::error::{Result, SimError};
use crate::journal::{validate_key, Journal};
use crate::logging::{log, obj, ts_now, v_num, v_str, Domain, Level};
use crate::run::RunStatus;
use crate::scoring::Grade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    ScenarioStart {
        scenario_id: String,
        seed: u64,
        difficulty: Difficulty,
        #[serde(default)]
        bound: Option<usize>,
    },
    Action {
        stage_index: usize,
        action_id: String,
    },
    /// First action that matched the stage's expected response.
    Detection {
        stage_index: usize,
        detection_signal: String,
    },
    PolicyFollowed {
        stage_index: usize,
        policy_tag: String,
        title: String,
    },
    /// A different action on a policy-covered stage not yet handled.
    PolicyIgnored {
        stage_index: usize,
        policy_tag: String,
        title: String,
        action_id: String,
    },
    HintRequested {
        stage_index: usize,
        hints_used: u32,
        max_hints: u32,
    },
    StatusChange {
        from: RunStatus,
        to: RunStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    Scored {
        total: f64,
        grade: Grade,
    },
}

impl AuditKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditKind::ScenarioStart { .. } => "scenario_start",
            AuditKind::Action { .. } => "action",
            AuditKind::Detection { .. } => "detection",
            AuditKind::PolicyFollowed { .. } => "policy_followed",
            AuditKind::PolicyIgnored { .. } => "policy_ignored",
            AuditKind::HintRequested { .. } => "hint_requested",
            AuditKind::StatusChange { .. } => "status_change",
            AuditKind::Scored { .. } => "scored",
        }
    }

    pub fn level(&self) -> Level {
        match self {
            AuditKind::StatusChange {
                to: RunStatus::Aborted, ..
            } => Level::Warn,
            AuditKind::PolicyIgnored { .. } => Level::Warn,
            AuditKind::HintRequested { .. } => Level::Debug,
            _ => Level::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    /// Wall-clock time the event was written
    pub ts: String,
    /// Seconds since run start, as reported by the session
    pub elapsed: f64,
    pub run_id: String,
    pub level: Level,
    #[serde(flatten)]
    pub kind: AuditKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub run_id: String,
    pub events: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    pub first_ts: Option<String>,
    pub last_ts: Option<String>,
    pub last_elapsed: f64,
}

pub trait AuditSink: Send + Sync {
    fn append(&self, run_id: &str, elapsed: f64, kind: AuditKind) -> Result<AuditEvent>;

    /// All events for the run in sequence order; empty if none were written.
    fn read(&self, run_id: &str) -> Result<Vec<AuditEvent>>;

    /// Runs with at least one event, sorted.
    fn run_ids(&self) -> Result<Vec<String>>;

    fn summary(&self, run_id: &str) -> Result<AuditSummary> {
        let events = self.read(run_id)?;
        let mut s = AuditSummary {
            run_id: run_id.to_string(),
            events: events.len(),
            ..Default::default()
        };
        for e in &events {
            *s.by_kind.entry(e.kind.name().to_string()).or_insert(0) += 1;
            *s.by_level.entry(e.level.as_str().to_string()).or_insert(0) += 1;
            s.last_elapsed = s.last_elapsed.max(e.elapsed);
        }
        s.first_ts = events.first().map(|e| e.ts.clone());
        s.last_ts = events.last().map(|e| e.ts.clone());
        Ok(s)
    }
}

fn event(run_id: &str, seq: u64, elapsed: f64, kind: AuditKind) -> AuditEvent {
    AuditEvent {
        seq,
        ts: ts_now(),
        elapsed,
        run_id: run_id.to_string(),
        level: kind.level(),
        kind,
    }
}

fn log_appended(e: &AuditEvent) {
    log(
        Level::Trace,
        Domain::Audit,
        "audit_append",
        obj(&[
            ("run_id", v_str(&e.run_id)),
            ("seq", v_num(e.seq as f64)),
            ("kind", v_str(e.kind.name())),
        ]),
    );
}

/// One `<run_id>.jsonl` file per run.
#[derive(Debug)]
pub struct JsonlAuditLog {
    journal: Journal,
}

impl JsonlAuditLog {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            journal: Journal::open(dir)?,
        })
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, run_id: &str, elapsed: f64, kind: AuditKind) -> Result<AuditEvent> {
        let mut written = None;
        self.journal.append_with(run_id, |seq| {
            let e = event(run_id, seq, elapsed, kind);
            let line = serde_json::to_string(&e)?;
            written = Some(e);
            Ok(vec![line])
        })?;
        let e = written.ok_or_else(|| SimError::NotFound(format!("audit event for {}", run_id)))?;
        log_appended(&e);
        Ok(e)
    }

    fn read(&self, run_id: &str) -> Result<Vec<AuditEvent>> {
        let lines = self.journal.read(run_id)?.unwrap_or_default();
        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        self.journal.keys()
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    runs: Mutex<HashMap<String, Vec<AuditEvent>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, run_id: &str, elapsed: f64, kind: AuditKind) -> Result<AuditEvent> {
        validate_key(run_id)?;
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let events = runs.entry(run_id.to_string()).or_default();
        let e = event(run_id, events.len() as u64, elapsed, kind);
        events.push(e.clone());
        log_appended(&e);
        Ok(e)
    }

    fn read(&self, run_id: &str) -> Result<Vec<AuditEvent>> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
