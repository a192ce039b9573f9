//! Run records: one player's attempt at a scenario instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::difficulty::Difficulty;
use crate::error::{Result, SimError};
use crate::logging::{ts_epoch_ms, ts_now};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Seconds between stage deadlines at time multiplier 1.0, for runs that
/// don't say otherwise.
pub const DEFAULT_BASE_INTERVAL: f64 = 60.0;

pub(crate) fn default_base_interval() -> f64 {
    DEFAULT_BASE_INTERVAL
}

/// Run ID: run-<epoch_ms>-<pid>-<seq>
pub fn new_run_id() -> String {
    format!(
        "run-{}-{}-{}",
        ts_epoch_ms(),
        process::id(),
        RUN_SEQ.fetch_add(1, Ordering::SeqCst)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    /// Seconds since run start
    pub timestamp: f64,
    pub stage_index: usize,
    pub action_id: String,
    /// Filled in by the scoring engine on its own copy, never at capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_expected: Option<bool>,
}

impl PlayerAction {
    pub fn new(timestamp: f64, stage_index: usize, action_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            stage_index,
            action_id: action_id.into(),
            matched_expected: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub scenario_id: String,
    pub seed: u64,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<usize>,
    /// Interval the run's deadlines were streamed with
    #[serde(default = "default_base_interval")]
    pub base_interval: f64,
    pub start_time: String,
    pub actions: Vec<PlayerAction>,
    pub status: RunStatus,
    #[serde(default)]
    pub hints_used: u32,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, scenario_id: impl Into<String>, seed: u64, difficulty: Difficulty) -> Self {
        Self {
            run_id: run_id.into(),
            scenario_id: scenario_id.into(),
            seed,
            difficulty,
            bound: None,
            base_interval: DEFAULT_BASE_INTERVAL,
            start_time: ts_now(),
            actions: Vec::new(),
            status: RunStatus::InProgress,
            hints_used: 0,
        }
    }

    pub fn with_bound(mut self, bound: Option<usize>) -> Self {
        self.bound = bound;
        self
    }

    pub fn with_base_interval(mut self, base_interval: f64) -> Self {
        self.base_interval = base_interval;
        self
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SimError::RunClosed {
                run_id: self.run_id.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Append an action, keeping timestamps monotonic.
    pub fn push_action(&mut self, action: PlayerAction) -> Result<()> {
        self.check_action(&action)?;
        self.actions.push(PlayerAction {
            matched_expected: None,
            ..action
        });
        Ok(())
    }

    /// Whether `push_action` would accept `action`, without recording it.
    pub fn check_action(&self, action: &PlayerAction) -> Result<()> {
        self.ensure_open()?;
        if !action.timestamp.is_finite() || action.timestamp < 0.0 {
            return Err(SimError::NonMonotonicAction {
                run_id: self.run_id.clone(),
                timestamp: action.timestamp,
                previous: 0.0,
            });
        }
        if let Some(last) = self.actions.last() {
            if action.timestamp < last.timestamp {
                return Err(SimError::NonMonotonicAction {
                    run_id: self.run_id.clone(),
                    timestamp: action.timestamp,
                    previous: last.timestamp,
                });
            }
        }
        Ok(())
    }

    /// Move to a terminal status. Only `in_progress` runs may transition.
    pub fn transition(&mut self, status: RunStatus) -> Result<()> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    pub fn note_hint(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.hints_used += 1;
        Ok(())
    }

    /// Offset of the last recorded action, or 0 for an empty run.
    pub fn elapsed(&self) -> f64 {
        self.actions.last().map(|a| a.timestamp).unwrap_or(0.0)
    }
}
