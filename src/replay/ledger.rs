//! Ledger entries and the fold that rebuilds a run from them.

use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;
use crate::error::{Result, SimError};
use crate::run::{default_base_interval, PlayerAction, RunRecord, RunStatus};
use crate::scoring::ScoreResult;

/// One line of a run's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerEntry {
    RunOpened {
        run_id: String,
        scenario_id: String,
        seed: u64,
        difficulty: Difficulty,
        #[serde(default)]
        bound: Option<usize>,
        #[serde(default = "default_base_interval")]
        base_interval: f64,
        start_time: String,
    },
    Action {
        run_id: String,
        timestamp: f64,
        stage_index: usize,
        action_id: String,
    },
    Hint {
        run_id: String,
    },
    Status {
        run_id: String,
        status: RunStatus,
    },
    Score {
        run_id: String,
        score: ScoreResult,
    },
}

impl LedgerEntry {
    pub fn run_id(&self) -> &str {
        match self {
            LedgerEntry::RunOpened { run_id, .. }
            | LedgerEntry::Action { run_id, .. }
            | LedgerEntry::Hint { run_id }
            | LedgerEntry::Status { run_id, .. }
            | LedgerEntry::Score { run_id, .. } => run_id,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            LedgerEntry::RunOpened { .. } => "run_opened",
            LedgerEntry::Action { .. } => "action",
            LedgerEntry::Hint { .. } => "hint",
            LedgerEntry::Status { .. } => "status",
            LedgerEntry::Score { .. } => "score",
        }
    }

    /// Entries that reproduce `run` from scratch: the opening line, each
    /// action, one hint line per hint used, and the status if terminal.
    pub fn for_record(run: &RunRecord) -> Vec<LedgerEntry> {
        let mut out = vec![LedgerEntry::RunOpened {
            run_id: run.run_id.clone(),
            scenario_id: run.scenario_id.clone(),
            seed: run.seed,
            difficulty: run.difficulty,
            bound: run.bound,
            base_interval: run.base_interval,
            start_time: run.start_time.clone(),
        }];
        for _ in 0..run.hints_used {
            out.push(LedgerEntry::Hint {
                run_id: run.run_id.clone(),
            });
        }
        for a in &run.actions {
            out.push(LedgerEntry::action(&run.run_id, a));
        }
        if run.status.is_terminal() {
            out.push(LedgerEntry::Status {
                run_id: run.run_id.clone(),
                status: run.status,
            });
        }
        out
    }

    pub fn action(run_id: &str, action: &PlayerAction) -> Self {
        LedgerEntry::Action {
            run_id: run_id.to_string(),
            timestamp: action.timestamp,
            stage_index: action.stage_index,
            action_id: action.action_id.clone(),
        }
    }
}

fn corrupt(run_id: &str, reason: impl Into<String>) -> SimError {
    SimError::CorruptLedger {
        run_id: run_id.to_string(),
        reason: reason.into(),
    }
}

/// Parse raw JSON lines into entries.
pub fn parse_lines(run_id: &str, lines: &[String]) -> Result<Vec<LedgerEntry>> {
    lines
        .iter()
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| corrupt(run_id, format!("line {}: {}", n + 1, e)))
        })
        .collect()
}

/// Rebuild the run and its persisted score (if any) from its entries.
pub fn fold(run_id: &str, entries: &[LedgerEntry]) -> Result<(RunRecord, Option<ScoreResult>)> {
    let mut iter = entries.iter();
    let mut run = match iter.next() {
        Some(LedgerEntry::RunOpened {
            run_id: id,
            scenario_id,
            seed,
            difficulty,
            bound,
            base_interval,
            start_time,
        }) => {
            let mut r = RunRecord::new(id.clone(), scenario_id.clone(), *seed, *difficulty)
                .with_bound(*bound)
                .with_base_interval(*base_interval);
            r.start_time = start_time.clone();
            r
        }
        Some(other) => return Err(corrupt(run_id, format!("first entry is {}, expected run_opened", other.op()))),
        None => return Err(corrupt(run_id, "empty ledger")),
    };
    if run.run_id != run_id {
        return Err(corrupt(run_id, format!("ledger belongs to {}", run.run_id)));
    }

    let mut score = None;
    for entry in iter {
        if entry.run_id() != run_id {
            return Err(corrupt(run_id, format!("{} entry for {}", entry.op(), entry.run_id())));
        }
        match entry {
            LedgerEntry::RunOpened { .. } => return Err(corrupt(run_id, "run_opened repeated")),
            LedgerEntry::Action {
                timestamp,
                stage_index,
                action_id,
                ..
            } => run
                .push_action(PlayerAction::new(*timestamp, *stage_index, action_id.clone()))
                .map_err(|e| corrupt(run_id, e.to_string()))?,
            LedgerEntry::Hint { .. } => run.note_hint().map_err(|e| corrupt(run_id, e.to_string()))?,
            LedgerEntry::Status { status, .. } => {
                run.transition(*status).map_err(|e| corrupt(run_id, e.to_string()))?
            }
            LedgerEntry::Score { score: s, .. } => {
                if run.status != RunStatus::Completed {
                    return Err(corrupt(run_id, "score recorded before completion"));
                }
                if score.is_some() {
                    return Err(corrupt(run_id, "score recorded twice"));
                }
                score = Some(s.clone());
            }
        }
    }
    Ok((run, score))
}
