//! Replay engine: durable run ledgers, deterministic reconstruction of a
//! run's event stream, and run-to-run comparison.

pub mod ledger;
pub mod sqlite;
pub mod store;

pub use ledger::LedgerEntry;
pub use sqlite::SqliteRunStore;
pub use store::{JsonlRunStore, MemoryRunStore, RunStore};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, SimError};
use crate::logging::{log_replay, log_store_error};
use crate::run::{PlayerAction, RunRecord, RunStatus};
use crate::scenario::{generate, ScenarioTemplate, Selector, TemplateStore};
use crate::scoring::{Grade, ScoreResult, ScoringEngine, StageScore};
use crate::stream::{fingerprint, stream, DetectionEvent};

/// One authored stage of the scenario, as each run met it. Shuffled runs
/// present the same stage at different positions, so stages are keyed by
/// their place in the template rather than in either instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDelta {
    pub template_index: usize,
    pub detection_signal: String,
    /// Position in run a's instance, `None` if a's stream never reached it
    pub stage_index_a: Option<usize>,
    pub stage_index_b: Option<usize>,
    pub detected_at_a: Option<f64>,
    pub detected_at_b: Option<f64>,
    /// `b − a`, only when both runs detected the stage
    pub timing_delta: Option<f64>,
    /// `b − a`, a stage a run never streamed counts as zero points
    pub detection_points_delta: f64,
}

/// Where each authored stage landed in `instance`. Stages are matched on
/// their full content, each instance position used once.
fn template_positions(template: &ScenarioTemplate, instance: &ScenarioTemplate) -> Vec<Option<usize>> {
    let mut used = vec![false; instance.stages.len()];
    template
        .stages
        .iter()
        .map(|authored| {
            let pos = instance.stages.iter().enumerate().position(|(i, s)| {
                !used[i]
                    && s.detection_signal == authored.detection_signal
                    && s.expected_action == authored.expected_action
                    && s.description == authored.description
            })?;
            used[pos] = true;
            Some(pos)
        })
        .collect()
}

fn streamed(score: &ScoreResult, pos: Option<usize>) -> Option<&StageScore> {
    pos.and_then(|p| score.stages.iter().find(|s| s.stage_index == p))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub detection: f64,
    pub compliance: f64,
    pub efficiency: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub run_a: String,
    pub run_b: String,
    pub scenario_id: String,
    pub grade_a: Grade,
    pub grade_b: Grade,
    pub stages: Vec<StageDelta>,
    pub score: ScoreDelta,
    pub actions_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub run_id: String,
    pub fingerprint: String,
    pub events: usize,
    /// `None` when the run has no persisted score to check against
    pub score_matches: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scenario_id: String,
    pub difficulty: String,
    pub status: RunStatus,
    pub start_time: String,
    pub actions: usize,
    pub total: Option<f64>,
    pub grade: Option<Grade>,
}

#[derive(Clone)]
pub struct ReplayEngine {
    store: Arc<dyn RunStore>,
    templates: Arc<TemplateStore>,
    scoring: ScoringEngine,
}

impl ReplayEngine {
    pub fn new(store: Arc<dyn RunStore>, templates: Arc<TemplateStore>, scoring: ScoringEngine) -> Self {
        Self {
            store,
            templates,
            scoring,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn scoring(&self) -> ScoringEngine {
        self.scoring
    }

    fn logged<T>(&self, run_id: &str, op: &str, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if matches!(
                e,
                SimError::Io(_) | SimError::Json(_) | SimError::Sqlite(_) | SimError::CorruptLedger { .. }
            ) {
                log_store_error(run_id, op, &e.to_string());
            }
        }
        res
    }

    /// Persist a whole record as a new run. `DuplicateRun` if the id exists.
    pub fn save(&self, run: &RunRecord) -> Result<()> {
        let res = self.store.create(&run.run_id, &LedgerEntry::for_record(run));
        self.logged(&run.run_id, "save", res)
    }

    /// Open the ledger for a fresh in-progress run.
    pub fn open(&self, run: &RunRecord) -> Result<()> {
        if run.status.is_terminal() || !run.actions.is_empty() {
            return self.save(run);
        }
        let res = self.store.create(&run.run_id, &LedgerEntry::for_record(run)[..1]);
        self.logged(&run.run_id, "open", res)
    }

    /// Apply `change` to the folded record under the run's lock and append
    /// the entries it returns.
    fn apply<F>(&self, run_id: &str, op: &str, mut change: F) -> Result<RunRecord>
    where
        F: FnMut(&mut RunRecord, Option<&ScoreResult>) -> Result<Vec<LedgerEntry>>,
    {
        let mut after = None;
        let res = self.store.update(run_id, &mut |entries| {
            let (mut run, score) = ledger::fold(run_id, entries)?;
            let more = change(&mut run, score.as_ref())?;
            after = Some(run);
            Ok(more)
        });
        self.logged(run_id, op, res)?;
        after.ok_or_else(|| store::missing(run_id))
    }

    pub fn append_action(&self, run_id: &str, action: &PlayerAction) -> Result<RunRecord> {
        self.apply(run_id, "append_action", |run, _| {
            run.push_action(action.clone())?;
            Ok(vec![LedgerEntry::action(run_id, action)])
        })
    }

    pub fn note_hint(&self, run_id: &str) -> Result<RunRecord> {
        self.apply(run_id, "note_hint", |run, _| {
            run.note_hint()?;
            Ok(vec![LedgerEntry::Hint {
                run_id: run_id.to_string(),
            }])
        })
    }

    pub fn transition(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        self.apply(run_id, "transition", |run, _| {
            run.transition(status)?;
            Ok(vec![LedgerEntry::Status {
                run_id: run_id.to_string(),
                status,
            }])
        })
    }

    /// Persist a score for a completed run. A run is scored at most once.
    pub fn record_score(&self, score: &ScoreResult) -> Result<()> {
        let run_id = score.run_id.as_str();
        self.apply(run_id, "record_score", |run, existing| {
            if existing.is_some() {
                return Err(SimError::AlreadyScored(run_id.to_string()));
            }
            if run.status != RunStatus::Completed {
                return Err(SimError::IncompleteRun {
                    run_id: run_id.to_string(),
                    status: run.status.to_string(),
                });
            }
            Ok(vec![LedgerEntry::Score {
                run_id: run_id.to_string(),
                score: score.clone(),
            }])
        })?;
        Ok(())
    }

    fn load_full(&self, run_id: &str) -> Result<(RunRecord, Option<ScoreResult>)> {
        let entries = self.store.entries(run_id)?.ok_or_else(|| store::missing(run_id))?;
        ledger::fold(run_id, &entries)
    }

    pub fn load(&self, run_id: &str) -> Result<RunRecord> {
        Ok(self.load_full(run_id)?.0)
    }

    pub fn load_score(&self, run_id: &str) -> Result<Option<ScoreResult>> {
        Ok(self.load_full(run_id)?.1)
    }

    /// The scenario instance the run was played on.
    pub fn scenario_for(&self, run: &RunRecord) -> Result<ScenarioTemplate> {
        generate(&self.templates, &Selector::id(&run.scenario_id), run.seed)
    }

    fn events_for(&self, run: &RunRecord) -> Result<Vec<DetectionEvent>> {
        let scenario = self.scenario_for(run)?;
        Ok(stream(&scenario, run.difficulty.profile(), run.base_interval, run.bound).collect())
    }

    /// Reproduce the event sequence the run was shown.
    pub fn replay(&self, run_id: &str) -> Result<Vec<DetectionEvent>> {
        let run = self.load(run_id)?;
        let events = self.events_for(&run)?;
        log_replay(run_id, &fingerprint(&events)?, events.len());
        Ok(events)
    }

    /// Score the stored run afresh.
    pub fn score(&self, run_id: &str) -> Result<ScoreResult> {
        let run = self.load(run_id)?;
        let scenario = self.scenario_for(&run)?;
        self.scoring.score(&run, &scenario)
    }

    fn score_of(&self, run: &RunRecord, stored: Option<ScoreResult>) -> Result<ScoreResult> {
        match stored {
            Some(s) => Ok(s),
            None => {
                let scenario = self.scenario_for(run)?;
                self.scoring.score(run, &scenario)
            }
        }
    }

    /// Per-stage and score deltas, always `b − a`. Stages come back in
    /// template order; one streamed by only one run still appears.
    pub fn compare(&self, run_a: &str, run_b: &str) -> Result<Comparison> {
        let (a, stored_a) = self.load_full(run_a)?;
        let (b, stored_b) = self.load_full(run_b)?;
        if a.scenario_id != b.scenario_id {
            return Err(SimError::Incomparable {
                left: a.scenario_id,
                right: b.scenario_id,
            });
        }
        for run in [&a, &b] {
            if run.status != RunStatus::Completed {
                return Err(SimError::IncompleteRun {
                    run_id: run.run_id.clone(),
                    status: run.status.to_string(),
                });
            }
        }
        let sa = self.score_of(&a, stored_a)?;
        let sb = self.score_of(&b, stored_b)?;

        let template = self.templates.get(&a.scenario_id)?;
        let pos_a = template_positions(template, &self.scenario_for(&a)?);
        let pos_b = template_positions(template, &self.scenario_for(&b)?);
        let mut stages = Vec::new();
        for (ti, authored) in template.stages.iter().enumerate() {
            let x = streamed(&sa, pos_a[ti]);
            let y = streamed(&sb, pos_b[ti]);
            if x.is_none() && y.is_none() {
                continue;
            }
            let detected_at_a = x.and_then(|s| s.detected_at);
            let detected_at_b = y.and_then(|s| s.detected_at);
            stages.push(StageDelta {
                template_index: ti,
                detection_signal: authored.detection_signal.clone(),
                stage_index_a: x.map(|s| s.stage_index),
                stage_index_b: y.map(|s| s.stage_index),
                detected_at_a,
                detected_at_b,
                timing_delta: match (detected_at_a, detected_at_b) {
                    (Some(ta), Some(tb)) => Some(tb - ta),
                    _ => None,
                },
                detection_points_delta: y.map_or(0.0, |s| s.detection_points)
                    - x.map_or(0.0, |s| s.detection_points),
            });
        }

        Ok(Comparison {
            run_a: a.run_id.clone(),
            run_b: b.run_id.clone(),
            scenario_id: a.scenario_id.clone(),
            grade_a: sa.grade,
            grade_b: sb.grade,
            stages,
            score: ScoreDelta {
                detection: sb.detection_score - sa.detection_score,
                compliance: sb.compliance_score - sa.compliance_score,
                efficiency: sb.efficiency_score - sa.efficiency_score,
                total: sb.total - sa.total,
            },
            actions_delta: b.actions.len() as i64 - a.actions.len() as i64,
        })
    }

    /// Rebuild the event stream, re-score, and check against the stored score.
    pub fn verify(&self, run_id: &str) -> Result<Verification> {
        let (run, stored) = self.load_full(run_id)?;
        let events = self.events_for(&run)?;
        let fp = fingerprint(&events)?;
        log_replay(run_id, &fp, events.len());
        let score_matches = match stored {
            Some(stored) => {
                let scenario = self.scenario_for(&run)?;
                Some(self.scoring.score(&run, &scenario)? == stored)
            }
            None => None,
        };
        Ok(Verification {
            run_id: run_id.to_string(),
            fingerprint: fp,
            events: events.len(),
            score_matches,
        })
    }

    /// Most recent runs first, by start time then id.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut out = Vec::new();
        for run_id in self.store.run_ids()? {
            let (run, score) = self.load_full(&run_id)?;
            out.push(RunSummary {
                run_id: run.run_id,
                scenario_id: run.scenario_id,
                difficulty: run.difficulty.to_string(),
                status: run.status,
                start_time: run.start_time,
                actions: run.actions.len(),
                total: score.as_ref().map(|s| s.total),
                grade: score.as_ref().map(|s| s.grade),
            });
        }
        out.sort_by(|x, y| y.start_time.cmp(&x.start_time).then_with(|| y.run_id.cmp(&x.run_id)));
        out.truncate(limit);
        Ok(out)
    }
}
