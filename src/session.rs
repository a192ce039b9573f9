//! Live runs: the simulator front door and the per-run session handle.
//!
//! Every state change is written to the ledger first and only then applied
//! to the in-memory record, so a session that dies mid-run leaves a ledger
//! that folds to the last acknowledged state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditKind, AuditSink, JsonlAuditLog, MemoryAuditLog};
use crate::config::{Config, StoreKind};
use crate::difficulty::{resolve, DifficultyProfile};
use crate::error::{Result, SimError};
use crate::logging::{log, log_action, log_run_closed, log_run_started, obj, v_num, v_str, Domain, Level};
use crate::replay::{JsonlRunStore, MemoryRunStore, ReplayEngine, RunStore, SqliteRunStore};
use crate::run::{new_run_id, PlayerAction, RunRecord, RunStatus};
use crate::scenario::{
    generate, PolicyEntry, ScenarioFilter, ScenarioSummary, ScenarioTemplate, Selector, TemplateStore,
};
use crate::scoring::{ScoreResult, ScoringEngine};
use crate::stream::{stream, DetectionEvent};

pub struct Simulator {
    config: Config,
    templates: Arc<TemplateStore>,
    replay: ReplayEngine,
    audit: Arc<dyn AuditSink>,
}

impl Simulator {
    pub fn new(
        config: Config,
        templates: Arc<TemplateStore>,
        store: Arc<dyn RunStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let scoring = ScoringEngine::new(config.base_interval_secs);
        let replay = ReplayEngine::new(store, Arc::clone(&templates), scoring);
        Self {
            config,
            templates,
            replay,
            audit,
        }
    }

    /// Everything in memory. Nothing touches disk.
    pub fn in_memory(config: Config, templates: TemplateStore) -> Self {
        Self::new(
            config,
            Arc::new(templates),
            Arc::new(MemoryRunStore::new()),
            Arc::new(MemoryAuditLog::new()),
        )
    }

    /// Load templates and open the configured stores.
    pub fn from_config(config: Config) -> Result<Self> {
        let templates = TemplateStore::load_dir(&config.template_dir, &config.policy_file)?;
        let store: Arc<dyn RunStore> = match config.store {
            StoreKind::Jsonl => Arc::new(JsonlRunStore::open(config.runs_dir())?),
            StoreKind::Sqlite => Arc::new(SqliteRunStore::open(&config.sqlite_path)?),
        };
        let audit = Arc::new(JsonlAuditLog::open(config.audit_dir())?);
        log(
            Level::Info,
            Domain::System,
            "simulator_ready",
            obj(&[
                ("templates", v_num(templates.len() as f64)),
                ("store", v_str(if config.store == StoreKind::Sqlite { "sqlite" } else { "jsonl" })),
                ("data_dir", v_str(&config.data_dir.display().to_string())),
                ("base_interval_secs", v_num(config.base_interval_secs)),
            ]),
        );
        Ok(Self::new(config, Arc::new(templates), store, audit))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn list(&self, filter: &ScenarioFilter) -> Vec<ScenarioSummary> {
        self.templates.list(filter)
    }

    /// Resolve the scenario and difficulty, open the ledger, and audit the start.
    pub fn start_run(
        &self,
        selector: &Selector,
        seed: u64,
        difficulty: &str,
        bound: Option<usize>,
    ) -> Result<RunSession> {
        let profile = resolve(difficulty)?;
        let scenario = generate(&self.templates, selector, seed)?;
        let run = RunRecord::new(new_run_id(), scenario.id.clone(), seed, profile.name)
            .with_bound(bound)
            .with_base_interval(self.replay.scoring().base_interval());

        self.replay.open(&run)?;
        self.audit.append(
            &run.run_id,
            0.0,
            AuditKind::ScenarioStart {
                scenario_id: scenario.id.clone(),
                seed,
                difficulty: profile.name,
                bound,
            },
        )?;
        log_run_started(&run.run_id, &scenario.id, seed, profile.name.as_str());

        let events = stream(&scenario, profile, run.base_interval, bound).collect();
        Ok(RunSession {
            replay: self.replay.clone(),
            audit: Arc::clone(&self.audit),
            templates: Arc::clone(&self.templates),
            scenario,
            profile,
            run,
            events,
            next: 0,
        })
    }
}

/// Guidance handed to the player on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub stage_index: usize,
    pub text: String,
    /// Title of the catalog policy the text came from, if any
    pub policy_title: Option<String>,
    pub hints_remaining: u32,
}

/// One in-progress run. Consumed by `complete` or `abort`.
pub struct RunSession {
    replay: ReplayEngine,
    audit: Arc<dyn AuditSink>,
    templates: Arc<TemplateStore>,
    scenario: ScenarioTemplate,
    profile: &'static DifficultyProfile,
    run: RunRecord,
    events: Vec<DetectionEvent>,
    next: usize,
}

impl RunSession {
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn run(&self) -> &RunRecord {
        &self.run
    }

    pub fn scenario(&self) -> &ScenarioTemplate {
        &self.scenario
    }

    pub fn profile(&self) -> &'static DifficultyProfile {
        self.profile
    }

    /// Every event this run presents, in order.
    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    pub fn next_event(&mut self) -> Option<DetectionEvent> {
        let e = self.events.get(self.next)?.clone();
        self.next += 1;
        Some(e)
    }

    pub fn hints_remaining(&self) -> u32 {
        self.profile.max_hints.saturating_sub(self.run.hints_used)
    }

    fn check_stage(&self, stage_index: usize) -> Result<()> {
        if stage_index >= self.events.len() {
            return Err(SimError::StageOutOfRange {
                run_id: self.run.run_id.clone(),
                stage_index,
                stage_count: self.events.len(),
            });
        }
        Ok(())
    }

    fn audit(&self, elapsed: f64, kind: AuditKind) -> Result<AuditEvent> {
        self.audit.append(&self.run.run_id, elapsed, kind)
    }

    fn policy_for(&self, stage_index: usize) -> Option<&PolicyEntry> {
        self.templates
            .policies_for(&self.scenario)
            .into_iter()
            .find(|(i, _)| *i == stage_index)
            .map(|(_, p)| p)
    }

    /// Whether the stage's expected action has already been recorded.
    fn handled(&self, stage_index: usize) -> bool {
        let expected = &self.scenario.stages[stage_index].expected_action;
        self.run
            .actions
            .iter()
            .any(|a| a.stage_index == stage_index && &a.action_id == expected)
    }

    /// `timestamp` is seconds since run start.
    pub fn record_action(&mut self, timestamp: f64, stage_index: usize, action_id: &str) -> Result<()> {
        let action = PlayerAction::new(timestamp, stage_index, action_id);
        self.run.check_action(&action)?;
        self.check_stage(stage_index)?;
        let was_handled = self.handled(stage_index);

        self.replay.append_action(&self.run.run_id, &action)?;
        self.run.push_action(action)?;
        self.audit(
            timestamp,
            AuditKind::Action {
                stage_index,
                action_id: action_id.to_string(),
            },
        )?;
        log_action(&self.run.run_id, stage_index, action_id, timestamp);
        if was_handled {
            return Ok(());
        }

        let stage = &self.scenario.stages[stage_index];
        let matched = stage.expected_action == action_id;
        let mut follow_up = Vec::new();
        if matched {
            follow_up.push(AuditKind::Detection {
                stage_index,
                detection_signal: stage.detection_signal.clone(),
            });
        }
        if let Some(p) = self.policy_for(stage_index) {
            follow_up.push(if matched {
                AuditKind::PolicyFollowed {
                    stage_index,
                    policy_tag: p.tag.clone(),
                    title: p.title.clone(),
                }
            } else {
                AuditKind::PolicyIgnored {
                    stage_index,
                    policy_tag: p.tag.clone(),
                    title: p.title.clone(),
                    action_id: action_id.to_string(),
                }
            });
        }
        for kind in follow_up {
            self.audit(timestamp, kind)?;
        }
        Ok(())
    }

    /// The stage's catalog remediation, or its description when no policy
    /// covers it.
    pub fn request_hint(&mut self, stage_index: usize) -> Result<Hint> {
        self.run.ensure_open()?;
        self.check_stage(stage_index)?;
        if self.run.hints_used >= self.profile.max_hints {
            return Err(SimError::HintsExhausted {
                run_id: self.run.run_id.clone(),
                max_hints: self.profile.max_hints,
            });
        }

        self.replay.note_hint(&self.run.run_id)?;
        self.run.note_hint()?;
        self.audit(
            self.run.elapsed(),
            AuditKind::HintRequested {
                stage_index,
                hints_used: self.run.hints_used,
                max_hints: self.profile.max_hints,
            },
        )?;

        let (text, policy_title) = match self.policy_for(stage_index) {
            Some(p) => (p.remediation.clone(), Some(p.title.clone())),
            None => (self.scenario.stages[stage_index].description.clone(), None),
        };
        Ok(Hint {
            stage_index,
            text,
            policy_title,
            hints_remaining: self.hints_remaining(),
        })
    }

    fn close(&mut self, status: RunStatus, reason: Option<String>) -> Result<()> {
        self.run.ensure_open()?;
        self.replay.transition(&self.run.run_id, status)?;
        self.run.transition(status)?;
        self.audit(
            self.run.elapsed(),
            AuditKind::StatusChange {
                from: RunStatus::InProgress,
                to: status,
                reason,
            },
        )?;
        log_run_closed(&self.run.run_id, status.as_str(), self.run.actions.len());
        Ok(())
    }

    /// Finish the run, score it and persist the score.
    pub fn complete(mut self) -> Result<ScoreResult> {
        self.close(RunStatus::Completed, None)?;
        let score = self.replay.scoring().score(&self.run, &self.scenario)?;
        self.replay.record_score(&score)?;
        self.audit(
            self.run.elapsed(),
            AuditKind::Scored {
                total: score.total,
                grade: score.grade,
            },
        )?;
        Ok(score)
    }

    /// Abandon the run. Aborted runs are kept but never scored.
    pub fn abort(mut self, reason: &str) -> Result<RunRecord> {
        self.close(RunStatus::Aborted, Some(reason.to_string()))?;
        Ok(self.run)
    }
}
