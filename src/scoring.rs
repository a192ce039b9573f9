//! Scoring engine.
//!
//! Point splits, the total cap and grade thresholds are versioned together
//! under [`SCORING_VERSION`]. Any change to them must bump the version so
//! persisted scores stay attributable to the rules that produced them.
//!
//! Order of operations:
//! 1. detection, compliance and efficiency are computed over the streamed
//!    stages (a bounded run only scores what it presented)
//! 2. `total = min((detection + compliance + efficiency) × score_multiplier, MAX_TOTAL)`
//! 3. the grade is read off the final total

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::difficulty::Difficulty;
use crate::error::{Result, SimError};
use crate::logging::log_scored;
use crate::run::{PlayerAction, RunRecord, RunStatus};
use crate::scenario::ScenarioTemplate;
use crate::stream::{stream, DetectionEvent};

pub const SCORING_VERSION: u32 = 1;

pub const DETECTION_MAX: f64 = 40.0;
pub const COMPLIANCE_MAX: f64 = 40.0;
pub const EFFICIENCY_MAX: f64 = 20.0;

/// Hard cap on the multiplied total. Hard (1.5×) tops out exactly here;
/// expert (2.0×) is clipped to it.
pub const MAX_TOTAL: f64 = 150.0;

pub const GRADE_A: f64 = 90.0;
pub const GRADE_B: f64 = 80.0;
pub const GRADE_C: f64 = 70.0;
pub const GRADE_D: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_total(total: f64) -> Self {
        if total >= GRADE_A {
            Grade::A
        } else if total >= GRADE_B {
            Grade::B
        } else if total >= GRADE_C {
            Grade::C
        } else if total >= GRADE_D {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageScore {
    pub stage_index: usize,
    pub detection_signal: String,
    pub due_by: f64,
    /// Timestamp of the first action matching the expected action
    pub detected_at: Option<f64>,
    pub detection_points: f64,
    pub compliant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub run_id: String,
    pub scenario_id: String,
    pub difficulty: Difficulty,
    pub scoring_version: u32,
    pub detection_score: f64,
    pub compliance_score: f64,
    pub efficiency_score: f64,
    /// Sum of the three components before the difficulty multiplier
    pub raw_total: f64,
    pub total: f64,
    pub grade: Grade,
    pub stages: Vec<StageScore>,
    /// The run's actions with `matched_expected` resolved
    pub actions: Vec<PlayerAction>,
}

/// Linear decay from full credit at t=0 to nothing at the deadline.
pub fn detection_points(elapsed: f64, due_by: f64) -> f64 {
    if due_by <= 0.0 {
        return 0.0;
    }
    DETECTION_MAX * (1.0 - elapsed / due_by).max(0.0)
}

pub fn efficiency_points(expected_actions: usize, actual_actions: usize) -> f64 {
    if actual_actions == 0 {
        return 0.0;
    }
    EFFICIENCY_MAX * (expected_actions as f64 / actual_actions as f64).min(1.0)
}

/// Stateless. `base_interval` is only handed to runs opened through it;
/// scoring always uses the interval stored on the run.
#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    base_interval: f64,
}

impl ScoringEngine {
    pub fn new(base_interval: f64) -> Self {
        Self { base_interval }
    }

    /// Interval for new runs.
    pub fn base_interval(&self) -> f64 {
        self.base_interval
    }

    /// Score a completed run against the scenario instance it was played on.
    pub fn score(&self, run: &RunRecord, scenario: &ScenarioTemplate) -> Result<ScoreResult> {
        if run.status != RunStatus::Completed {
            return Err(SimError::IncompleteRun {
                run_id: run.run_id.clone(),
                status: run.status.to_string(),
            });
        }
        if run.scenario_id != scenario.id {
            return Err(SimError::Incomparable {
                left: run.scenario_id.clone(),
                right: scenario.id.clone(),
            });
        }

        let profile = run.difficulty.profile();
        let events: Vec<DetectionEvent> = stream(scenario, profile, run.base_interval, run.bound).collect();

        let mut stages = Vec::with_capacity(events.len());
        for event in &events {
            let expected = &scenario.stages[event.stage_index].expected_action;
            let detected_at = run
                .actions
                .iter()
                .find(|a| a.stage_index == event.stage_index && &a.action_id == expected)
                .map(|a| a.timestamp);
            stages.push(StageScore {
                stage_index: event.stage_index,
                detection_signal: event.detection_signal.clone(),
                due_by: event.due_by,
                detected_at,
                detection_points: detected_at.map_or(0.0, |t| detection_points(t, event.due_by)),
                compliant: detected_at.is_some(),
            });
        }

        let detection_score = if stages.is_empty() {
            0.0
        } else {
            (stages.iter().map(|s| s.detection_points).sum::<f64>() / stages.len() as f64).round()
        };

        let weight_sum: f64 = stages.iter().map(|s| scenario.stages[s.stage_index].weight).sum();
        let compliance_score = stages
            .iter()
            .filter(|s| s.compliant)
            .map(|s| {
                if weight_sum > 0.0 {
                    scenario.stages[s.stage_index].weight / weight_sum * COMPLIANCE_MAX
                } else {
                    COMPLIANCE_MAX / stages.len() as f64
                }
            })
            .sum::<f64>()
            .min(COMPLIANCE_MAX);

        let efficiency_score = efficiency_points(stages.len(), run.actions.len());

        let raw_total = detection_score + compliance_score + efficiency_score;
        let total = (raw_total * profile.score_multiplier).min(MAX_TOTAL);
        let grade = Grade::from_total(total);

        let actions = run
            .actions
            .iter()
            .map(|a| {
                let matched = a.stage_index < events.len()
                    && scenario.stages[a.stage_index].expected_action == a.action_id;
                PlayerAction {
                    matched_expected: Some(matched),
                    ..a.clone()
                }
            })
            .collect();

        log_scored(
            &run.run_id,
            total,
            grade.as_str(),
            detection_score,
            compliance_score,
            efficiency_score,
        );

        Ok(ScoreResult {
            run_id: run.run_id.clone(),
            scenario_id: scenario.id.clone(),
            difficulty: run.difficulty,
            scoring_version: SCORING_VERSION,
            detection_score,
            compliance_score,
            efficiency_score,
            raw_total,
            total,
            grade,
            stages,
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Category, Severity, Stage};
    use std::collections::BTreeSet;

    fn scenario(weights: &[f64]) -> ScenarioTemplate {
        ScenarioTemplate {
            id: "drill".into(),
            name: "Drill".into(),
            description: String::new(),
            category: Category::Malware,
            severity: Severity::High,
            stages: weights
                .iter()
                .enumerate()
                .map(|(i, w)| Stage {
                    index: i,
                    description: format!("stage {}", i),
                    detection_signal: format!("sig-{}", i),
                    expected_action: format!("act-{}", i),
                    weight: *w,
                })
                .collect(),
            policy_tags: BTreeSet::new(),
            shuffle_stages: false,
        }
    }

    fn completed(difficulty: Difficulty, actions: &[(f64, usize, &str)]) -> RunRecord {
        let mut run = RunRecord::new("run-t", "drill", 42, difficulty);
        for (t, stage, id) in actions {
            run.push_action(PlayerAction::new(*t, *stage, *id)).unwrap();
        }
        run.transition(RunStatus::Completed).unwrap();
        run
    }

    #[test]
    fn test_two_stage_medium_scores_eighty() {
        let s = scenario(&[1.0, 1.0]);
        let run = completed(Difficulty::Medium, &[(0.0, 0, "act-0"), (120.0, 1, "act-1")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.stages[0].due_by, 60.0);
        assert_eq!(score.stages[1].due_by, 120.0);
        assert_eq!(score.detection_score, 20.0);
        assert_eq!(score.compliance_score, 40.0);
        assert_eq!(score.efficiency_score, 20.0);
        assert_eq!(score.total, 80.0);
        assert_eq!(score.grade, Grade::B);
    }

    #[test]
    fn test_incomplete_run_rejected() {
        let s = scenario(&[1.0]);
        let mut run = RunRecord::new("run-t", "drill", 1, Difficulty::Easy);
        let err = ScoringEngine::new(60.0).score(&run, &s).unwrap_err();
        assert!(matches!(err, SimError::IncompleteRun { .. }));
        run.transition(RunStatus::Aborted).unwrap();
        assert!(ScoringEngine::new(60.0).score(&run, &s).is_err());
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(Grade::from_total(90.0), Grade::A);
        assert_eq!(Grade::from_total(89.999), Grade::B);
        assert_eq!(Grade::from_total(80.0), Grade::B);
        assert_eq!(Grade::from_total(70.0), Grade::C);
        assert_eq!(Grade::from_total(60.0), Grade::D);
        assert_eq!(Grade::from_total(59.0), Grade::F);
        assert_eq!(Grade::from_total(150.0), Grade::A);
    }

    #[test]
    fn test_detection_monotonic_in_elapsed() {
        let s = scenario(&[1.0, 1.0]);
        let engine = ScoringEngine::new(60.0);
        let mut prev = -1.0;
        for step in (0..=30).rev() {
            let t = step as f64 * 5.0;
            let run = completed(Difficulty::Medium, &[(0.0, 0, "act-0"), (t.max(0.0), 1, "act-1")]);
            let score = engine.score(&run, &s).unwrap();
            assert!(score.detection_score >= prev);
            prev = score.detection_score;
        }
    }

    #[test]
    fn test_late_detection_gets_no_credit_but_stays_compliant() {
        let s = scenario(&[1.0]);
        let run = completed(Difficulty::Medium, &[(500.0, 0, "act-0")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.detection_score, 0.0);
        assert_eq!(score.compliance_score, 40.0);
        assert!(score.stages[0].compliant);
    }

    #[test]
    fn test_compliance_weighting() {
        let s = scenario(&[3.0, 1.0]);
        let run = completed(Difficulty::Medium, &[(10.0, 0, "act-0"), (20.0, 1, "wrong")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.compliance_score, 30.0);
        assert_eq!(score.actions[0].matched_expected, Some(true));
        assert_eq!(score.actions[1].matched_expected, Some(false));
    }

    #[test]
    fn test_zero_weights_share_equally() {
        let s = scenario(&[0.0, 0.0]);
        let run = completed(Difficulty::Medium, &[(10.0, 0, "act-0")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.compliance_score, 20.0);
    }

    #[test]
    fn test_efficiency_penalizes_extra_actions() {
        assert_eq!(efficiency_points(2, 0), 0.0);
        assert_eq!(efficiency_points(2, 1), 20.0);
        assert_eq!(efficiency_points(2, 2), 20.0);
        assert_eq!(efficiency_points(2, 4), 10.0);
    }

    #[test]
    fn test_no_actions_scores_zero() {
        let s = scenario(&[1.0, 1.0]);
        let run = completed(Difficulty::Medium, &[]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.total, 0.0);
        assert_eq!(score.grade, Grade::F);
    }

    #[test]
    fn test_expert_total_capped() {
        let s = scenario(&[1.0]);
        let run = completed(Difficulty::Expert, &[(0.0, 0, "act-0")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.raw_total, 100.0);
        assert_eq!(score.total, MAX_TOTAL);
        assert_eq!(score.grade, Grade::A);
    }

    #[test]
    fn test_hard_multiplier_reaches_cap_exactly() {
        let s = scenario(&[1.0]);
        let run = completed(Difficulty::Hard, &[(0.0, 0, "act-0")]);
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.total, 150.0);
    }

    #[test]
    fn test_components_stay_in_bounds() {
        let s = scenario(&[1.0, 2.0, 0.5]);
        let engine = ScoringEngine::new(30.0);
        for n in 0..12usize {
            let actions: Vec<(f64, usize, String)> = (0..n)
                .map(|i| (i as f64 * 7.0, i % 3, if i % 2 == 0 { format!("act-{}", i % 3) } else { "noise".to_string() }))
                .collect();
            let refs: Vec<(f64, usize, &str)> = actions.iter().map(|(t, s, a)| (*t, *s, a.as_str())).collect();
            let score = engine.score(&completed(Difficulty::Easy, &refs), &s).unwrap();
            assert!((0.0..=DETECTION_MAX).contains(&score.detection_score));
            assert!((0.0..=COMPLIANCE_MAX).contains(&score.compliance_score));
            assert!((0.0..=EFFICIENCY_MAX).contains(&score.efficiency_score));
            assert!(score.total <= MAX_TOTAL);
        }
    }

    #[test]
    fn test_bounded_run_scores_presented_stages_only() {
        let s = scenario(&[1.0, 1.0, 1.0, 1.0]);
        let mut run = RunRecord::new("run-t", "drill", 42, Difficulty::Medium).with_bound(Some(2));
        run.push_action(PlayerAction::new(0.0, 0, "act-0")).unwrap();
        run.push_action(PlayerAction::new(0.0, 1, "act-1")).unwrap();
        run.transition(RunStatus::Completed).unwrap();
        let score = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        assert_eq!(score.stages.len(), 2);
        assert_eq!(score.total, 100.0);
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let s = scenario(&[1.0, 1.0]);
        let run = completed(Difficulty::Hard, &[(3.0, 0, "act-0"), (40.0, 1, "act-1")]);
        let engine = ScoringEngine::new(60.0);
        assert_eq!(engine.score(&run, &s).unwrap(), engine.score(&run, &s).unwrap());
    }

    #[test]
    fn test_scenario_mismatch_rejected() {
        let mut s = scenario(&[1.0]);
        s.id = "other".into();
        let run = completed(Difficulty::Medium, &[]);
        assert!(matches!(ScoringEngine::new(60.0).score(&run, &s), Err(SimError::Incomparable { .. })));
    }

    #[test]
    fn test_deadlines_follow_the_run_interval() {
        let s = scenario(&[1.0, 1.0]);
        let mut run = RunRecord::new("run-t", "drill", 42, Difficulty::Medium).with_base_interval(30.0);
        run.push_action(PlayerAction::new(45.0, 0, "act-0")).unwrap();
        run.transition(RunStatus::Completed).unwrap();
        let a = ScoringEngine::new(60.0).score(&run, &s).unwrap();
        let b = ScoringEngine::new(90.0).score(&run, &s).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.stages[0].due_by, 30.0);
        assert_eq!(a.stages[1].due_by, 60.0);
    }
}
