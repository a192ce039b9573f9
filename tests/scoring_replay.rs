//! Scoring through stored runs: re-scoring, comparison, and the error paths
//! callers rely on.

use std::collections::BTreeSet;
use std::sync::Arc;

use breach_sim::replay::{JsonlRunStore, SqliteRunStore};
use breach_sim::scenario::{Category, PolicyEntry, Severity, Stage};
use breach_sim::scoring::MAX_TOTAL;
use breach_sim::{
    Difficulty, Grade, PlayerAction, ReplayEngine, RunRecord, RunStatus, RunStore, ScenarioTemplate,
    ScoringEngine, SimError, TemplateStore,
};

fn template(id: &str, stages: usize) -> ScenarioTemplate {
    ScenarioTemplate {
        id: id.into(),
        name: id.into(),
        description: String::new(),
        category: Category::SupplyChain,
        severity: Severity::Critical,
        stages: (0..stages)
            .map(|i| Stage {
                index: i,
                description: format!("{} step {}", id, i),
                detection_signal: format!("{}-signal-{}", id, i),
                expected_action: format!("{}-respond-{}", id, i),
                weight: 1.0,
            })
            .collect(),
        policy_tags: BTreeSet::new(),
        shuffle_stages: false,
    }
}

fn engine(store: Arc<dyn RunStore>) -> ReplayEngine {
    let templates =
        TemplateStore::new(vec![template("two", 2), template("three", 3)], Vec::<PolicyEntry>::new()).unwrap();
    ReplayEngine::new(store, Arc::new(templates), ScoringEngine::new(60.0))
}

fn completed(run_id: &str, scenario: &str, difficulty: Difficulty, actions: &[(f64, usize, &str)]) -> RunRecord {
    let mut run = RunRecord::new(run_id, scenario, 1, difficulty);
    for (t, stage, id) in actions {
        run.push_action(PlayerAction::new(*t, *stage, *id)).unwrap();
    }
    run.transition(RunStatus::Completed).unwrap();
    run
}

fn stores() -> Vec<(tempfile::TempDir, Arc<dyn RunStore>)> {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let jsonl: Arc<dyn RunStore> = Arc::new(JsonlRunStore::open(a.path()).unwrap());
    let sqlite: Arc<dyn RunStore> = Arc::new(SqliteRunStore::open(b.path().join("runs.sqlite")).unwrap());
    vec![(a, jsonl), (b, sqlite)]
}

#[test]
fn worked_example_scores_eighty() {
    for (_dir, store) in stores() {
        let e = engine(store);
        e.save(&completed(
            "run-1",
            "two",
            Difficulty::Medium,
            &[(0.0, 0, "two-respond-0"), (120.0, 1, "two-respond-1")],
        ))
        .unwrap();
        let s = e.score("run-1").unwrap();
        assert_eq!(
            (s.detection_score, s.compliance_score, s.efficiency_score, s.total),
            (20.0, 40.0, 20.0, 80.0)
        );
        assert_eq!(s.grade, Grade::B);
    }
}

#[test]
fn load_unknown_run_is_not_found() {
    for (_dir, store) in stores() {
        let e = engine(store);
        assert!(matches!(e.load("run-missing"), Err(SimError::NotFound(_))));
        assert!(matches!(e.replay("run-missing"), Err(SimError::NotFound(_))));
    }
}

#[test]
fn duplicate_save_rejected() {
    for (_dir, store) in stores() {
        let e = engine(store);
        let run = completed("run-1", "two", Difficulty::Easy, &[]);
        e.save(&run).unwrap();
        assert!(matches!(e.save(&run), Err(SimError::DuplicateRun(_))));
    }
}

#[test]
fn compare_across_scenarios_is_incomparable() {
    for (_dir, store) in stores() {
        let e = engine(store);
        e.save(&completed("run-a", "two", Difficulty::Medium, &[(1.0, 0, "two-respond-0")]))
            .unwrap();
        e.save(&completed("run-b", "three", Difficulty::Medium, &[(1.0, 0, "three-respond-0")]))
            .unwrap();
        match e.compare("run-a", "run-b") {
            Err(SimError::Incomparable { left, right }) => {
                assert_eq!(left, "two");
                assert_eq!(right, "three");
            }
            other => panic!("expected Incomparable, got {:?}", other.map(|c| c.scenario_id)),
        }
    }
}

#[test]
fn compare_reports_b_minus_a() {
    for (_dir, store) in stores() {
        let e = engine(store);
        e.save(&completed(
            "run-a",
            "two",
            Difficulty::Medium,
            &[(0.0, 0, "two-respond-0"), (120.0, 1, "two-respond-1")],
        ))
        .unwrap();
        e.save(&completed("run-b", "two", Difficulty::Medium, &[(0.0, 0, "two-respond-0")]))
            .unwrap();
        let c = e.compare("run-a", "run-b").unwrap();
        assert_eq!(c.score.compliance, -20.0);
        assert_eq!(c.actions_delta, -1);
        assert_eq!(c.stages[0].timing_delta, Some(0.0));
        assert_eq!(c.stages[1].timing_delta, None);
        assert_eq!(c.grade_a, Grade::B);
    }
}

#[test]
fn incomplete_runs_cannot_be_scored() {
    let (_dir, store) = stores().remove(0);
    let e = engine(store);
    e.open(&RunRecord::new("run-open", "two", 1, Difficulty::Medium)).unwrap();
    assert!(matches!(e.score("run-open"), Err(SimError::IncompleteRun { .. })));
    e.transition("run-open", RunStatus::Aborted).unwrap();
    assert!(matches!(e.score("run-open"), Err(SimError::IncompleteRun { .. })));
}

#[test]
fn multiplied_totals_stay_capped() {
    let (_dir, store) = stores().remove(0);
    let e = engine(store);
    for (i, difficulty) in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard, Difficulty::Expert]
        .into_iter()
        .enumerate()
    {
        let run_id = format!("run-{}", i);
        e.save(&completed(
            &run_id,
            "three",
            difficulty,
            &[(0.0, 0, "three-respond-0"), (0.0, 1, "three-respond-1"), (0.0, 2, "three-respond-2")],
        ))
        .unwrap();
        let s = e.score(&run_id).unwrap();
        assert_eq!(s.raw_total, 100.0);
        assert!(s.total <= MAX_TOTAL);
        assert_eq!(s.total, (100.0 * difficulty.profile().score_multiplier).min(MAX_TOTAL));
    }
}

#[test]
fn list_runs_reports_scores() {
    let (_dir, store) = stores().remove(0);
    let e = engine(store);
    let run = completed("run-1", "two", Difficulty::Medium, &[(0.0, 0, "two-respond-0")]);
    e.save(&run).unwrap();
    let score = e.score("run-1").unwrap();
    e.record_score(&score).unwrap();
    let listed = e.list_runs(10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].total, Some(score.total));
    assert_eq!(listed[0].status, RunStatus::Completed);
}
