//! Smoke tests: the bundled templates load, and a full run over them goes
//! end to end through files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use breach_sim::config::StoreKind;
use breach_sim::scenario::{Category, Severity};
use breach_sim::{Config, ScenarioFilter, Selector, SimError, Simulator, TemplateStore};

fn data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data")
}

fn bundled() -> TemplateStore {
    let d = data_dir();
    TemplateStore::load_dir(&d.join("templates"), &d.join("policies").join("catalog.json")).unwrap()
}

fn config_in(tmp: &Path, store: StoreKind) -> Config {
    let d = data_dir();
    Config {
        template_dir: d.join("templates"),
        policy_file: d.join("policies").join("catalog.json"),
        data_dir: tmp.to_path_buf(),
        store,
        sqlite_path: tmp.join("runs.sqlite"),
        ..Config::default()
    }
}

#[test]
fn bundled_templates_load() {
    let store = bundled();
    assert_eq!(store.len(), 4);
    let ids: Vec<_> = store.list(&ScenarioFilter::any()).into_iter().map(|s| s.id).collect();
    assert_eq!(
        ids,
        vec![
            "ddos_api_gateway",
            "insider_data_exfil",
            "phishing_credential_harvest",
            "ransomware_file_server"
        ]
    );
    assert_eq!(store.list(&ScenarioFilter::category(Category::Malware)).len(), 1);
    assert_eq!(store.list(&ScenarioFilter::severity(Severity::High)).len(), 2);
    assert!(store.policy("mass_file_rename").is_some());
}

#[test]
fn bundled_policies_cover_tagged_signals() {
    let store = bundled();
    for summary in store.list(&ScenarioFilter::any()) {
        let t = store.get(&summary.id).unwrap();
        for tag in &t.policy_tags {
            assert!(store.policy(tag).is_some(), "{} references missing policy {}", t.id, tag);
        }
    }
}

#[test]
fn missing_template_dir_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = TemplateStore::load_dir(&tmp.path().join("nope"), &tmp.path().join("catalog.json")).unwrap_err();
    assert_eq!(err.kind(), "io");
}

#[test]
fn bad_template_file_names_its_source() {
    let tmp = tempfile::tempdir().unwrap();
    let templates = tmp.path().join("templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(
        templates.join("broken.json"),
        r#"{"id": "broken", "category": "phishing", "severity": "catastrophic", "stages": []}"#,
    )
    .unwrap();
    let catalog = tmp.path().join("catalog.json");
    fs::write(&catalog, "[]").unwrap();
    match TemplateStore::load_dir(&templates, &catalog) {
        Err(SimError::TemplateValidation { source_name, reason }) => {
            assert!(source_name.contains("broken.json"));
            assert!(reason.contains("catastrophic"));
        }
        other => panic!("expected validation error, got {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn full_run_on_disk_with_each_store() {
    for kind in [StoreKind::Jsonl, StoreKind::Sqlite] {
        let tmp = tempfile::tempdir().unwrap();
        let sim = Simulator::from_config(config_in(tmp.path(), kind)).unwrap();
        let mut session = sim
            .start_run(&Selector::id("phishing_credential_harvest"), 2024, "medium", None)
            .unwrap();
        let run_id = session.run_id().to_string();

        let mut t = 5.0;
        while let Some(event) = session.next_event() {
            let expected = session.scenario().stages[event.stage_index].expected_action.clone();
            session.record_action(t, event.stage_index, &expected).unwrap();
            t += 15.0;
        }
        let hint = session.request_hint(1).unwrap();
        assert_eq!(hint.policy_title.as_deref(), Some("Compromised Credential Response"));
        let score = session.complete().unwrap();
        assert_eq!(score.compliance_score, 40.0);
        assert_eq!(score.efficiency_score, 20.0);

        // A fresh simulator over the same directory sees the same run.
        let reopened = Simulator::from_config(config_in(tmp.path(), kind)).unwrap();
        let stored = reopened.replay().load(&run_id).unwrap();
        assert_eq!(stored.actions.len(), 3);
        assert_eq!(stored.hints_used, 1);
        assert_eq!(reopened.replay().load_score(&run_id).unwrap(), Some(score));
        assert_eq!(reopened.replay().verify(&run_id).unwrap().score_matches, Some(true));
        let audit = reopened.audit().summary(&run_id).unwrap();
        assert_eq!(audit.events, 13);
        assert_eq!(audit.by_kind["action"], 3);
        assert_eq!(audit.by_kind["detection"], 3);
        assert_eq!(audit.by_kind["policy_followed"], 3);
        assert_eq!(reopened.audit().run_ids().unwrap(), vec![run_id]);
    }
}

#[test]
fn stored_runs_keep_their_interval_across_config_changes() {
    for kind in [StoreKind::Jsonl, StoreKind::Sqlite] {
        let tmp = tempfile::tempdir().unwrap();
        let sim = Simulator::from_config(config_in(tmp.path(), kind)).unwrap();
        let mut session = sim
            .start_run(&Selector::id("phishing_credential_harvest"), 7, "medium", None)
            .unwrap();
        let run_id = session.run_id().to_string();
        let live = session.events().to_vec();
        assert_eq!(live[0].due_by, 60.0);
        session.record_action(40.0, 0, "quarantine_messages").unwrap();
        session.record_action(90.0, 1, "reset_credentials").unwrap();
        let score = session.complete().unwrap();

        let faster = Config {
            base_interval_secs: 30.0,
            ..config_in(tmp.path(), kind)
        };
        let reopened = Simulator::from_config(faster).unwrap();
        assert_eq!(reopened.replay().load(&run_id).unwrap().base_interval, 60.0);
        assert_eq!(reopened.replay().replay(&run_id).unwrap(), live);
        assert_eq!(reopened.replay().score(&run_id).unwrap(), score);
        assert_eq!(reopened.replay().verify(&run_id).unwrap().score_matches, Some(true));

        // New runs pick up the new default.
        let next = reopened
            .start_run(&Selector::id("phishing_credential_harvest"), 7, "medium", None)
            .unwrap();
        assert_eq!(next.run().base_interval, 30.0);
        assert_eq!(next.events()[0].due_by, 30.0);
    }
}
