//! Structured logging for the simulator core.
//!
//! Every record is a single JSON line with a process-wide sequence number,
//! an RFC3339 timestamp, a level and a domain. Records go to stderr, and
//! additionally to `$LOG_DIR/<session>/events.jsonl` (trace/debug records to
//! `trace.jsonl`) when `LOG_DIR` is set.
//!
//! This is operational logging. The per-run audit trail players are judged
//! on lives in [`crate::audit`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Template, // Template and catalog loading
    Generate, // Scenario selection and stage ordering
    Stream,   // Detection event emission
    Session,  // Run lifecycle, player actions, hints
    Scoring,  // Score computation
    Replay,   // Ledger persistence, replay, comparison
    Audit,    // Audit trail writes
    System,   // Startup, configuration
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Template => "template",
            Domain::Generate => "generate",
            Domain::Stream => "stream",
            Domain::Session => "session",
            Domain::Scoring => "scoring",
            Domain::Replay => "replay",
            Domain::Audit => "audit",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter and sinks
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static LOG_CONTEXT: OnceLock<LogContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct LogContext {
    session: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_context() -> &'static LogContext {
    LOG_CONTEXT.get_or_init(|| {
        let session = format!("s-{}-{}", ts_epoch_ms(), process::id());
        let Ok(base) = std::env::var("LOG_DIR") else {
            return LogContext {
                session,
                events: None,
                trace: None,
            };
        };
        let mut dir = PathBuf::from(base);
        dir.push(&session);
        if let Err(err) = create_dir_all(&dir) {
            eprintln!("[log] failed to create log dir: {}", err);
            return LogContext {
                session,
                events: None,
                trace: None,
            };
        }
        let _ = std::fs::write(
            dir.join("manifest.json"),
            json!({
                "session": session,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": dir.to_string_lossy(),
            })
            .to_string(),
        );
        LogContext {
            events: open_sink(dir.join("events.jsonl")),
            trace: open_sink(dir.join("trace.jsonl")),
            session,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["run_id", "scenario_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let line = render(level, domain, event, fields);
    let ctx = ensure_context();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

fn render(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) -> String {
    let (mut top, data) = split_fields(fields);
    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("session".to_string(), json!(ensure_context().session.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_templates_loaded(templates: usize, policies: usize, source: &str) {
    log(
        Level::Info,
        Domain::Template,
        "templates_loaded",
        obj(&[
            ("templates", json!(templates)),
            ("policies", json!(policies)),
            ("source", v_str(source)),
        ]),
    );
}

pub fn log_generated(scenario_id: &str, seed: u64, shuffled: bool, stages: usize) {
    log(
        Level::Debug,
        Domain::Generate,
        "generated",
        obj(&[
            ("scenario_id", v_str(scenario_id)),
            ("seed", json!(seed)),
            ("shuffled", json!(shuffled)),
            ("stages", json!(stages)),
        ]),
    );
}

pub fn log_run_started(run_id: &str, scenario_id: &str, seed: u64, difficulty: &str) {
    log(
        Level::Info,
        Domain::Session,
        "run_started",
        obj(&[
            ("run_id", v_str(run_id)),
            ("scenario_id", v_str(scenario_id)),
            ("seed", json!(seed)),
            ("difficulty", v_str(difficulty)),
        ]),
    );
}

pub fn log_action(run_id: &str, stage_index: usize, action_id: &str, timestamp: f64) {
    log(
        Level::Debug,
        Domain::Session,
        "action",
        obj(&[
            ("run_id", v_str(run_id)),
            ("stage_index", json!(stage_index)),
            ("action_id", v_str(action_id)),
            ("timestamp", v_num(timestamp)),
        ]),
    );
}

pub fn log_run_closed(run_id: &str, status: &str, actions: usize) {
    log(
        Level::Info,
        Domain::Session,
        "run_closed",
        obj(&[
            ("run_id", v_str(run_id)),
            ("status", v_str(status)),
            ("actions", json!(actions)),
        ]),
    );
}

pub fn log_scored(run_id: &str, total: f64, grade: &str, detection: f64, compliance: f64, efficiency: f64) {
    log(
        Level::Info,
        Domain::Scoring,
        "scored",
        obj(&[
            ("run_id", v_str(run_id)),
            ("total", v_num(total)),
            ("grade", v_str(grade)),
            ("detection", v_num(detection)),
            ("compliance", v_num(compliance)),
            ("efficiency", v_num(efficiency)),
        ]),
    );
}

pub fn log_replay(run_id: &str, fingerprint: &str, events: usize) {
    log(
        Level::Info,
        Domain::Replay,
        "replayed",
        obj(&[
            ("run_id", v_str(run_id)),
            ("fingerprint", v_str(fingerprint)),
            ("events", json!(events)),
        ]),
    );
}

pub fn log_store_error(run_id: &str, op: &str, err: &str) {
    log(
        Level::Error,
        Domain::Replay,
        "store_error",
        obj(&[
            ("run_id", v_str(run_id)),
            ("op", v_str(op)),
            ("error", v_str(err)),
        ]),
    );
}

// =============================================================================
// Field builders
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }

    #[test]
    fn test_render_lifts_run_id() {
        let line = render(
            Level::Info,
            Domain::Session,
            "run_started",
            obj(&[("run_id", v_str("run-1")), ("seed", json!(42))]),
        );
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["run_id"], "run-1");
        assert_eq!(parsed["component"], "session");
        assert_eq!(parsed["lvl"], "INFO");
        assert_eq!(parsed["data"]["seed"], 42);
    }
}
