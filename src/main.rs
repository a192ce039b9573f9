//! breach-sim: inspect scenarios and stored runs.
//!
//! Usage:
//!   breach-sim <command> [args]
//!
//! Commands:
//!   list [--category=<c>] [--severity=<s>]  - Available scenarios
//!   difficulties                            - Difficulty presets
//!   runs [limit]                            - Recent runs, newest first
//!   show <run_id>                           - Stored run record
//!   replay <run_id>                         - Re-emit the run's detection events
//!   score <run_id>                          - Re-score a completed run
//!   compare <run_a> <run_b>                 - Deltas b - a
//!   verify <run_id>                         - Fingerprint and score check
//!   audit [run_id]                          - Audit trail summary, or the audited run ids
//!
//! Configuration comes from BREACH_* environment variables.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::env;

use breach_sim::audit::AuditSink;
use breach_sim::scenario::{Category, Severity};
use breach_sim::stream::fingerprint;
use breach_sim::{difficulty, Config, ScenarioFilter, Simulator};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg(args: &[String], i: usize, name: &str) -> Result<String> {
    args.get(i).cloned().ok_or_else(|| anyhow!("missing <{}>", name))
}

fn parse_filter(args: &[String]) -> Result<ScenarioFilter> {
    let mut filter = ScenarioFilter::any();
    for a in args {
        if let Some(v) = a.strip_prefix("--category=") {
            filter.category = Some(Category::parse(v).ok_or_else(|| anyhow!("unknown category {:?}", v))?);
        } else if let Some(v) = a.strip_prefix("--severity=") {
            filter.severity = Some(Severity::parse(v).ok_or_else(|| anyhow!("unknown severity {:?}", v))?);
        } else {
            bail!("unexpected argument {:?}", a);
        }
    }
    Ok(filter)
}

fn usage() {
    eprintln!("usage: breach-sim <list|difficulties|runs|show|replay|score|compare|verify|audit> [args]");
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(cmd) = args.first().cloned() else {
        usage();
        std::process::exit(2);
    };
    let rest = &args[1..];

    if cmd == "difficulties" {
        return print_json(&difficulty::all());
    }

    let config = Config::from_env();
    let sim = Simulator::from_config(config.clone())
        .with_context(|| format!("loading templates from {}", config.template_dir.display()))?;

    match cmd.as_str() {
        "list" => print_json(&sim.list(&parse_filter(rest)?)),
        "runs" => {
            let limit = match rest.first() {
                Some(v) => v.parse().with_context(|| format!("bad limit {:?}", v))?,
                None => 20,
            };
            print_json(&sim.replay().list_runs(limit)?)
        }
        "show" => print_json(&sim.replay().load(&arg(rest, 0, "run_id")?)?),
        "replay" => {
            let events = sim.replay().replay(&arg(rest, 0, "run_id")?)?;
            for e in &events {
                println!("{}", serde_json::to_string(e)?);
            }
            eprintln!("fingerprint {}", fingerprint(&events)?);
            Ok(())
        }
        "score" => print_json(&sim.replay().score(&arg(rest, 0, "run_id")?)?),
        "compare" => {
            let a = arg(rest, 0, "run_a")?;
            let b = arg(rest, 1, "run_b")?;
            print_json(&sim.replay().compare(&a, &b)?)
        }
        "verify" => {
            let v = sim.replay().verify(&arg(rest, 0, "run_id")?)?;
            print_json(&v)?;
            if v.score_matches == Some(false) {
                std::process::exit(1);
            }
            Ok(())
        }
        "audit" => match rest.first() {
            Some(run_id) => print_json(&sim.audit().summary(run_id)?),
            None => print_json(&sim.audit().run_ids()?),
        },
        other => {
            usage();
            bail!("unknown command {:?}", other)
        }
    }
}
