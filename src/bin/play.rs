//! Drive one run from a script of player inputs on stdin.
//!
//! Usage:
//!   play <scenario_id|any> [seed] [difficulty] [bound] < inputs.jsonl
//!
//! Each input line is one of:
//!   {"type":"action","timestamp":12.5,"stage_index":0,"action_id":"isolate_host"}
//!   {"type":"hint","stage_index":1}
//!   {"type":"abort","reason":"giving up"}
//!
//! Detection events, hints and the final score are written to stdout as
//! JSON lines. Rejected inputs are reported on stderr and skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::io::{self, BufRead};

use breach_sim::{Config, ScenarioFilter, Selector, Simulator};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Input {
    Action {
        timestamp: f64,
        stage_index: usize,
        action_id: String,
    },
    Hint {
        stage_index: usize,
    },
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = Config::from_env();
    let selector = match args.first().map(String::as_str) {
        None | Some("any") => Selector::Filter(ScenarioFilter::any()),
        Some(id) => Selector::id(id),
    };
    let seed: u64 = match args.get(1) {
        Some(v) => v.parse().with_context(|| format!("bad seed {:?}", v))?,
        None => 42,
    };
    let difficulty = args.get(2).cloned().unwrap_or_else(|| config.default_difficulty.clone());
    let bound: Option<usize> = match args.get(3) {
        Some(v) => Some(v.parse().with_context(|| format!("bad bound {:?}", v))?),
        None => None,
    };

    let sim = Simulator::from_config(config)?;
    let mut session = sim.start_run(&selector, seed, &difficulty, bound)?;
    println!(
        "{}",
        json!({"type": "run_started", "run_id": session.run_id(), "scenario_id": session.scenario().id})
    );
    while let Some(event) = session.next_event() {
        println!("{}", json!({"type": "event", "event": event}));
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: Input = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                eprintln!("bad input json: {}", err);
                continue;
            }
        };
        match input {
            Input::Action {
                timestamp,
                stage_index,
                action_id,
            } => {
                if let Err(err) = session.record_action(timestamp, stage_index, &action_id) {
                    eprintln!("action rejected ({}): {}", err.kind(), err);
                }
            }
            Input::Hint { stage_index } => match session.request_hint(stage_index) {
                Ok(hint) => println!("{}", json!({"type": "hint", "hint": hint})),
                Err(err) => eprintln!("hint refused ({}): {}", err.kind(), err),
            },
            Input::Abort { reason } => {
                let run = session.abort(reason.as_deref().unwrap_or("aborted by player"))?;
                println!("{}", json!({"type": "aborted", "run": run}));
                return Ok(());
            }
        }
    }

    let score = session.complete()?;
    println!("{}", json!({"type": "score", "score": score}));
    Ok(())
}
