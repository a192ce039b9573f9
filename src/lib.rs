//! Deterministic security-incident simulator.
//!
//! Scenario templates are instantiated from a seed, streamed to the player as
//! detection events, and the player's responses are scored, persisted and
//! replayable.

pub mod audit;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod journal;
pub mod logging;
pub mod replay;
pub mod run;
pub mod scenario;
pub mod scoring;
pub mod session;
pub mod stream;

pub use config::Config;
pub use difficulty::{Difficulty, DifficultyProfile};
pub use error::{Result, SimError};
pub use replay::{Comparison, ReplayEngine, RunStore};
pub use run::{PlayerAction, RunRecord, RunStatus};
pub use scenario::{ScenarioFilter, ScenarioTemplate, Selector, TemplateStore};
pub use scoring::{Grade, ScoreResult, ScoringEngine};
pub use session::{Hint, RunSession, Simulator};
pub use stream::DetectionEvent;
