//! Detection event streaming.
//!
//! The streamer only decides event content and `due_by` deadlines. Pacing
//! (sleeping until an event should be shown) belongs to whoever pulls from
//! the iterator.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::difficulty::DifficultyProfile;
use crate::error::Result;
use crate::scenario::ScenarioTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub stage_index: usize,
    pub detection_signal: String,
    pub description: String,
    /// Seconds from run start by which the stage should be handled
    pub due_by: f64,
}

/// `base_interval × time_multiplier × (stage_index + 1)`
pub fn due_by(base_interval: f64, profile: &DifficultyProfile, stage_index: usize) -> f64 {
    base_interval * profile.time_multiplier * (stage_index as f64 + 1.0)
}

/// Lazy, finite event sequence over a resolved scenario.
#[derive(Debug, Clone)]
pub struct EventStream<'a> {
    scenario: &'a ScenarioTemplate,
    profile: &'a DifficultyProfile,
    base_interval: f64,
    limit: usize,
    next: usize,
}

impl<'a> EventStream<'a> {
    /// Number of events the stream yields in total.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Iterator for EventStream<'_> {
    type Item = DetectionEvent;

    fn next(&mut self) -> Option<DetectionEvent> {
        if self.next >= self.limit {
            return None;
        }
        let stage = &self.scenario.stages[self.next];
        self.next += 1;
        Some(DetectionEvent {
            stage_index: stage.index,
            detection_signal: stage.detection_signal.clone(),
            description: stage.description.clone(),
            due_by: due_by(self.base_interval, self.profile, stage.index),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.limit - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for EventStream<'_> {}

/// One event per stage, truncated to `bound` events when set.
pub fn stream<'a>(
    scenario: &'a ScenarioTemplate,
    profile: &'a DifficultyProfile,
    base_interval: f64,
    bound: Option<usize>,
) -> EventStream<'a> {
    let total = scenario.stages.len();
    EventStream {
        scenario,
        profile,
        base_interval,
        limit: bound.map_or(total, |b| b.min(total)),
        next: 0,
    }
}

/// SHA-256 over the canonical JSON line of every event, hex encoded.
pub fn fingerprint(events: &[DetectionEvent]) -> Result<String> {
    let mut hasher = Sha256::new();
    for event in events {
        let line = serde_json::to_string(event)?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}
