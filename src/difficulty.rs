//! Fixed difficulty presets.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }

    pub fn profile(&self) -> &'static DifficultyProfile {
        match self {
            Difficulty::Easy => &PROFILES[0],
            Difficulty::Medium => &PROFILES[1],
            Difficulty::Hard => &PROFILES[2],
            Difficulty::Expert => &PROFILES[3],
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultyProfile {
    pub name: Difficulty,
    pub time_multiplier: f64,
    pub max_hints: u32,
    pub score_multiplier: f64,
    pub description: &'static str,
}

static PROFILES: [DifficultyProfile; 4] = [
    DifficultyProfile {
        name: Difficulty::Easy,
        time_multiplier: 2.0,
        max_hints: 5,
        score_multiplier: 1.0,
        description: "Plenty of time, hints available",
    },
    DifficultyProfile {
        name: Difficulty::Medium,
        time_multiplier: 1.0,
        max_hints: 2,
        score_multiplier: 1.0,
        description: "Standard time limits, limited hints",
    },
    DifficultyProfile {
        name: Difficulty::Hard,
        time_multiplier: 0.5,
        max_hints: 0,
        score_multiplier: 1.5,
        description: "Half the time, no hints, 1.5x score",
    },
    DifficultyProfile {
        name: Difficulty::Expert,
        time_multiplier: 0.25,
        max_hints: 0,
        score_multiplier: 2.0,
        description: "Quarter time, no hints, 2x score",
    },
];

/// Look up a preset by name, ignoring case and surrounding whitespace.
pub fn resolve(name: &str) -> Result<&'static DifficultyProfile> {
    let wanted = name.trim().to_lowercase();
    PROFILES
        .iter()
        .find(|p| p.name.as_str() == wanted)
        .ok_or_else(|| SimError::InvalidDifficulty(name.to_string()))
}

/// All presets, easiest first.
pub fn all() -> &'static [DifficultyProfile] {
    &PROFILES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_case_insensitive() {
        assert_eq!(resolve("Hard").unwrap().name, Difficulty::Hard);
        assert_eq!(resolve(" expert ").unwrap().score_multiplier, 2.0);
    }

    #[test]
    fn test_resolve_unknown() {
        let err = resolve("nightmare").unwrap_err();
        assert!(matches!(err, SimError::InvalidDifficulty(ref n) if n == "nightmare"));
    }

    #[test]
    fn test_profiles_are_positive_and_ordered() {
        let profiles = all();
        assert_eq!(profiles.len(), 4);
        for p in profiles {
            assert!(p.time_multiplier > 0.0);
            assert!(p.score_multiplier > 0.0);
            assert!(std::ptr::eq(p.name.profile(), p));
        }
        for pair in profiles.windows(2) {
            assert!(pair[0].time_multiplier > pair[1].time_multiplier);
            assert!(pair[0].score_multiplier <= pair[1].score_multiplier);
        }
    }

    #[test]
    fn test_medium_is_neutral() {
        let medium = resolve("medium").unwrap();
        assert_eq!(medium.time_multiplier, 1.0);
        assert_eq!(medium.score_multiplier, 1.0);
        assert_eq!(medium.max_hints, 2);
    }
}
