//! Scenario blueprints, the policy catalog, and deterministic instantiation.

pub mod generator;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use generator::generate;
pub use store::TemplateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Malware,
    Phishing,
    Ddos,
    InsiderThreat,
    SupplyChain,
    CredentialTheft,
    ZeroDay,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Malware,
        Category::Phishing,
        Category::Ddos,
        Category::InsiderThreat,
        Category::SupplyChain,
        Category::CredentialTheft,
        Category::ZeroDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Malware => "malware",
            Category::Phishing => "phishing",
            Category::Ddos => "ddos",
            Category::InsiderThreat => "insider_threat",
            Category::SupplyChain => "supply_chain",
            Category::CredentialTheft => "credential_theft",
            Category::ZeroDay => "zero_day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|v| v.as_str() == wanted)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered step of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Position in the (possibly shuffled) stage sequence
    pub index: usize,
    pub description: String,
    pub detection_signal: String,
    pub expected_action: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub stages: Vec<Stage>,
    pub policy_tags: BTreeSet<String>,
    /// Stages may be permuted by the generator
    #[serde(default)]
    pub shuffle_stages: bool,
}

impl ScenarioTemplate {
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn total_weight(&self) -> f64 {
        self.stages.iter().map(|s| s.weight).sum()
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category,
            severity: self.severity,
            stages: self.stages.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub tag: String,
    pub title: String,
    pub severity: Severity,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub severity: Severity,
    pub stages: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioFilter {
    pub category: Option<Category>,
    pub severity: Option<Severity>,
}

impl ScenarioFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            severity: None,
        }
    }

    pub fn severity(severity: Severity) -> Self {
        Self {
            category: None,
            severity: Some(severity),
        }
    }

    pub fn matches(&self, t: &ScenarioTemplate) -> bool {
        self.category.map_or(true, |c| c == t.category) && self.severity.map_or(true, |s| s == t.severity)
    }
}

/// How the generator picks a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Id(String),
    Filter(ScenarioFilter),
}

impl Selector {
    pub fn id(id: impl Into<String>) -> Self {
        Selector::Id(id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_roundtrips_names() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        assert_eq!(Category::parse("Insider_Threat"), Some(Category::InsiderThreat));
        assert_eq!(Category::parse("ransomware"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Critical);
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("urgent"), None);
    }

    #[test]
    fn test_filter_matches() {
        let t = ScenarioTemplate {
            id: "t".into(),
            name: "T".into(),
            description: String::new(),
            category: Category::Phishing,
            severity: Severity::High,
            stages: vec![],
            policy_tags: BTreeSet::new(),
            shuffle_stages: false,
        };
        assert!(ScenarioFilter::any().matches(&t));
        assert!(ScenarioFilter::category(Category::Phishing).matches(&t));
        assert!(!ScenarioFilter::category(Category::Ddos).matches(&t));
        assert!(!ScenarioFilter::severity(Severity::Low).matches(&t));
    }
}
