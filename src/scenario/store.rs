//! Template store: loads and validates scenario templates and the policy
//! catalog once, then serves them read-only.
//!
//! Input records are deserialized into loose `Raw*` shapes first so that a
//! missing field or an unknown enum value becomes a `TemplateValidation`
//! error naming the offending file, instead of a generic parse failure.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use super::{Category, PolicyEntry, ScenarioFilter, ScenarioSummary, ScenarioTemplate, Severity, Stage};
use crate::error::{Result, SimError};
use crate::logging::log_templates_loaded;

#[derive(Debug, Deserialize)]
struct RawStage {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    detection_signal: Option<String>,
    #[serde(default)]
    expected_action: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    stages: Vec<RawStage>,
    #[serde(default)]
    policy_tags: Vec<String>,
    #[serde(default)]
    shuffle_stages: bool,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    remediation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCatalog {
    Wrapped { policies: Vec<RawPolicy> },
    Bare(Vec<RawPolicy>),
}

fn required(value: Option<String>, field: &str, source: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SimError::validation(source, format!("missing `{}`", field))),
    }
}

impl RawTemplate {
    fn into_template(self, source: &str) -> Result<ScenarioTemplate> {
        let id = required(self.id, "id", source)?;
        let name = self.name.unwrap_or_else(|| id.clone());
        let category_raw = required(self.category, "category", source)?;
        let category = Category::parse(&category_raw)
            .ok_or_else(|| SimError::validation(source, format!("unknown category {:?}", category_raw)))?;
        let severity_raw = required(self.severity, "severity", source)?;
        let severity = Severity::parse(&severity_raw)
            .ok_or_else(|| SimError::validation(source, format!("unknown severity {:?}", severity_raw)))?;

        let mut stages = Vec::with_capacity(self.stages.len());
        for (pos, raw) in self.stages.into_iter().enumerate() {
            let at = format!("{} stage {}", source, pos);
            if let Some(idx) = raw.index {
                if idx != pos {
                    return Err(SimError::validation(&at, format!("declared index {} does not match position", idx)));
                }
            }
            stages.push(Stage {
                index: pos,
                description: raw.description.unwrap_or_default(),
                detection_signal: required(raw.detection_signal, "detection_signal", &at)?,
                expected_action: required(raw.expected_action, "expected_action", &at)?,
                weight: raw.weight.unwrap_or(1.0),
            });
        }

        let template = ScenarioTemplate {
            id,
            name,
            description: self.description.unwrap_or_default(),
            category,
            severity,
            stages,
            policy_tags: self.policy_tags.into_iter().collect(),
            shuffle_stages: self.shuffle_stages,
        };
        validate_template(&template, source)?;
        Ok(template)
    }
}

impl RawPolicy {
    fn into_entry(self, source: &str) -> Result<PolicyEntry> {
        let tag = required(self.tag, "tag", source)?;
        let at = format!("{} policy {}", source, tag);
        let severity_raw = required(self.severity, "severity", &at)?;
        Ok(PolicyEntry {
            title: required(self.title, "title", &at)?,
            severity: Severity::parse(&severity_raw)
                .ok_or_else(|| SimError::validation(&at, format!("unknown severity {:?}", severity_raw)))?,
            remediation: self.remediation.unwrap_or_default(),
            tag,
        })
    }
}

/// Structural checks shared by file-loaded and programmatically built templates.
fn validate_template(t: &ScenarioTemplate, source: &str) -> Result<()> {
    if t.id.trim().is_empty() {
        return Err(SimError::validation(source, "missing `id`"));
    }
    if t.stages.is_empty() {
        return Err(SimError::validation(source, format!("template {} has no stages", t.id)));
    }
    for (pos, stage) in t.stages.iter().enumerate() {
        if stage.index != pos {
            return Err(SimError::validation(
                source,
                format!("stage {} of {} has index {}", pos, t.id, stage.index),
            ));
        }
        if !stage.weight.is_finite() || stage.weight < 0.0 {
            return Err(SimError::validation(
                source,
                format!("stage {} of {} has invalid weight {}", pos, t.id, stage.weight),
            ));
        }
        if stage.detection_signal.trim().is_empty() || stage.expected_action.trim().is_empty() {
            return Err(SimError::validation(
                source,
                format!("stage {} of {} lacks a signal or expected action", pos, t.id),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, ScenarioTemplate>,
    policies: BTreeMap<String, PolicyEntry>,
}

impl TemplateStore {
    /// Build a store from already-typed records, applying the same
    /// validation as the file loader.
    pub fn new(templates: Vec<ScenarioTemplate>, policies: Vec<PolicyEntry>) -> Result<Self> {
        let mut store = Self::default();
        for t in templates {
            let source = format!("template {}", t.id);
            validate_template(&t, &source)?;
            store.insert_template(t, &source)?;
        }
        for p in policies {
            store.insert_policy(p, "catalog")?;
        }
        Ok(store)
    }

    /// Parse templates from `(source_name, json)` pairs and a catalog document.
    pub fn from_json<'a, I>(templates: I, catalog: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut store = Self::default();
        for (source, text) in templates {
            let raw: RawTemplate = serde_json::from_str(text)
                .map_err(|e| SimError::validation(source, e.to_string()))?;
            let t = raw.into_template(source)?;
            store.insert_template(t, source)?;
        }
        store.load_catalog(catalog, "catalog")?;
        Ok(store)
    }

    /// Load every `*.json` under `template_dir` (sorted by file name) and the
    /// policy catalog file.
    pub fn load_dir(template_dir: &Path, policy_file: &Path) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(template_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut store = Self::default();
        for path in &paths {
            let source = path.to_string_lossy().to_string();
            let text = fs::read_to_string(path)?;
            let raw: RawTemplate = serde_json::from_str(&text)
                .map_err(|e| SimError::validation(&source, e.to_string()))?;
            let t = raw.into_template(&source)?;
            store.insert_template(t, &source)?;
        }
        let catalog_source = policy_file.to_string_lossy().to_string();
        let catalog = fs::read_to_string(policy_file)?;
        store.load_catalog(&catalog, &catalog_source)?;

        log_templates_loaded(store.templates.len(), store.policies.len(), &template_dir.to_string_lossy());
        Ok(store)
    }

    fn load_catalog(&mut self, text: &str, source: &str) -> Result<()> {
        let raw: RawCatalog = serde_json::from_str(text).map_err(|e| SimError::validation(source, e.to_string()))?;
        let items = match raw {
            RawCatalog::Wrapped { policies } => policies,
            RawCatalog::Bare(policies) => policies,
        };
        for item in items {
            let entry = item.into_entry(source)?;
            self.insert_policy(entry, source)?;
        }
        Ok(())
    }

    fn insert_template(&mut self, t: ScenarioTemplate, source: &str) -> Result<()> {
        if self.templates.contains_key(&t.id) {
            return Err(SimError::validation(source, format!("duplicate template id {}", t.id)));
        }
        self.templates.insert(t.id.clone(), t);
        Ok(())
    }

    fn insert_policy(&mut self, p: PolicyEntry, source: &str) -> Result<()> {
        if p.tag.trim().is_empty() {
            return Err(SimError::validation(source, "missing `tag`"));
        }
        if self.policies.contains_key(&p.tag) {
            return Err(SimError::validation(source, format!("duplicate policy tag {}", p.tag)));
        }
        self.policies.insert(p.tag.clone(), p);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&ScenarioTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| SimError::NotFound(format!("scenario {}", id)))
    }

    /// Templates matching `filter`, ordered by id.
    pub fn candidates(&self, filter: &ScenarioFilter) -> Vec<&ScenarioTemplate> {
        self.templates.values().filter(|t| filter.matches(t)).collect()
    }

    pub fn list(&self, filter: &ScenarioFilter) -> Vec<ScenarioSummary> {
        self.candidates(filter).into_iter().map(|t| t.summary()).collect()
    }

    pub fn policy(&self, tag: &str) -> Option<&PolicyEntry> {
        self.policies.get(tag)
    }

    /// Catalog entries in play for each stage: the stage's signal must be one
    /// of the template's policy tags and exist in the catalog.
    pub fn policies_for<'a>(&'a self, t: &ScenarioTemplate) -> Vec<(usize, &'a PolicyEntry)> {
        t.stages
            .iter()
            .filter(|s| t.policy_tags.contains(&s.detection_signal))
            .filter_map(|s| self.policies.get(&s.detection_signal).map(|p| (s.index, p)))
            .collect()
    }

    pub fn policy_tags(&self) -> BTreeSet<&str> {
        self.policies.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
