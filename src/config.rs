use std::path::PathBuf;

use crate::run::DEFAULT_BASE_INTERVAL;

/// Which persistence backend the simulator writes its run ledger to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Jsonl,
    Sqlite,
}

impl StoreKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jsonl" | "files" => Some(StoreKind::Jsonl),
            "sqlite" | "db" => Some(StoreKind::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub template_dir: PathBuf,
    pub policy_file: PathBuf,
    /// Root for `runs/` and `audit/`
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub sqlite_path: PathBuf,
    /// Base interval given to new runs. Stored runs keep their own.
    pub base_interval_secs: f64,
    pub default_difficulty: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("data/templates"),
            policy_file: PathBuf::from("data/policies/catalog.json"),
            data_dir: PathBuf::from(".breach"),
            store: StoreKind::Jsonl,
            sqlite_path: PathBuf::from(".breach/runs.sqlite"),
            base_interval_secs: DEFAULT_BASE_INTERVAL,
            default_difficulty: "medium".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            template_dir: std::env::var("BREACH_TEMPLATE_DIR").map(PathBuf::from).unwrap_or(d.template_dir),
            policy_file: std::env::var("BREACH_POLICY_FILE").map(PathBuf::from).unwrap_or(d.policy_file),
            data_dir: std::env::var("BREACH_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            store: std::env::var("BREACH_STORE").ok().and_then(|v| StoreKind::parse(&v)).unwrap_or(d.store),
            sqlite_path: std::env::var("BREACH_SQLITE_PATH").map(PathBuf::from).unwrap_or(d.sqlite_path),
            base_interval_secs: std::env::var("BREACH_BASE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(d.base_interval_secs),
            default_difficulty: std::env::var("BREACH_DIFFICULTY").unwrap_or(d.default_difficulty),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!(StoreKind::parse("JSONL"), Some(StoreKind::Jsonl));
        assert_eq!(StoreKind::parse(" sqlite "), Some(StoreKind::Sqlite));
        assert_eq!(StoreKind::parse("redis"), None);
    }

    #[test]
    fn test_default_layout() {
        let cfg = Config::default();
        assert_eq!(cfg.base_interval_secs, 60.0);
        assert_eq!(cfg.runs_dir(), PathBuf::from(".breach/runs"));
        assert_eq!(cfg.audit_dir(), PathBuf::from(".breach/audit"));
    }
}
