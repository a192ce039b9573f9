use thiserror::Error;

/// Every recoverable failure the simulator core reports to its caller.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("template validation failed for {source_name}: {reason}")]
    TemplateValidation { source_name: String, reason: String },

    #[error("invalid difficulty: {0:?} (expected easy, medium, hard or expert)")]
    InvalidDifficulty(String),

    #[error("run {run_id} is not completed (status: {status})")]
    IncompleteRun { run_id: String, status: String },

    #[error("run {0} already exists")]
    DuplicateRun(String),

    #[error("scenario mismatch: {left} vs {right}")]
    Incomparable { left: String, right: String },

    #[error("action at t={timestamp} precedes previous action at t={previous} in run {run_id}")]
    NonMonotonicAction {
        run_id: String,
        timestamp: f64,
        previous: f64,
    },

    #[error("stage {stage_index} out of range (run {run_id} has {stage_count} stages)")]
    StageOutOfRange {
        run_id: String,
        stage_index: usize,
        stage_count: usize,
    },

    #[error("run {run_id} is closed (status: {status})")]
    RunClosed { run_id: String, status: String },

    #[error("no hints left for run {run_id} (max {max_hints})")]
    HintsExhausted { run_id: String, max_hints: u32 },

    #[error("run {0} has already been scored")]
    AlreadyScored(String),

    #[error("invalid run id {0:?}")]
    InvalidRunId(String),

    #[error("corrupt ledger for run {run_id}: {reason}")]
    CorruptLedger { run_id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SimError {
    pub fn validation(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::TemplateValidation {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable name, used by callers that render errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::NotFound(_) => "not_found",
            SimError::TemplateValidation { .. } => "template_validation",
            SimError::InvalidDifficulty(_) => "invalid_difficulty",
            SimError::IncompleteRun { .. } => "incomplete_run",
            SimError::DuplicateRun(_) => "duplicate_run",
            SimError::Incomparable { .. } => "incomparable",
            SimError::NonMonotonicAction { .. } => "non_monotonic_action",
            SimError::StageOutOfRange { .. } => "stage_out_of_range",
            SimError::RunClosed { .. } => "run_closed",
            SimError::HintsExhausted { .. } => "hints_exhausted",
            SimError::AlreadyScored(_) => "already_scored",
            SimError::InvalidRunId(_) => "invalid_run_id",
            SimError::CorruptLedger { .. } => "corrupt_ledger",
            SimError::Io(_) => "io",
            SimError::Json(_) => "json",
            SimError::Sqlite(_) => "sqlite",
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
