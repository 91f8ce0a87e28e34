/// Errors surfaced by the curation engine.
#[derive(Debug, thiserror::Error)]
pub enum CurationError {
    /// Malformed oracle output or an unparseable stored value.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("proposal {id} is already {status}")]
    InvalidState { id: String, status: String },

    #[error("oracle task {task} failed: {reason}")]
    Oracle { task: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp error: {0}")]
    Time(String),
}

impl CurationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CurationError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn oracle(task: impl Into<String>, reason: impl ToString) -> Self {
        CurationError::Oracle {
            task: task.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CurationError>;
