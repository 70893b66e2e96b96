use thiserror::Error;

/// Failures of a raw key-value storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded while writing {0}")]
    QuotaExceeded(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the persisted session store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Rejected assessment transitions. These are invariant violations and are
/// turned into no-ops by the session layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssessmentError {
    #[error("no assessment has been started")]
    NotStarted,
    #[error("assessment has no questions")]
    NoQuestions,
    #[error("assessment is already complete")]
    AlreadyComplete,
    #[error("question {got} answered out of order, expected {expected}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("question {0} has already been answered")]
    AlreadyAnswered(usize),
    #[error("question {index} expects {expected}")]
    WrongAnswerShape { index: usize, expected: &'static str },
    #[error("option {option} is not valid for question {index}")]
    InvalidOption { index: usize, option: usize },
}

/// Failures of the struggle-topic reset action
#[derive(Debug, Error)]
pub enum StruggleError {
    #[error("no struggle topic is active")]
    NoActiveTopic,
    #[error("reset of '{topic}' was rejected: {message}")]
    Rejected { topic: String, message: String },
    #[error("reset of '{topic}' failed: {source}")]
    Service {
        topic: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level error of the session engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Struggle(#[from] StruggleError),
    #[error("course catalog lookup failed: {0}")]
    Catalog(#[source] anyhow::Error),
    #[error("no course or unit selected and no stored session to resume")]
    NoSelection,
    #[error("failed to export session: {0}")]
    Export(#[source] serde_json::Error),
}
