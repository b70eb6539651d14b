//! Error taxonomy for citriage.

/// Errors produced when merging a generated block into a backlog document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BacklogError {
    #[error("backlog has a start marker without a matching end marker")]
    MissingEndMarker,

    #[error("backlog has an end marker without a matching start marker")]
    MissingStartMarker,

    #[error("backlog end marker at byte {end} precedes start marker at byte {start}")]
    MarkersOutOfOrder { start: usize, end: usize },
}

/// Errors produced by the triage pipeline and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("http error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid model reply: {0}")]
    InvalidReply(String),

    #[error("call budget exhausted: {used} of {max} call(s) used")]
    BudgetExhausted { used: u32, max: u32 },

    #[error("remote budget denied call for {tool} ({remaining} remaining)")]
    BudgetDenied { tool: String, remaining: i64 },

    #[error("triage disabled by remote policy for {0}")]
    Disabled(String),

    #[error("patch appears binary; refusing to apply")]
    BinaryPatch,

    #[error("patch touches {count} file(s) (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("patch touches forbidden path {path}: {reason}")]
    ForbiddenPath { path: String, reason: String },

    #[error("file {path} is {bytes} bytes (max {max})")]
    FileTooLarge { path: String, bytes: u64, max: u64 },

    #[error("git error: {0}")]
    GitError(String),

    #[error("backlog error: {0}")]
    Backlog(#[from] BacklogError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    /// Stable kebab-case code recorded in the triage status artifact.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials(_) => "missing-credentials",
            Self::InvalidConfig(_) => "invalid-config",
            Self::Http { .. } => "http-error",
            Self::InvalidReply(_) => "invalid-reply",
            Self::BudgetExhausted { .. } => "budget-exhausted",
            Self::BudgetDenied { .. } => "budget-denied",
            Self::Disabled(_) => "kill-switch",
            Self::BinaryPatch => "binary-patch",
            Self::TooManyFiles { .. } => "too-many-files",
            Self::ForbiddenPath { .. } => "forbidden-path",
            Self::FileTooLarge { .. } => "file-too-large",
            Self::GitError(_) => "git-error",
            Self::Backlog(_) => "backlog-error",
            Self::Serialization(_) => "serialization-error",
            Self::Io(_) => "io-error",
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(err: reqwest::Error) -> Self {
        TriageError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result type for citriage operations.
pub type Result<T> = std::result::Result<T, TriageError>;
