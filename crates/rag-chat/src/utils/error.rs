use thiserror::Error;

/// Errors surfaced by sessions, chains and their collaborators.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend connection error: {0}")]
    BackendConnection(String),

    #[error("Resource state error: {0}")]
    ResourceState(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Failures of the response repair parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no fragment matched the expected schema")]
    NoMatch,

    #[error("invalid structured text: {0}")]
    Invalid(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Short machine-friendly name, used as `error_type` in activity logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Validation(_) => "validation",
            Self::BackendConnection(_) => "backend_connection",
            Self::ResourceState(_) => "resource_state",
            Self::Parse(_) => "parse",
        }
    }

    /// Convert a collaborator error into a `ChatError`.
    ///
    /// Errors that already carry a `ChatError` are unwrapped as-is, anything
    /// else is treated as a backend failure of `op`.
    pub fn from_backend(op: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ChatError>() {
            Ok(chat_err) => chat_err,
            Err(other) => {
                tracing::error!(operation = op, error = %format!("{:#}", other), "Backend call failed");
                Self::BackendConnection(format!("{}: {:#}", op, other))
            }
        }
    }
}
