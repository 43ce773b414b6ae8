use std::process::ExitCode;

/// Errors surfaced by the versioned store's CAS primitive.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// The document moved since it was read. Expected under contention.
    #[error("version conflict: document changed since read")]
    Conflict,

    /// The backing store could not be reached or the operation failed
    /// for reasons unrelated to versioning.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from reading a shared document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The document exists but does not decode. Never silently skipped.
    #[error("corrupt document {doc}: {message}")]
    Corrupt { doc: String, message: String },
}

/// Errors from the publish (mutate-and-CAS) cycle.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Every attempt hit a version conflict. The intended state change
    /// did not happen; callers must not assume it committed.
    #[error("publish failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt document {doc}: {message}")]
    Corrupt { doc: String, message: String },
}

impl From<StoreError> for PublishError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(m) => Self::Unavailable(m),
            StoreError::Corrupt { doc, message } => Self::Corrupt { doc, message },
        }
    }
}

/// Errors that cause swarm to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("registration failed for {agent}: {message}")]
    RegistrationFailed { agent: String, message: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::RegistrationFailed { .. } => ExitCode::from(3),
            ExitError::ToolFailed { .. } => ExitCode::from(4),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }
}
