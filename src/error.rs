//! Top-level error types for the Walker.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    DevServer(#[from] DevServerError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error represents a transient-transport failure that the
    /// Job Runtime should retry with backoff, as opposed to a terminal logic
    /// or configuration failure. Queried explicitly rather than by matching
    /// on a message string, per the open question in `SPEC_FULL.md` §9.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Workspace(e) => e.is_transient(),
            Error::Agent(e) => e.is_transient(),
            Error::Sqlx(_) => false,
            Error::Io(_) => false,
            _ => false,
        }
    }
}

/// Configuration loading errors. Fail fast at startup (§7).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("empty dog roster")]
    EmptyRoster,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coordination Store (C1) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("malformed value at key {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Command(_))
    }
}

/// Repo Workspace (C5) errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("git command failed: {command}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("transient I/O failure running git: {0}")]
    TransientIo(String),

    #[error("path escapes working tree: {0}")]
    PathEscape(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    fn is_transient(&self) -> bool {
        matches!(self, WorkspaceError::TransientIo(_))
    }
}

/// Validation Gate (C6) errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("type-check failed:\n{0}")]
    TypeCheckFailed(String),

    #[error("dependency install failed:\n{0}")]
    InstallFailed(String),

    #[error("validation timed out after {0}s")]
    Timeout(u64),
}

/// Dev-Server Controller (C7) errors, classified per §4.7.
#[derive(Debug, thiserror::Error)]
pub enum DevServerError {
    #[error("no free port in the preferred or alternative range")]
    NoFreePort,

    #[error("compile error detected:\n{0}")]
    CompileError(String),

    #[error("compilation hang: no completion line for over 60s")]
    CompileHang,

    #[error("runtime hang: {0} consecutive HTTP timeouts")]
    RuntimeHang(u32),

    #[error("silent hang: ready banner seen but no HTTP success for 40s")]
    SilentHang,

    #[error("dev server exited with code {0}")]
    ExitedNonZero(i32),
}

impl DevServerError {
    /// Only a compile hang permits a repair-and-retry pass (§4.7).
    pub fn permits_repair(&self) -> bool {
        matches!(self, DevServerError::CompileHang)
    }
}

/// Agent Façade (C10) errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("editing agent produced no changes")]
    NoChanges,

    #[error("editing agent subprocess failed to start: {0}")]
    SpawnFailed(String),

    #[error("editing agent subprocess exited unexpectedly: {0}")]
    SubprocessExited(String),

    #[error("editing agent protocol error: {0}")]
    Protocol(String),

    #[error("transient I/O talking to the editing agent: {0}")]
    TransientIo(String),

    #[error("validation could not be repaired after one retry:\n{0}")]
    UnfixableValidation(String),

    #[error("tests failed after one retry:\n{0}")]
    TestsFailed(String),
}

impl AgentError {
    fn is_transient(&self) -> bool {
        matches!(self, AgentError::TransientIo(_))
    }
}

/// Pipeline (C11) errors: the cancellation / terminal-logic-failure split.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("task cancelled in phase {phase} by {cancelled_by}")]
    Cancelled { phase: String, cancelled_by: String },

    #[error("terminal failure in phase {phase}: {reason}")]
    TerminalFailure { phase: String, reason: String },
}
