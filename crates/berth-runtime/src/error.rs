//! Error types for berth-runtime

use thiserror::Error;

/// Errors raised by the runtime control surface, health probes and the
/// schema bootstrapper.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The named instance, network or image does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A runtime command exited unsuccessfully
    #[error("`{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// A runtime command did not finish within its time budget
    #[error("`{command}` timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    /// The runtime refused to start an instance because the name or port is taken
    #[error("conflict: {0}")]
    Conflict(String),

    /// A launch spec the runtime cannot express safely
    #[error("invalid launch spec: {0}")]
    InvalidSpec(String),

    /// Runtime output could not be parsed
    #[error("unexpected runtime output: {0}")]
    Parse(String),

    /// The health endpoint did not answer within the probe timeout
    #[error("probe of {url} timed out")]
    ProbeTimeout { url: String },

    /// The health endpoint refused or dropped the connection
    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    /// IO error (spawning commands, temp files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Whether this error means the target simply is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Result type for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
