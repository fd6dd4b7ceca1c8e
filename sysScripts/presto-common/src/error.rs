use std::io;
use thiserror::Error;

/// Failures raised by the shared helpers.
/// Binaries wrap these in `anyhow` with their own context.
#[derive(Debug, Error)]
pub enum PrestoError {
    #[error("required command '{0}' not found in PATH")]
    NotFound(String),

    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("'{program}' timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    #[error("{0} requires root privileges (use sudo)")]
    NotRoot(String),

    #[error("could not parse {what}: {detail}")]
    Parse { what: String, detail: String },
}

pub type PrestoResult<T> = Result<T, PrestoError>;

impl PrestoError {
    pub fn parse(what: &str, detail: impl ToString) -> Self {
        PrestoError::Parse {
            what: what.to_string(),
            detail: detail.to_string(),
        }
    }
}
