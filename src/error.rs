use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the monitoring backend.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot connect to backend at {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backend did not finish replying to {command} within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed record {line:?}: {reason}")]
    MalformedRecord { line: String, reason: String },

    #[error("unexpected response to {command}: {response:?}")]
    UnexpectedResponse { command: String, response: String },

    #[error("backend rejected command: {0}")]
    CommandRejected(String),

    #[error("invalid signal number {0}")]
    InvalidSignal(i32),

    #[error("invalid pid {0}")]
    InvalidPid(i32),

    #[error("refusing to signal critical process {0}")]
    CriticalProcess(i32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed<L: Into<String>, R: Into<String>>(line: L, reason: R) -> Self {
        Error::MalformedRecord {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn unexpected<C: Into<String>, R: Into<String>>(command: C, response: R) -> Self {
        Error::UnexpectedResponse {
            command: command.into(),
            response: response.into(),
        }
    }

    /// Transport-level failures that only mean "no data this tick".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Timeout { .. } | Error::Io(_)
        )
    }
}
