use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exit_code;
use crate::output::CommandOutput;

/// Failures of running something on a guest.
#[derive(Debug, Error)]
pub enum GuestError {
    /// The transport itself could not reach the guest.
    #[error("guest '{guest}' is not available: {reason}")]
    Unavailable { guest: String, reason: String },

    /// The payload ran and exited non-zero.
    #[error("command '{command}' on guest '{guest}' failed with exit code {status}")]
    CommandFailed {
        guest: String,
        command: String,
        status: i32,
        output: CommandOutput,
    },

    /// The payload did not finish in time and was killed.
    #[error("command '{command}' on guest '{guest}' timed out after {}s", timeout.as_secs())]
    TimedOut {
        guest: String,
        command: String,
        timeout: Duration,
        output: CommandOutput,
    },

    #[error("io error on guest '{guest}': {source}")]
    Io {
        guest: String,
        #[source]
        source: std::io::Error,
    },
}

impl GuestError {
    pub fn unavailable(guest: impl Into<String>, reason: impl Into<String>) -> Self {
        GuestError::Unavailable {
            guest: guest.into(),
            reason: reason.into(),
        }
    }

    pub fn io(guest: impl Into<String>, source: std::io::Error) -> Self {
        GuestError::Io {
            guest: guest.into(),
            source,
        }
    }

    /// Exit status of the payload, when it got far enough to have one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GuestError::CommandFailed { status, .. } => Some(*status),
            GuestError::TimedOut { .. } => Some(exit_code::TIMEOUT),
            _ => None,
        }
    }

    /// Output captured before the failure.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            GuestError::CommandFailed { output, .. } | GuestError::TimedOut { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, GuestError::Unavailable { .. })
    }

    /// Human hint for well-known exit codes.
    pub fn hint(&self) -> Option<&'static str> {
        self.exit_code().and_then(exit_code::describe)
    }
}

/// Failures of compiling or running package-manager operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has no way to perform the operation.
    #[error("{0}")]
    Capability(String),

    #[error("{engine} cannot tell which package provides '{}'", path.display())]
    UnmappedPath { engine: &'static str, path: PathBuf },

    #[error("no installables given")]
    NoInstallables,

    #[error("unknown package manager '{id}', known: {}", known.join(", "))]
    UnknownEngine { id: String, known: Vec<String> },

    #[error("presence check on {engine} produced no output")]
    NoPresenceOutput { engine: &'static str },

    #[error(transparent)]
    Guest(#[from] GuestError),
}

impl EngineError {
    pub fn capability(message: impl Into<String>) -> Self {
        EngineError::Capability(message.into())
    }
}

/// Failures of batching commands into an image build.
#[derive(Debug, Error)]
pub enum DeferredError {
    #[error("cannot determine the booted image of guest '{guest}': {message}")]
    BootedImage { guest: String, message: String },

    #[error("image build on guest '{guest}' failed: {message}")]
    Build { guest: String, message: String },

    #[error(transparent)]
    Guest(#[from] GuestError),
}

/// Failures of the pidfile protocol.
#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed pidfile record '{0}'")]
    Malformed(String),

    #[error("no action is running, {} does not exist", path.display())]
    NotRunning { path: PathBuf },

    #[error("process {pid} not found, try again")]
    ProcessGone { pid: i32 },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of loading a guest description.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read guest configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid guest configuration {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unknown guest driver '{how}', known: {}", known.join(", "))]
    UnknownDriver { how: String, known: Vec<String> },

    #[error("guest '{guest}' using '{how}' requires option '{option}'")]
    MissingOption {
        guest: String,
        how: String,
        option: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_has_dedicated_exit_code() {
        let err = GuestError::TimedOut {
            guest: "default".to_string(),
            command: "sleep 10".to_string(),
            timeout: Duration::from_secs(1),
            output: CommandOutput::uncaptured(),
        };
        assert_eq!(err.exit_code(), Some(124));
        assert_eq!(err.hint(), Some("the command timed out"));
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[test]
    fn test_unavailable_has_no_exit_code() {
        let err = GuestError::unavailable("runner", "connection refused");
        assert!(err.is_unavailable());
        assert_eq!(err.exit_code(), None);
        assert!(err.output().is_none());
    }

    #[test]
    fn test_capability_message_is_verbatim() {
        let err = EngineError::capability("rpm-ostree does not support reinstall operation.");
        assert_eq!(err.to_string(), "rpm-ostree does not support reinstall operation.");
    }
}
