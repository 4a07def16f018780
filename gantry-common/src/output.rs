use serde::{Deserialize, Serialize};

/// Captured output of a guest command.
///
/// `None` means the stream was not captured at all, which is different from
/// a captured but empty stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl CommandOutput {
    pub fn new(stdout: Option<String>, stderr: Option<String>) -> Self {
        Self { stdout, stderr }
    }

    /// Output of a command that produced nothing we could capture.
    pub fn uncaptured() -> Self {
        Self::default()
    }

    pub fn stdout_str(&self) -> &str {
        self.stdout.as_deref().unwrap_or_default()
    }

    pub fn stderr_str(&self) -> &str {
        self.stderr.as_deref().unwrap_or_default()
    }
}
