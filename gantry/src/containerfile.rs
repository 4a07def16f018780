//! Containerfile directive list for deferred execution.
//!
//! A batch always starts with a `FROM` directive naming the image the guest
//! currently runs, followed by one `RUN` directive per deferred command.
//!
//! # Multi-line commands
//!
//! Single-line scripts become `RUN <line>`. Scripts spanning several lines
//! (apt's framed scripts, for example) use the heredoc form understood by
//! buildah and BuildKit:
//!
//! ```dockerfile
//! RUN <<'GANTRY_RUN'
//! export DEBIAN_FRONTEND=noninteractive
//! apt install -y tree
//! GANTRY_RUN
//! ```

use gantry_common::ShellScript;

const HEREDOC_DELIMITER: &str = "GANTRY_RUN";

/// Ordered build directives, rendered one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Containerfile {
    directives: Vec<String>,
}

impl Containerfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a batch on top of `reference`.
    pub fn from_image(reference: impl AsRef<str>) -> Self {
        Self {
            directives: vec![format!("FROM {}", reference.as_ref())],
        }
    }

    /// Append a `RUN` directive for an already rendered script.
    pub fn run(&mut self, script: &ShellScript) {
        let script = script.as_str();
        let directive = if script.contains('\n') {
            let delimiter = heredoc_delimiter(script, HEREDOC_DELIMITER);
            format!("RUN <<'{delimiter}'\n{script}\n{delimiter}")
        } else {
            format!("RUN {script}")
        };
        self.directives.push(directive);
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Whether anything besides the base image was added.
    pub fn has_commands(&self) -> bool {
        self.directives.iter().any(|d| d.starts_with("RUN "))
    }

    pub fn render(&self) -> String {
        let mut rendered = self.directives.join("\n");
        rendered.push('\n');
        rendered
    }
}

/// A heredoc delimiter based on `base` that no line of `body` equals.
pub fn heredoc_delimiter(body: &str, base: &str) -> String {
    let mut delimiter = base.to_string();
    let mut suffix = 0;
    while body.lines().any(|line| line == delimiter) {
        suffix += 1;
        delimiter = format!("{base}_{suffix}");
    }
    delimiter
}
