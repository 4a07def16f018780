//! Human-facing CLI output.
//!
//! Status lines get a colored prefix; long guest operations (image builds,
//! waiting for a guest) get a spinner. Machine-readable output (scripts,
//! JSON) is printed with plain `println!` by the commands themselves so it
//! can be piped.
//!
//! ```rust,ignore
//! use gantry::output::Output;
//!
//! let spinner = Output::spinner("Waiting for guest default...");
//! driver.prepare()?;
//! spinner.finish_success("Guest default is ready");
//! ```

use std::borrow::Cow;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

pub struct Output;

impl Output {
    /// `✓ Installed 3 packages`
    pub fn success(msg: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// Errors go to stderr.
    pub fn error(msg: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), msg.as_ref().red());
    }

    /// Warnings go to stderr so they never mix with a rendered script.
    pub fn warning(msg: impl AsRef<str>) {
        eprintln!("{} {}", "⚠".yellow(), msg.as_ref());
    }

    /// `  Driver:        ssh`
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {:<14} {}", format!("{}:", key.as_ref()).cyan(), value.as_ref());
    }

    /// Indented suggestion printed under an error.
    pub fn hint(msg: impl AsRef<str>) {
        eprintln!("  {} {}", "→".cyan(), msg.as_ref());
    }

    pub fn dry_run(msg: impl AsRef<str>) {
        eprintln!("{} {}", "[dry-run]".dimmed(), msg.as_ref().dimmed());
    }

    /// Echo a command line before it is sent to a guest.
    pub fn running(guest: impl AsRef<str>, cmd: impl AsRef<str>) {
        eprintln!(
            "{} {}",
            format!("[{}]", guest.as_ref()).dimmed(),
            cmd.as_ref().dimmed()
        );
    }

    /// A spinner that animates until one of the `finish_*` methods is called.
    pub fn spinner(msg: impl Into<Cow<'static, str>>) -> Spinner {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg);
        pb.enable_steady_tick(Duration::from_millis(80));
        Spinner(pb)
    }
}

pub struct Spinner(ProgressBar);

impl Spinner {
    pub fn finish_success(self, msg: impl AsRef<str>) {
        self.0
            .finish_with_message(format!("{} {}", "✓".green().bold(), msg.as_ref()));
    }

    pub fn finish_error(self, msg: impl AsRef<str>) {
        self.0
            .finish_with_message(format!("{} {}", "✗".red().bold(), msg.as_ref()));
    }

    pub fn finish_clear(self) {
        self.0.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_methods_dont_panic() {
        Output::success("test");
        Output::error("test");
        Output::warning("test");
        Output::kv("key", "value");
        Output::hint("test");
        Output::dry_run("test");
        Output::running("default", "pwd");
    }

    #[test]
    fn test_spinner_lifecycle() {
        let spinner = Output::spinner("Waiting...");
        spinner.finish_success("Ready");
    }
}
