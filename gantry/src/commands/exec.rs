//! Run a command on a guest.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use gantry_common::{Command, ShellScript};

use crate::commands::{connect, load_guest, parse_key_value};
use crate::deferred::DeferrableExecutor;
use crate::driver::{DriverRegistry, ExecuteOptions, Executable};
use crate::output::Output;

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Working directory on the guest
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE, repeatable)
    #[arg(long = "env", short = 'e', value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Guest file sourced before the command (repeatable)
    #[arg(long = "source")]
    pub sourced_files: Vec<PathBuf>,

    /// Kill the command after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Allocate a terminal on the guest
    #[arg(long)]
    pub tty: bool,

    /// Attach local stdin and stdout to the command
    #[arg(long, short = 'i')]
    pub interactive: bool,

    /// Treat the arguments as shell text instead of an argv
    #[arg(long)]
    pub script: bool,

    /// Batch the command into an image build and switch the guest to it
    /// (bootc guests only)
    #[arg(long, conflicts_with_all = ["interactive", "tty", "timeout"])]
    pub defer: bool,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    fn executable(&self) -> Executable {
        if self.script {
            ShellScript::new(self.command.join(" ")).into()
        } else {
            Command::new(self.command.iter().cloned()).into()
        }
    }

    fn options(&self) -> ExecuteOptions {
        let mut options = ExecuteOptions::new()
            .tty(self.tty)
            .interactive(self.interactive);
        if let Some(cwd) = &self.cwd {
            options = options.cwd(cwd);
        }
        for (key, value) in &self.env {
            options = options.env(key, value);
        }
        for file in &self.sourced_files {
            options = options.source(file);
        }
        if let Some(timeout) = self.timeout {
            options = options.timeout(Duration::from_secs(timeout));
        }
        options
    }
}

pub fn run(args: ExecArgs, guest: Option<&Path>, drivers: &DriverRegistry) -> Result<()> {
    let config = load_guest(guest)?;
    let driver = connect(&config, drivers)?;
    let executable = args.executable();
    let options = args.options();

    if args.defer {
        let mut executor = DeferrableExecutor::bootc(driver);
        executor
            .defer(&executable, &options)
            .with_context(|| format!("Failed to defer command on guest {}", config.name))?;
        let spinner = Output::spinner(format!("Building image on guest {}...", config.name));
        return match executor.finish_phase() {
            Ok(Some(tag)) => {
                spinner.finish_success(format!("Switched guest {} to {}", config.name, tag));
                Output::hint("Reboot the guest to boot the new image");
                Ok(())
            }
            Ok(None) => {
                spinner.finish_clear();
                Ok(())
            }
            Err(e) => {
                spinner.finish_error("Image build failed");
                Err(e.into())
            }
        };
    }

    Output::running(&config.name, executable.to_script().as_str());
    let result = driver.execute(&executable, &options);
    let cleanup = driver.cleanup();

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            if let Some(output) = e.output() {
                print_output(output.stdout_str(), output.stderr_str())?;
            }
            return Err(e.into());
        }
    };
    print_output(output.stdout_str(), output.stderr_str())?;
    cleanup.with_context(|| format!("Failed to clean up guest {}", config.name))?;
    Ok(())
}

fn print_output(stdout: &str, stderr: &str) -> Result<()> {
    std::io::stdout().write_all(stdout.as_bytes())?;
    std::io::stderr().write_all(stderr.as_bytes())?;
    Ok(())
}
