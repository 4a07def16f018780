//! Guests that are running containers.
//!
//! Commands go through `<runtime> exec`; the runtime's own failures are
//! reported with status 125, anything else belongs to the payload.

use std::path::Path;
use std::sync::Arc;

use gantry_common::{CommandOutput, ConfigError, GuestError, ShellScript};
use tracing::debug;

use super::{ExecuteOptions, Executable, ExecutionDriver, finish, render_script};
use crate::command_runner::{CommandRunner, ProcessOutcome, RunOptions};
use crate::config::GuestConfig;
use crate::guest::GuestFacts;

const DEFAULT_RUNTIME: &str = "podman";

/// Exit status podman and docker use when `exec` itself fails.
const RUNTIME_ERROR_STATUS: i32 = 125;

pub struct ContainerDriver {
    name: String,
    facts: GuestFacts,
    container: String,
    runtime: String,
    user: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ContainerDriver {
    pub const ID: &'static str = "container";

    pub fn from_config(
        config: &GuestConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Box<dyn ExecutionDriver>, ConfigError> {
        let container = config.require(config.container.as_deref(), "container")?;
        Ok(Box::new(Self {
            name: config.name.clone(),
            facts: config.facts(),
            container: container.to_string(),
            runtime: config
                .runtime
                .clone()
                .unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            user: config.container_user.clone(),
            runner,
        }))
    }

    pub fn exec_argv(&self, script: &ShellScript, options: &ExecuteOptions) -> Vec<String> {
        let mut argv = vec![self.runtime.clone(), "exec".to_string()];
        if options.interactive {
            argv.push("-it".to_string());
        } else if options.tty {
            argv.push("-t".to_string());
        }
        if let Some(user) = &self.user {
            argv.push("--user".to_string());
            argv.push(user.clone());
        }
        argv.push(self.container.clone());
        argv.extend(script.to_command("sh").to_popen());
        argv
    }

    fn run(&self, argv: &[String], options: &ExecuteOptions) -> Result<ProcessOutcome, GuestError> {
        let run_options = RunOptions {
            env: Vec::new(),
            timeout: options.timeout,
            interactive: options.interactive,
            silent: options.silent,
        };
        let outcome = self
            .runner
            .run(argv, &run_options)
            .map_err(|e| GuestError::io(&self.name, e))?;
        if outcome.status == RUNTIME_ERROR_STATUS && !outcome.timed_out {
            return Err(GuestError::unavailable(
                &self.name,
                format!(
                    "{} could not exec in container '{}': {}",
                    self.runtime,
                    self.container,
                    outcome.stderr.as_deref().unwrap_or_default().trim()
                ),
            ));
        }
        Ok(outcome)
    }
}

impl ExecutionDriver for ContainerDriver {
    fn how(&self) -> &'static str {
        Self::ID
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn facts(&self) -> &GuestFacts {
        &self.facts
    }

    fn execute(
        &self,
        executable: &Executable,
        options: &ExecuteOptions,
    ) -> Result<CommandOutput, GuestError> {
        let script = render_script(executable, options, &self.facts.environment);
        let argv = self.exec_argv(&script, options);
        let outcome = self.run(&argv, options)?;
        finish(&self.name, &script, outcome, options)
    }

    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        debug!(
            guest = %self.name,
            "Copying {} into {}:{}",
            source.display(),
            self.container,
            destination.display()
        );
        let argv = vec![
            self.runtime.clone(),
            "cp".to_string(),
            source.display().to_string(),
            format!("{}:{}", self.container, destination.display()),
        ];
        let options = ExecuteOptions::new();
        let outcome = self.run(&argv, &options)?;
        finish(&self.name, &ShellScript::new(argv.join(" ")), outcome, &options).map(|_| ())
    }

    fn is_ready(&self) -> bool {
        let argv = vec![
            self.runtime.clone(),
            "container".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            self.container.clone(),
        ];
        match self.runner.run(&argv, &RunOptions::default()) {
            Ok(outcome) => {
                outcome.succeeded() && outcome.stdout.as_deref().map(str::trim) == Some("true")
            }
            Err(_) => false,
        }
    }
}
