//! The local machine as a guest.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use gantry_common::{CommandOutput, ConfigError, GuestError};
use tracing::{debug, warn};

use super::{ExecuteOptions, Executable, ExecutionDriver, finish, render_script};
use crate::command_runner::{CommandRunner, RunOptions};
use crate::config::GuestConfig;
use crate::guest::GuestFacts;

pub struct LocalDriver {
    name: String,
    facts: GuestFacts,
    runner: Arc<dyn CommandRunner>,
}

impl LocalDriver {
    pub const ID: &'static str = "local";

    pub fn new(name: impl Into<String>, facts: GuestFacts, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.into(),
            facts,
            runner,
        }
    }

    pub fn from_config(
        config: &GuestConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Box<dyn ExecutionDriver>, ConfigError> {
        Ok(Box::new(Self::new(&config.name, config.facts(), runner)))
    }
}

impl ExecutionDriver for LocalDriver {
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
        if options.tty {
            warn!(guest = %self.name, "Ignoring tty request, not meaningful for local execution");
        }
        let script = render_script(executable, options, &self.facts.environment);
        let argv = script.to_command("bash").to_popen();
        let run_options = RunOptions {
            env: Vec::new(),
            timeout: options.timeout,
            interactive: options.interactive,
            silent: options.silent,
        };
        let outcome = self
            .runner
            .run(&argv, &run_options)
            .map_err(|e| GuestError::io(&self.name, e))?;
        finish(&self.name, &script, outcome, options)
    }

    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        if source == destination {
            return Ok(());
        }
        debug!(
            "Copying {} to {}",
            source.display(),
            destination.display()
        );
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| GuestError::io(&self.name, e))?;
        }
        fs::copy(source, destination).map_err(|e| GuestError::io(&self.name, e))?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }
}
