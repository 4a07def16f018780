//! Execution drivers: one uniform contract for running commands on a guest.
//!
//! Every driver receives the payload plus [`ExecuteOptions`], renders them
//! into a single script with [`render_script`] and hands that script to its
//! transport in one invocation, so the environment export, the `cd` and any
//! sourced files share shell state with the payload.
//!
//! ```text
//! export LANG=C; cd /tmp; . /etc/profile.d/ci.sh; pwd
//! └── env ─────┘ └─cwd─┘ └── sourced files ───┘ └payload┘
//! ```
//!
//! Drivers are resolved by id through a [`DriverRegistry`] owned by the
//! composition root.

pub mod chroot;
pub mod container;
pub mod local;
pub mod ssh;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gantry_common::{
    Command, CommandOutput, ConfigError, EnvMap, GuestError, ShellScript, quote,
};
use tracing::debug;

use crate::command_runner::{CommandRunner, ProcessOutcome};
use crate::config::GuestConfig;
use crate::guest::GuestFacts;

pub use chroot::ChrootDriver;
pub use container::ContainerDriver;
pub use local::LocalDriver;
pub use ssh::SshDriver;

/// A payload: an argv-style command or free-form shell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executable {
    Command(Command),
    Script(ShellScript),
}

impl Executable {
    pub fn to_script(&self) -> ShellScript {
        match self {
            Executable::Command(command) => command.to_shell_script(),
            Executable::Script(script) => script.clone(),
        }
    }
}

impl From<Command> for Executable {
    fn from(command: Command) -> Self {
        Executable::Command(command)
    }
}

impl From<ShellScript> for Executable {
    fn from(script: ShellScript) -> Self {
        Executable::Script(script)
    }
}

impl From<&str> for Executable {
    fn from(script: &str) -> Self {
        Executable::Script(ShellScript::new(script))
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Changed into before sourcing files or running the payload.
    pub cwd: Option<PathBuf>,
    /// Exported first, on top of the guest environment.
    pub env: EnvMap,
    /// Request a pseudo-terminal.
    pub tty: bool,
    /// Attach the caller's terminal; output is not captured.
    pub interactive: bool,
    /// Keep the output out of the log.
    pub silent: bool,
    /// Sourced in order before the payload.
    pub sourced_files: Vec<PathBuf>,
    pub timeout: Option<Duration>,
    /// The payload is a test; transports may force a pty so orphaned
    /// children die with the session.
    pub test_session: bool,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn source(mut self, file: impl Into<PathBuf>) -> Self {
        self.sourced_files.push(file.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn test_session(mut self, test_session: bool) -> Self {
        self.test_session = test_session;
        self
    }
}

/// The execute contract every transport implements.
pub trait ExecutionDriver: Send + Sync {
    /// Driver id, e.g. `ssh`.
    fn how(&self) -> &'static str;

    /// Guest name, for logs and errors.
    fn name(&self) -> &str;

    fn facts(&self) -> &GuestFacts;

    /// Run a payload and return its captured output.
    ///
    /// A non-zero payload exit is `GuestError::CommandFailed`; a failure of
    /// the transport itself is `GuestError::Unavailable`. A payload that
    /// outlives `timeout` is killed, and the call fails with
    /// `GuestError::TimedOut`, whose `exit_code()` is the dedicated timeout
    /// status (124) and which still carries the output captured so far.
    fn execute(
        &self,
        executable: &Executable,
        options: &ExecuteOptions,
    ) -> Result<CommandOutput, GuestError>;

    /// Copy a host file to the guest.
    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError>;

    /// Whether the transport can accept commands right now. Never mutates.
    fn is_ready(&self) -> bool;

    fn prepare(&self) -> Result<(), GuestError> {
        Ok(())
    }

    fn cleanup(&self) -> Result<(), GuestError> {
        Ok(())
    }
}

/// `export K1=v1 K2=v2`, or an empty script for an empty map.
pub fn export_environment(env: &EnvMap) -> ShellScript {
    if env.is_empty() {
        return ShellScript::default();
    }
    let assignments: Vec<String> = env
        .iter()
        .map(|(key, value)| format!("{}={}", key, quote(value)))
        .collect();
    ShellScript::new(format!("export {}", assignments.join(" ")))
}

/// Render environment, cwd, sourced files and payload into one script.
///
/// `guest_env` is overlaid by the per-call environment. Empty segments are
/// dropped, the rest are joined with `; `.
pub fn render_script(
    executable: &Executable,
    options: &ExecuteOptions,
    guest_env: &EnvMap,
) -> ShellScript {
    let mut env = guest_env.clone();
    env.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut segments = vec![export_environment(&env)];
    if let Some(cwd) = &options.cwd {
        segments.push(Command::new(["cd".to_string(), cwd.display().to_string()]).into());
    }
    for file in &options.sourced_files {
        segments.push(ShellScript::new(format!(
            ". {}",
            quote(&file.display().to_string())
        )));
    }
    segments.push(executable.to_script());

    let script = ShellScript::from_scripts(segments);
    debug!(script = %script, "Rendered guest script");
    script
}

/// Map a finished transport process to the execute contract.
pub(crate) fn finish(
    guest: &str,
    command: &ShellScript,
    outcome: ProcessOutcome,
    options: &ExecuteOptions,
) -> Result<CommandOutput, GuestError> {
    let output = CommandOutput::new(outcome.stdout, outcome.stderr);
    if outcome.timed_out {
        return Err(GuestError::TimedOut {
            guest: guest.to_string(),
            command: command.to_string(),
            timeout: options.timeout.unwrap_or_default(),
            output,
        });
    }
    if outcome.status != 0 {
        return Err(GuestError::CommandFailed {
            guest: guest.to_string(),
            command: command.to_string(),
            status: outcome.status,
            output,
        });
    }
    Ok(output)
}

/// Constructor of one driver kind.
pub type DriverConstructor =
    fn(&GuestConfig, Arc<dyn CommandRunner>) -> Result<Box<dyn ExecutionDriver>, ConfigError>;

/// Explicit map from driver id to constructor.
pub struct DriverRegistry {
    constructors: BTreeMap<&'static str, DriverConstructor>,
}

impl DriverRegistry {
    /// Registry with every built-in driver.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(LocalDriver::ID, LocalDriver::from_config);
        registry.register(SshDriver::ID, SshDriver::from_config);
        registry.register(ContainerDriver::ID, ContainerDriver::from_config);
        registry.register(ChrootDriver::ID, ChrootDriver::from_config);
        registry
    }

    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, id: &'static str, constructor: DriverConstructor) {
        self.constructors.insert(id, constructor);
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// Build the driver named by `config.how`.
    pub fn create(
        &self,
        config: &GuestConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Box<dyn ExecutionDriver>, ConfigError> {
        let constructor =
            self.constructors
                .get(config.how.as_str())
                .ok_or_else(|| ConfigError::UnknownDriver {
                    how: config.how.clone(),
                    known: self.ids().iter().map(|id| id.to_string()).collect(),
                })?;
        debug!(guest = %config.name, how = %config.how, "Creating driver");
        constructor(config, runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::MockCommandRunner;

    #[test]
    fn test_render_cwd_before_payload() {
        let script = render_script(
            &Command::new(["pwd"]).into(),
            &ExecuteOptions::new().cwd("/tmp"),
            &EnvMap::new(),
        );
        assert_eq!(script.as_str(), "cd /tmp; pwd");
    }

    #[test]
    fn test_render_full_order() {
        let guest_env = EnvMap::from([("LANG".to_string(), "C".to_string())]);
        let options = ExecuteOptions::new()
            .cwd("/srv/tests")
            .env("TEST", "one two")
            .source("/etc/profile.d/a.sh")
            .source("/etc/profile.d/b.sh");
        let script = render_script(&"make check".into(), &options, &guest_env);
        assert_eq!(
            script.as_str(),
            "export LANG=C TEST='one two'; cd /srv/tests; \
             . /etc/profile.d/a.sh; . /etc/profile.d/b.sh; make check"
        );
    }

    #[test]
    fn test_call_env_overrides_guest_env() {
        let guest_env = EnvMap::from([("MODE".to_string(), "guest".to_string())]);
        let script = render_script(
            &"true".into(),
            &ExecuteOptions::new().env("MODE", "call"),
            &guest_env,
        );
        assert_eq!(script.as_str(), "export MODE=call; true");
    }

    #[test]
    fn test_export_quotes_values() {
        let env = EnvMap::from([("A".to_string(), "$HOME; rm".to_string())]);
        let script = export_environment(&env);
        let tokens = shlex::split(script.as_str()).unwrap();
        assert_eq!(tokens, vec!["export", "A=$HOME; rm"]);
    }

    #[test]
    fn test_finish_distinguishes_failure_and_timeout() {
        let script = ShellScript::new("false");
        let options = ExecuteOptions::new().timeout(Duration::from_secs(3));

        let err = finish("g", &script, ProcessOutcome::failure(1, "boom"), &options).unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.output().map(|o| o.stderr_str()), Some("boom"));

        let mut outcome = ProcessOutcome::failure(124, "");
        outcome.timed_out = true;
        let err = finish("g", &script, outcome, &options).unwrap_err();
        assert!(matches!(err, GuestError::TimedOut { timeout, .. } if timeout.as_secs() == 3));
        assert_eq!(err.exit_code(), Some(gantry_common::exit_code::TIMEOUT));
        assert!(err.output().is_some());
    }

    #[test]
    fn test_registry_lists_builtin_drivers() {
        let registry = DriverRegistry::builtin();
        assert_eq!(registry.ids(), vec!["chroot", "container", "local", "ssh"]);
    }

    #[test]
    fn test_registry_rejects_unknown_driver() {
        let registry = DriverRegistry::builtin();
        let config = GuestConfig::new("g", "telepathy");
        let err = registry
            .create(&config, Arc::new(MockCommandRunner::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownDriver { .. }));
        assert!(err.to_string().contains("local"));
    }

    #[test]
    fn test_registry_explicit_registration() {
        let mut registry = DriverRegistry::empty();
        assert!(registry.ids().is_empty());
        registry.register("local", LocalDriver::from_config);
        let driver = registry
            .create(&GuestConfig::local(), Arc::new(MockCommandRunner::new()))
            .unwrap();
        assert_eq!(driver.how(), "local");
    }
}
