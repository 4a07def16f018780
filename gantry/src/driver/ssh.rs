//! Guests reachable over SSH.
//!
//! The rendered script is passed as the single remote command argument of
//! `ssh`. Exit status 255 belongs to `ssh` itself and means the guest could
//! not be reached; any other status is the payload's.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gantry_common::{CommandOutput, ConfigError, GuestError, ShellScript};
use tracing::{debug, info};

use super::{ExecuteOptions, Executable, ExecutionDriver, finish, render_script};
use crate::command_runner::{CommandRunner, ProcessOutcome, RunOptions};
use crate::config::GuestConfig;
use crate::guest::GuestFacts;
use crate::retry::Retry;

/// Exit status `ssh` uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Options every connection is opened with.
const BASE_SSH_OPTIONS: &[&str] = &[
    "-oForwardX11=no",
    "-oStrictHostKeyChecking=no",
    "-oUserKnownHostsFile=/dev/null",
    "-oConnectionAttempts=5",
    "-oConnectTimeout=60",
    "-oServerAliveInterval=5",
    "-oServerAliveCountMax=60",
];

pub struct SshDriver {
    name: String,
    facts: GuestFacts,
    hostname: String,
    user: Option<String>,
    port: Option<u16>,
    keys: Vec<PathBuf>,
    password: Option<String>,
    extra_options: Vec<String>,
    control_path: Option<PathBuf>,
    connect: Retry,
    runner: Arc<dyn CommandRunner>,
}

impl SshDriver {
    pub const ID: &'static str = "ssh";

    pub fn from_config(
        config: &GuestConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Box<dyn ExecutionDriver>, ConfigError> {
        let hostname = config.require(config.hostname.as_deref(), "hostname")?;
        Ok(Box::new(Self {
            name: config.name.clone(),
            facts: config.facts(),
            hostname: hostname.to_string(),
            user: config.user.clone(),
            port: config.port,
            keys: config.key.clone(),
            password: config.password.clone(),
            extra_options: config.ssh_option.clone(),
            control_path: config.control_path.clone(),
            connect: Retry::new(config.connect_retries, config.connect_interval()),
            runner,
        }))
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// Options shared by `ssh` and `scp`, without the port flag.
    fn common_options(&self) -> Vec<String> {
        let mut options: Vec<String> = BASE_SSH_OPTIONS.iter().map(|o| o.to_string()).collect();
        for key in &self.keys {
            options.push("-i".to_string());
            options.push(key.display().to_string());
        }
        if let Some(control_path) = &self.control_path {
            options.push("-oControlMaster=auto".to_string());
            options.push("-oControlPersist=60s".to_string());
            options.push(format!("-oControlPath={}", control_path.display()));
        }
        options.extend(self.extra_options.iter().map(|o| format!("-o{}", o)));
        options
    }

    /// `sshpass -e` when a password is configured. The password itself
    /// travels in `SSHPASS`, never on the command line.
    fn password_prefix(&self) -> Vec<String> {
        if self.password.is_some() {
            vec!["sshpass".to_string(), "-e".to_string()]
        } else {
            Vec::new()
        }
    }

    fn password_env(&self) -> Vec<(String, String)> {
        self.password
            .iter()
            .map(|password| ("SSHPASS".to_string(), password.clone()))
            .collect()
    }

    /// The complete argv for running `script` remotely.
    pub fn ssh_argv(&self, script: &ShellScript, options: &ExecuteOptions) -> Vec<String> {
        let mut argv = self.password_prefix();
        argv.push("ssh".to_string());
        argv.extend(self.common_options());
        if let Some(port) = self.port {
            argv.push("-p".to_string());
            argv.push(port.to_string());
        }
        if options.interactive {
            argv.push("-t".to_string());
        } else if options.tty || options.test_session {
            // Force a pty even without a local terminal, so remote children
            // are hung up when the session ends.
            argv.push("-tt".to_string());
        }
        argv.push(self.destination());
        argv.push(script.to_string());
        argv
    }

    fn scp_argv(&self, source: &Path, destination: &Path) -> Vec<String> {
        let mut argv = self.password_prefix();
        argv.push("scp".to_string());
        argv.extend(self.common_options());
        if let Some(port) = self.port {
            argv.push("-P".to_string());
            argv.push(port.to_string());
        }
        argv.push(source.display().to_string());
        argv.push(format!("{}:{}", self.destination(), destination.display()));
        argv
    }

    fn run(&self, argv: &[String], options: &ExecuteOptions) -> Result<ProcessOutcome, GuestError> {
        let run_options = RunOptions {
            env: self.password_env(),
            timeout: options.timeout,
            interactive: options.interactive,
            silent: options.silent,
        };
        let outcome = self
            .runner
            .run(argv, &run_options)
            .map_err(|e| GuestError::io(&self.name, e))?;
        if outcome.status == SSH_ERROR_STATUS && !outcome.timed_out {
            let reason = outcome
                .stderr
                .as_deref()
                .map(str::trim)
                .filter(|stderr| !stderr.is_empty())
                .unwrap_or("ssh exited with status 255")
                .to_string();
            return Err(GuestError::unavailable(&self.name, reason));
        }
        Ok(outcome)
    }

    /// Drop the trailer ssh prints when a forced pty session closes.
    fn strip_connection_trailer(&self, stdout: String) -> String {
        let trailers = [
            format!("Connection to {} closed.", self.hostname),
            format!("Shared connection to {} closed.", self.hostname),
        ];
        let trimmed = stdout.trim_end_matches(['\r', '\n']);
        let last_line_start = trimmed.rfind('\n').map_or(0, |i| i + 1);
        let last_line = trimmed[last_line_start..].trim_end_matches('\r');
        if trailers.iter().any(|trailer| trailer == last_line) {
            trimmed[..last_line_start].to_string()
        } else {
            stdout
        }
    }
}

impl ExecutionDriver for SshDriver {
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
        let argv = self.ssh_argv(&script, options);
        let mut outcome = self.run(&argv, options)?;
        if options.test_session {
            outcome.stdout = outcome
                .stdout
                .map(|stdout| self.strip_connection_trailer(stdout));
        }
        finish(&self.name, &script, outcome, options)
    }

    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        debug!(
            guest = %self.name,
            "Pushing {} to {}",
            source.display(),
            destination.display()
        );
        let argv = self.scp_argv(source, destination);
        let options = ExecuteOptions::new();
        let outcome = self.run(&argv, &options)?;
        finish(
            &self.name,
            &ShellScript::new(argv.join(" ")),
            outcome,
            &options,
        )
        .map(|_| ())
    }

    fn is_ready(&self) -> bool {
        let argv = self.ssh_argv(&ShellScript::new("exit 0"), &ExecuteOptions::new());
        self.runner
            .run(&argv, &RunOptions::default())
            .map(|outcome| outcome.succeeded())
            .unwrap_or(false)
    }

    /// Wait until the guest accepts connections.
    fn prepare(&self) -> Result<(), GuestError> {
        info!(guest = %self.name, host = %self.hostname, "Waiting for guest to accept connections");
        let argv = self.ssh_argv(&ShellScript::new("exit 0"), &ExecuteOptions::new());
        self.connect.run("ssh connect", || {
            let outcome = self.run(&argv, &ExecuteOptions::new())?;
            if outcome.succeeded() {
                Ok(())
            } else {
                Err(GuestError::unavailable(
                    &self.name,
                    format!("readiness check exited with status {}", outcome.status),
                ))
            }
        })
    }

    fn cleanup(&self) -> Result<(), GuestError> {
        let Some(control_path) = &self.control_path else {
            return Ok(());
        };
        if !control_path.exists() {
            return Ok(());
        }
        debug!(guest = %self.name, "Closing ssh control master");
        let mut argv = vec!["ssh".to_string()];
        argv.push(format!("-oControlPath={}", control_path.display()));
        argv.push("-O".to_string());
        argv.push("exit".to_string());
        argv.push(self.destination());
        // The master may already be gone, nothing to report then.
        let _ = self.runner.run(&argv, &RunOptions::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::MockCommandRunner;
    use gantry_common::Command;
    use std::time::Duration;

    fn config() -> GuestConfig {
        let mut config = GuestConfig::new("runner", "ssh");
        config.hostname = Some("guest.example".to_string());
        config.user = Some("root".to_string());
        config.connect_retries = 2;
        config.connect_interval = 0;
        config
    }

    fn driver(config: &GuestConfig, runner: Arc<MockCommandRunner>) -> Box<dyn ExecutionDriver> {
        SshDriver::from_config(config, runner).unwrap()
    }

    #[test]
    fn test_remote_command_is_single_argument() {
        let runner = Arc::new(MockCommandRunner::new());
        let driver = driver(&config(), runner.clone());
        driver
            .execute(&Command::new(["pwd"]).into(), &ExecuteOptions::new().cwd("/tmp"))
            .unwrap();
        let argv = runner.last_call().unwrap();
        assert_eq!(argv[0], "ssh");
        assert_eq!(argv[argv.len() - 2], "root@guest.example");
        assert_eq!(argv[argv.len() - 1], "cd /tmp; pwd");
    }

    #[test]
    fn test_missing_hostname_is_config_error() {
        let config = GuestConfig::new("runner", "ssh");
        let err = SshDriver::from_config(&config, Arc::new(MockCommandRunner::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingOption { option: "hostname", .. }));
    }

    #[test]
    fn test_port_keys_and_extra_options() {
        let mut config = config();
        config.port = Some(2222);
        config.key = vec![PathBuf::from("/keys/id_ed25519")];
        config.ssh_option = vec!["ServerAliveInterval=10".to_string()];
        let runner = Arc::new(MockCommandRunner::new());
        driver(&config, runner.clone())
            .execute(&"true".into(), &ExecuteOptions::new())
            .unwrap();
        let argv = runner.last_call().unwrap().join(" ");
        assert!(argv.contains("-p 2222"));
        assert!(argv.contains("-i /keys/id_ed25519"));
        assert!(argv.contains("-oServerAliveInterval=10"));
        assert!(argv.contains("-oStrictHostKeyChecking=no"));
    }

    #[test]
    fn test_password_uses_sshpass_env() {
        let mut config = config();
        config.password = Some("hunter2".to_string());
        let runner = Arc::new(MockCommandRunner::new());
        driver(&config, runner.clone())
            .execute(&"true".into(), &ExecuteOptions::new())
            .unwrap();
        let argv = runner.last_call().unwrap();
        assert_eq!(&argv[..3], ["sshpass", "-e", "ssh"]);
        assert!(!argv.iter().any(|arg| arg.contains("hunter2")));
    }

    #[test]
    fn test_pty_flags() {
        let runner = Arc::new(MockCommandRunner::new());
        let driver = driver(&config(), runner.clone());
        driver
            .execute(&"true".into(), &ExecuteOptions::new().test_session(true))
            .unwrap();
        assert!(runner.last_call().unwrap().contains(&"-tt".to_string()));
        driver
            .execute(&"true".into(), &ExecuteOptions::new().interactive(true))
            .unwrap();
        let argv = runner.last_call().unwrap();
        assert!(argv.contains(&"-t".to_string()));
        assert!(!argv.contains(&"-tt".to_string()));
    }

    #[test]
    fn test_test_session_strips_connection_trailer() {
        let runner = Arc::new(MockCommandRunner::new().respond(ProcessOutcome::success(
            "result line\r\nConnection to guest.example closed.\r\n",
        )));
        let output = driver(&config(), runner)
            .execute(&"./test.sh".into(), &ExecuteOptions::new().test_session(true))
            .unwrap();
        assert_eq!(output.stdout_str(), "result line\r\n");
    }

    #[test]
    fn test_trailer_kept_outside_test_sessions() {
        let stdout = "Connection to guest.example closed.\n";
        let runner = Arc::new(MockCommandRunner::new().respond(ProcessOutcome::success(stdout)));
        let output = driver(&config(), runner)
            .execute(&"true".into(), &ExecuteOptions::new())
            .unwrap();
        assert_eq!(output.stdout_str(), stdout);
    }

    #[test]
    fn test_status_255_is_unavailable() {
        let runner = Arc::new(
            MockCommandRunner::new().respond(ProcessOutcome::failure(255, "Connection refused\n")),
        );
        let err = driver(&config(), runner)
            .execute(&"true".into(), &ExecuteOptions::new())
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("Connection refused"));
    }

    #[test]
    fn test_payload_failure_is_command_failed() {
        let runner = Arc::new(MockCommandRunner::new().respond(ProcessOutcome::failure(2, "")));
        let err = driver(&config(), runner)
            .execute(&"false".into(), &ExecuteOptions::new().timeout(Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_push_uses_scp_with_upper_case_port() {
        let mut config = config();
        config.port = Some(2222);
        let runner = Arc::new(MockCommandRunner::new());
        driver(&config, runner.clone())
            .push(Path::new("/tmp/wrapper.sh"), Path::new("/var/tmp/wrapper.sh"))
            .unwrap();
        let argv = runner.last_call().unwrap();
        assert_eq!(argv[0], "scp");
        assert!(argv.join(" ").contains("-P 2222"));
        assert_eq!(argv.last().unwrap(), "root@guest.example:/var/tmp/wrapper.sh");
    }

    #[test]
    fn test_prepare_retries_until_reachable() {
        let runner = Arc::new(
            MockCommandRunner::new().respond(ProcessOutcome::failure(255, "No route to host")),
        );
        driver(&config(), runner.clone()).prepare().unwrap();
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_prepare_gives_up() {
        let runner = Arc::new(
            MockCommandRunner::new()
                .respond(ProcessOutcome::failure(255, "No route to host"))
                .respond(ProcessOutcome::failure(255, "No route to host")),
        );
        let err = driver(&config(), runner).prepare().unwrap_err();
        assert!(err.is_unavailable());
    }
}
