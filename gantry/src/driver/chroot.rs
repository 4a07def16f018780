//! Guests behind a persistent interactive shell, such as `mock --shell`.
//!
//! The shell is spawned once by `prepare()` and fed one payload at a time on
//! its stdin. It never exits between commands, so completion is signalled
//! through files instead: each payload runs in a subshell whose stdout,
//! stderr and exit status are redirected into an exchange directory the host
//! can read. The status file is written last, by rename, and is the
//! completion marker.
//!
//! ```text
//! (
//! <rendered script>
//! ) >/exchange/gantry-812-0-3.out 2>/exchange/gantry-812-0-3.err </dev/null; \
//!   echo $? >/exchange/gantry-812-0-3.rc.tmp; mv /exchange/gantry-812-0-3.rc.tmp /exchange/gantry-812-0-3.rc
//! ```
//!
//! Exchange files are named after the host pid and a per-process driver
//! number, so drivers sharing one exchange directory never read each
//! other's results. `prepare()` sweeps files left under the same prefix.
//!
//! Calls are serialized on the shell; a stuck payload blocks every later call
//! until it returns.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use gantry_common::{CommandOutput, ConfigError, GuestError, ShellScript, quote};
use tracing::{debug, info, warn};

use super::{ExecuteOptions, Executable, ExecutionDriver, finish, render_script};
use crate::command_runner::{CommandRunner, ProcessOutcome};
use crate::config::GuestConfig;
use crate::guest::GuestFacts;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long the shell gets to exit on EOF before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_EXCHANGE_DIR: &str = "/var/tmp/gantry-exchange";

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
}

struct ShellState {
    process: Option<ShellProcess>,
    counter: u64,
}

pub struct ChrootDriver {
    name: String,
    facts: GuestFacts,
    shell: Vec<String>,
    /// Host directory the shell's `/` maps to.
    host_root: PathBuf,
    /// Exchange directory as seen from inside the shell.
    exchange_dir: PathBuf,
    /// Prefix of every exchange file this driver writes.
    session: String,
    state: Mutex<ShellState>,
}

impl ChrootDriver {
    pub const ID: &'static str = "chroot";

    pub fn new(
        name: impl Into<String>,
        facts: GuestFacts,
        shell: Vec<String>,
        host_root: impl Into<PathBuf>,
        exchange_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            facts,
            shell,
            host_root: host_root.into(),
            exchange_dir: exchange_dir.into(),
            session: format!(
                "gantry-{}-{}",
                std::process::id(),
                NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
            ),
            state: Mutex::new(ShellState {
                process: None,
                counter: 0,
            }),
        }
    }

    /// Without an explicit `shell`, `root` names a mock config and the
    /// chroot lives under `/var/lib/mock`.
    pub fn from_config(
        config: &GuestConfig,
        _runner: Arc<dyn CommandRunner>,
    ) -> Result<Box<dyn ExecutionDriver>, ConfigError> {
        let (shell, host_root) = if config.shell.is_empty() {
            let root = config.require(config.root.as_deref(), "root")?;
            let mock_root = root.display().to_string();
            (
                vec![
                    "mock".to_string(),
                    "-r".to_string(),
                    mock_root.clone(),
                    "--shell".to_string(),
                ],
                PathBuf::from("/var/lib/mock").join(&mock_root).join("root"),
            )
        } else {
            (
                config.shell.clone(),
                config.root.clone().unwrap_or_else(|| PathBuf::from("/")),
            )
        };
        let exchange_dir = config
            .exchange_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXCHANGE_DIR));
        Ok(Box::new(Self::new(
            &config.name,
            config.facts(),
            shell,
            host_root,
            exchange_dir,
        )))
    }

    /// Translate a path inside the shell to the host.
    fn host_path(&self, guest_path: &Path) -> PathBuf {
        let relative = guest_path.strip_prefix("/").unwrap_or(guest_path);
        self.host_root.join(relative)
    }

    fn lock(&self) -> MutexGuard<'_, ShellState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self) -> Result<ShellProcess, GuestError> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| GuestError::unavailable(&self.name, "no shell command configured"))?;
        info!(guest = %self.name, shell = %self.shell.join(" "), "Spawning persistent shell");
        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                GuestError::unavailable(&self.name, format!("failed to spawn {}: {}", program, e))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GuestError::unavailable(&self.name, "shell has no stdin"))?;
        Ok(ShellProcess { child, stdin })
    }

    /// Wait for the status file of one payload, or for the shell to die.
    fn wait_for(&self, process: &mut ShellProcess, rc_path: &Path) -> Result<(), GuestError> {
        let start = Instant::now();
        loop {
            if rc_path.exists() {
                debug!(
                    guest = %self.name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Payload finished"
                );
                return Ok(());
            }
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    return Err(GuestError::unavailable(
                        &self.name,
                        format!("shell exited unexpectedly with {}", status),
                    ));
                }
                Ok(None) => {}
                Err(e) => return Err(GuestError::io(&self.name, e)),
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Remove exchange files a previous shell under this prefix left behind.
    fn sweep_exchange(&self, host_exchange: &Path) -> Result<(), GuestError> {
        let entries = fs::read_dir(host_exchange).map_err(|e| GuestError::io(&self.name, e))?;
        let prefix = format!("{}-", self.session);
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            debug!(guest = %self.name, "Removing stale exchange file {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    fn read_exchange(&self, path: &Path) -> Result<String, GuestError> {
        let bytes = fs::read(path).map_err(|e| GuestError::io(&self.name, e))?;
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl ExecutionDriver for ChrootDriver {
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
        if options.tty || options.interactive {
            warn!(guest = %self.name, "Ignoring tty and interactive requests, the shell has no terminal");
        }
        if options.timeout.is_some() {
            warn!(guest = %self.name, "Ignoring timeout, calls on a persistent shell cannot be cancelled");
        }

        let script = render_script(executable, options, &self.facts.environment);
        let mut state = self.lock();
        state.counter += 1;
        let id = format!("{}-{}", self.session, state.counter);
        let Some(process) = state.process.as_mut() else {
            return Err(GuestError::unavailable(
                &self.name,
                "the shell is not running, prepare the guest first",
            ));
        };

        let guest_file = |suffix: &str| self.exchange_dir.join(format!("{}.{}", id, suffix));
        let quoted = |suffix: &str| quote(&guest_file(suffix).display().to_string());
        let framed = format!(
            "(\n{}\n) >{} 2>{} </dev/null; echo $? >{}; mv {} {}\n",
            script,
            quoted("out"),
            quoted("err"),
            quoted("rc.tmp"),
            quoted("rc.tmp"),
            quoted("rc"),
        );
        process
            .stdin
            .write_all(framed.as_bytes())
            .and_then(|()| process.stdin.flush())
            .map_err(|e| {
                GuestError::unavailable(&self.name, format!("failed to write to shell: {}", e))
            })?;

        let rc_path = self.host_path(&guest_file("rc"));
        self.wait_for(process, &rc_path)?;

        let stdout = self.read_exchange(&self.host_path(&guest_file("out")))?;
        let stderr = self.read_exchange(&self.host_path(&guest_file("err")))?;
        let rc = self.read_exchange(&rc_path)?;
        let status = rc.trim().parse::<i32>().map_err(|_| {
            GuestError::unavailable(&self.name, format!("unreadable exit status '{}'", rc.trim()))
        })?;

        let outcome = ProcessOutcome {
            status,
            stdout: Some(stdout),
            stderr: Some(stderr),
            timed_out: false,
        };
        finish(&self.name, &script, outcome, options)
    }

    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        let target = self.host_path(destination);
        debug!("Copying {} to {}", source.display(), target.display());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| GuestError::io(&self.name, e))?;
        }
        fs::copy(source, &target).map_err(|e| GuestError::io(&self.name, e))?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        let mut state = self.lock();
        match state.process.as_mut() {
            Some(process) => matches!(process.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn prepare(&self) -> Result<(), GuestError> {
        let mut state = self.lock();
        let running = state
            .process
            .as_mut()
            .is_some_and(|process| matches!(process.child.try_wait(), Ok(None)));
        if running {
            return Ok(());
        }
        let host_exchange = self.host_path(&self.exchange_dir);
        fs::create_dir_all(&host_exchange).map_err(|e| GuestError::io(&self.name, e))?;
        self.sweep_exchange(&host_exchange)?;
        state.counter = 0;
        state.process = Some(self.spawn()?);
        // The exchange directory must exist on the shell's side as well,
        // which differs from the host path whenever the root is not `/`.
        let mkdir = ShellScript::new(format!(
            "mkdir -p {}\n",
            quote(&self.exchange_dir.display().to_string())
        ));
        if let Some(process) = state.process.as_mut() {
            process
                .stdin
                .write_all(mkdir.as_str().as_bytes())
                .map_err(|e| GuestError::io(&self.name, e))?;
        }
        Ok(())
    }

    /// Close the shell's stdin and kill it if it does not exit on its own.
    fn cleanup(&self) -> Result<(), GuestError> {
        let mut state = self.lock();
        let Some(ShellProcess { mut child, stdin }) = state.process.take() else {
            return Ok(());
        };
        drop(stdin);
        let start = Instant::now();
        while start.elapsed() < SHUTDOWN_GRACE {
            if let Ok(Some(_)) = child.try_wait() {
                info!(guest = %self.name, "Persistent shell exited");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        warn!(guest = %self.name, "Persistent shell did not exit, killing it");
        child.kill().map_err(|e| GuestError::io(&self.name, e))?;
        child.wait().map_err(|e| GuestError::io(&self.name, e))?;
        Ok(())
    }
}

impl Drop for ChrootDriver {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
