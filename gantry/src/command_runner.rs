//! Abstraction over host-side process execution.
//!
//! Every transport ends up spawning a local process (`bash`, `ssh`, `podman`,
//! `scp`, ...). This module provides the [`CommandRunner`] trait those
//! transports depend on, so driver logic can be tested without spawning
//! anything.
//!
//! # Production Usage
//!
//! [`RealCommandRunner`] spawns the process in its own process group, drains
//! stdout and stderr on two background threads while the calling thread
//! waits, and on timeout kills the whole group.
//!
//! # Testing Usage
//!
//! [`MockCommandRunner`] records every argv it receives and replays canned
//! outcomes.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use gantry_common::exit_code;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// How often a process with a timeout is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Trait for abstracting process execution.
///
/// Stored as `Arc<dyn CommandRunner>` by every driver that shells out.
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion (or until the timeout elapses).
    ///
    /// Returns `Err` only when the process could not be spawned or waited
    /// for. A non-zero exit status is a successful run.
    fn run(&self, argv: &[String], options: &RunOptions) -> io::Result<ProcessOutcome>;
}

/// Options for a single process run.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Additional environment variables for the spawned process.
    pub env: Vec<(String, String)>,
    /// Kill the process group once this much time has passed.
    pub timeout: Option<Duration>,
    /// Inherit the terminal instead of capturing output.
    pub interactive: bool,
    /// Do not log captured lines.
    pub silent: bool,
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit status. Signals map to `128 + signal`, timeouts to 124.
    pub status: i32,
    /// Captured stdout, `None` for interactive runs.
    pub stdout: Option<String>,
    /// Captured stderr, `None` for interactive runs.
    pub stderr: Option<String>,
    pub timed_out: bool,
}

impl ProcessOutcome {
    /// A successful outcome with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: Some(stdout.into()),
            stderr: Some(String::new()),
            timed_out: false,
        }
    }

    /// A failed outcome with the given status and stderr.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: Some(String::new()),
            stderr: Some(stderr.into()),
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == 0 && !self.timed_out
    }
}

/// Production implementation that delegates to [`std::process::Command`].
pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn run(&self, argv: &[String], options: &RunOptions) -> io::Result<ProcessOutcome> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        debug!(command = %argv.join(" "), "Spawning process");

        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        if options.interactive {
            let status = cmd.status()?;
            return Ok(ProcessOutcome {
                status: exit_status_code(status),
                stdout: None,
                stderr: None,
                timed_out: false,
            });
        }

        // A fresh process group, so a timeout reaches grandchildren too.
        cmd.process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let silent = options.silent;
        let stdout_handle = child
            .stdout
            .take()
            .map(|stdout| thread::spawn(move || drain(stdout, "stdout", silent)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || drain(stderr, "stderr", silent)));

        let start = Instant::now();
        let mut timed_out = false;
        let status = match options.timeout {
            None => child.wait()?,
            Some(timeout) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if start.elapsed() >= timeout {
                    timed_out = true;
                    warn!(
                        command = %argv.join(" "),
                        timeout_secs = timeout.as_secs(),
                        "Command timed out, killing its process group"
                    );
                    if let Err(errno) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
                        warn!("Failed to kill process group {}: {}", child.id(), errno);
                        let _ = child.kill();
                    }
                    break child.wait()?;
                }
                thread::sleep(POLL_INTERVAL);
            },
        };

        let stdout = join_output(stdout_handle);
        let stderr = join_output(stderr_handle);

        Ok(ProcessOutcome {
            status: if timed_out {
                exit_code::TIMEOUT
            } else {
                exit_status_code(status)
            },
            stdout: Some(stdout),
            stderr: Some(stderr),
            timed_out,
        })
    }
}

/// Read a stream line by line until EOF, keeping line order.
fn drain(stream: impl Read, name: &'static str, silent: bool) -> String {
    let mut reader = BufReader::new(stream);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                if !silent {
                    debug!(stream = name, "{}", text.trim_end_matches('\n'));
                }
                collected.push_str(&text);
            }
            Err(e) => {
                warn!("Failed to read {}: {}", name, e);
                break;
            }
        }
    }
    collected
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn exit_status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Test implementation that records calls and replays canned outcomes.
///
/// When the queue of canned outcomes runs dry every further call succeeds
/// with empty output.
#[derive(Default)]
pub struct MockCommandRunner {
    calls: Mutex<Vec<Vec<String>>>,
    responses: Mutex<VecDeque<ProcessOutcome>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next unanswered call.
    pub fn respond(self, outcome: ProcessOutcome) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(outcome);
        self
    }

    /// Every argv received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The last argv received.
    pub fn last_call(&self) -> Option<Vec<String>> {
        self.calls().pop()
    }
}

impl CommandRunner for MockCommandRunner {
    fn run(&self, argv: &[String], _options: &RunOptions) -> io::Result<ProcessOutcome> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(argv.to_vec());
        let outcome = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| ProcessOutcome::success(""));
        Ok(outcome)
    }
}
