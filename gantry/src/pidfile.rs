//! Reboot-survivable tracking of a running action.
//!
//! While an action runs on a guest, a single-line record
//! `"<pid> <reboot-request-path>"` sits in a well-known pidfile. A reboot
//! helper running independently on the guest takes the same lock, reads the
//! record, writes the reboot request and signals the recorded process.
//!
//! Every read and write of the pidfile happens under an exclusive `flock`
//! on the lock file, both in the generated wrapper scripts and in
//! [`PidFile`].
//!
//! # Wrapper scripts
//!
//! [`render_wrapper`] produces two scripts: the inner one is the action
//! itself, unchanged. The outer one:
//!
//! 1. exports the scripts path and the pidfile locations,
//! 2. records itself in the pidfile (`exit 122` on failure),
//! 3. runs the inner script with the requested stream handling,
//! 4. removes the record (`exit 123` on failure),
//! 5. exits with the inner script's status.

use std::env;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use gantry_common::exit_code::{PIDFILE_LOCK_FAILED, PIDFILE_UNLOCK_FAILED};
use gantry_common::{Command, EnvMap, GuestError, PidFileError, ShellScript, quote};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::{ExecuteOptions, ExecutionDriver};
use crate::guest::GuestCapabilities;

/// Relocates both the pidfile and its lock.
pub const PIDFILE_ROOT_VAR: &str = "GANTRY_PIDFILE_ROOT";
/// Pidfile path, exported to the wrapped action.
pub const PIDFILE_VAR: &str = "GANTRY_TEST_PIDFILE";
/// Lock path, exported to the wrapped action.
pub const PIDFILE_LOCK_VAR: &str = "GANTRY_TEST_PIDFILE_LOCK";
/// Reboot request path of the running action, exported by the wrapper.
pub const REBOOT_REQUEST_VAR: &str = "GANTRY_REBOOT_REQUEST";
/// Turns on `set -x` in the outer wrapper.
pub const DEBUG_VAR: &str = "GANTRY_DEBUG";

pub const DEFAULT_PIDFILE_ROOT: &str = "/var/tmp";

const PIDFILE_NAME: &str = "gantry-test.pid";
const PIDFILE_LOCK_NAME: &str = "gantry-test.pid.lock";

/// Where the pidfile and its lock live for one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFileContext {
    root: PathBuf,
}

impl Default for PidFileContext {
    fn default() -> Self {
        Self::new(DEFAULT_PIDFILE_ROOT)
    }
}

impl PidFileContext {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root from the guest environment, then the process environment.
    pub fn for_guest(guest: &dyn GuestCapabilities) -> Self {
        match guest.environment().get(PIDFILE_ROOT_VAR) {
            Some(root) if !root.is_empty() => Self::new(root),
            _ => Self::from_env(),
        }
    }

    /// Root from the process environment, for tooling running on the guest.
    pub fn from_env() -> Self {
        match env::var(PIDFILE_ROOT_VAR) {
            Ok(root) if !root.is_empty() => Self::new(root),
            _ => Self::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pidfile_path(&self) -> PathBuf {
        self.root.join(PIDFILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(PIDFILE_LOCK_NAME)
    }

    /// Variables letting in-guest tooling find the pidfile.
    pub fn environment(&self) -> EnvMap {
        EnvMap::from([
            (PIDFILE_VAR.to_string(), self.pidfile_path().display().to_string()),
            (PIDFILE_LOCK_VAR.to_string(), self.lock_path().display().to_string()),
        ])
    }
}

/// How the inner script's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Streams untouched.
    Interactive,
    /// stderr merged into stdout, stdin left alone.
    Tty,
    /// stdin from `/dev/null`, merged output piped through `cat`.
    Piped,
}

impl StreamMode {
    pub fn new(interactive: bool, tty: bool) -> Self {
        match (interactive, tty) {
            (true, _) => StreamMode::Interactive,
            (false, true) => StreamMode::Tty,
            (false, false) => StreamMode::Piped,
        }
    }

    fn redirections(self) -> &'static str {
        match self {
            StreamMode::Interactive => "",
            StreamMode::Tty => " 2>&1",
            StreamMode::Piped => " </dev/null 2>&1 | cat",
        }
    }
}

/// Inputs of one wrapper.
#[derive(Debug, Clone)]
pub struct WrapperParams {
    /// Used in kernel log markers.
    pub name: String,
    pub action: ShellScript,
    /// Guest path the inner script is delivered to.
    pub inner_path: PathBuf,
    /// Guest path a reboot helper writes its request to.
    pub reboot_request_path: PathBuf,
    pub mode: StreamMode,
}

/// Rendered pair of scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapper {
    pub inner: ShellScript,
    pub outer: ShellScript,
}

fn kmsg(message: &str) -> ShellScript {
    ShellScript::new(format!(
        "echo {} 2>/dev/null >/dev/kmsg || true",
        quote(message)
    ))
}

fn export(name: &str, value: &Path) -> ShellScript {
    ShellScript::new(format!(
        "export {}={}",
        name,
        quote(&value.display().to_string())
    ))
}

/// Render the inner and outer scripts for `params`.
pub fn render_wrapper(
    context: &PidFileContext,
    guest: &dyn GuestCapabilities,
    params: &WrapperParams,
) -> Wrapper {
    let lock_dir = context
        .lock_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| context.root().to_path_buf());
    let superuser = guest.is_superuser();

    let mut lines = vec![
        ShellScript::new("#!/bin/bash"),
        ShellScript::new(format!("[ -n \"${DEBUG_VAR}\" ] && set -x")),
        ShellScript::new(format!(
            "export PATH={}:\"$PATH\"",
            quote(&guest.scripts_path().display().to_string())
        )),
        export(PIDFILE_VAR, &context.pidfile_path()),
        export(PIDFILE_LOCK_VAR, &context.lock_path()),
        export(REBOOT_REQUEST_VAR, &params.reboot_request_path),
        Command::new(["mkdir", "-p"])
            .arg(lock_dir.display().to_string())
            .into(),
        ShellScript::new(format!(
            "GANTRY_WRAPPER_PID=$$ flock \"${PIDFILE_LOCK_VAR}\" sh -c \
             'echo \"$GANTRY_WRAPPER_PID ${REBOOT_REQUEST_VAR}\" > \"${PIDFILE_VAR}\"' \
             || exit {PIDFILE_LOCK_FAILED}"
        )),
    ];
    if superuser {
        lines.push(kmsg(&format!("gantry: {} started", params.name)));
    }
    lines.push(ShellScript::new(format!(
        "bash {}{}",
        quote(&params.inner_path.display().to_string()),
        params.mode.redirections()
    )));
    lines.push(ShellScript::new("_exit_code=${PIPESTATUS[0]}"));
    if superuser {
        lines.push(kmsg(&format!("gantry: {} finished", params.name)));
    }
    lines.push(ShellScript::new(format!(
        "flock \"${PIDFILE_LOCK_VAR}\" rm -f \"${PIDFILE_VAR}\" || exit {PIDFILE_UNLOCK_FAILED}"
    )));
    lines.push(ShellScript::new("exit $_exit_code"));

    Wrapper {
        inner: params.action.clone(),
        outer: ShellScript::from_lines(lines),
    }
}

impl Wrapper {
    /// Push both scripts to the guest and make them executable.
    pub fn deliver(
        &self,
        guest: &dyn ExecutionDriver,
        inner_path: &Path,
        outer_path: &Path,
    ) -> Result<(), GuestError> {
        for (script, destination) in [(&self.inner, inner_path), (&self.outer, outer_path)] {
            let file_name = destination
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "wrapper.sh".to_string());
            let staging = env::temp_dir().join(format!("gantry-{}-{}", process::id(), file_name));
            let mut content = script.as_str().to_string();
            content.push('\n');
            fs::write(&staging, content).map_err(|e| GuestError::io(guest.name(), e))?;
            let pushed = guest.push(&staging, destination);
            let _ = fs::remove_file(&staging);
            pushed?;
        }
        let chmod = Command::new(["chmod", "+x"])
            .arg(inner_path.display().to_string())
            .arg(outer_path.display().to_string());
        guest.execute(&chmod.into(), &ExecuteOptions::new().silent(true))?;
        debug!(guest = %guest.name(), outer = %outer_path.display(), "Delivered wrapper");
        Ok(())
    }
}

/// Content of the pidfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: i32,
    pub reboot_request: PathBuf,
}

impl PidRecord {
    pub fn new(pid: i32, reboot_request: impl AsRef<Path>) -> Self {
        Self {
            pid,
            reboot_request: reboot_request.as_ref().to_path_buf(),
        }
    }
}

impl fmt::Display for PidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pid, self.reboot_request.display())
    }
}

impl FromStr for PidRecord {
    type Err = PidFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (pid, path) = line
            .split_once(' ')
            .ok_or_else(|| PidFileError::Malformed(line.to_string()))?;
        let pid = pid
            .parse::<i32>()
            .map_err(|_| PidFileError::Malformed(line.to_string()))?;
        if pid <= 0 || path.is_empty() {
            return Err(PidFileError::Malformed(line.to_string()));
        }
        Ok(Self::new(pid, path))
    }
}

/// What the reboot helper leaves for the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RebootRequest {
    /// Custom reboot command, when the default one does not apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Seconds to wait for the guest to come back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Host-side access to a pidfile and its lock.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl PidFile {
    pub fn new(context: &PidFileContext) -> Self {
        Self {
            path: context.pidfile_path(),
            lock_path: context.lock_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the exclusive lock is held. Released on drop.
    fn lock(&self) -> Result<Flock<File>, PidFileError> {
        let lock_error = |source: io::Error| PidFileError::Lock {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(lock_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(lock_error)?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_error(io::Error::from(errno)))
    }

    /// Record a running action, replacing any stale record.
    pub fn enter(&self, record: &PidRecord) -> Result<(), PidFileError> {
        let _lock = self.lock()?;
        let write_error = |source| PidFileError::Write {
            path: self.path.clone(),
            source,
        };
        let staging = self.path.with_extension("pid.tmp");
        fs::write(&staging, format!("{}\n", record)).map_err(write_error)?;
        fs::rename(&staging, &self.path).map_err(write_error)?;
        info!(pid = record.pid, pidfile = %self.path.display(), "Entered pidfile");
        Ok(())
    }

    /// Remove the record. A missing record is not an error.
    pub fn exit(&self) -> Result<(), PidFileError> {
        let _lock = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(pidfile = %self.path.display(), "Left pidfile");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidFileError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// The current record, if an action is running.
    pub fn read(&self) -> Result<Option<PidRecord>, PidFileError> {
        let _lock = self.lock()?;
        self.read_locked()
    }

    fn read_locked(&self) -> Result<Option<PidRecord>, PidFileError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => content.parse().map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PidFileError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// The reboot helper: record `request` and signal the running action.
    ///
    /// When the action exits between our read and the signal, the request
    /// stays on disk for the next run and `ProcessGone` is returned.
    pub fn request_reboot(&self, request: &RebootRequest) -> Result<PidRecord, PidFileError> {
        let _lock = self.lock()?;
        let record = self.read_locked()?.ok_or_else(|| PidFileError::NotRunning {
            path: self.path.clone(),
        })?;

        let write_error = |source| PidFileError::Write {
            path: record.reboot_request.clone(),
            source,
        };
        if let Some(parent) = record.reboot_request.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&record.reboot_request, serde_json::to_string_pretty(request)?)
            .map_err(write_error)?;

        match kill(Pid::from_raw(record.pid), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid = record.pid, "Signalled action for reboot");
                Ok(record)
            }
            Err(Errno::ESRCH) => Err(PidFileError::ProcessGone { pid: record.pid }),
            Err(errno) => Err(PidFileError::Signal {
                pid: record.pid,
                source: io::Error::from(errno),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;
    use crate::guest::GuestFacts;

    fn params(mode: StreamMode) -> WrapperParams {
        WrapperParams {
            name: "/tests/smoke".to_string(),
            action: ShellScript::new("./test.sh --verbose"),
            inner_path: PathBuf::from("/var/tmp/gantry-inner.sh"),
            reboot_request_path: PathBuf::from("/var/tmp/gantry/reboot-request"),
            mode,
        }
    }

    fn set_root(value: Option<&str>) {
        unsafe {
            match value {
                Some(value) => env::set_var(PIDFILE_ROOT_VAR, value),
                None => env::remove_var(PIDFILE_ROOT_VAR),
            }
        }
    }

    #[test]
    #[serial]
    fn test_context_default_root() {
        set_root(None);
        let context = PidFileContext::for_guest(&GuestFacts::default());
        assert_eq!(context.pidfile_path(), PathBuf::from("/var/tmp/gantry-test.pid"));
        assert_eq!(context.lock_path(), PathBuf::from("/var/tmp/gantry-test.pid.lock"));
    }

    #[test]
    #[serial]
    fn test_context_root_precedence() {
        set_root(Some("/run/from-process"));
        let context = PidFileContext::for_guest(&GuestFacts::default());
        assert_eq!(context.root(), Path::new("/run/from-process"));

        let guest = GuestFacts::default().with_env(PIDFILE_ROOT_VAR, "/run/from-guest");
        let context = PidFileContext::for_guest(&guest);
        assert_eq!(context.root(), Path::new("/run/from-guest"));
        set_root(None);
    }

    #[test]
    fn test_context_environment() {
        let env = PidFileContext::new("/srv").environment();
        assert_eq!(env[PIDFILE_VAR], "/srv/gantry-test.pid");
        assert_eq!(env[PIDFILE_LOCK_VAR], "/srv/gantry-test.pid.lock");
    }

    #[test]
    fn test_inner_script_is_the_action() {
        let wrapper = render_wrapper(
            &PidFileContext::default(),
            &GuestFacts::default(),
            &params(StreamMode::Piped),
        );
        assert_eq!(wrapper.inner.as_str(), "./test.sh --verbose");
    }

    #[test]
    fn test_outer_script_protocol() {
        let wrapper = render_wrapper(
            &PidFileContext::default(),
            &GuestFacts::default(),
            &params(StreamMode::Piped),
        );
        let outer = wrapper.outer.as_str();
        let lines: Vec<&str> = outer.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert!(lines.contains(&"export PATH=/usr/local/bin:\"$PATH\""));
        assert!(lines.contains(&"export GANTRY_TEST_PIDFILE=/var/tmp/gantry-test.pid"));
        assert!(lines.contains(&"mkdir -p /var/tmp"));
        assert!(outer.contains("|| exit 122"));
        assert!(outer.contains("|| exit 123"));
        assert!(lines.contains(&"bash /var/tmp/gantry-inner.sh </dev/null 2>&1 | cat"));
        assert_eq!(lines[lines.len() - 1], "exit $_exit_code");

        let enter = outer.find("exit 122").unwrap();
        let run = outer.find("bash /var/tmp/gantry-inner.sh").unwrap();
        let leave = outer.find("exit 123").unwrap();
        assert!(enter < run && run < leave);
    }

    #[test]
    fn test_stream_modes() {
        let render = |mode| {
            render_wrapper(&PidFileContext::default(), &GuestFacts::default(), &params(mode))
                .outer
                .into_string()
        };
        assert!(render(StreamMode::Interactive).contains("\nbash /var/tmp/gantry-inner.sh\n"));
        assert!(render(StreamMode::Tty).contains("\nbash /var/tmp/gantry-inner.sh 2>&1\n"));
        assert_eq!(StreamMode::new(true, true), StreamMode::Interactive);
        assert_eq!(StreamMode::new(false, true), StreamMode::Tty);
        assert_eq!(StreamMode::new(false, false), StreamMode::Piped);
    }

    #[test]
    fn test_kmsg_markers_only_for_superuser() {
        let root = render_wrapper(
            &PidFileContext::default(),
            &GuestFacts::default(),
            &params(StreamMode::Piped),
        );
        assert!(root.outer.as_str().contains("'gantry: /tests/smoke started'"));
        assert!(root.outer.as_str().contains("/dev/kmsg"));

        let user = render_wrapper(
            &PidFileContext::default(),
            &GuestFacts::superuser(false),
            &params(StreamMode::Piped),
        );
        assert!(!user.outer.as_str().contains("/dev/kmsg"));
    }

    /// Write both scripts under `dir` and run the outer one with bash.
    fn run_wrapper(dir: &Path, root: &Path, mode: StreamMode) -> process::Output {
        let inner_path = dir.join("inner.sh");
        let outer_path = dir.join("outer.sh");
        let params = WrapperParams {
            name: "/tests/exit".to_string(),
            action: ShellScript::new(format!("cat \"${PIDFILE_VAR}\"\nexit 7")),
            inner_path: inner_path.clone(),
            reboot_request_path: dir.join("reboot-request"),
            mode,
        };
        let wrapper = render_wrapper(
            &PidFileContext::new(root),
            &GuestFacts::superuser(false),
            &params,
        );
        fs::write(&inner_path, format!("{}\n", wrapper.inner)).unwrap();
        fs::write(&outer_path, format!("{}\n", wrapper.outer)).unwrap();
        process::Command::new("bash")
            .arg(&outer_path)
            .env_remove(DEBUG_VAR)
            .stdin(process::Stdio::null())
            .output()
            .unwrap()
    }

    #[test]
    fn test_wrapper_runs_and_passes_exit_status_through() {
        for mode in [StreamMode::Interactive, StreamMode::Tty, StreamMode::Piped] {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("pidfile-root");
            let output = run_wrapper(dir.path(), &root, mode);
            assert_eq!(output.status.code(), Some(7), "{:?}: {:?}", mode, output);

            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut record = stdout.trim().split(' ');
            let pid = record.next().unwrap_or_default();
            assert!(pid.parse::<u32>().is_ok(), "{:?}: {}", mode, stdout);
            assert_eq!(
                record.next(),
                Some(dir.path().join("reboot-request").to_str().unwrap()),
                "{:?}",
                mode
            );
            assert!(!PidFileContext::new(&root).pidfile_path().exists());
        }
    }

    #[test]
    fn test_wrapper_fails_with_lock_status_when_root_is_unwritable() {
        let dir = TempDir::new().unwrap();
        let root = Path::new("/proc/gantry-unwritable");
        let output = run_wrapper(dir.path(), root, StreamMode::Piped);
        assert_eq!(output.status.code(), Some(PIDFILE_LOCK_FAILED));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_record_parsing() {
        let record: PidRecord = "1234 /var/tmp/reboot-request\n".parse().unwrap();
        assert_eq!(record, PidRecord::new(1234, "/var/tmp/reboot-request"));
        assert_eq!(record.to_string(), "1234 /var/tmp/reboot-request");
        assert!("".parse::<PidRecord>().is_err());
        assert!("abc /path".parse::<PidRecord>().is_err());
        assert!("1234".parse::<PidRecord>().is_err());
    }

    #[test]
    fn test_enter_and_exit() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path().join("nested")));
        assert_eq!(pidfile.read().unwrap(), None);

        let record = PidRecord::new(42, dir.path().join("reboot"));
        pidfile.enter(&record).unwrap();
        assert_eq!(pidfile.read().unwrap(), Some(record));

        pidfile.exit().unwrap();
        assert!(!pidfile.path().exists());
        pidfile.exit().unwrap();
    }

    #[test]
    fn test_stale_record_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        pidfile.enter(&PidRecord::new(1, "/old")).unwrap();
        pidfile.enter(&PidRecord::new(2, "/new")).unwrap();
        assert_eq!(pidfile.read().unwrap(), Some(PidRecord::new(2, "/new")));
    }

    #[test]
    fn test_enter_waits_for_lock() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        let held = pidfile.lock().unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = pidfile.clone();
        let handle = thread::spawn(move || {
            contender.enter(&PidRecord::new(7, "/reboot")).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!pidfile.path().exists());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(pidfile.read().unwrap(), Some(PidRecord::new(7, "/reboot")));
    }

    #[test]
    fn test_concurrent_enters_never_interleave() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        let handles: Vec<_> = (1..=8)
            .map(|pid| {
                let pidfile = pidfile.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        pidfile
                            .enter(&PidRecord::new(pid, format!("/reboot/{pid}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let record = pidfile.read().unwrap().unwrap();
        assert_eq!(record.reboot_request, PathBuf::from(format!("/reboot/{}", record.pid)));
    }

    #[test]
    fn test_request_reboot_without_action() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        let err = pidfile.request_reboot(&RebootRequest::default()).unwrap_err();
        assert!(matches!(err, PidFileError::NotRunning { .. }));
    }

    #[test]
    fn test_request_reboot_signals_recorded_process() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        let mut child = process::Command::new("sleep").arg("30").spawn().unwrap();
        let request_path = dir.path().join("reboot").join("request.json");
        pidfile
            .enter(&PidRecord::new(child.id() as i32, &request_path))
            .unwrap();

        let request = RebootRequest {
            command: Some("systemctl kexec".to_string()),
            timeout: Some(600),
        };
        let record = pidfile.request_reboot(&request).unwrap();
        assert_eq!(record.pid, child.id() as i32);

        let status = child.wait().unwrap();
        assert!(!status.success());
        let written: RebootRequest =
            serde_json::from_str(&fs::read_to_string(&request_path).unwrap()).unwrap();
        assert_eq!(written, request);
    }

    #[test]
    fn test_request_reboot_lost_race() {
        let dir = TempDir::new().unwrap();
        let pidfile = PidFile::new(&PidFileContext::new(dir.path()));
        let mut child = process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();

        let request_path = dir.path().join("request.json");
        pidfile.enter(&PidRecord::new(pid, &request_path)).unwrap();
        let err = pidfile.request_reboot(&RebootRequest::default()).unwrap_err();
        assert!(err.to_string().contains("try again"));
        assert!(request_path.exists());
    }
}
