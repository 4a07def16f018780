//! Deferred execution for image-mode guests.
//!
//! Instead of mutating a bootc guest in place, commands are collected as
//! `RUN` directives on top of the image the guest currently runs. Flushing
//! builds that Containerfile on the guest and switches the guest to the
//! result; the reboot into the new deployment happens outside this crate.
//!
//! Deferred commands only see the effects of earlier deferred commands of
//! the same batch. Anything done through [`ExecutionDriver::execute`] in the
//! meantime happens on the live system, not in the image build.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use gantry_common::{Command, CommandOutput, DeferredError, GuestError, ShellScript, quote};
use serde::Deserialize;
use tracing::{debug, info};

use crate::containerfile::{Containerfile, heredoc_delimiter};
use crate::driver::{ExecuteOptions, Executable, ExecutionDriver, render_script};
use crate::guest::GuestFacts;

/// Where Containerfiles are written on the guest.
pub const DEFAULT_BUILD_DIR: &str = "/var/tmp/gantry-build";

/// Repository all built images are tagged under.
pub const IMAGE_REPOSITORY: &str = "localhost/gantry/bootc";

/// The image-build facility a deferred batch is handed to.
pub trait ImageBuilder: Send + Sync {
    /// Reference usable in a `FROM` directive for what the guest runs now.
    fn current_image(&self, guest: &dyn ExecutionDriver) -> Result<String, DeferredError>;

    /// Build `containerfile` on the guest, switch the guest to it, and
    /// return the new image tag.
    fn build_and_switch(
        &self,
        guest: &dyn ExecutionDriver,
        containerfile: &Containerfile,
    ) -> Result<String, DeferredError>;
}

#[derive(Debug, Deserialize)]
struct BootcStatus {
    status: BootcStatusSection,
}

#[derive(Debug, Deserialize)]
struct BootcStatusSection {
    booted: Option<BootEntry>,
}

#[derive(Debug, Deserialize)]
struct BootEntry {
    image: Option<BootEntryImage>,
}

#[derive(Debug, Deserialize)]
struct BootEntryImage {
    image: ImageReference,
}

/// Image reference as reported by `bootc status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageReference {
    pub image: String,
    pub transport: String,
}

impl ImageReference {
    /// The reference in the form buildah accepts after `FROM`.
    pub fn from_reference(&self) -> String {
        match self.transport.as_str() {
            "registry" | "" => self.image.clone(),
            transport => format!("{}:{}", transport, self.image),
        }
    }
}

/// Parse `bootc status --json` into the booted image reference.
pub fn parse_booted_image(json: &str) -> Result<ImageReference, String> {
    let status: BootcStatus = serde_json::from_str(json).map_err(|e| e.to_string())?;
    status
        .status
        .booted
        .and_then(|entry| entry.image)
        .map(|image| image.image)
        .ok_or_else(|| "no booted image reported".to_string())
}

/// Builds with podman on the guest and switches with `bootc switch`.
pub struct BootcImageBuilder {
    build_dir: PathBuf,
    builds: AtomicU32,
}

impl Default for BootcImageBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_DIR)
    }
}

impl BootcImageBuilder {
    pub fn new(build_dir: impl AsRef<Path>) -> Self {
        Self {
            build_dir: build_dir.as_ref().to_path_buf(),
            builds: AtomicU32::new(0),
        }
    }

    fn privileged(facts: &GuestFacts, command: Command) -> Command {
        if facts.is_superuser {
            command
        } else {
            Command::new(["sudo"]) + command
        }
    }

    fn next_tag(&self) -> (u32, String) {
        let build = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        (build, format!("{}:{}-{}", IMAGE_REPOSITORY, timestamp, build))
    }

    /// `mkdir` plus a quoted heredoc, so nothing in the content expands.
    fn write_script(&self, path: &Path, content: &str) -> ShellScript {
        let delimiter = heredoc_delimiter(content, "GANTRY_CONTAINERFILE");
        let mkdir: ShellScript = Command::new(["mkdir", "-p"])
            .arg(self.build_dir.display().to_string())
            .into();
        mkdir.and(ShellScript::new(format!(
            "cat > {} <<'{}'\n{}{}",
            quote(&path.display().to_string()),
            delimiter,
            content,
            delimiter
        )))
    }

    fn run(
        guest: &dyn ExecutionDriver,
        executable: impl Into<Executable>,
    ) -> Result<CommandOutput, GuestError> {
        guest.execute(&executable.into(), &ExecuteOptions::new())
    }
}

impl ImageBuilder for BootcImageBuilder {
    fn current_image(&self, guest: &dyn ExecutionDriver) -> Result<String, DeferredError> {
        let status = Self::privileged(guest.facts(), Command::new(["bootc", "status", "--json"]));
        let output = guest.execute(&status.into(), &ExecuteOptions::new().silent(true))?;
        let reference = parse_booted_image(output.stdout_str()).map_err(|message| {
            DeferredError::BootedImage {
                guest: guest.name().to_string(),
                message,
            }
        })?;
        debug!(guest = %guest.name(), image = %reference.image, "Booted image");
        Ok(reference.from_reference())
    }

    fn build_and_switch(
        &self,
        guest: &dyn ExecutionDriver,
        containerfile: &Containerfile,
    ) -> Result<String, DeferredError> {
        let (build, tag) = self.next_tag();
        let path = self.build_dir.join(format!("Containerfile.{}", build));

        Self::run(guest, self.write_script(&path, &containerfile.render()))?;

        let podman = Self::privileged(
            guest.facts(),
            Command::new(["podman", "build", "-t"])
                .arg(tag.as_str())
                .arg("-f")
                .arg(path.display().to_string())
                .arg(self.build_dir.display().to_string()),
        );
        info!(guest = %guest.name(), tag = %tag, "Building image");
        Self::run(guest, podman).map_err(|err| DeferredError::Build {
            guest: guest.name().to_string(),
            message: match err.output() {
                Some(output) if !output.stderr_str().trim().is_empty() => {
                    format!("{}: {}", err, output.stderr_str().trim())
                }
                _ => err.to_string(),
            },
        })?;

        let switch = Self::privileged(
            guest.facts(),
            Command::new(["bootc", "switch", "--transport", "containers-storage"]).arg(tag.as_str()),
        );
        info!(guest = %guest.name(), tag = %tag, "Switching to image");
        Self::run(guest, switch)?;
        Ok(tag)
    }
}

/// A driver that can also batch commands into an image build.
pub struct DeferrableExecutor {
    driver: Box<dyn ExecutionDriver>,
    builder: Box<dyn ImageBuilder>,
    pending: Option<Containerfile>,
}

impl DeferrableExecutor {
    pub fn new(driver: Box<dyn ExecutionDriver>, builder: Box<dyn ImageBuilder>) -> Self {
        Self {
            driver,
            builder,
            pending: None,
        }
    }

    /// Wrap `driver` with the bootc builder.
    pub fn bootc(driver: Box<dyn ExecutionDriver>) -> Self {
        Self::new(driver, Box::new(BootcImageBuilder::default()))
    }

    pub fn driver(&self) -> &dyn ExecutionDriver {
        self.driver.as_ref()
    }

    /// Record `executable` as a build directive without running anything.
    ///
    /// Only `cwd`, `env` and sourced files of `options` apply; the rest has
    /// no meaning inside an image build.
    pub fn defer(
        &mut self,
        executable: &Executable,
        options: &ExecuteOptions,
    ) -> Result<(), DeferredError> {
        let script = render_script(executable, options, &self.driver.facts().environment);
        if self.pending.is_none() {
            let base = self.builder.current_image(self.driver.as_ref())?;
            debug!(guest = %self.driver.name(), base = %base, "Starting a deferred batch");
            self.pending = Some(Containerfile::from_image(base));
        }
        if let Some(containerfile) = self.pending.as_mut() {
            containerfile.run(&script);
        }
        Ok(())
    }

    pub fn has_pending_commands(&self) -> bool {
        self.pending.as_ref().is_some_and(Containerfile::has_commands)
    }

    pub fn pending_containerfile(&self) -> Option<&Containerfile> {
        self.pending.as_ref()
    }

    /// Build and switch to everything deferred so far.
    ///
    /// Returns the new image tag, or `None` when nothing was pending. The
    /// batch is kept on failure so the flush can be retried as a whole.
    pub fn flush(&mut self) -> Result<Option<String>, DeferredError> {
        let Some(containerfile) = self.pending.as_ref().filter(|c| c.has_commands()) else {
            return Ok(None);
        };
        let tag = self
            .builder
            .build_and_switch(self.driver.as_ref(), containerfile)?;
        self.pending = None;
        Ok(Some(tag))
    }

    /// Step-completion hook: flush if a batch is owed.
    pub fn finish_phase(&mut self) -> Result<Option<String>, DeferredError> {
        if !self.has_pending_commands() {
            return Ok(None);
        }
        info!(guest = %self.driver.name(), "Flushing deferred commands before leaving the phase");
        self.flush()
    }
}

impl ExecutionDriver for DeferrableExecutor {
    fn how(&self) -> &'static str {
        self.driver.how()
    }

    fn name(&self) -> &str {
        self.driver.name()
    }

    fn facts(&self) -> &GuestFacts {
        self.driver.facts()
    }

    fn execute(
        &self,
        executable: &Executable,
        options: &ExecuteOptions,
    ) -> Result<CommandOutput, GuestError> {
        self.driver.execute(executable, options)
    }

    fn push(&self, source: &Path, destination: &Path) -> Result<(), GuestError> {
        self.driver.push(source, destination)
    }

    fn is_ready(&self) -> bool {
        self.driver.is_ready()
    }

    fn prepare(&self) -> Result<(), GuestError> {
        self.driver.prepare()
    }

    fn cleanup(&self) -> Result<(), GuestError> {
        self.driver.cleanup()
    }
}
