//! Package-manager engines and the facade binding one to a guest.
//!
//! An engine is a pure compiler: installables plus [`Options`] in, a
//! [`ShellScript`] out. Nothing is executed until the [`PackageManager`]
//! facade hands the script to a driver.
//!
//! Every engine shares a few rules:
//! - installables are sorted and de-duplicated before rendering, so the same
//!   request always compiles to the same bytes
//! - every token is quoted individually
//! - `check_first` puts the presence check in front of the install with `||`
//! - `skip_missing` ends the script with a fallback that cannot fail
//! - unsupported operations fail before any script text is produced

pub mod apk;
pub mod apt;
pub mod rpm;
pub mod rpm_ostree;

use std::collections::BTreeMap;

use gantry_common::{
    CommandOutput, EngineError, GuestError, Installable, Options, ShellScript,
};
use tracing::{debug, info};

use crate::driver::{ExecuteOptions, ExecutionDriver};
use crate::guest::GuestCapabilities;

pub use apk::Apk;
pub use apt::Apt;
pub use rpm::{Dnf, Dnf5, RpmFamily, Yum};
pub use rpm_ostree::RpmOstree;

/// Fallback OR-composed onto scripts under `skip_missing`.
pub(crate) const ALWAYS_TRUE: &str = "/bin/true";

/// Presence of each requested installable.
pub type Presence = BTreeMap<Installable, bool>;

pub trait PackageManagerEngine: Send + Sync {
    /// Engine id, e.g. `dnf5`.
    fn id(&self) -> &'static str;

    /// A script whose stdout [`parse_presence`](Self::parse_presence) understands.
    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError>;

    /// Map the presence script's stdout to a verdict for every installable.
    fn parse_presence(
        &self,
        installables: &[Installable],
        stdout: &str,
    ) -> Result<Presence, EngineError>;

    fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError>;

    /// Reinstall packages that must already be present.
    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError>;

    fn install_debuginfo(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError>;

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError>;
}

/// Sort and de-duplicate installables. An empty request is an error.
pub fn normalize(installables: &[Installable]) -> Result<Vec<Installable>, EngineError> {
    if installables.is_empty() {
        return Err(EngineError::NoInstallables);
    }
    let mut normalized = installables.to_vec();
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// Quote each token and join with single spaces.
pub(crate) fn join_quoted<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|token| gantry_common::quote(token.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `tool`, or `sudo tool` for guests without root.
pub(crate) fn privileged(guest: &dyn GuestCapabilities, tool: &str) -> String {
    if guest.is_superuser() {
        tool.to_string()
    } else {
        format!("sudo {}", tool)
    }
}

/// OR-compose the success fallback when `skip_missing` is requested.
pub(crate) fn tolerate_missing(script: ShellScript, options: &Options) -> ShellScript {
    if options.skip_missing {
        script.or(ShellScript::new(ALWAYS_TRUE))
    } else {
        script
    }
}

/// Constructor of one engine kind.
pub type EngineConstructor = fn(&dyn GuestCapabilities) -> Box<dyn PackageManagerEngine>;

/// Explicit map from engine id to constructor.
pub struct EngineRegistry {
    constructors: BTreeMap<&'static str, EngineConstructor>,
}

impl EngineRegistry {
    /// Registry with every built-in engine.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Dnf::ID, Dnf::create);
        registry.register(Dnf5::ID, Dnf5::create);
        registry.register(Yum::ID, Yum::create);
        registry.register(Apt::ID, Apt::create);
        registry.register(Apk::ID, Apk::create);
        registry.register(RpmOstree::ID, RpmOstree::create);
        registry
    }

    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, id: &'static str, constructor: EngineConstructor) {
        self.constructors.insert(id, constructor);
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    pub fn create(
        &self,
        id: &str,
        guest: &dyn GuestCapabilities,
    ) -> Result<Box<dyn PackageManagerEngine>, EngineError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| EngineError::UnknownEngine {
                id: id.to_string(),
                known: self.ids().iter().map(|id| id.to_string()).collect(),
            })?;
        Ok(constructor(guest))
    }
}

/// An engine bound to the guest its scripts run on.
pub struct PackageManager<'a> {
    engine: Box<dyn PackageManagerEngine>,
    guest: &'a dyn ExecutionDriver,
}

impl<'a> PackageManager<'a> {
    pub fn new(engine: Box<dyn PackageManagerEngine>, guest: &'a dyn ExecutionDriver) -> Self {
        Self { engine, guest }
    }

    pub fn engine(&self) -> &dyn PackageManagerEngine {
        self.engine.as_ref()
    }

    fn run(&self, script: ShellScript) -> Result<CommandOutput, EngineError> {
        debug!(engine = self.engine.id(), guest = self.guest.name(), script = %script, "Running package script");
        Ok(self.guest.execute(&script.into(), &ExecuteOptions::new())?)
    }

    /// Presence of every installable.
    ///
    /// A presence script exits non-zero whenever something is missing; the
    /// failed command's output is parsed just the same.
    pub fn check_presence(&self, installables: &[Installable]) -> Result<Presence, EngineError> {
        let script = self.engine.check_presence(installables)?;
        let output = match self.run(script) {
            Ok(output) => output,
            Err(EngineError::Guest(GuestError::CommandFailed { output, .. })) => output,
            Err(e) => return Err(e),
        };
        self.engine.parse_presence(installables, output.stdout_str())
    }

    pub fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<CommandOutput, EngineError> {
        info!(engine = self.engine.id(), guest = self.guest.name(), count = installables.len(), "Installing packages");
        self.run(self.engine.install(installables, options)?)
    }

    pub fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<CommandOutput, EngineError> {
        info!(engine = self.engine.id(), guest = self.guest.name(), count = installables.len(), "Reinstalling packages");
        self.run(self.engine.reinstall(installables, options)?)
    }

    pub fn install_debuginfo(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<CommandOutput, EngineError> {
        info!(engine = self.engine.id(), guest = self.guest.name(), count = installables.len(), "Installing debuginfo");
        self.run(self.engine.install_debuginfo(installables, options)?)
    }

    pub fn refresh_metadata(&self) -> Result<CommandOutput, EngineError> {
        self.run(self.engine.refresh_metadata()?)
    }
}
