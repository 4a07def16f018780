//! rpm-ostree, for image-based Fedora and CentOS guests.
//!
//! Packages are layered live on top of the booted deployment. Image-based
//! systems have no reinstall and no debuginfo concept, and no metadata cache
//! worth refreshing on demand.

use gantry_common::{EngineError, Installable, Options, ShellScript};
use tracing::warn;

use super::rpm::{parse_rpm_presence, rpm_presence};
use super::{PackageManagerEngine, Presence, join_quoted, normalize, privileged, tolerate_missing};
use crate::guest::GuestCapabilities;

const INSTALL_FLAGS: &str = "--apply-live --idempotent --allow-inactive --assumeyes";

pub struct RpmOstree {
    tool: String,
}

impl RpmOstree {
    pub const ID: &'static str = "rpm-ostree";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        Self {
            tool: privileged(guest, "rpm-ostree"),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }

    fn option_flags(options: &Options) -> Vec<String> {
        if !options.excluded_packages.is_empty() {
            warn!(engine = Self::ID, "Ignoring excluded packages, rpm-ostree cannot exclude packages");
        }
        if options.skip_missing {
            warn!(engine = Self::ID, "rpm-ostree cannot skip missing packages, relying on the fallback");
        }
        let mut flags = Vec::new();
        if let Some(version) = &options.release_version {
            flags.push(format!("--releasever={}", gantry_common::quote(version)));
        }
        if options.install_root.is_some() {
            warn!(engine = Self::ID, "Ignoring install root");
        }
        if options.allow_untrusted {
            warn!(engine = Self::ID, "Ignoring allow-untrusted, rpm-ostree always verifies signatures");
        }
        flags
    }
}

impl PackageManagerEngine for RpmOstree {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        Ok(rpm_presence(&normalize(installables)?))
    }

    fn parse_presence(
        &self,
        installables: &[Installable],
        stdout: &str,
    ) -> Result<Presence, EngineError> {
        parse_rpm_presence(Self::ID, installables, stdout)
    }

    fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let installables = normalize(installables)?;
        let install = ShellScript::new(format!(
            "{} install {} {} {}",
            self.tool,
            INSTALL_FLAGS,
            Self::option_flags(options).join(" "),
            join_quoted(installables.iter().map(Installable::token))
        ));
        let script = if options.check_first {
            rpm_presence(&installables).or(install)
        } else {
            install
        };
        Ok(tolerate_missing(script, options))
    }

    fn reinstall(
        &self,
        _installables: &[Installable],
        _options: &Options,
    ) -> Result<ShellScript, EngineError> {
        Err(EngineError::capability(
            "rpm-ostree does not support reinstall operation.",
        ))
    }

    fn install_debuginfo(
        &self,
        _installables: &[Installable],
        _options: &Options,
    ) -> Result<ShellScript, EngineError> {
        Err(EngineError::capability(
            "rpm-ostree does not support debuginfo packages.",
        ))
    }

    /// A no-op that tells the guest log why nothing happened.
    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        warn!(engine = Self::ID, "Metadata refresh is not supported, skipping");
        Ok(ShellScript::new(
            "echo 'Warning: rpm-ostree does not support metadata refresh, skipping.' >&2",
        ))
    }
}
