//! The dnf family: dnf, dnf5 and yum.
//!
//! All three share one [`RpmFamily`] helper that knows how to build the
//! presence check and the `<tool> <subcommand> -y <flags> <packages>` lines;
//! the engines differ only in the few fields handed to it, plus yum's
//! post-install re-verification.
//!
//! rpm can answer "which package provides this path" directly, so
//! filesystem paths are passed through with ordinary package names.

use gantry_common::{EngineError, Installable, Options, ShellScript, quote};
use tracing::debug;

use super::{
    PackageManagerEngine, Presence, join_quoted, normalize, privileged, tolerate_missing,
};
use crate::guest::GuestCapabilities;

/// The rpm query used by every rpm based engine.
pub(crate) fn rpm_presence(installables: &[Installable]) -> ShellScript {
    ShellScript::new(format!(
        "rpm -q --whatprovides {}",
        join_quoted(installables.iter().map(Installable::token))
    ))
}

/// Parse `rpm -q --whatprovides` output.
///
/// rpm prints the providing package for present items and one of a few
/// fixed complaints for missing ones.
pub(crate) fn parse_rpm_presence(
    engine: &'static str,
    installables: &[Installable],
    stdout: &str,
) -> Result<Presence, EngineError> {
    let installables = normalize(installables)?;
    if stdout.trim().is_empty() {
        return Err(EngineError::NoPresenceOutput { engine });
    }
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    Ok(installables
        .into_iter()
        .map(|installable| {
            let token = installable.token();
            let not_installed = format!("package {} is not installed", token);
            let not_provided = format!("no package provides {}", token);
            let no_file = format!("error: file {}:", token);
            let missing = lines.iter().any(|line| {
                *line == not_installed || *line == not_provided || line.starts_with(&no_file)
            });
            (installable, !missing)
        })
        .collect())
}

/// Script building shared by the dnf family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmFamily {
    /// Binary, possibly prefixed with `sudo`.
    tool: String,
    /// Flag that lets the transaction skip what cannot be installed.
    skip_flag: &'static str,
    /// Arguments of the metadata refresh.
    refresh_args: &'static str,
}

impl RpmFamily {
    pub fn new(
        guest: &dyn GuestCapabilities,
        binary: &str,
        skip_flag: &'static str,
        refresh_args: &'static str,
    ) -> Self {
        Self {
            tool: privileged(guest, binary),
            skip_flag,
            refresh_args,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Flags derived from options, in a fixed order.
    pub fn option_flags(&self, options: &Options) -> Vec<String> {
        let mut flags = Vec::new();
        for package in &options.excluded_packages {
            flags.push(format!("--exclude {}", quote(package)));
        }
        if let Some(root) = &options.install_root {
            flags.push(format!("--installroot={}", quote(&root.display().to_string())));
        }
        if let Some(version) = &options.release_version {
            flags.push(format!("--releasever={}", quote(version)));
        }
        if options.allow_untrusted {
            flags.push("--nogpgcheck".to_string());
        }
        if options.skip_missing {
            flags.push(self.skip_flag.to_string());
        }
        flags
    }

    /// `<tool> <subcommand> -y <flags> <packages>`.
    ///
    /// The flags slot is kept even when empty, so `dnf5 install -y  tree`
    /// carries two spaces.
    pub fn command(
        &self,
        subcommand: &str,
        installables: &[Installable],
        options: &Options,
    ) -> ShellScript {
        ShellScript::new(format!(
            "{} {} -y {} {}",
            self.tool,
            subcommand,
            self.option_flags(options).join(" "),
            join_quoted(installables.iter().map(Installable::token))
        ))
    }

    pub fn presence(&self, installables: &[Installable]) -> ShellScript {
        rpm_presence(installables)
    }

    pub fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let installables = normalize(installables)?;
        let install = self.command("install", &installables, options);
        let script = if options.check_first {
            self.presence(&installables).or(install)
        } else {
            install
        };
        Ok(tolerate_missing(script, options))
    }

    pub fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let installables = normalize(installables)?;
        let script = self
            .presence(&installables)
            .and(self.command("reinstall", &installables, options));
        Ok(tolerate_missing(script, options))
    }

    /// Install `helper` when missing, then run `debuginfo` with the
    /// family's skip flag when requested.
    pub fn install_debuginfo(
        &self,
        helper: Installable,
        debuginfo: &str,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let installables = normalize(installables)?;
        let helper = self.install(&[helper], &Options::default())?;
        let mut flags = Vec::new();
        if options.skip_missing {
            flags.push(self.skip_flag);
        }
        let debuginfo = ShellScript::new(format!(
            "{} -y {} {}",
            debuginfo,
            flags.join(" "),
            join_quoted(installables.iter().map(Installable::token))
        ));
        Ok(tolerate_missing(helper.and(debuginfo), options))
    }

    pub fn refresh_metadata(&self) -> ShellScript {
        ShellScript::new(format!("{} {}", self.tool, self.refresh_args))
    }
}

/// dnf 4.
pub struct Dnf {
    family: RpmFamily,
    sudo: bool,
}

impl Dnf {
    pub const ID: &'static str = "dnf";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        Self {
            family: RpmFamily::new(guest, "dnf", "--skip-broken", "makecache -y --refresh"),
            sudo: !guest.is_superuser(),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }
}

impl PackageManagerEngine for Dnf {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        Ok(self.family.presence(&normalize(installables)?))
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
        self.family.install(installables, options)
    }

    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        self.family.reinstall(installables, options)
    }

    fn install_debuginfo(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let debuginfo = if self.sudo { "sudo debuginfo-install" } else { "debuginfo-install" };
        self.family.install_debuginfo(
            Installable::path("/usr/bin/debuginfo-install"),
            debuginfo,
            installables,
            options,
        )
    }

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        Ok(self.family.refresh_metadata())
    }
}

/// dnf5, which renamed `--skip-broken` to `--skip-unavailable` and moved
/// `debuginfo-install` into a plugin subcommand.
pub struct Dnf5 {
    family: RpmFamily,
}

impl Dnf5 {
    pub const ID: &'static str = "dnf5";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        Self {
            family: RpmFamily::new(guest, "dnf5", "--skip-unavailable", "makecache -y --refresh"),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }
}

impl PackageManagerEngine for Dnf5 {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        Ok(self.family.presence(&normalize(installables)?))
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
        self.family.install(installables, options)
    }

    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        self.family.reinstall(installables, options)
    }

    fn install_debuginfo(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let debuginfo = format!("{} debuginfo-install", self.family.tool());
        self.family.install_debuginfo(
            Installable::package("dnf5-plugins"),
            &debuginfo,
            installables,
            options,
        )
    }

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        Ok(self.family.refresh_metadata())
    }
}

/// yum.
///
/// yum may exit 0 without installing anything when a package is unknown, so
/// unless missing packages are tolerated, the install is followed by a
/// second presence check whose status becomes the script's status.
pub struct Yum {
    family: RpmFamily,
    sudo: bool,
}

impl Yum {
    pub const ID: &'static str = "yum";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        Self {
            family: RpmFamily::new(guest, "yum", "--skip-broken", "makecache"),
            sudo: !guest.is_superuser(),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }
}

impl PackageManagerEngine for Yum {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        Ok(self.family.presence(&normalize(installables)?))
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
        let script = self.family.install(installables, options)?;
        // yum may exit 0 without installing anything; re-check unless the
        // caller opted out of presence checks or tolerates missing packages.
        if options.skip_missing || !options.check_first {
            return Ok(script);
        }
        debug!("Appending post-install presence check for yum");
        Ok(script.and(self.family.presence(&normalize(installables)?)))
    }

    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        self.family.reinstall(installables, options)
    }

    fn install_debuginfo(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let debuginfo = if self.sudo { "sudo debuginfo-install" } else { "debuginfo-install" };
        self.family.install_debuginfo(
            Installable::package("yum-utils"),
            debuginfo,
            installables,
            options,
        )
    }

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        Ok(self.family.refresh_metadata())
    }
}
