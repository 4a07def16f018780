//! apk, for Alpine guests.
//!
//! apk has no "what provides this path" query that works for packages that
//! are not installed yet, so filesystem paths are resolved through a static
//! table and unknown paths are rejected.

use gantry_common::{Command, EngineError, Installable, Options, ShellScript};
use tracing::warn;

use super::{PackageManagerEngine, Presence, normalize, tolerate_missing};
use crate::guest::GuestCapabilities;

/// Packages known to provide common paths.
const PATH_PACKAGES: &[(&str, &str)] = &[
    ("/usr/bin/arch", "busybox"),
    ("/usr/bin/flock", "flock"),
    ("/usr/bin/python3", "python3"),
    ("/usr/bin/rsync", "rsync"),
    ("/usr/bin/unbuffer", "expect"),
];

pub struct Apk {
    sudo: bool,
}

impl Apk {
    pub const ID: &'static str = "apk";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        Self {
            sudo: !guest.is_superuser(),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }

    fn resolve(installable: &Installable) -> Result<String, EngineError> {
        match installable {
            Installable::Package(name) | Installable::PackageUrl(name) => Ok(name.clone()),
            Installable::PackagePath(path) => Ok(path.display().to_string()),
            Installable::FileSystemPath(path) => PATH_PACKAGES
                .iter()
                .find(|(known, _)| path.as_os_str() == *known)
                .map(|(_, package)| package.to_string())
                .ok_or_else(|| EngineError::UnmappedPath {
                    engine: Self::ID,
                    path: path.clone(),
                }),
        }
    }

    fn resolve_all(installables: &[Installable]) -> Result<Vec<String>, EngineError> {
        normalize(installables)?.iter().map(Self::resolve).collect()
    }

    fn apk(&self) -> Command {
        if self.sudo {
            Command::new(["sudo", "apk"])
        } else {
            Command::new(["apk"])
        }
    }

    fn presence(&self, packages: &[String]) -> ShellScript {
        Command::new(["apk", "info", "-e"])
            .args_from(packages.iter().cloned())
            .into()
    }

    fn add(&self, packages: &[String], options: &Options) -> ShellScript {
        if !options.excluded_packages.is_empty() {
            warn!(engine = Self::ID, "Ignoring excluded packages, apk cannot exclude packages");
        }
        if options.release_version.is_some() {
            warn!(engine = Self::ID, "Ignoring release version");
        }
        let mut command = self.apk().arg("add");
        if options.allow_untrusted {
            command.push("--allow-untrusted");
        }
        if let Some(root) = &options.install_root {
            command.push("--root");
            command.push(root.display().to_string());
        }
        command.args_from(packages.iter().cloned()).into()
    }
}

impl PackageManagerEngine for Apk {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        Ok(self.presence(&Self::resolve_all(installables)?))
    }

    /// `apk info -e` prints the name of every installed package asked about.
    fn parse_presence(
        &self,
        installables: &[Installable],
        stdout: &str,
    ) -> Result<Presence, EngineError> {
        let installed: Vec<&str> = stdout.lines().map(str::trim).collect();
        normalize(installables)?
            .into_iter()
            .map(|installable| {
                let package = Self::resolve(&installable)?;
                let present = installed.contains(&package.as_str());
                Ok((installable, present))
            })
            .collect()
    }

    fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let packages = Self::resolve_all(installables)?;
        let add = self.add(&packages, options);
        let script = if options.check_first {
            self.presence(&packages).or(add)
        } else {
            add
        };
        Ok(tolerate_missing(script, options))
    }

    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let packages = Self::resolve_all(installables)?;
        let fix: ShellScript = self
            .apk()
            .arg("fix")
            .args_from(packages.iter().cloned())
            .into();
        Ok(tolerate_missing(self.presence(&packages).and(fix), options))
    }

    fn install_debuginfo(
        &self,
        _installables: &[Installable],
        _options: &Options,
    ) -> Result<ShellScript, EngineError> {
        Err(EngineError::capability("apk does not support debuginfo packages."))
    }

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        Ok(self.apk().arg("update").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::GuestFacts;

    fn apk() -> Apk {
        Apk::new(&GuestFacts::default())
    }

    #[test]
    fn test_install_default() {
        let script = apk()
            .install(&[Installable::package("tree")], &Options::default())
            .unwrap();
        assert_eq!(script.as_str(), "apk info -e tree || apk add tree");
    }

    #[test]
    fn test_install_skip_missing() {
        let script = apk()
            .install(&[Installable::package("tree")], &Options::default().skip_missing(true))
            .unwrap();
        assert_eq!(script.as_str(), "apk info -e tree || apk add tree || /bin/true");
    }

    #[test]
    fn test_install_flags() {
        let options = Options::default()
            .check_first(false)
            .allow_untrusted(true)
            .install_root("/mnt/alpine");
        let script = apk()
            .install(&[Installable::package_path("/tmp/tree.apk")], &options)
            .unwrap();
        assert_eq!(
            script.as_str(),
            "apk add --allow-untrusted --root /mnt/alpine /tmp/tree.apk"
        );
    }

    #[test]
    fn test_paths_resolve_through_table() {
        let script = apk()
            .install(
                &[Installable::path("/usr/bin/flock"), Installable::package("bash")],
                &Options::default(),
            )
            .unwrap();
        assert_eq!(script.as_str(), "apk info -e bash flock || apk add bash flock");
    }

    #[test]
    fn test_unmapped_path_fails_before_rendering() {
        let err = apk()
            .install(&[Installable::path("/opt/custom/bin/tool")], &Options::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "apk cannot tell which package provides '/opt/custom/bin/tool'"
        );
    }

    #[test]
    fn test_reinstall_uses_fix() {
        let script = apk()
            .reinstall(&[Installable::package("tree")], &Options::default())
            .unwrap();
        assert_eq!(script.as_str(), "apk info -e tree && apk fix tree");
    }

    #[test]
    fn test_sudo_and_refresh() {
        let apk = Apk::new(&GuestFacts::superuser(false));
        assert_eq!(apk.refresh_metadata().unwrap().as_str(), "sudo apk update");
        let script = apk
            .install(&[Installable::package("tree")], &Options::default())
            .unwrap();
        assert_eq!(script.as_str(), "apk info -e tree || sudo apk add tree");
    }

    #[test]
    fn test_debuginfo_is_unsupported() {
        let err = apk()
            .install_debuginfo(&[Installable::package("tree")], &Options::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "apk does not support debuginfo packages.");
    }

    #[test]
    fn test_parse_presence() {
        let presence = apk()
            .parse_presence(
                &[Installable::package("tree"), Installable::path("/usr/bin/flock")],
                "flock\n",
            )
            .unwrap();
        assert_eq!(presence.len(), 2);
        assert!(!presence[&Installable::package("tree")]);
        assert!(presence[&Installable::path("/usr/bin/flock")]);
    }
}
