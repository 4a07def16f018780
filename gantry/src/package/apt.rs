//! apt, for Debian and Ubuntu guests.
//!
//! Scripts are multi-line: the frontend is switched to non-interactive
//! first, and the last line is an explicit `exit`, so `skip_missing` can
//! turn the status into `exit 0`.
//!
//! dpkg has no single query reporting presence of several packages in a
//! parseable way, so presence is checked by a loop of `dpkg-query` calls,
//! one `PRESENCE-TEST:<index>:<package>:<status>` line per installable.

use gantry_common::{EngineError, Installable, Options, ShellScript, quote};
use tracing::warn;

use super::{PackageManagerEngine, Presence, join_quoted, normalize};
use crate::guest::GuestCapabilities;

const PRESENCE_MARKER: &str = "PRESENCE-TEST";
const INSTALLED_STATUS: &str = "install ok installed";

/// Packages known to provide common paths.
const PATH_PACKAGES: &[(&str, &str)] = &[
    ("/usr/bin/arch", "coreutils"),
    ("/usr/bin/flock", "util-linux"),
    ("/usr/bin/python3", "python3"),
    ("/usr/bin/rsync", "rsync"),
    ("/usr/bin/unbuffer", "expect"),
];

pub struct Apt {
    tool: String,
}

impl Apt {
    pub const ID: &'static str = "apt";

    pub fn new(guest: &dyn GuestCapabilities) -> Self {
        // `-E`, so the exported frontend survives sudo.
        let tool = if guest.is_superuser() { "apt" } else { "sudo -E apt" };
        Self {
            tool: tool.to_string(),
        }
    }

    pub fn create(guest: &dyn GuestCapabilities) -> Box<dyn PackageManagerEngine> {
        Box::new(Self::new(guest))
    }

    /// The package name apt and dpkg understand for an installable.
    fn resolve(installable: &Installable) -> Result<String, EngineError> {
        match installable {
            Installable::Package(name) => Ok(name.clone()),
            Installable::PackagePath(path) => Ok(path.display().to_string()),
            Installable::PackageUrl(url) => Err(EngineError::capability(format!(
                "apt cannot install packages from URLs, download '{}' first.",
                url
            ))),
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

    fn option_flags(&self, options: &Options) -> Vec<&'static str> {
        if !options.excluded_packages.is_empty() {
            warn!(engine = Self::ID, "Ignoring excluded packages, apt cannot exclude packages");
        }
        if options.install_root.is_some() || options.release_version.is_some() {
            warn!(engine = Self::ID, "Ignoring install root and release version");
        }
        let mut flags = Vec::new();
        if options.skip_missing {
            flags.push("--ignore-missing");
        }
        if options.allow_untrusted {
            flags.push("--allow-unauthenticated");
        }
        flags
    }

    /// Frontend export, the given line, then an explicit exit.
    fn framed(line: ShellScript, options: &Options) -> ShellScript {
        let exit = if options.skip_missing { "exit 0" } else { "exit $?" };
        ShellScript::from_lines([
            ShellScript::new("export DEBIAN_FRONTEND=noninteractive"),
            line,
            ShellScript::new(exit),
        ])
    }

    fn command(&self, subcommand: &str, packages: &[String], options: &Options) -> ShellScript {
        ShellScript::new(format!(
            "{} {} -y {} {}",
            self.tool,
            subcommand,
            self.option_flags(options).join(" "),
            join_quoted(packages)
        ))
    }

    fn query(packages: &[String]) -> ShellScript {
        ShellScript::new(format!("dpkg-query --show {}", join_quoted(packages)))
    }
}

impl PackageManagerEngine for Apt {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn check_presence(&self, installables: &[Installable]) -> Result<ShellScript, EngineError> {
        let packages = Self::resolve_all(installables)?;
        let lines = packages.iter().enumerate().map(|(index, package)| {
            let quoted = quote(package);
            ShellScript::new(format!(
                "printf '%s:%s:%s:%s\\n' {} {} {} \"$(dpkg-query --show --showformat='${{Status}}' {} 2>&1)\"",
                PRESENCE_MARKER, index, quoted, quoted
            ))
        });
        Ok(ShellScript::from_lines(lines))
    }

    fn parse_presence(
        &self,
        installables: &[Installable],
        stdout: &str,
    ) -> Result<Presence, EngineError> {
        let installables = normalize(installables)?;
        let mut presence: Presence = installables.iter().map(|i| (i.clone(), false)).collect();
        for line in stdout.lines() {
            let mut fields = line.trim().splitn(4, ':');
            if fields.next() != Some(PRESENCE_MARKER) {
                continue;
            }
            let index = fields.next().and_then(|index| index.parse::<usize>().ok());
            let _package = fields.next();
            let status = fields.next().unwrap_or_default();
            if let Some(installable) = index.and_then(|index| installables.get(index)) {
                presence.insert(installable.clone(), status.contains(INSTALLED_STATUS));
            }
        }
        Ok(presence)
    }

    fn install(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let packages = Self::resolve_all(installables)?;
        let install = self.command("install", &packages, options);
        let line = if options.check_first {
            Self::query(&packages).or(install)
        } else {
            install
        };
        Ok(Self::framed(line, options))
    }

    fn reinstall(
        &self,
        installables: &[Installable],
        options: &Options,
    ) -> Result<ShellScript, EngineError> {
        let packages = Self::resolve_all(installables)?;
        let line = Self::query(&packages).and(self.command("reinstall", &packages, options));
        Ok(Self::framed(line, options))
    }

    fn install_debuginfo(
        &self,
        _installables: &[Installable],
        _options: &Options,
    ) -> Result<ShellScript, EngineError> {
        Err(EngineError::capability("apt does not support debuginfo packages."))
    }

    fn refresh_metadata(&self) -> Result<ShellScript, EngineError> {
        Ok(ShellScript::from_lines([
            ShellScript::new("export DEBIAN_FRONTEND=noninteractive"),
            ShellScript::new(format!("{} update", self.tool)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::GuestFacts;

    fn tree() -> Vec<Installable> {
        vec![Installable::package("tree")]
    }

    #[test]
    fn test_install_default() {
        let script = Apt::new(&GuestFacts::default())
            .install(&tree(), &Options::default())
            .unwrap();
        assert_eq!(
            script.as_str(),
            "export DEBIAN_FRONTEND=noninteractive\n\
             dpkg-query --show tree || apt install -y  tree\n\
             exit $?"
        );
    }

    #[test]
    fn test_install_skip_missing_exits_zero() {
        let script = Apt::new(&GuestFacts::default())
            .install(&tree(), &Options::default().skip_missing(true))
            .unwrap();
        assert!(script.as_str().ends_with("exit 0"));
        assert!(script.as_str().contains("apt install -y --ignore-missing tree"));
    }

    #[test]
    fn test_install_without_check() {
        let script = Apt::new(&GuestFacts::default())
            .install(&tree(), &Options::default().check_first(false).allow_untrusted(true))
            .unwrap();
        assert!(!script.as_str().contains("dpkg-query"));
        assert!(script.as_str().contains("apt install -y --allow-unauthenticated tree"));
    }

    #[test]
    fn test_sudo_keeps_environment() {
        let script = Apt::new(&GuestFacts::superuser(false))
            .install(&tree(), &Options::default())
            .unwrap();
        assert!(script.as_str().contains("|| sudo -E apt install"));
    }

    #[test]
    fn test_paths_resolve_through_table() {
        let script = Apt::new(&GuestFacts::default())
            .install(
                &[Installable::path("/usr/bin/unbuffer")],
                &Options::default().check_first(false),
            )
            .unwrap();
        assert!(script.as_str().contains("apt install -y  expect"));
    }

    #[test]
    fn test_unmapped_path_fails() {
        let err = Apt::new(&GuestFacts::default())
            .install(&[Installable::path("/usr/bin/nothing")], &Options::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnmappedPath { engine: "apt", .. }));
    }

    #[test]
    fn test_reinstall() {
        let script = Apt::new(&GuestFacts::default())
            .reinstall(&tree(), &Options::default())
            .unwrap();
        assert!(
            script
                .as_str()
                .contains("dpkg-query --show tree && apt reinstall -y  tree")
        );
    }

    #[test]
    fn test_debuginfo_is_unsupported() {
        let err = Apt::new(&GuestFacts::default())
            .install_debuginfo(&tree(), &Options::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Capability(_)));
    }

    #[test]
    fn test_presence_script_has_one_line_per_installable() {
        let script = Apt::new(&GuestFacts::default())
            .check_presence(&[Installable::package("tree"), Installable::package("nano")])
            .unwrap();
        let lines: Vec<&str> = script.as_str().lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "printf '%s:%s:%s:%s\\n' PRESENCE-TEST 0 nano \"$(dpkg-query --show --showformat='${Status}' nano 2>&1)\""
        );
    }

    #[test]
    fn test_presence_script_quotes_package_names() {
        let hostile = "x$(echo INJECTED)\"q";
        let script = Apt::new(&GuestFacts::default())
            .check_presence(&[Installable::package(hostile)])
            .unwrap();
        let output = std::process::Command::new("bash")
            .arg("-c")
            .arg(script.as_str())
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.contains("xINJECTED"), "{stdout}");
        assert!(
            stdout.starts_with(&format!("PRESENCE-TEST:0:{hostile}:")),
            "{stdout}"
        );
    }

    #[test]
    fn test_parse_presence() {
        let installables = [
            Installable::package("tree"),
            Installable::package("nano"),
            Installable::package("vim"),
        ];
        let stdout = "PRESENCE-TEST:0:nano:install ok installed\n\
                      PRESENCE-TEST:1:tree:dpkg-query: no packages found matching tree\n";
        let presence = Apt::new(&GuestFacts::default())
            .parse_presence(&installables, stdout)
            .unwrap();
        assert_eq!(presence.len(), 3);
        assert!(presence[&Installable::package("nano")]);
        assert!(!presence[&Installable::package("tree")]);
        assert!(!presence[&Installable::package("vim")]);
    }

    #[test]
    fn test_refresh_metadata() {
        let script = Apt::new(&GuestFacts::default()).refresh_metadata().unwrap();
        assert!(script.as_str().ends_with("apt update"));
    }
}
