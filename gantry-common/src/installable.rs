//! Things a package manager can install, and how to install them.

use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Package file extensions recognised when parsing installables.
const PACKAGE_FILE_EXTENSIONS: &[&str] = &[".rpm", ".deb", ".apk"];

/// An addressable unit a package manager can act on.
///
/// Variants are ordered, so a set of installables always renders in the same
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Installable {
    /// A package name, e.g. `tree`.
    Package(String),
    /// A URL of a package file.
    PackageUrl(String),
    /// A path some package must provide, e.g. `/usr/bin/flock`.
    FileSystemPath(PathBuf),
    /// A package file already present on the guest.
    PackagePath(PathBuf),
}

impl Installable {
    pub fn package(name: impl Into<String>) -> Self {
        Installable::Package(name.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Installable::PackageUrl(url.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Installable::FileSystemPath(path.into())
    }

    pub fn package_path(path: impl Into<PathBuf>) -> Self {
        Installable::PackagePath(path.into())
    }

    /// The raw token as a package manager would receive it.
    pub fn token(&self) -> String {
        match self {
            Installable::Package(name) | Installable::PackageUrl(name) => name.clone(),
            Installable::FileSystemPath(path) | Installable::PackagePath(path) => {
                path.to_string_lossy().into_owned()
            }
        }
    }
}

impl fmt::Display for Installable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for Installable {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Installable::url(s));
        }
        let looks_like_path = s.starts_with('/') || s.starts_with("./");
        if looks_like_path && PACKAGE_FILE_EXTENSIONS.iter().any(|ext| s.ends_with(ext)) {
            return Ok(Installable::package_path(s));
        }
        if s.starts_with('/') {
            return Ok(Installable::path(s));
        }
        Ok(Installable::package(s))
    }
}

/// Install-time flags.
///
/// Engines only ever read options; the builder methods return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    /// Packages the package manager must not pull in.
    pub excluded_packages: Vec<String>,
    /// Tolerate installables that cannot be installed.
    pub skip_missing: bool,
    /// Skip the install when every installable is already present.
    pub check_first: bool,
    /// Alternative installation root.
    pub install_root: Option<PathBuf>,
    /// Release version to resolve repositories against.
    pub release_version: Option<String>,
    /// Accept packages that cannot be verified.
    pub allow_untrusted: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            excluded_packages: Vec::new(),
            skip_missing: false,
            check_first: true,
            install_root: None,
            release_version: None,
            allow_untrusted: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_missing(mut self, skip_missing: bool) -> Self {
        self.skip_missing = skip_missing;
        self
    }

    pub fn check_first(mut self, check_first: bool) -> Self {
        self.check_first = check_first;
        self
    }

    pub fn exclude(mut self, package: impl Into<String>) -> Self {
        self.excluded_packages.push(package.into());
        self
    }

    pub fn install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = Some(root.into());
        self
    }

    pub fn release_version(mut self, version: impl Into<String>) -> Self {
        self.release_version = Some(version.into());
        self
    }

    pub fn allow_untrusted(mut self, allow: bool) -> Self {
        self.allow_untrusted = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installables() {
        assert_eq!("tree".parse::<Installable>().unwrap(), Installable::package("tree"));
        assert_eq!(
            "https://example.com/tree.rpm".parse::<Installable>().unwrap(),
            Installable::url("https://example.com/tree.rpm")
        );
        assert_eq!(
            "/tmp/tree-2.1.rpm".parse::<Installable>().unwrap(),
            Installable::package_path("/tmp/tree-2.1.rpm")
        );
        assert_eq!(
            "/usr/bin/flock".parse::<Installable>().unwrap(),
            Installable::path("/usr/bin/flock")
        );
    }

    #[test]
    fn test_installables_sort_deterministically() {
        let mut installables = vec![
            Installable::path("/usr/bin/flock"),
            Installable::package("zsh"),
            Installable::package("bash"),
        ];
        installables.sort();
        assert_eq!(
            installables,
            vec![
                Installable::package("bash"),
                Installable::package("zsh"),
                Installable::path("/usr/bin/flock"),
            ]
        );
    }

    #[test]
    fn test_options_default_checks_first() {
        let options = Options::default();
        assert!(options.check_first);
        assert!(!options.skip_missing);
        assert!(options.excluded_packages.is_empty());
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: Options = serde_json::from_str(r#"{"skip-missing": true}"#).unwrap();
        assert!(options.skip_missing);
        assert!(options.check_first);
    }
}
