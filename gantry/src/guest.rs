//! What drivers and engines may know about a guest.
//!
//! Nothing in this crate depends on a concrete guest type. Engines and the
//! wrapper generator read the three facts they need through
//! [`GuestCapabilities`]; drivers expose them through [`GuestFacts`].

use std::path::{Path, PathBuf};

use gantry_common::EnvMap;

/// Where helper scripts are installed on a guest unless configured otherwise.
pub const DEFAULT_SCRIPTS_PATH: &str = "/usr/local/bin";

/// Narrow view of a guest.
pub trait GuestCapabilities {
    /// Whether commands run as root, so no `sudo` prefix is needed.
    fn is_superuser(&self) -> bool;

    /// Environment every command on this guest is run with.
    fn environment(&self) -> EnvMap;

    /// Directory holding helper scripts; prepended to `PATH` by wrappers.
    fn scripts_path(&self) -> PathBuf;
}

/// Facts gathered for one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestFacts {
    pub is_superuser: bool,
    pub environment: EnvMap,
    pub scripts_path: PathBuf,
}

impl Default for GuestFacts {
    fn default() -> Self {
        Self {
            is_superuser: true,
            environment: EnvMap::new(),
            scripts_path: PathBuf::from(DEFAULT_SCRIPTS_PATH),
        }
    }
}

impl GuestFacts {
    pub fn superuser(is_superuser: bool) -> Self {
        Self {
            is_superuser,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_scripts_path(mut self, path: impl AsRef<Path>) -> Self {
        self.scripts_path = path.as_ref().to_path_buf();
        self
    }
}

impl GuestCapabilities for GuestFacts {
    fn is_superuser(&self) -> bool {
        self.is_superuser
    }

    fn environment(&self) -> EnvMap {
        self.environment.clone()
    }

    fn scripts_path(&self) -> PathBuf {
        self.scripts_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_facts() {
        let facts = GuestFacts::default();
        assert!(facts.is_superuser());
        assert!(facts.environment().is_empty());
        assert_eq!(facts.scripts_path(), PathBuf::from("/usr/local/bin"));
    }

    #[test]
    fn test_builder() {
        let facts = GuestFacts::superuser(false)
            .with_env("LANG", "C")
            .with_scripts_path("/opt/gantry/bin");
        assert!(!facts.is_superuser());
        assert_eq!(facts.environment().get("LANG").map(String::as_str), Some("C"));
        assert_eq!(facts.scripts_path(), PathBuf::from("/opt/gantry/bin"));
    }
}
