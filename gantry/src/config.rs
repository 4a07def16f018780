//! Guest configuration documents.
//!
//! A guest is described by one YAML or JSON document; the format is picked
//! by file extension (`.json` is JSON, everything else is YAML, which also
//! accepts JSON). Transport options only matter to the driver named by
//! `how`; drivers call [`GuestConfig::require`] for the ones they cannot do
//! without.
//!
//! ```yaml
//! name: runner
//! how: ssh
//! hostname: 192.168.122.10
//! user: fedora
//! key: [~/.ssh/id_ed25519]
//! package-manager: dnf5
//! environment:
//!   LANG: C.UTF-8
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gantry_common::{ConfigError, EnvMap};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::guest::{DEFAULT_SCRIPTS_PATH, GuestFacts};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GuestConfig {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Name used in logs and error messages.
    #[serde(default = "default_name")]
    pub name: String,

    /// Driver id: `local`, `ssh`, `container` or `chroot`.
    pub how: String,

    /// Package manager engine id, e.g. `dnf5` or `apt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,

    /// Whether commands run as root. Detected for `local`; otherwise assumed
    /// when the user is `root` or unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_superuser: Option<bool>,

    #[serde(default = "default_scripts_path")]
    pub scripts_path: PathBuf,

    /// Exported before every command.
    #[serde(default, skip_serializing_if = "EnvMap::is_empty")]
    pub environment: EnvMap,

    // ssh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Private keys, passed as `-i` in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<PathBuf>,
    /// Password for `sshpass`. Never serialized back.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Extra `-o` options, e.g. `ServerAliveInterval=10`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_option: Vec<String>,
    /// Socket for connection multiplexing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_path: Option<PathBuf>,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Seconds between connection attempts.
    #[serde(default = "default_connect_interval")]
    pub connect_interval: u64,

    // container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Container runtime binary, `podman` unless set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_user: Option<String>,

    // chroot
    /// Argv of the persistent shell, `mock -r <root> --shell` unless set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shell: Vec<String>,
    /// Host directory the shell's `/` maps to; a mock config name when
    /// `shell` is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Directory, as seen from inside the shell, used to exchange output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_dir: Option<PathBuf>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_scripts_path() -> PathBuf {
    PathBuf::from(DEFAULT_SCRIPTS_PATH)
}

fn default_connect_retries() -> u32 {
    12
}

fn default_connect_interval() -> u64 {
    5
}

impl GuestConfig {
    /// A minimal configuration for the given driver.
    pub fn new(name: impl Into<String>, how: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            how: how.into(),
            package_manager: None,
            is_superuser: None,
            scripts_path: default_scripts_path(),
            environment: EnvMap::new(),
            hostname: None,
            user: None,
            port: None,
            key: Vec::new(),
            password: None,
            ssh_option: Vec::new(),
            control_path: None,
            connect_retries: default_connect_retries(),
            connect_interval: default_connect_interval(),
            container: None,
            runtime: None,
            container_user: None,
            shell: Vec::new(),
            root: None,
            exchange_dir: None,
        }
    }

    /// The local machine.
    pub fn local() -> Self {
        Self::new(default_name(), "local")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Facts derived from the configuration.
    pub fn facts(&self) -> GuestFacts {
        let is_superuser = self.is_superuser.unwrap_or_else(|| {
            if self.how == "local" {
                // SAFETY: geteuid has no preconditions and cannot fail.
                unsafe { libc::geteuid() == 0 }
            } else {
                self.user.as_deref().is_none_or(|user| user == "root")
            }
        });
        GuestFacts {
            is_superuser,
            environment: self.environment.clone(),
            scripts_path: self.scripts_path.clone(),
        }
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_secs(self.connect_interval)
    }

    /// Unwrap a transport option the driver cannot work without.
    pub fn require<'a, T: ?Sized>(
        &self,
        value: Option<&'a T>,
        option: &'static str,
    ) -> Result<&'a T, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingOption {
            guest: self.name.clone(),
            how: self.how.clone(),
            option,
        })
    }
}
