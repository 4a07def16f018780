pub mod command;
pub mod error;
pub mod exit_code;
pub mod installable;
pub mod output;

pub use command::{Command, EnvMap, ShellScript, quote};
pub use error::{ConfigError, DeferredError, EngineError, GuestError, PidFileError};
pub use installable::{Installable, Options};
pub use output::CommandOutput;
