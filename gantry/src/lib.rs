//! gantry - run commands, packages and tracked actions on test guests
//!
//! The execution core of a test orchestrator: it turns an intent ("install
//! package X", "run script Y") into a correctly escaped shell invocation,
//! ships it to a guest and keeps long-running actions trackable across
//! reboots.
//!
//! # Layers
//!
//! - [`driver`]: one execute contract over local, SSH, container and
//!   persistent chroot-shell transports
//! - [`deferred`]: batching commands into an image build for bootc guests
//! - [`package`]: package-manager engines compiling installs into scripts
//! - [`pidfile`]: the lock-protected pidfile and reboot-request protocol
//!
//! Value types (`Command`, `ShellScript`, `Installable`, errors) live in
//! `gantry-common`.

pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod config;
pub mod containerfile;
pub mod deferred;
pub mod driver;
pub mod guest;
pub mod output;
pub mod package;
pub mod pidfile;
pub mod retry;

pub use cli::{Cli, Commands};
pub use config::GuestConfig;
pub use driver::{DriverRegistry, ExecuteOptions, Executable, ExecutionDriver};
pub use guest::{GuestCapabilities, GuestFacts};
pub use package::{EngineRegistry, PackageManager, PackageManagerEngine};
