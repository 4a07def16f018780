//! CLI argument definitions for gantry.
//!
//! This module contains the clap-derived `Cli` and `Commands` types.
//! Separated from `main.rs` so library tests can parse command lines.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry - run commands, packages and tracked actions on test guests")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Guest description (YAML or JSON)
    ///
    /// The local machine is used when no guest is given.
    #[arg(long, short = 'g', global = true)]
    pub guest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command on the guest
    ///
    /// Output is captured and printed once the command finishes. The exit
    /// code of the command becomes the exit code of gantry.
    Exec(commands::exec::ExecArgs),

    /// Install, reinstall or query packages on the guest
    #[command(alias = "pkg")]
    Package(commands::package::PackageArgs),

    /// Render the pidfile wrapper of an action
    Wrapper(commands::wrapper::WrapperArgs),

    /// Ask the running action to reboot the guest (run on the guest)
    RebootRequest(commands::reboot::RebootRequestArgs),

    /// JSON schemas of the documents gantry reads
    Schema(commands::schema::SchemaArgs),
}
