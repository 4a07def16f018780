use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gantry::commands;
use gantry::driver::DriverRegistry;
use gantry::output::Output;
use gantry::package::EngineRegistry;
use gantry::{Cli, Commands};
use gantry_common::{DeferredError, EngineError, GuestError};

/// The guest error behind `err`, wherever it was wrapped.
fn guest_error(err: &anyhow::Error) -> Option<&GuestError> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<GuestError>()
            .or_else(|| match cause.downcast_ref::<EngineError>() {
                Some(EngineError::Guest(guest)) => Some(guest),
                _ => None,
            })
            .or_else(|| match cause.downcast_ref::<DeferredError>() {
                Some(DeferredError::Guest(guest)) => Some(guest),
                _ => None,
            })
    })
}

/// Print the error chain and pick the process exit code.
///
/// A payload's own exit status is passed through; everything else is 1.
fn report(err: &anyhow::Error) -> ExitCode {
    Output::error(format!("{:#}", err));
    let guest = guest_error(err);
    if let Some(hint) = guest.and_then(GuestError::hint) {
        Output::hint(hint);
    }
    let code = guest
        .and_then(GuestError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1);
    ExitCode::from(code)
}

fn run(cli: Cli) -> Result<()> {
    // Registries are built once here and passed down.
    let drivers = DriverRegistry::builtin();
    let engines = EngineRegistry::builtin();
    let guest = cli.guest.as_deref();

    tracing::debug!(
        guest = ?guest,
        drivers = ?drivers.ids(),
        engines = ?engines.ids(),
        "Registries ready"
    );

    match cli.command {
        Commands::Exec(args) => commands::exec::run(args, guest, &drivers),
        Commands::Package(args) => commands::package::run(args, guest, &drivers, &engines),
        Commands::Wrapper(args) => commands::wrapper::run(args, guest, &drivers),
        Commands::RebootRequest(args) => commands::reboot::run(args),
        Commands::Schema(args) => commands::schema::run(args),
    }
}

fn main() -> ExitCode {
    // Initialize tracing with RUST_LOG env filter
    // e.g., RUST_LOG=gantry=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}
