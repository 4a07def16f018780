//! CLI command implementations.

pub mod exec;
pub mod package;
pub mod reboot;
pub mod schema;
pub mod wrapper;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command_runner::RealCommandRunner;
use crate::config::GuestConfig;
use crate::driver::{DriverRegistry, ExecutionDriver};
use crate::output::Output;

/// The guest named on the command line, or the local machine.
pub fn load_guest(path: Option<&Path>) -> Result<GuestConfig> {
    match path {
        Some(path) => GuestConfig::load(path)
            .with_context(|| format!("Failed to load guest from {}", path.display())),
        None => Ok(GuestConfig::local()),
    }
}

/// Create the driver for `config` and wait until the guest accepts commands.
pub fn connect(config: &GuestConfig, drivers: &DriverRegistry) -> Result<Box<dyn ExecutionDriver>> {
    let driver = drivers.create(config, Arc::new(RealCommandRunner))?;
    let spinner = Output::spinner(format!("Connecting to guest {}...", config.name));
    match driver.prepare() {
        Ok(()) => spinner.finish_clear(),
        Err(e) => {
            spinner.finish_error(format!("Guest {} is not available", config.name));
            return Err(e).with_context(|| format!("Failed to prepare guest {}", config.name));
        }
    }
    Ok(driver)
}

/// Split `KEY=VALUE`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
