//! Render, and optionally deliver, the pidfile wrapper of an action.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use gantry_common::ShellScript;

use crate::commands::{connect, load_guest};
use crate::driver::DriverRegistry;
use crate::output::Output;
use crate::pidfile::{PidFileContext, StreamMode, Wrapper, WrapperParams, render_wrapper};

#[derive(Debug, Args)]
pub struct WrapperArgs {
    /// Action name used in kernel log markers
    #[arg(long)]
    pub name: String,

    /// Guest path of the inner (action) script
    #[arg(long, default_value = "/var/tmp/gantry/wrapper-inner.sh")]
    pub inner_path: PathBuf,

    /// Guest path of the outer (bookkeeping) script
    #[arg(long, default_value = "/var/tmp/gantry/wrapper-outer.sh")]
    pub outer_path: PathBuf,

    /// Guest path a reboot helper writes its request to
    #[arg(long, default_value = "/var/tmp/gantry/reboot-request")]
    pub reboot_request: PathBuf,

    /// Leave standard streams untouched
    #[arg(long)]
    pub interactive: bool,

    /// The action runs with a terminal
    #[arg(long)]
    pub tty: bool,

    /// Push both scripts to the guest instead of printing them
    #[arg(long)]
    pub deliver: bool,

    /// The action, as shell text
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub action: Vec<String>,
}

impl WrapperArgs {
    fn params(&self) -> WrapperParams {
        WrapperParams {
            name: self.name.clone(),
            action: ShellScript::new(self.action.join(" ")),
            inner_path: self.inner_path.clone(),
            reboot_request_path: self.reboot_request.clone(),
            mode: StreamMode::new(self.interactive, self.tty),
        }
    }
}

fn print_wrapper(wrapper: &Wrapper, args: &WrapperArgs) {
    println!("# outer: {}", args.outer_path.display());
    println!("{}", wrapper.outer);
    println!();
    println!("# inner: {}", args.inner_path.display());
    println!("{}", wrapper.inner);
}

pub fn run(args: WrapperArgs, guest: Option<&Path>, drivers: &DriverRegistry) -> Result<()> {
    let config = load_guest(guest)?;
    let facts = config.facts();
    let context = PidFileContext::for_guest(&facts);
    let wrapper = render_wrapper(&context, &facts, &args.params());

    if !args.deliver {
        print_wrapper(&wrapper, &args);
        return Ok(());
    }

    let driver = connect(&config, drivers)?;
    wrapper
        .deliver(driver.as_ref(), &args.inner_path, &args.outer_path)
        .with_context(|| format!("Failed to deliver wrapper to guest {}", config.name))?;
    Output::success(format!(
        "Delivered wrapper for {} to {}",
        args.name, config.name
    ));
    Output::kv("Run", args.outer_path.display().to_string());
    Output::kv("Pidfile", context.pidfile_path().display().to_string());
    driver
        .cleanup()
        .with_context(|| format!("Failed to clean up guest {}", config.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: WrapperArgs,
    }

    #[test]
    fn test_params_from_flags() {
        let args = TestCli::parse_from([
            "wrapper", "--name", "/smoke", "--tty", "./test.sh", "--verbose",
        ])
        .args;
        let params = args.params();
        assert_eq!(params.action.as_str(), "./test.sh --verbose");
        assert_eq!(params.mode, StreamMode::Tty);
        assert_eq!(
            params.inner_path,
            PathBuf::from("/var/tmp/gantry/wrapper-inner.sh")
        );
    }
}
