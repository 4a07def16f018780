//! The reboot helper, run on the guest by a test that wants a reboot.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use gantry_common::PidFileError;

use crate::output::Output;
use crate::pidfile::{PidFile, PidFileContext, RebootRequest};

#[derive(Debug, Args)]
pub struct RebootRequestArgs {
    /// Custom command performing the reboot
    #[arg(long, short = 'c')]
    pub command: Option<String>,

    /// Seconds to wait for the guest to come back
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Directory holding the pidfile (defaults to $GANTRY_PIDFILE_ROOT or /var/tmp)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

pub fn run(args: RebootRequestArgs) -> Result<()> {
    let context = match &args.root {
        Some(root) => PidFileContext::new(root),
        None => PidFileContext::from_env(),
    };
    let pidfile = PidFile::new(&context);
    let request = RebootRequest {
        command: args.command,
        timeout: args.timeout,
    };

    match pidfile.request_reboot(&request) {
        Ok(record) => {
            Output::success(format!("Reboot requested, signalled process {}", record.pid));
            Ok(())
        }
        Err(PidFileError::ProcessGone { pid }) => {
            Output::warning(format!(
                "Process {} already exited, the request is kept for its next run",
                pid
            ));
            Err(PidFileError::ProcessGone { pid }.into())
        }
        Err(e) => Err(e)
            .with_context(|| format!("Failed to request a reboot via {}", pidfile.path().display())),
    }
}
