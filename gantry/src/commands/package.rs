//! Compile and run package-manager operations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use gantry_common::{Installable, Options, ShellScript};

use crate::commands::{connect, load_guest};
use crate::config::GuestConfig;
use crate::driver::DriverRegistry;
use crate::output::Output;
use crate::package::{EngineRegistry, PackageManager, PackageManagerEngine};

#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Package manager to use (overrides the guest's `package-manager`)
    #[arg(long, global = true)]
    pub engine: Option<String>,

    /// Print the compiled script instead of running it
    #[arg(long, short = 'n', global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub action: PackageAction,
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Packages, package files, URLs or filesystem paths
    #[arg(required = true)]
    pub installables: Vec<Installable>,

    /// Do not fail when some packages are missing
    #[arg(long)]
    pub skip_missing: bool,

    /// Install without checking what is already present
    #[arg(long)]
    pub no_check_first: bool,

    /// Package to exclude (repeatable)
    #[arg(long = "exclude")]
    pub excluded_packages: Vec<String>,

    /// Install into an alternative root
    #[arg(long)]
    pub install_root: Option<PathBuf>,

    /// Release version of the alternative root
    #[arg(long)]
    pub release_version: Option<String>,

    /// Accept unsigned or untrusted packages
    #[arg(long)]
    pub allow_untrusted: bool,
}

impl InstallArgs {
    fn options(&self) -> Options {
        let mut options = Options::new()
            .skip_missing(self.skip_missing)
            .check_first(!self.no_check_first)
            .allow_untrusted(self.allow_untrusted);
        for package in &self.excluded_packages {
            options = options.exclude(package);
        }
        if let Some(root) = &self.install_root {
            options = options.install_root(root);
        }
        if let Some(version) = &self.release_version {
            options = options.release_version(version);
        }
        options
    }
}

#[derive(Debug, Subcommand)]
pub enum PackageAction {
    /// Install packages that are not present yet
    Install(InstallArgs),
    /// Reinstall packages that are present
    Reinstall(InstallArgs),
    /// Install debuginfo for packages
    Debuginfo(InstallArgs),
    /// Refresh the package metadata cache
    Refresh,
    /// Report which installables are present
    Presence {
        #[arg(required = true)]
        installables: Vec<Installable>,
    },
}

/// Engine id from the flag, then from the guest configuration.
fn engine_id(args: &PackageArgs, config: &GuestConfig, engines: &EngineRegistry) -> Result<String> {
    match args.engine.as_ref().or(config.package_manager.as_ref()) {
        Some(id) => Ok(id.clone()),
        None => bail!(
            "No package manager configured for guest {}\n\n\
             Pass --engine or set `package-manager` in the guest file.\n\
             Known package managers: {}",
            config.name,
            engines.ids().join(", ")
        ),
    }
}

/// Compile the script an action would run.
pub fn compile(engine: &dyn PackageManagerEngine, action: &PackageAction) -> Result<ShellScript> {
    let script = match action {
        PackageAction::Install(args) => engine.install(&args.installables, &args.options()),
        PackageAction::Reinstall(args) => engine.reinstall(&args.installables, &args.options()),
        PackageAction::Debuginfo(args) => {
            engine.install_debuginfo(&args.installables, &args.options())
        }
        PackageAction::Refresh => engine.refresh_metadata(),
        PackageAction::Presence { installables } => engine.check_presence(installables),
    };
    script.with_context(|| format!("{} cannot compile this operation", engine.id()))
}

pub fn run(
    args: PackageArgs,
    guest: Option<&Path>,
    drivers: &DriverRegistry,
    engines: &EngineRegistry,
) -> Result<()> {
    let config = load_guest(guest)?;
    let id = engine_id(&args, &config, engines)?;
    let facts = config.facts();
    let engine = engines.create(&id, &facts)?;

    if args.dry_run {
        let script = compile(engine.as_ref(), &args.action)?;
        Output::dry_run(format!("{} on guest {}", id, config.name));
        println!("{}", script);
        return Ok(());
    }

    let driver = connect(&config, drivers)?;
    let manager = PackageManager::new(engine, driver.as_ref());
    match &args.action {
        PackageAction::Install(install) => {
            manager.install(&install.installables, &install.options())?;
            Output::success(format!("Installed {} on {}", join(&install.installables), config.name));
        }
        PackageAction::Reinstall(install) => {
            manager.reinstall(&install.installables, &install.options())?;
            Output::success(format!("Reinstalled {} on {}", join(&install.installables), config.name));
        }
        PackageAction::Debuginfo(install) => {
            manager.install_debuginfo(&install.installables, &install.options())?;
            Output::success(format!(
                "Installed debuginfo for {} on {}",
                join(&install.installables),
                config.name
            ));
        }
        PackageAction::Refresh => {
            manager.refresh_metadata()?;
            Output::success(format!("Refreshed package metadata on {}", config.name));
        }
        PackageAction::Presence { installables } => {
            for (installable, present) in manager.check_presence(installables)? {
                Output::kv(installable.to_string(), if present { "present" } else { "missing" });
            }
        }
    }
    driver
        .cleanup()
        .with_context(|| format!("Failed to clean up guest {}", config.name))
}

fn join(installables: &[Installable]) -> String {
    installables
        .iter()
        .map(Installable::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::GuestFacts;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: PackageArgs,
    }

    fn parse(args: &[&str]) -> PackageArgs {
        TestCli::parse_from(std::iter::once("package").chain(args.iter().copied())).args
    }

    fn compile_with(id: &str, args: &[&str]) -> Result<ShellScript> {
        let engine = EngineRegistry::builtin()
            .create(id, &GuestFacts::default())
            .unwrap();
        compile(engine.as_ref(), &parse(args).action)
    }

    #[test]
    fn test_install_flags_map_to_options() {
        let args = parse(&[
            "install",
            "--skip-missing",
            "--no-check-first",
            "--exclude",
            "kernel",
            "--allow-untrusted",
            "tree",
        ]);
        let PackageAction::Install(install) = args.action else {
            panic!("expected install");
        };
        let options = install.options();
        assert!(options.skip_missing);
        assert!(!options.check_first);
        assert!(options.allow_untrusted);
        assert_eq!(options.excluded_packages, vec!["kernel"]);
    }

    #[test]
    fn test_installables_are_classified() {
        let args = parse(&["install", "tree", "/usr/bin/flock", "https://example.com/a.rpm"]);
        let PackageAction::Install(install) = args.action else {
            panic!("expected install");
        };
        assert_eq!(
            install.installables,
            vec![
                Installable::package("tree"),
                Installable::path("/usr/bin/flock"),
                Installable::url("https://example.com/a.rpm"),
            ]
        );
    }

    #[test]
    fn test_compile_scripts() {
        assert_eq!(
            compile_with("apk", &["install", "tree"]).unwrap().as_str(),
            "apk info -e tree || apk add tree"
        );
        assert_eq!(
            compile_with("dnf5", &["install", "--no-check-first", "tree"])
                .unwrap()
                .as_str(),
            "dnf5 install -y  tree"
        );
    }

    #[test]
    fn test_compile_reports_capability_errors() {
        let err = compile_with("rpm-ostree", &["reinstall", "tar"]).unwrap_err();
        assert_eq!(
            err.root_cause().to_string(),
            "rpm-ostree does not support reinstall operation."
        );
    }

    #[test]
    fn test_engine_flag_wins_over_config() {
        let engines = EngineRegistry::builtin();
        let mut config = GuestConfig::local();
        config.package_manager = Some("apt".to_string());

        let args = parse(&["--engine", "apk", "refresh"]);
        assert_eq!(engine_id(&args, &config, &engines).unwrap(), "apk");

        let args = parse(&["refresh"]);
        assert_eq!(engine_id(&args, &config, &engines).unwrap(), "apt");

        config.package_manager = None;
        let err = engine_id(&args, &config, &engines).unwrap_err();
        assert!(err.to_string().contains("--engine"));
    }
}
