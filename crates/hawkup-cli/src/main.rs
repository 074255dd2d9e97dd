//! hawkup daemon: polls hawkBit for deployments and drives RAUC.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;

use hawkup_core::agent::UpdateAgent;
use hawkup_core::config::AgentConfig;
use hawkup_core::installer::rauc::RaucBridge;
use hawkup_core::logging;

// process exit codes
const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_NO_CONFIG_GIVEN: u8 = 2;
const EXIT_CONFIG_NOT_FOUND: u8 = 3;
const EXIT_CONFIG_LOAD_FAILED: u8 = 4;

#[derive(Debug, Parser)]
#[command(name = "hawkup", disable_version_flag = true)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Enable debug output
    #[arg(short = 'd', long)]
    debug: bool,

    /// Check and install new software and exit
    #[arg(short = 'r', long)]
    run_once: bool,

    /// Enable output to systemd (no timestamps, journal adds its own)
    #[cfg(feature = "systemd")]
    #[arg(short = 's', long)]
    output_systemd: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            return match err.kind() {
                ErrorKind::DisplayHelp => {
                    let _ = err.print();
                    ExitCode::from(EXIT_OK)
                }
                _ => {
                    eprintln!("option parsing failed: {err}");
                    ExitCode::from(EXIT_FAILURE)
                }
            };
        }
    };

    if args.version {
        println!("Version {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::from(EXIT_OK);
    }

    let Some(config_file) = &args.config_file else {
        eprintln!("No configuration file given");
        return ExitCode::from(EXIT_NO_CONFIG_GIVEN);
    };

    if !config_file.exists() {
        eprintln!("No such configuration file: {}", config_file.display());
        return ExitCode::from(EXIT_CONFIG_NOT_FOUND);
    }

    let config = match AgentConfig::load(config_file)
        .with_context(|| format!("Loading config file {} failed", config_file.display()))
    {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(EXIT_CONFIG_LOAD_FAILED);
        }
    };

    #[cfg(feature = "systemd")]
    let output_systemd = args.output_systemd;
    #[cfg(not(feature = "systemd"))]
    let output_systemd = false;

    logging::setup_logging(&config.log_level, args.debug, output_systemd);
    tracing::debug!("loaded config from {}", config_file.display());

    let agent = UpdateAgent::new(
        Arc::new(config),
        Arc::new(RaucBridge::new()),
        args.run_once,
    );

    if agent.run() {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}
