//! psuctl - PSU management operator CLI
//!
//! Offline tools for the chassis PSU manager: inspect and validate firmware
//! images before an update, and check or generate fault monitor
//! configuration files.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{ConfigCommands, ImageCommands};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "psuctl")]
#[command(about = "PSU management CLI - Firmware image and monitor configuration tools")]
#[command(version)]
#[command(long_about = "
psuctl works on the files the chassis PSU manager consumes. It checks a
firmware image against a target layout without touching any PSU, and
validates or generates the fault monitor configuration.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Firmware image commands
    #[command(subcommand)]
    Image(ImageCommands),

    /// Monitor configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("psuctl={log_level},psu_firmware_update={log_level},psu_monitor={log_level}")
                    .into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            std::process::exit(exit_code(&e));
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Image(cmd) => commands::image::execute(cmd, cli.json),
        Commands::Config(cmd) => commands::config::execute(cmd, cli.json),
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}

/// Process exit code for a failed command.
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<CliError>() {
        Some(CliError::FileNotFound(_)) => 2,
        Some(CliError::ImageRejected { .. }) => 3,
        Some(CliError::InvalidConfiguration(_)) => 4,
        Some(CliError::IoError(_)) => 5,
        _ => 1,
    }
}
