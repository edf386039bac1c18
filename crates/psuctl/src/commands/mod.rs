//! Command definitions and handlers

pub mod config;
pub mod image;

use clap::Subcommand;
use psu_firmware_update::Target;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ImageCommands {
    /// Summarize a firmware image for a target
    Inspect {
        /// Intel HEX style image file
        file: PathBuf,

        /// Target whose layout the image is checked against
        #[arg(short, long, default_value_t = Target::Primary)]
        target: Target,
    },

    /// Check that an image would be accepted for a target
    Validate {
        /// Intel HEX style image file
        file: PathBuf,

        /// Target whose layout the image is checked against
        #[arg(short, long, default_value_t = Target::Primary)]
        target: Target,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate a monitor configuration file
    Check {
        /// Configuration file (JSON)
        file: PathBuf,
    },

    /// Print the default monitor configuration
    Default {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
