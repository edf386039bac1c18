//! Firmware image commands

use anyhow::Result;
use psu_firmware_update::{FirmwareImage, ImageSummary, Target, TargetLayout};
use std::path::Path;
use tracing::info;

use crate::commands::ImageCommands;
use crate::error::CliError;
use crate::output;

/// Execute image command
pub fn execute(cmd: &ImageCommands, json: bool) -> Result<()> {
    match cmd {
        ImageCommands::Inspect { file, target } => {
            let summary = summarize(file, *target)?;
            output::print_image_summary(&summary, json);
        }
        ImageCommands::Validate { file, target } => {
            let summary = summarize(file, *target)?;
            output::print_success(
                &format!(
                    "{} is a valid {} image (model {})",
                    file.display(),
                    summary.target,
                    summary.model_id
                ),
                json,
            );
        }
    }
    Ok(())
}

fn summarize(file: &Path, target: Target) -> Result<ImageSummary, CliError> {
    let layout = TargetLayout::for_target(target);
    let summary = FirmwareImage::load(file)
        .and_then(|image| image.summarize(&layout))
        .map_err(|e| CliError::from_firmware(file, e))?;
    info!(
        path = %file.display(),
        target = %target,
        lines = summary.write_lines,
        "Image accepted"
    );
    Ok(summary)
}
