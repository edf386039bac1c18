//! Monitor configuration commands

use anyhow::Result;
use psu_monitor::MonitorConfig;

use crate::commands::ConfigCommands;
use crate::error::CliError;
use crate::output;

/// Execute config command
pub fn execute(cmd: &ConfigCommands, json: bool) -> Result<()> {
    match cmd {
        ConfigCommands::Check { file } => {
            let config =
                MonitorConfig::load(file).map_err(|e| CliError::from_monitor(file, e))?;
            output::print_config(&config, json);
        }
        ConfigCommands::Default { output: None } => {
            println!("{}", MonitorConfig::default().to_json()?);
        }
        ConfigCommands::Default { output: Some(path) } => {
            MonitorConfig::default()
                .save(path)
                .map_err(|e| CliError::from_monitor(path, e))?;
            output::print_success(&format!("Wrote {}", path.display()), json);
        }
    }
    Ok(())
}
