//! Output formatting for human and JSON modes

use anyhow::Error;
use colored::Colorize;
use psu_firmware_update::ImageSummary;
use psu_monitor::MonitorConfig;
use serde_json::{Value, json};

use crate::error::CliError;

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    }));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print an image summary
pub fn print_image_summary(summary: &ImageSummary, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "summary": summary
        }));
        return;
    }

    println!("{}", "Firmware Image".bold());
    println!("  Target: {}", summary.target.to_string().cyan());
    println!("  Model ID: {}", summary.model_id.cyan());
    println!("  Data records: {}", summary.data_records);
    println!("  Info records: {}", summary.info_records);
    let eof = if summary.has_end_of_file {
        "present".green()
    } else {
        "missing".yellow()
    };
    println!("  End of file: {eof}");
    println!("  ROM pages: {}", summary.rom_pages);
    println!(
        "  Write plan: {} lines, {} transactions",
        summary.write_lines, summary.write_transactions
    );
}

/// Print a monitor configuration
pub fn print_config(config: &MonitorConfig, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "config": config
        }));
        return;
    }

    println!("{}", "Monitor Configuration".bold());
    println!(
        "  Population: {} PSUs, {} batteries, {} blades x {} NVDIMMs",
        config.psu_count, config.battery_count, config.blade_population, config.nvdimms_per_blade
    );
    println!(
        "  Alert monitoring: {} (every {} ms)",
        on_off(config.alert_monitoring_enabled),
        config.alert_poll_interval.as_millis()
    );
    println!("  Poll interval: {} ms", config.poll_interval.as_millis());
    println!(
        "  Battery monitoring: {} (processing {})",
        on_off(config.battery_monitoring_enabled),
        on_off(config.process_battery_status)
    );
    println!(
        "  Critical thresholds: {}% charge, {} ms discharging",
        config.battery_charge_level_threshold,
        config.battery_discharge_time_threshold.as_millis()
    );
    println!("  Battery capacity: {} J", config.battery_capacity_joules);
    println!("  DPC auto-deassert: {}", on_off(config.dpc_auto_deassert));
}

/// Print success message
pub fn print_success(message: &str, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "message": message
        }));
    } else {
        println!("{} {}", "✓".green(), message);
    }
}

fn on_off(enabled: bool) -> colored::ColoredString {
    if enabled { "on".green() } else { "off".dimmed() }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::FileNotFound(_)) => "FileNotFound",
        Some(CliError::ImageRejected { .. }) => "ImageRejected",
        Some(CliError::InvalidConfiguration(_)) => "InvalidConfiguration",
        Some(CliError::IoError(_)) => "IoError",
        Some(CliError::JsonError(_)) => "JsonError",
        None => "Unknown",
    }
}
