//! Monitor configuration.
//!
//! Read once at startup and shared read-only with the loop. Durations are
//! stored as milliseconds on disk.

use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Monitor loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Use the alert line to decide when to sweep.
    pub alert_monitoring_enabled: bool,
    /// Pass interval when polling, and full-sweep interval in alert mode.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Pass interval in alert mode.
    #[serde(rename = "alert_poll_interval_ms", with = "millis")]
    pub alert_poll_interval: Duration,
    /// Read battery telemetry on battery-capable PSUs.
    pub battery_monitoring_enabled: bool,
    /// Act on PSUs running from battery.
    pub process_battery_status: bool,
    /// Discharge time after which the critical battery action fires.
    #[serde(rename = "battery_discharge_time_threshold_ms", with = "millis")]
    pub battery_discharge_time_threshold: Duration,
    /// Average charge percent below which the critical battery action fires.
    pub battery_charge_level_threshold: u8,
    /// PSU slots in the chassis.
    pub psu_count: u8,
    /// Battery packs in the chassis.
    pub battery_count: u8,
    /// Blade slots in the chassis.
    pub blade_population: u16,
    /// NVDIMMs per blade.
    pub nvdimms_per_blade: u16,
    /// Energy of one full battery pack, joules.
    pub battery_capacity_joules: u32,
    /// Deassert blade DPC overrides once no PSU error remains.
    pub dpc_auto_deassert: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_monitoring_enabled: true,
            poll_interval: Duration::from_secs(10),
            alert_poll_interval: Duration::from_secs(1),
            battery_monitoring_enabled: true,
            process_battery_status: true,
            battery_discharge_time_threshold: Duration::from_secs(45),
            battery_charge_level_threshold: 50,
            psu_count: 6,
            battery_count: 6,
            blade_population: 24,
            nvdimms_per_blade: 8,
            battery_capacity_joules: 48_000,
            dpc_auto_deassert: false,
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidConfiguration`] naming the first bad field.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.poll_interval.is_zero() {
            return Err(MonitorError::invalid_configuration(
                "poll_interval must be greater than 0",
            ));
        }
        if self.alert_poll_interval.is_zero() {
            return Err(MonitorError::invalid_configuration(
                "alert_poll_interval must be greater than 0",
            ));
        }
        if self.psu_count == 0 {
            return Err(MonitorError::invalid_configuration(
                "psu_count must be greater than 0",
            ));
        }
        if self.battery_count > self.psu_count {
            return Err(MonitorError::invalid_configuration(format!(
                "battery_count {} exceeds psu_count {}",
                self.battery_count, self.psu_count
            )));
        }
        if self.battery_charge_level_threshold > 100 {
            return Err(MonitorError::invalid_configuration(
                "battery_charge_level_threshold must be a percentage",
            ));
        }
        if self.blade_population == 0 {
            return Err(MonitorError::invalid_configuration(
                "blade_population must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Pause between passes for the configured strategy.
    #[must_use]
    pub fn pass_interval(&self) -> Duration {
        if self.alert_monitoring_enabled {
            self.alert_poll_interval
        } else {
            self.poll_interval
        }
    }

    /// Load and validate a JSON configuration file.
    ///
    /// Missing fields take their default.
    ///
    /// # Errors
    ///
    /// Returns an I/O, parse or validation error.
    pub fn load(path: &Path) -> MonitorResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| MonitorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    pub fn save(&self, path: &Path) -> MonitorResult<()> {
        let text = self.to_json()?;
        std::fs::write(path, text).map_err(|source| MonitorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn to_json(&self) -> MonitorResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Debug, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    /// Enable or disable alert-driven monitoring.
    #[must_use]
    pub fn alert_monitoring(mut self, enabled: bool) -> Self {
        self.config.alert_monitoring_enabled = enabled;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the alert-mode pass interval.
    #[must_use]
    pub fn alert_poll_interval(mut self, interval: Duration) -> Self {
        self.config.alert_poll_interval = interval;
        self
    }

    /// Enable or disable battery telemetry.
    #[must_use]
    pub fn battery_monitoring(mut self, enabled: bool) -> Self {
        self.config.battery_monitoring_enabled = enabled;
        self
    }

    /// Enable or disable on-battery processing.
    #[must_use]
    pub fn process_battery_status(mut self, enabled: bool) -> Self {
        self.config.process_battery_status = enabled;
        self
    }

    /// Set the discharge time threshold.
    #[must_use]
    pub fn discharge_time_threshold(mut self, threshold: Duration) -> Self {
        self.config.battery_discharge_time_threshold = threshold;
        self
    }

    /// Set the charge level threshold, percent.
    #[must_use]
    pub fn charge_level_threshold(mut self, percent: u8) -> Self {
        self.config.battery_charge_level_threshold = percent;
        self
    }

    /// Set PSU and battery counts.
    #[must_use]
    pub fn population(mut self, psus: u8, batteries: u8) -> Self {
        self.config.psu_count = psus;
        self.config.battery_count = batteries;
        self
    }

    /// Set blade count and NVDIMMs per blade.
    #[must_use]
    pub fn blades(mut self, blades: u16, nvdimms_per_blade: u16) -> Self {
        self.config.blade_population = blades;
        self.config.nvdimms_per_blade = nvdimms_per_blade;
        self
    }

    /// Set the energy of one full battery pack.
    #[must_use]
    pub fn battery_capacity_joules(mut self, joules: u32) -> Self {
        self.config.battery_capacity_joules = joules;
        self
    }

    /// Enable or disable DPC auto-deassertion.
    #[must_use]
    pub fn dpc_auto_deassert(mut self, enabled: bool) -> Self {
        self.config.dpc_auto_deassert = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> MonitorResult<MonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_default_is_valid() -> TestResult {
        MonitorConfig::default().validate()?;
        Ok(())
    }

    #[test]
    fn test_validation_rejects() {
        let cases = [
            MonitorConfig {
                poll_interval: Duration::ZERO,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                psu_count: 0,
                battery_count: 0,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                psu_count: 2,
                battery_count: 3,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                battery_charge_level_threshold: 101,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                blade_population: 0,
                ..MonitorConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_builder() -> TestResult {
        let config = MonitorConfig::builder()
            .alert_monitoring(false)
            .poll_interval(Duration::from_millis(250))
            .population(4, 2)
            .build()?;
        assert!(!config.alert_monitoring_enabled);
        assert_eq!(config.pass_interval(), Duration::from_millis(250));
        assert_eq!(config.battery_count, 2);
        Ok(())
    }

    #[test]
    fn test_builder_validates() {
        assert!(MonitorConfig::builder().population(1, 2).build().is_err());
    }

    #[test]
    fn test_durations_serialize_as_millis() -> TestResult {
        let json = MonitorConfig::default().to_json()?;
        assert!(json.contains("\"poll_interval_ms\": 10000"));
        assert!(json.contains("\"battery_discharge_time_threshold_ms\": 45000"));
        Ok(())
    }

    #[test]
    fn test_partial_json_takes_defaults() -> TestResult {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"alert_monitoring_enabled": false, "psu_count": 4, "battery_count": 4}"#)?;
        assert!(!config.alert_monitoring_enabled);
        assert_eq!(config.psu_count, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        Ok(())
    }
}
