//! Configuration System using Figment
//!
//! Strongly-typed configuration for a PLE scan and its simulated hardware.
//! Configuration is loaded from:
//! 1. `config/ple.toml` (or an explicit path), all sections optional
//! 2. Environment variables prefixed with `PLE_DAQ_`, with `__` separating
//!    nested keys
//!
//! # Example
//! ```no_run
//! use ple_daq::config::PleConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // PLE_DAQ_SCAN__MAX_SWEEP_INDEX=9 overrides the file
//! let config = PleConfig::load()?;
//! config.validate()?;
//! println!("Scanning with step {}", config.scan.step_size);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, ScanError};
use crate::hardware::mock::{MockRateCounterConfig, MockWavelengthControllerConfig};
use crate::logging::OutputFormat;
use crate::scan::ScanSettings;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/ple.toml";
/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PLE_DAQ_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PleConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Scan parameters
    pub scan: ScanSettings,
    /// Simulated wavelength controller
    pub actuator: MockWavelengthControllerConfig,
    /// Simulated photon counter
    pub counter: MockRateCounterConfig,
    /// Result output
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: OutputFormat,
    /// Emit a log line when each sweep span closes
    pub log_span_events: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "PLE DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
            log_span_events: false,
        }
    }
}

/// Where scan results go
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for result files; results are only logged when absent
    pub directory: Option<PathBuf>,
}

impl PleConfig {
    /// Load configuration from `config/ple.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix PLE_DAQ_
    /// Example: PLE_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        let scan = &self.scan;
        if !(scan.step_size.is_finite() && scan.step_size > 0.0) {
            return invalid(format!(
                "scan.step_size must be positive and finite, got {}",
                scan.step_size
            ));
        }
        if scan.samples_per_batch_multiplier == 0 {
            return invalid("scan.samples_per_batch_multiplier must be at least 1".to_string());
        }
        if scan.samples_per_batch == Some(0) {
            return invalid("scan.samples_per_batch must be at least 1".to_string());
        }

        let actuator = &self.actuator;
        if !(actuator.min_voltage.is_finite()
            && actuator.max_voltage.is_finite()
            && actuator.min_voltage < actuator.max_voltage)
        {
            return invalid(format!(
                "actuator limits must be finite with min < max, got [{}, {}]",
                actuator.min_voltage, actuator.max_voltage
            ));
        }

        if let Some((min, max)) = scan.range {
            let limits = actuator.min_voltage..=actuator.max_voltage;
            if !(limits.contains(&min) && limits.contains(&max)) {
                return invalid(format!(
                    "scan.range [{min}, {max}] exceeds actuator limits [{}, {}]",
                    actuator.min_voltage, actuator.max_voltage
                ));
            }
            if min >= max {
                return invalid(format!("scan.range min {min} must be below max {max}"));
            }
        }

        let counter = &self.counter;
        if !(counter.clock_rate_hz.is_finite() && counter.clock_rate_hz > 0.0) {
            return invalid(format!(
                "counter.clock_rate_hz must be positive and finite, got {}",
                counter.clock_rate_hz
            ));
        }
        if counter.samples_per_batch == 0 {
            return invalid("counter.samples_per_batch must be at least 1".to_string());
        }
        if let Some(resonance) = counter.resonance {
            if !(resonance.linewidth.is_finite() && resonance.linewidth > 0.0) {
                return invalid(format!(
                    "counter.resonance.linewidth must be positive, got {}",
                    resonance.linewidth
                ));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppResult<()> {
    Err(ScanError::Configuration(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.log_level, "info");
        assert!(config.scan.range.is_none());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = PleConfig::default();
        config.application.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'loud'"));
    }

    #[test]
    fn test_range_outside_actuator_limits() {
        let mut config = PleConfig::default();
        config.scan.range = Some((-1.0, 6.0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds actuator limits"));
    }

    #[test]
    fn test_inverted_range() {
        let mut config = PleConfig::default();
        config.scan.range = Some((2.0, 1.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PleConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scan, ScanSettings::default());
    }
}
