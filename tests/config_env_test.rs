//! Configuration loading: TOML files, `PLE_DAQ_` environment overrides and
//! validation.
//!
//! Tests touching the process environment run under `#[serial]`.

use ple_daq::config::PleConfig;
use ple_daq::hardware::mock::Resonance;
use ple_daq::logging::OutputFormat;
use ple_daq::scan::MoveFailurePolicy;
use ple_daq::ScanError;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SAMPLE_CONFIG: &str = r#"
[application]
name = "Cryostat A"
log_level = "debug"
log_format = "json"

[scan]
range = [-0.5, 2.0]
step_size = 0.05
settle_delay = "250ms"
max_sweep_index = 7
samples_per_batch = 500
samples_per_batch_multiplier = 2
move_failure_policy = "abort"

[actuator]
min_voltage = -1.0
max_voltage = 3.0
move_delay = "5ms"

[counter]
background_rate = 80.0
seed = 7

[counter.resonance]
center = 0.8
linewidth = 0.1
peak_rate = 40000.0

[output]
directory = "runs"
"#;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("ple.toml");
    fs::write(&path, contents).unwrap();
    path
}

fn clear_overrides() {
    for (key, _) in env::vars() {
        if key.starts_with("PLE_DAQ_") {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_load_full_file() {
    clear_overrides();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, SAMPLE_CONFIG);

    let config = PleConfig::load_from(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.name, "Cryostat A");
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.application.log_format, OutputFormat::Json);
    assert_eq!(config.scan.range, Some((-0.5, 2.0)));
    assert_eq!(config.scan.step_size, 0.05);
    assert_eq!(config.scan.settle_delay, Duration::from_millis(250));
    assert_eq!(config.scan.max_sweep_index, 7);
    assert_eq!(config.scan.samples_per_batch, Some(500));
    assert_eq!(config.scan.samples_per_batch_multiplier, 2);
    assert_eq!(config.scan.move_failure_policy, MoveFailurePolicy::Abort);
    assert_eq!(config.actuator.move_delay, Duration::from_millis(5));
    assert_eq!(config.counter.background_rate, 80.0);
    assert_eq!(config.counter.seed, Some(7));
    assert_eq!(
        config.counter.resonance,
        Some(Resonance {
            center: 0.8,
            linewidth: 0.1,
            peak_rate: 40_000.0,
        })
    );
    assert_eq!(config.output.directory.as_deref(), Some(Path::new("runs")));
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    clear_overrides();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[scan]\nmax_sweep_index = 3\n");

    let config = PleConfig::load_from(&path).unwrap();
    let defaults = PleConfig::default();

    assert_eq!(config.scan.max_sweep_index, 3);
    assert_eq!(config.scan.step_size, defaults.scan.step_size);
    assert_eq!(config.actuator, defaults.actuator);
    assert_eq!(config.counter, defaults.counter);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_overrides();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, SAMPLE_CONFIG);

    env::set_var("PLE_DAQ_SCAN__MAX_SWEEP_INDEX", "19");
    env::set_var("PLE_DAQ_APPLICATION__LOG_LEVEL", "warn");
    env::set_var("PLE_DAQ_COUNTER__BACKGROUND_RATE", "250.5");
    let loaded = PleConfig::load_from(&path);
    clear_overrides();

    let config = loaded.unwrap();
    assert_eq!(config.scan.max_sweep_index, 19);
    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.counter.background_rate, 250.5);
    // Untouched keys still come from the file
    assert_eq!(config.scan.step_size, 0.05);
}

#[test]
#[serial]
fn test_malformed_value_is_config_error() {
    clear_overrides();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[scan]\nstep_size = \"wide\"\n");

    let err = PleConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ScanError::Config(_)));
}

#[test]
#[serial]
fn test_validation_rejects_bad_values() {
    clear_overrides();
    let dir = TempDir::new().unwrap();

    let cases = [
        "[scan]\nstep_size = 0.0\n",
        "[scan]\nsamples_per_batch_multiplier = 0\n",
        "[actuator]\nmin_voltage = 2.0\nmax_voltage = 1.0\n",
        "[counter]\nclock_rate_hz = -5.0\n",
        "[counter.resonance]\ncenter = 1.0\nlinewidth = 0.0\npeak_rate = 10.0\n",
    ];
    for contents in cases {
        let path = write_config(&dir, contents);
        let config = PleConfig::load_from(&path).unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ScanError::Configuration(_)),
            "expected validation failure for {contents:?}, got {err:?}"
        );
    }
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    clear_overrides();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/ple.toml");
    let config = PleConfig::load_from(path).unwrap();
    config.validate().unwrap();
    assert!(config.counter.resonance.is_some());
}
