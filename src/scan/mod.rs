//! PLE Scan Control
//!
//! A PLE scan repeatedly sweeps one actuator axis (a laser tuning voltage)
//! across `[min, max)` and records a photon count rate at every step.
//!
//! - [`ScanController`] owns the range, step size, sweep budget and the
//!   accumulated results, and drives the move-then-sample protocol.
//! - [`run_scan`] is the standard driver loop around it.
//! - [`StopHandle`] lets another task end a multi-sweep run between sweeps.
//!
//! # Example
//!
//! ```rust,ignore
//! use ple_daq::hardware::mock::{MockRateCounter, MockWavelengthController};
//! use ple_daq::scan::{run_scan, ScanController};
//!
//! let mut controller = ScanController::new(
//!     MockWavelengthController::default(),
//!     MockRateCounter::new(500.0),
//! );
//! controller.set_scan_range(-1.0, 1.0)?;
//! controller.set_max_sweep_index(4);
//! let results = run_scan(&mut controller).await?;
//! controller.close().await?;
//! ```

pub mod controller;
pub mod results;
pub mod stop;

pub use controller::ScanController;
pub use results::{ScanResults, SweepUpdate};
pub use stop::StopHandle;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::{PositionActuator, RateSampler};

/// Default step between sampled positions
pub const DEFAULT_STEP_SIZE: f64 = 0.1;
/// Default settle time after the first move of a sweep
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Lifecycle of a scan controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// Constructed, never started
    Idle,
    /// Between `start()` and a stop or sweep-budget exhaustion
    Running,
    /// Stopped explicitly, by a stop request, or by exhaustion
    Stopped,
}

/// What a best-effort move actually did
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The actuator accepted the move
    Moved(f64),
    /// Target outside the scan range; no command was sent
    OutsideScanRange(f64),
    /// The actuator rejected the move and the scan carried on without it.
    /// The logical position no longer matches the physical one.
    Degraded {
        /// Requested position
        target: f64,
        /// Rejection reported by the actuator
        reason: String,
    },
}

impl MoveOutcome {
    /// Whether the actuator is now at the requested position
    pub fn is_moved(&self) -> bool {
        matches!(self, MoveOutcome::Moved(_))
    }
}

/// How the controller reacts when the actuator rejects a move mid-scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveFailurePolicy {
    /// Log the rejection and keep scanning with a diverged position
    #[default]
    Tolerate,
    /// Propagate the rejection and end the sweep
    Abort,
}

/// Tunable scan parameters.
///
/// Doubles as the `[scan]` section of the configuration file and as the
/// payload handed to a [`ConfigureHook`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// `[min, max]` scan bounds; the actuator limits when absent
    pub range: Option<(f64, f64)>,
    /// Step between sampled positions
    pub step_size: f64,
    /// Wait after the first move of every sweep
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Index of the last sweep to run (0 runs a single sweep)
    pub max_sweep_index: u32,
    /// Clock samples per batch, forwarded to the sampler when set
    pub samples_per_batch: Option<u32>,
    /// Batches integrated per sampled position
    pub samples_per_batch_multiplier: u32,
    /// Reaction to rejected moves
    pub move_failure_policy: MoveFailurePolicy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            range: None,
            step_size: DEFAULT_STEP_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_sweep_index: 0,
            samples_per_batch: None,
            samples_per_batch_multiplier: 1,
            move_failure_policy: MoveFailurePolicy::Tolerate,
        }
    }
}

/// Override point for an external configuration front end (e.g. a settings
/// window). The hook edits a copy of the controller's settings, which the
/// controller then validates and applies.
pub trait ConfigureHook {
    /// Edit the proposed settings in place
    fn configure(&self, settings: &mut ScanSettings);
}

/// Hook that leaves every setting as it is
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConfigure;

impl ConfigureHook for NoopConfigure {
    fn configure(&self, _settings: &mut ScanSettings) {}
}

impl<F> ConfigureHook for F
where
    F: Fn(&mut ScanSettings),
{
    fn configure(&self, settings: &mut ScanSettings) {
        self(settings)
    }
}

/// Positions `min, min + step, min + 2*step, ...` strictly below `max`.
///
/// Each position is computed from its index rather than by accumulation, so
/// long sweeps do not drift.
pub fn line_positions(min: f64, max: f64, step: f64) -> AppResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(ScanError::InvalidStepSize(step));
    }
    if !(min.is_finite() && max.is_finite()) {
        return Err(ScanError::Configuration(format!(
            "scan bounds must be finite, got [{min}, {max}]"
        )));
    }

    Ok((0u64..)
        .map(|i| min + i as f64 * step)
        .take_while(|position| *position < max)
        .collect())
}

/// Run sweeps until the sweep budget is spent or a stop is requested.
///
/// Starts the controller, polls [`ScanController::has_more_work`] before
/// every sweep, and stops the sampler afterwards, also when a sweep fails.
/// Sweep index and accumulated results are not reset first; call
/// [`ScanController::reset`] and [`ScanController::reset_sweep_index`] for a
/// fresh run.
pub async fn run_scan<A, S>(controller: &mut ScanController<A, S>) -> AppResult<ScanResults>
where
    A: PositionActuator,
    S: RateSampler,
{
    controller.start().await?;

    while controller.has_more_work() {
        if let Err(err) = controller.run_one_sweep().await {
            tracing::error!(error = %err, sweep = controller.current_sweep_index(), "Sweep failed");
            if let Err(stop_err) = controller.stop().await {
                tracing::warn!(error = %stop_err, "Failed to stop sampler after sweep error");
            }
            return Err(err);
        }
    }

    controller.stop().await?;
    tracing::info!(
        sweeps = controller.current_sweep_index(),
        "Scan finished"
    );
    Ok(controller.results())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_positions_exclude_max() {
        assert_eq!(
            line_positions(0.0, 2.0, 0.5).unwrap(),
            vec![0.0, 0.5, 1.0, 1.5]
        );
        assert_eq!(line_positions(-1.0, 0.0, 0.25).unwrap().len(), 4);
    }

    #[test]
    fn test_line_positions_empty_when_inverted() {
        assert!(line_positions(1.0, 1.0, 0.1).unwrap().is_empty());
        assert!(line_positions(2.0, 1.0, 0.1).unwrap().is_empty());
    }

    #[test]
    fn test_line_positions_reject_bad_step() {
        for step in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                line_positions(0.0, 1.0, step),
                Err(ScanError::InvalidStepSize(_))
            ));
        }
        assert!(line_positions(0.0, f64::INFINITY, 0.1).is_err());
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: ScanSettings = toml::from_str(
            r#"
            range = [-1.0, 2.5]
            step_size = 0.05
            settle_delay = "300ms"
            max_sweep_index = 9
            move_failure_policy = "abort"
            "#,
        )
        .unwrap();

        assert_eq!(settings.range, Some((-1.0, 2.5)));
        assert_eq!(settings.step_size, 0.05);
        assert_eq!(settings.settle_delay, Duration::from_millis(300));
        assert_eq!(settings.max_sweep_index, 9);
        assert_eq!(settings.samples_per_batch_multiplier, 1);
        assert_eq!(settings.move_failure_policy, MoveFailurePolicy::Abort);
    }

    #[test]
    fn test_closure_configure_hook() {
        let hook = |settings: &mut ScanSettings| settings.max_sweep_index = 3;
        let mut settings = ScanSettings::default();
        hook.configure(&mut settings);
        assert_eq!(settings.max_sweep_index, 3);

        NoopConfigure.configure(&mut settings);
        assert_eq!(settings.max_sweep_index, 3);
    }
}
