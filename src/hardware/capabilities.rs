//! Hardware Capabilities for PLE Scanning
//!
//! A PLE scan needs exactly two capabilities from the outside world:
//!
//! - [`PositionActuator`]: something that sets the scan axis (a piezo or
//!   current-tuning voltage on a laser, a wavelength controller, ...)
//! - [`RateSampler`]: something that integrates photon counts over a known
//!   number of clock ticks and converts them into a count rate
//!
//! The scan controller only ever talks to these traits, so simulated devices
//! (see [`crate::hardware::mock`]) and real drivers are interchangeable.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses [`AppResult`] so range rejections stay distinguishable
//! - Takes `&self`; implementations use interior mutability for state
//!
//! # Example
//!
//! ```rust,ignore
//! async fn sample_at<A, S>(actuator: &A, sampler: &S, volts: f64) -> AppResult<f64>
//! where
//!     A: PositionActuator,
//!     S: RateSampler,
//! {
//!     actuator.go_to_position(volts).await?;
//!     let raw = sampler.sample_counts(1).await?;
//!     Ok(sampler.sample_count_rate(&raw))
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AppResult, ScanError};

/// Raw output of one acquisition: photon counts and the number of clock
/// ticks they were integrated over.
///
/// The scan controller stores these untouched and relies on
/// [`RateSampler::sample_count_rate`] for the conversion to a rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Accumulated photon counts
    pub counts: f64,
    /// Number of sample-clock ticks the counts were accumulated over
    pub clock_ticks: f64,
}

impl SampleResult {
    /// Create a new sample result
    pub fn new(counts: f64, clock_ticks: f64) -> Self {
        Self {
            counts,
            clock_ticks,
        }
    }

    /// Convert to counts per second for a sample clock running at `clock_rate_hz`.
    ///
    /// An empty integration window yields `0.0` rather than NaN.
    pub fn rate(&self, clock_rate_hz: f64) -> f64 {
        if self.clock_ticks > 0.0 {
            self.counts * clock_rate_hz / self.clock_ticks
        } else {
            0.0
        }
    }
}

/// Capability: Scan Axis Actuation
///
/// Devices that set the scanned quantity, usually a tuning voltage.
///
/// # Contract
/// - Positions are in device-native units (volts for a tuning input)
/// - `go_to_position` returns once the command has been accepted
/// - Targets outside `[minimum_allowed_position, maximum_allowed_position]`
///   are rejected with [`ScanError::OutOfRange`]
#[async_trait]
pub trait PositionActuator: Send + Sync {
    /// Name of the actuated axis, used in log output
    fn axis_name(&self) -> &str {
        "voltage"
    }

    /// Lowest position the device accepts
    fn minimum_allowed_position(&self) -> f64;

    /// Highest position the device accepts
    fn maximum_allowed_position(&self) -> f64;

    /// Check that `value` is a position this device accepts.
    ///
    /// # Default Implementation
    /// Inclusive bounds check against the allowed limits. NaN is rejected.
    fn check_allowed_position(&self, value: f64) -> AppResult<()> {
        let min = self.minimum_allowed_position();
        let max = self.maximum_allowed_position();
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(ScanError::OutOfRange { value, min, max })
        }
    }

    /// Command an absolute move of the scan axis
    ///
    /// # Returns
    /// - Ok(()) if the move was accepted
    /// - Err(OutOfRange) if the target is not an allowed position
    async fn go_to_position(&self, value: f64) -> AppResult<()>;

    /// Read back the current axis position
    async fn current_position(&self) -> AppResult<f64>;
}

/// Capability: Photon Count Sampling
///
/// Devices that count photons against a sample clock (edge counters on a DAQ
/// card, time taggers, ...).
///
/// # Contract
/// - `sample_counts` is only valid between `start()` and `stop()`
/// - `stop()` must tolerate being called when already stopped
/// - After `close()` every call fails with [`ScanError::ResourceClosed`]
#[async_trait]
pub trait RateSampler: Send + Sync {
    /// Begin accepting sample requests
    async fn start(&self) -> AppResult<()>;

    /// Stop accepting sample requests
    async fn stop(&self) -> AppResult<()>;

    /// Release the device. Must be called at most once.
    async fn close(&self) -> AppResult<()>;

    /// Number of clock samples integrated per batch
    fn samples_per_batch(&self) -> u32;

    /// Change the number of clock samples integrated per batch
    async fn set_samples_per_batch(&self, samples: u32) -> AppResult<()>;

    /// Acquire `num_batches` batches and return their combined counts
    async fn sample_counts(&self, num_batches: u32) -> AppResult<SampleResult>;

    /// Convert a raw sample into counts per second
    fn sample_count_rate(&self, sample: &SampleResult) -> f64;
}

/// Actuator that accepts every command and moves nothing.
///
/// Stands in for a missing wavelength controller so the scan logic never has
/// to branch on whether an actuator is present. The limits are logical only:
/// they seed the controller's scan range and nothing else.
pub struct NullActuator {
    min: f64,
    max: f64,
    last_commanded: AtomicU64,
}

impl NullActuator {
    /// Create a null actuator reporting the given logical limits
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            last_commanded: AtomicU64::new(min.to_bits()),
        }
    }
}

#[async_trait]
impl PositionActuator for NullActuator {
    fn axis_name(&self) -> &str {
        "none"
    }

    fn minimum_allowed_position(&self) -> f64 {
        self.min
    }

    fn maximum_allowed_position(&self) -> f64 {
        self.max
    }

    fn check_allowed_position(&self, _value: f64) -> AppResult<()> {
        Ok(())
    }

    async fn go_to_position(&self, value: f64) -> AppResult<()> {
        self.last_commanded.store(value.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    async fn current_position(&self) -> AppResult<f64> {
        Ok(f64::from_bits(self.last_commanded.load(Ordering::SeqCst)))
    }
}
