//! Mock Hardware Implementations
//!
//! Provides simulated PLE hardware for testing without a laser or counter card.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockWavelengthController` - Voltage-tuned laser axis with hard limits
//! - `MockRateCounter` - Photon counter with an optional Lorentzian resonance
//!
//! The counter can be wired to the controller through a [`PositionProbe`], so
//! the simulated count rate follows the tuning voltage and a scan actually
//! traces out a line shape.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::{PositionActuator, RateSampler, SampleResult};

/// Default lower tuning limit in volts
pub const DEFAULT_MIN_VOLTAGE: f64 = -3.0;
/// Default upper tuning limit in volts
pub const DEFAULT_MAX_VOLTAGE: f64 = 5.0;
/// Default sample clock rate of the mock counter
pub const DEFAULT_CLOCK_RATE_HZ: f64 = 10_000.0;
/// Default number of clock samples per batch
pub const DEFAULT_SAMPLES_PER_BATCH: u32 = 250;

/// Shared read-only view of a mock actuator's position.
#[derive(Clone)]
pub struct PositionProbe {
    position: Arc<RwLock<f64>>,
}

impl PositionProbe {
    /// Current position of the probed actuator
    pub async fn read(&self) -> f64 {
        *self.position.read().await
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for MockWavelengthController
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockWavelengthControllerConfig {
    /// Lower tuning limit in volts (default: -3.0)
    pub min_voltage: f64,
    /// Upper tuning limit in volts (default: 5.0)
    pub max_voltage: f64,
    /// Simulated latency of every accepted move (default: none)
    #[serde(with = "humantime_serde")]
    pub move_delay: Duration,
}

impl Default for MockWavelengthControllerConfig {
    fn default() -> Self {
        Self {
            min_voltage: DEFAULT_MIN_VOLTAGE,
            max_voltage: DEFAULT_MAX_VOLTAGE,
            move_delay: Duration::ZERO,
        }
    }
}

/// Configuration for MockRateCounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockRateCounterConfig {
    /// Sample clock rate in Hz (default: 10 kHz)
    pub clock_rate_hz: f64,
    /// Clock samples per batch (default: 250)
    pub samples_per_batch: u32,
    /// Flat background rate in counts/s (default: 100)
    pub background_rate: f64,
    /// Multiplicative noise amplitude (default: 0)
    pub noise: f64,
    /// Noise seed; entropy-seeded when absent
    pub seed: Option<u64>,
    /// Optional emission line
    pub resonance: Option<Resonance>,
}

impl Default for MockRateCounterConfig {
    fn default() -> Self {
        Self {
            clock_rate_hz: DEFAULT_CLOCK_RATE_HZ,
            samples_per_batch: DEFAULT_SAMPLES_PER_BATCH,
            background_rate: 100.0,
            noise: 0.0,
            seed: None,
            resonance: None,
        }
    }
}

// =============================================================================
// MockWavelengthController - Simulated tuning axis
// =============================================================================

/// Mock voltage-tuned wavelength controller
///
/// Simulates a tuning input with:
/// - Hard voltage limits (default -3 V to 5 V)
/// - Optional per-move latency
/// - A log of every accepted and rejected move
///
/// # Example
///
/// ```rust,ignore
/// let laser = MockWavelengthController::new(-3.0, 5.0);
/// laser.go_to_position(1.5).await?;
/// assert_eq!(laser.current_position().await?, 1.5);
/// assert!(laser.go_to_position(6.0).await.is_err());
/// ```
pub struct MockWavelengthController {
    position: Arc<RwLock<f64>>,
    min_voltage: f64,
    max_voltage: f64,
    move_delay: Duration,
    moves: RwLock<Vec<f64>>,
    rejected: RwLock<Vec<f64>>,
}

impl MockWavelengthController {
    /// Create a controller with the given limits, parked at `min_voltage`
    pub fn new(min_voltage: f64, max_voltage: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(min_voltage)),
            min_voltage,
            max_voltage,
            move_delay: Duration::ZERO,
            moves: RwLock::new(Vec::new()),
            rejected: RwLock::new(Vec::new()),
        }
    }

    /// Simulate a fixed latency for every accepted move
    pub fn with_move_delay(mut self, move_delay: Duration) -> Self {
        self.move_delay = move_delay;
        self
    }

    /// Probe sharing this controller's position
    pub fn probe(&self) -> PositionProbe {
        PositionProbe {
            position: Arc::clone(&self.position),
        }
    }

    /// Every accepted move target, in command order
    pub async fn move_history(&self) -> Vec<f64> {
        self.moves.read().await.clone()
    }

    /// Every rejected move target, in command order
    pub async fn rejected_moves(&self) -> Vec<f64> {
        self.rejected.read().await.clone()
    }
}

impl From<&MockWavelengthControllerConfig> for MockWavelengthController {
    fn from(config: &MockWavelengthControllerConfig) -> Self {
        Self::new(config.min_voltage, config.max_voltage).with_move_delay(config.move_delay)
    }
}

impl Default for MockWavelengthController {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VOLTAGE, DEFAULT_MAX_VOLTAGE)
    }
}

#[async_trait]
impl PositionActuator for MockWavelengthController {
    fn axis_name(&self) -> &str {
        "tuning_voltage"
    }

    fn minimum_allowed_position(&self) -> f64 {
        self.min_voltage
    }

    fn maximum_allowed_position(&self) -> f64 {
        self.max_voltage
    }

    async fn go_to_position(&self, value: f64) -> AppResult<()> {
        if let Err(err) = self.check_allowed_position(value) {
            self.rejected.write().await.push(value);
            return Err(err);
        }

        if !self.move_delay.is_zero() {
            sleep(self.move_delay).await;
        }

        *self.position.write().await = value;
        self.moves.write().await.push(value);
        tracing::trace!("MockWavelengthController: at {:.4} V", value);
        Ok(())
    }

    async fn current_position(&self) -> AppResult<f64> {
        Ok(*self.position.read().await)
    }
}

// =============================================================================
// MockRateCounter - Simulated photon counter
// =============================================================================

/// Lorentzian emission line seen by the mock counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    /// Line center in actuator units
    pub center: f64,
    /// Full width at half maximum in actuator units
    pub linewidth: f64,
    /// Count rate on top of background at line center (counts/s)
    pub peak_rate: f64,
}

impl Resonance {
    /// Count rate contributed by the line at `position`
    pub fn rate_at(&self, position: f64) -> f64 {
        let half_width = self.linewidth / 2.0;
        let detuning = position - self.center;
        self.peak_rate * half_width * half_width / (detuning * detuning + half_width * half_width)
    }
}

/// Mock photon counter
///
/// Simulates a clocked edge counter with:
/// - Configurable sample clock and batch size
/// - Background count rate plus an optional resonance
/// - Seeded multiplicative noise
/// - Strict lifecycle: sampling requires `start()`, nothing works after `close()`
///
/// # Example
///
/// ```rust,ignore
/// let laser = MockWavelengthController::default();
/// let counter = MockRateCounter::builder()
///     .background_rate(200.0)
///     .resonance(Resonance { center: 1.0, linewidth: 0.2, peak_rate: 5e4 })
///     .probe(laser.probe())
///     .build();
/// counter.start().await?;
/// let raw = counter.sample_counts(1).await?;
/// ```
pub struct MockRateCounter {
    clock_rate_hz: f64,
    samples_per_batch: AtomicU32,
    background_rate: f64,
    resonance: Option<Resonance>,
    noise_fraction: f64,
    probe: Option<PositionProbe>,
    rng: Mutex<StdRng>,
    running: AtomicBool,
    closed: AtomicBool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    sampled_positions: RwLock<Vec<f64>>,
}

impl MockRateCounter {
    /// Counter with a flat background rate and default clock settings
    pub fn new(background_rate: f64) -> Self {
        Self::builder().background_rate(background_rate).build()
    }

    /// Create builder for advanced configuration
    pub fn builder() -> MockRateCounterBuilder {
        MockRateCounterBuilder::default()
    }

    /// Build a counter from configuration, optionally tracking an actuator
    pub fn from_config(config: &MockRateCounterConfig, probe: Option<PositionProbe>) -> Self {
        let mut builder = Self::builder()
            .clock_rate_hz(config.clock_rate_hz)
            .samples_per_batch(config.samples_per_batch)
            .background_rate(config.background_rate)
            .noise(config.noise);
        if let Some(resonance) = config.resonance {
            builder = builder.resonance(resonance);
        }
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }
        if let Some(probe) = probe {
            builder = builder.probe(probe);
        }
        builder.build()
    }

    /// Sample clock rate in Hz
    pub fn clock_rate_hz(&self) -> f64 {
        self.clock_rate_hz
    }

    /// Whether the counter is accepting sample requests
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `start()` calls received
    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls received
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Probe position at each sample, in sampling order
    pub async fn sampled_positions(&self) -> Vec<f64> {
        self.sampled_positions.read().await.clone()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.is_closed() {
            Err(ScanError::ResourceClosed("rate counter"))
        } else {
            Ok(())
        }
    }

    fn noise_factor(&self) -> f64 {
        if self.noise_fraction <= 0.0 {
            return 1.0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        1.0 + self.noise_fraction * rng.gen_range(-1.0..=1.0)
    }
}

impl Default for MockRateCounter {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
impl RateSampler for MockRateCounter {
    async fn start(&self) -> AppResult<()> {
        self.ensure_open()?;
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!("MockRateCounter: started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.ensure_open()?;
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("MockRateCounter: stopped");
        } else {
            tracing::debug!("MockRateCounter: already stopped");
        }
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ScanError::ResourceClosed("rate counter"));
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!("MockRateCounter: closed");
        Ok(())
    }

    fn samples_per_batch(&self) -> u32 {
        self.samples_per_batch.load(Ordering::SeqCst)
    }

    async fn set_samples_per_batch(&self, samples: u32) -> AppResult<()> {
        self.ensure_open()?;
        if samples == 0 {
            return Err(ScanError::Instrument(
                "samples per batch must be at least 1".into(),
            ));
        }
        self.samples_per_batch.store(samples, Ordering::SeqCst);
        Ok(())
    }

    async fn sample_counts(&self, num_batches: u32) -> AppResult<SampleResult> {
        self.ensure_open()?;
        if !self.is_running() {
            return Err(ScanError::Instrument(
                "rate counter sampled before start".into(),
            ));
        }

        let position = match &self.probe {
            Some(probe) => {
                let position = probe.read().await;
                self.sampled_positions.write().await.push(position);
                Some(position)
            }
            None => None,
        };

        let rate = self.background_rate
            + match (self.resonance, position) {
                (Some(line), Some(position)) => line.rate_at(position),
                _ => 0.0,
            };

        let clock_ticks = f64::from(num_batches) * f64::from(self.samples_per_batch());
        let expected = rate * clock_ticks / self.clock_rate_hz;
        let counts = (expected * self.noise_factor()).max(0.0).round();

        Ok(SampleResult::new(counts, clock_ticks))
    }

    fn sample_count_rate(&self, sample: &SampleResult) -> f64 {
        sample.rate(self.clock_rate_hz)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockRateCounter with advanced configuration
pub struct MockRateCounterBuilder {
    clock_rate_hz: f64,
    samples_per_batch: u32,
    background_rate: f64,
    resonance: Option<Resonance>,
    noise_fraction: f64,
    seed: Option<u64>,
    probe: Option<PositionProbe>,
}

impl Default for MockRateCounterBuilder {
    fn default() -> Self {
        Self {
            clock_rate_hz: DEFAULT_CLOCK_RATE_HZ,
            samples_per_batch: DEFAULT_SAMPLES_PER_BATCH,
            background_rate: 100.0,
            resonance: None,
            noise_fraction: 0.0,
            seed: None,
            probe: None,
        }
    }
}

impl MockRateCounterBuilder {
    /// Sample clock rate in Hz
    pub fn clock_rate_hz(mut self, clock_rate_hz: f64) -> Self {
        self.clock_rate_hz = clock_rate_hz;
        self
    }

    /// Clock samples per batch
    pub fn samples_per_batch(mut self, samples: u32) -> Self {
        self.samples_per_batch = samples;
        self
    }

    /// Flat background rate (counts/s)
    pub fn background_rate(mut self, rate: f64) -> Self {
        self.background_rate = rate;
        self
    }

    /// Emission line added on top of the background
    pub fn resonance(mut self, resonance: Resonance) -> Self {
        self.resonance = Some(resonance);
        self
    }

    /// Multiplicative noise amplitude (0.05 = ±5 %)
    pub fn noise(mut self, fraction: f64) -> Self {
        self.noise_fraction = fraction;
        self
    }

    /// Seed for the noise generator
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Actuator position source for the resonance model
    pub fn probe(mut self, probe: PositionProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the counter
    pub fn build(self) -> MockRateCounter {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MockRateCounter {
            clock_rate_hz: self.clock_rate_hz,
            samples_per_batch: AtomicU32::new(self.samples_per_batch),
            background_rate: self.background_rate,
            resonance: self.resonance,
            noise_fraction: self.noise_fraction,
            probe: self.probe,
            rng: Mutex::new(rng),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            sampled_positions: RwLock::new(Vec::new()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_controller_rejects_out_of_range() {
        let laser = MockWavelengthController::new(-1.0, 1.0);
        laser.go_to_position(0.5).await.unwrap();

        let err = laser.go_to_position(1.5).await.unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(laser.current_position().await.unwrap(), 0.5);
        assert_eq!(laser.move_history().await, vec![0.5]);
        assert_eq!(laser.rejected_moves().await, vec![1.5]);
    }

    #[tokio::test]
    async fn test_counter_requires_start() {
        let counter = MockRateCounter::new(1000.0);
        assert!(counter.sample_counts(1).await.is_err());

        counter.start().await.unwrap();
        let raw = counter.sample_counts(2).await.unwrap();
        assert_eq!(raw.clock_ticks, 500.0);
        assert_eq!(raw.counts, 50.0);
        assert_eq!(counter.sample_count_rate(&raw), 1000.0);
    }

    #[tokio::test]
    async fn test_counter_follows_resonance() {
        let laser = MockWavelengthController::default();
        let counter = MockRateCounter::builder()
            .background_rate(0.0)
            .resonance(Resonance {
                center: 1.0,
                linewidth: 0.2,
                peak_rate: 40_000.0,
            })
            .probe(laser.probe())
            .build();
        counter.start().await.unwrap();

        laser.go_to_position(1.0).await.unwrap();
        let on_line = counter.sample_count_rate(&counter.sample_counts(1).await.unwrap());
        laser.go_to_position(1.1).await.unwrap();
        let half_max = counter.sample_count_rate(&counter.sample_counts(1).await.unwrap());

        assert_eq!(on_line, 40_000.0);
        assert_eq!(half_max, 20_000.0);
        assert_eq!(counter.sampled_positions().await, vec![1.0, 1.1]);
    }

    #[tokio::test]
    async fn test_counter_close_is_final() {
        let counter = MockRateCounter::default();
        counter.start().await.unwrap();
        counter.close().await.unwrap();

        assert!(matches!(
            counter.sample_counts(1).await,
            Err(ScanError::ResourceClosed(_))
        ));
        assert!(matches!(
            counter.close().await,
            Err(ScanError::ResourceClosed(_))
        ));
        assert!(counter.start().await.is_err());
    }

    #[tokio::test]
    async fn test_seeded_noise_is_reproducible() {
        let a = MockRateCounter::builder().noise(0.1).seed(7).build();
        let b = MockRateCounter::builder().noise(0.1).seed(7).build();
        a.start().await.unwrap();
        b.start().await.unwrap();

        for _ in 0..5 {
            assert_eq!(
                a.sample_counts(4).await.unwrap(),
                b.sample_counts(4).await.unwrap()
            );
        }
    }
}
