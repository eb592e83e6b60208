//! The PLE scan state machine.
//!
//! `Idle --start()--> Running --stop() / budget exhausted--> Stopped --start()--> Running`
//!
//! Every collaborator call is awaited before the next one is issued, so a
//! sample is never taken while a move is still in flight. The only wait is the
//! settle delay at the start of each line scan; it is not interruptible.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::results::{ScanResults, SweepUpdate};
use super::stop::StopHandle;
use super::{
    line_positions, ConfigureHook, MoveFailurePolicy, MoveOutcome, ScanSettings, ScanState,
    DEFAULT_SETTLE_DELAY, DEFAULT_STEP_SIZE,
};
use crate::error::{AppResult, ScanError};
use crate::hardware::capabilities::{NullActuator, PositionActuator, RateSampler, SampleResult};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Drives a PLE scan against one actuator and one rate sampler.
///
/// The controller owns both collaborators for its whole lifetime; nothing
/// else can move the axis or take samples while it exists.
pub struct ScanController<A, S> {
    actuator: A,
    sampler: S,
    running: StopHandle,
    sampler_active: bool,
    closed: bool,
    started_once: bool,

    current_sweep_index: u32,
    current_position: f64,
    min_position: f64,
    max_position: f64,
    max_sweep_index: u32,
    step_size: f64,
    settle_delay: Duration,
    samples_per_batch_multiplier: u32,
    move_failure_policy: MoveFailurePolicy,

    positions_by_sweep: Vec<Vec<f64>>,
    raw_counts_by_sweep: Vec<Vec<SampleResult>>,
    count_rate_by_sweep: Vec<Vec<f64>>,

    run_id: Uuid,
    started_at: Option<DateTime<Utc>>,
    updates: broadcast::Sender<SweepUpdate>,
}

impl<S: RateSampler> ScanController<NullActuator, S> {
    /// Controller that samples without moving anything.
    ///
    /// `min` and `max` become the scan range; positions are purely logical.
    pub fn without_actuator(sampler: S, min: f64, max: f64) -> Self {
        ScanController::new(NullActuator::new(min, max), sampler)
    }
}

impl<A, S> ScanController<A, S>
where
    A: PositionActuator,
    S: RateSampler,
{
    /// Create a controller scanning the actuator's full allowed range
    pub fn new(actuator: A, sampler: S) -> Self {
        let min_position = actuator.minimum_allowed_position();
        let max_position = actuator.maximum_allowed_position();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            actuator,
            sampler,
            running: StopHandle::new(),
            sampler_active: false,
            closed: false,
            started_once: false,
            current_sweep_index: 0,
            current_position: min_position,
            min_position,
            max_position,
            max_sweep_index: 0,
            step_size: DEFAULT_STEP_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            samples_per_batch_multiplier: 1,
            move_failure_policy: MoveFailurePolicy::default(),
            positions_by_sweep: Vec::new(),
            raw_counts_by_sweep: Vec::new(),
            count_rate_by_sweep: Vec::new(),
            run_id: Uuid::new_v4(),
            started_at: None,
            updates,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the sampler and mark the scan as running.
    ///
    /// Restarting after a stop keeps the sweep index and accumulated results.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.closed {
            return Err(ScanError::ResourceClosed("scan controller"));
        }

        self.sampler.start().await?;
        self.sampler_active = true;
        self.running.set_running(true);
        self.started_once = true;
        self.started_at.get_or_insert_with(Utc::now);

        info!(
            run_id = %self.run_id,
            axis = self.actuator.axis_name(),
            min = self.min_position,
            max = self.max_position,
            step = self.step_size,
            sweep = self.current_sweep_index,
            max_sweep = self.max_sweep_index,
            "Scan started"
        );
        Ok(())
    }

    /// Stop the sampler and mark the scan as not running.
    ///
    /// Safe to call repeatedly; the sampler is only stopped once.
    pub async fn stop(&mut self) -> AppResult<()> {
        let result = if self.sampler_active {
            self.sampler_active = false;
            self.sampler.stop().await
        } else {
            Ok(())
        };

        if self.running.is_running() {
            info!(sweep = self.current_sweep_index, "Scan stopped");
        }
        self.running.set_running(false);
        result
    }

    /// Release the sampler. Allowed exactly once; any later start, sample
    /// or close fails with [`ScanError::ResourceClosed`].
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Err(ScanError::ResourceClosed("scan controller"));
        }

        self.stop().await?;
        self.sampler.close().await?;
        self.closed = true;
        debug!(run_id = %self.run_id, "Scan controller closed");
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScanState {
        if self.running.is_running() {
            ScanState::Running
        } else if self.started_once {
            ScanState::Stopped
        } else {
            ScanState::Idle
        }
    }

    /// Whether the scan is marked as running
    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Handle for ending the scan from another task at the next sweep boundary
    pub fn stop_handle(&self) -> StopHandle {
        self.running.clone()
    }

    /// Receive a [`SweepUpdate`] after every completed sweep
    pub fn subscribe(&self) -> broadcast::Receiver<SweepUpdate> {
        self.updates.subscribe()
    }

    /// Stopping-condition check, to be polled before every sweep.
    ///
    /// Returns false without side effects when the scan is not running.
    /// Once the sweep index passes `max_sweep_index` the scan is marked as
    /// stopped and false is returned.
    pub fn has_more_work(&self) -> bool {
        if !self.running.is_running() {
            return false;
        }
        if self.current_sweep_index > self.max_sweep_index {
            info!(
                sweeps = self.current_sweep_index,
                "Sweep budget exhausted"
            );
            self.running.set_running(false);
            return false;
        }
        true
    }

    // =========================================================================
    // Range and settings
    // =========================================================================

    /// Set the scan bounds after checking both against the actuator's limits.
    ///
    /// On rejection the previous range is kept and the actuator's error is
    /// returned.
    pub fn set_scan_range(&mut self, min: f64, max: f64) -> AppResult<()> {
        self.actuator.check_allowed_position(min)?;
        self.actuator.check_allowed_position(max)?;
        self.min_position = min;
        self.max_position = max;
        debug!(min, max, "Scan range set");
        Ok(())
    }

    /// `(min, max)` scan bounds
    pub fn get_scan_range(&self) -> (f64, f64) {
        (self.min_position, self.max_position)
    }

    /// `(min, max, current_position)`
    pub fn get_completed_scan_range(&self) -> (f64, f64, f64) {
        (self.min_position, self.max_position, self.current_position)
    }

    /// Step between sampled positions
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Set the step size. Not validated here; a non-positive step makes the
    /// next line scan fail with [`ScanError::InvalidStepSize`].
    pub fn set_step_size(&mut self, step_size: f64) {
        self.step_size = step_size;
    }

    /// Index of the last sweep to run
    pub fn max_sweep_index(&self) -> u32 {
        self.max_sweep_index
    }

    /// Set the index of the last sweep to run
    pub fn set_max_sweep_index(&mut self, max_sweep_index: u32) {
        self.max_sweep_index = max_sweep_index;
    }

    /// Wait after the first move of every sweep
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Set the wait after the first move of every sweep
    pub fn set_settle_delay(&mut self, settle_delay: Duration) {
        self.settle_delay = settle_delay;
    }

    /// Batches integrated per sampled position
    pub fn samples_per_batch_multiplier(&self) -> u32 {
        self.samples_per_batch_multiplier
    }

    /// Set the batches integrated per sampled position
    pub fn set_samples_per_batch_multiplier(&mut self, multiplier: u32) {
        self.samples_per_batch_multiplier = multiplier;
    }

    /// Reaction to rejected moves during a scan
    pub fn move_failure_policy(&self) -> MoveFailurePolicy {
        self.move_failure_policy
    }

    /// Set the reaction to rejected moves during a scan
    pub fn set_move_failure_policy(&mut self, policy: MoveFailurePolicy) {
        self.move_failure_policy = policy;
    }

    /// Forward a new batch size to the sampler
    pub async fn set_samples_per_batch(&mut self, samples: u32) -> AppResult<()> {
        self.ensure_open()?;
        self.sampler.set_samples_per_batch(samples).await
    }

    /// Current settings, as handed to a [`ConfigureHook`]
    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            range: Some((self.min_position, self.max_position)),
            step_size: self.step_size,
            settle_delay: self.settle_delay,
            max_sweep_index: self.max_sweep_index,
            samples_per_batch: Some(self.sampler.samples_per_batch()),
            samples_per_batch_multiplier: self.samples_per_batch_multiplier,
            move_failure_policy: self.move_failure_policy,
        }
    }

    /// Apply a full set of settings.
    ///
    /// Both range bounds are checked and the batch size is forwarded to the
    /// sampler before anything is stored, so a rejected range or batch size
    /// leaves every setting as it was.
    pub async fn apply_settings(&mut self, settings: &ScanSettings) -> AppResult<()> {
        if let Some((min, max)) = settings.range {
            self.actuator.check_allowed_position(min)?;
            self.actuator.check_allowed_position(max)?;
        }
        if let Some(samples) = settings.samples_per_batch {
            if samples != self.sampler.samples_per_batch() {
                self.set_samples_per_batch(samples).await?;
            }
        }

        if let Some((min, max)) = settings.range {
            self.min_position = min;
            self.max_position = max;
            debug!(min, max, "Scan range set");
        }
        self.step_size = settings.step_size;
        self.settle_delay = settings.settle_delay;
        self.max_sweep_index = settings.max_sweep_index;
        self.samples_per_batch_multiplier = settings.samples_per_batch_multiplier;
        self.move_failure_policy = settings.move_failure_policy;
        Ok(())
    }

    /// Let an external front end edit the settings, then apply them
    pub async fn configure(&mut self, hook: &dyn ConfigureHook) -> AppResult<()> {
        let mut settings = self.settings();
        hook.configure(&mut settings);
        self.apply_settings(&settings).await
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Advance the logical position by one step and follow with the actuator.
    ///
    /// The logical position always advances. The actuator is only commanded
    /// while the new position is inside the scan range; a rejected command is
    /// logged and reported as [`MoveOutcome::Degraded`] unless the policy is
    /// [`MoveFailurePolicy::Abort`].
    pub async fn step_position(&mut self) -> AppResult<MoveOutcome> {
        self.ensure_open()?;
        self.current_position += self.step_size;
        let target = self.current_position;
        if !self.in_scan_range(target) {
            return Ok(MoveOutcome::OutsideScanRange(target));
        }
        self.best_effort_move(target).await
    }

    /// Move to `target` if it lies inside the scan range; otherwise do nothing.
    pub async fn move_to(&mut self, target: f64) -> AppResult<MoveOutcome> {
        self.ensure_open()?;
        if !self.in_scan_range(target) {
            return Ok(MoveOutcome::OutsideScanRange(target));
        }
        self.best_effort_move(target).await
    }

    /// Park the axis at the start of the scan range.
    ///
    /// The logical position is reset to `min` even when the actuator rejects
    /// the move.
    pub async fn set_to_starting_position(&mut self) -> AppResult<MoveOutcome> {
        self.ensure_open()?;
        self.current_position = self.min_position;
        self.best_effort_move(self.min_position).await
    }

    /// Position read back from the actuator
    pub async fn current_voltage(&self) -> AppResult<f64> {
        self.ensure_open()?;
        self.actuator.current_position().await
    }

    fn in_scan_range(&self, position: f64) -> bool {
        (self.min_position..=self.max_position).contains(&position)
    }

    async fn best_effort_move(&self, target: f64) -> AppResult<MoveOutcome> {
        self.ensure_open()?;
        match self.actuator.go_to_position(target).await {
            Ok(()) => Ok(MoveOutcome::Moved(target)),
            Err(err)
                if err.is_out_of_range()
                    && self.move_failure_policy == MoveFailurePolicy::Tolerate =>
            {
                info!(
                    axis = self.actuator.axis_name(),
                    target,
                    error = %err,
                    "Move rejected, continuing scan"
                );
                Ok(MoveOutcome::Degraded {
                    target,
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Run one full sweep over the scan range and record its results.
    #[instrument(skip(self), fields(sweep = self.current_sweep_index))]
    pub async fn run_one_sweep(&mut self) -> AppResult<()> {
        let (min, max, step) = (self.min_position, self.max_position, self.step_size);
        let positions = line_positions(min, max, step)?;
        let raw_counts = self.scan_line(min, max, step).await?;
        let count_rates: Vec<f64> = raw_counts
            .iter()
            .map(|raw| self.sampler.sample_count_rate(raw))
            .collect();

        debug!(points = raw_counts.len(), "Sweep complete");

        let update = SweepUpdate {
            run_id: self.run_id,
            sweep_index: self.current_sweep_index,
            positions: positions.clone(),
            count_rates: count_rates.clone(),
        };

        self.positions_by_sweep.push(positions);
        self.raw_counts_by_sweep.push(raw_counts);
        self.count_rate_by_sweep.push(count_rates);
        self.current_sweep_index += 1;

        // No subscribers is fine
        let _ = self.updates.send(update);
        Ok(())
    }

    /// Move to `min`, settle, then sample at every position of
    /// `min, min + step, ...` below `max`.
    ///
    /// Each sample is taken only after the move to its position has returned.
    pub async fn scan_line(&mut self, min: f64, max: f64, step: f64) -> AppResult<Vec<SampleResult>> {
        let positions = line_positions(min, max, step)?;
        self.ensure_open()?;

        self.best_effort_move(min).await?;
        self.current_position = min;
        tokio::time::sleep(self.settle_delay).await;

        let mut samples = Vec::with_capacity(positions.len());
        for position in positions {
            self.best_effort_move(position).await?;
            self.current_position = position;
            samples.push(self.sample_counts().await?);
            match self.actuator.current_position().await {
                Ok(readback) => debug!(position, readback, "Sampled"),
                Err(err) => debug!(position, error = %err, "Sampled, read-back failed"),
            }
        }
        Ok(samples)
    }

    /// Sample `samples_per_batch_multiplier` batches
    pub async fn sample_counts(&self) -> AppResult<SampleResult> {
        self.ensure_open()?;
        self.sampler
            .sample_counts(self.samples_per_batch_multiplier)
            .await
    }

    /// Count rate of `raw`, or of a fresh sample when `raw` is `None`
    pub async fn sample_count_rate(&self, raw: Option<SampleResult>) -> AppResult<f64> {
        self.ensure_open()?;
        let raw = match raw {
            Some(raw) => raw,
            None => self.sample_counts().await?,
        };
        Ok(self.sampler.sample_count_rate(&raw))
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            Err(ScanError::ResourceClosed("scan controller"))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Drop accumulated results. Sweep index, position and running state are
    /// left as they are.
    pub fn reset(&mut self) {
        self.positions_by_sweep.clear();
        self.raw_counts_by_sweep.clear();
        self.count_rate_by_sweep.clear();
    }

    /// Return the sweep counter to zero
    pub fn reset_sweep_index(&mut self) {
        self.current_sweep_index = 0;
    }

    /// Number of sweeps run since the last sweep-index reset
    pub fn current_sweep_index(&self) -> u32 {
        self.current_sweep_index
    }

    /// Logical axis position
    pub fn current_position(&self) -> f64 {
        self.current_position
    }

    /// Raw samples, one entry per sweep
    pub fn raw_counts_by_sweep(&self) -> &[Vec<SampleResult>] {
        &self.raw_counts_by_sweep
    }

    /// Count rates, one entry per sweep
    pub fn count_rate_by_sweep(&self) -> &[Vec<f64>] {
        &self.count_rate_by_sweep
    }

    /// Sampled positions, one entry per sweep
    pub fn positions_by_sweep(&self) -> &[Vec<f64>] {
        &self.positions_by_sweep
    }

    /// Snapshot of the accumulated results
    pub fn results(&self) -> ScanResults {
        ScanResults {
            run_id: self.run_id,
            axis: self.actuator.axis_name().to_string(),
            started_at: self.started_at,
            captured_at: Utc::now(),
            min_position: self.min_position,
            max_position: self.max_position,
            step_size: self.step_size,
            sweeps_completed: self.current_sweep_index,
            positions_by_sweep: self.positions_by_sweep.clone(),
            raw_counts_by_sweep: self.raw_counts_by_sweep.clone(),
            count_rate_by_sweep: self.count_rate_by_sweep.clone(),
        }
    }

    /// The actuator
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// The rate sampler
    pub fn sampler(&self) -> &S {
        &self.sampler
    }
}
