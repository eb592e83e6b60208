//! # PLE DAQ Core Library
//!
//! Scan control for photoluminescence-excitation (PLE) measurements: a laser
//! tuning voltage is stepped across a range while a photon counter records the
//! count rate at every step, sweep after sweep.
//!
//! ## Crate Structure
//!
//! - **`scan`**: The `ScanController` state machine, the `run_scan` driver loop,
//!   stop handles and result snapshots.
//! - **`hardware`**: The `PositionActuator` and `RateSampler` capability traits
//!   the controller drives, plus simulated devices.
//! - **`config`**: Figment-based configuration from TOML and environment.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The `ScanError` type shared by everything above.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod scan;

pub use error::{AppResult, ScanError};
