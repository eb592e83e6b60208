//! Hardware Abstractions
//!
//! Capability traits the scan controller drives, and simulated devices that
//! implement them.

pub mod capabilities;
pub mod mock;

pub use capabilities::{NullActuator, PositionActuator, RateSampler, SampleResult};
