//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, shared by the scan
//! controller, the hardware capability traits and the configuration layer.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the failures a PLE scan can run into.
//!
//! ## Error Hierarchy
//!
//! - **`OutOfRange`**: A position lies outside the actuator's allowed limits.
//!   Propagated from `set_scan_range`, but converted into a skipped move inside
//!   the line scan when the controller tolerates move failures.
//! - **`ResourceClosed`**: A sampler or controller was used after `close()`.
//!   This is a precondition violation and is never retried.
//! - **`InvalidStepSize`**: The line scan was asked to step by a non-positive
//!   or non-finite amount.
//! - **`Instrument`**: Any other failure reported by a device.
//! - **`Configuration`** / **`Config`**: Semantic and parse errors in the
//!   configuration.
//! - **`Io`** / **`Serialization`**: Result export failures.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Position {value} is outside the allowed range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("{0} has been closed")]
    ResourceClosed(&'static str),

    #[error("Step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether the error is a range rejection from an actuator.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, ScanError::OutOfRange { .. })
    }

    /// Whether the scan can reasonably continue after this error.
    ///
    /// Range rejections and instrument hiccups are recoverable; using a closed
    /// resource or an invalid configuration is not.
    pub fn can_recover(&self) -> bool {
        match self {
            ScanError::OutOfRange { .. } | ScanError::Instrument(_) => true,
            ScanError::ResourceClosed(_)
            | ScanError::InvalidStepSize(_)
            | ScanError::Configuration(_)
            | ScanError::Config(_)
            | ScanError::Io(_)
            | ScanError::Serialization(_) => false,
        }
    }
}

impl From<figment::Error> for ScanError {
    fn from(value: figment::Error) -> Self {
        ScanError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message_names_limits() {
        let err = ScanError::OutOfRange {
            value: 7.5,
            min: -3.0,
            max: 5.0,
        };
        assert!(err.is_out_of_range());
        assert!(err.can_recover());
        assert_eq!(
            err.to_string(),
            "Position 7.5 is outside the allowed range [-3, 5]"
        );
    }

    #[test]
    fn closed_resource_is_fatal() {
        let err = ScanError::ResourceClosed("rate sampler");
        assert!(!err.can_recover());
        assert!(!err.is_out_of_range());
        assert_eq!(err.to_string(), "rate sampler has been closed");
    }
}
