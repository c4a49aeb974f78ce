//! Error types for the step-series engine
//!
//! Sensor failures are a closed set of kinds. Only `SensorDeactivated` is
//! recovered inside the engine; every other kind is handed back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a sensor backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorErrorKind {
    /// Device has no step counter
    Unsupported,
    /// Motion or location permission revoked by the user
    CapabilityDisabled,
    /// Driver session lapsed; recoverable by reactivation
    SensorDeactivated,
    /// Anything the backend could not classify
    Unknown,
}

impl SensorErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorErrorKind::Unsupported => "unsupported",
            SensorErrorKind::CapabilityDisabled => "capability_disabled",
            SensorErrorKind::SensorDeactivated => "sensor_deactivated",
            SensorErrorKind::Unknown => "unknown",
        }
    }

    /// Whether the engine may recover from this kind on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorErrorKind::SensorDeactivated)
    }
}

impl fmt::Display for SensorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a step source
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SensorError {
    pub kind: SensorErrorKind,
    pub message: String,
}

impl SensorError {
    pub fn new(kind: SensorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(SensorErrorKind::Unsupported, message)
    }

    pub fn capability_disabled(message: impl Into<String>) -> Self {
        Self::new(SensorErrorKind::CapabilityDisabled, message)
    }

    pub fn deactivated(message: impl Into<String>) -> Self {
        Self::new(SensorErrorKind::SensorDeactivated, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(SensorErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> SensorErrorKind {
        self.kind
    }
}

/// Errors surfaced by the engine and its helpers
#[derive(Debug, Error)]
pub enum StepsError {
    #[error("Sensor failure: {0}")]
    Sensor(#[from] SensorError),

    #[error("Invalid resolution: {0} minutes (must be >= 5 and divide 1440)")]
    InvalidResolution(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is not active")]
    NotActive,

    #[error("Failed to parse recording: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepsError {
    /// Sensor error kind, if this error originated at the sensor boundary
    pub fn sensor_kind(&self) -> Option<SensorErrorKind> {
        match self {
            StepsError::Sensor(e) => Some(e.kind),
            _ => None,
        }
    }
}
