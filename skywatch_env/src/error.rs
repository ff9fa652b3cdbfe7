//! Error types for the Skywatch environment abstraction.

use thiserror::Error;

/// Errors that can occur at the environment boundary.
#[derive(Debug, Error)]
pub enum EnvError {
    /// NaN, infinite or negative coordinates or radii
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Coordinates outside the workspace bounds
    #[error("Out of bounds: ({x}, {y})")]
    OutOfBounds { x: i64, y: i64 },

    /// Deployment configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry export failed
    #[error("Export error: {0}")]
    Export(String),
}

impl EnvError {
    /// Creates a geometry error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<std::io::Error> for EnvError {
    fn from(err: std::io::Error) -> Self {
        Self::Export(err.to_string())
    }
}
