//! Skywatch Environment Abstraction Layer
//!
//! This crate holds everything the decision engine consumes from the outside
//! world, so that `skywatch_core` never depends on how terrain is generated
//! or how sensors are interpreted:
//! - Shared value types (`AgentId`, `HazardId`, `Cell`, `Position`, ...)
//! - The terrain boundary (`TerrainSource`)
//! - The hazard-detection boundary (`HazardDetector`)
//!
//! # Example
//!
//! ```
//! use skywatch_env::{FlatTerrain, HazardDetector, SensorVector, TerrainSource, ThresholdDetector};
//!
//! let terrain = FlatTerrain::new(100, 100);
//! assert_eq!(terrain.width(), 100);
//!
//! let (alarm, _) = ThresholdDetector::default().detect_anomaly(&SensorVector::BASELINE);
//! assert!(!alarm);
//! ```

mod error;
mod sensing;
mod terrain;
mod types;

pub use error::EnvError;
pub use sensing::{DetectorConfig, HazardDetector, ThresholdDetector};
pub use terrain::{FlatTerrain, RasterTerrain, TerrainSource};
pub use types::{
    check_position, check_radius, AgentId, Cell, HazardId, HazardKind, Position, SensorVector,
    Severity, Terrain,
};
