//! Common types for the Skywatch environment abstraction.

use crate::error::EnvError;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Continuous 2D position in workspace units.
pub type Position = Vector2<f64>;

/// Unique identifier for a drone in the fleet.
///
/// Ids are dense and ordered; the ordering doubles as the deterministic
/// tie-break when two drones claim the same hazard in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "drone-{}", self.0)
    }
}

/// Index of a hazard in the workspace arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HazardId(pub usize);

impl std::fmt::Display for HazardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hz#{}", self.0)
    }
}

/// A discrete grid cell. `(x, y)` is the cell's integer corner, which is
/// also the point drones fly to when targeting the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The cell containing a continuous position.
    pub fn containing(pos: &Position) -> Self {
        Self {
            x: pos.x.floor() as i32,
            y: pos.y.floor() as i32,
        }
    }

    /// The cell corner as a continuous position.
    pub fn point(&self) -> Position {
        Position::new(self.x as f64, self.y as f64)
    }

    /// Euclidean distance from the cell point to `pos`.
    pub fn distance_to(&self, pos: &Position) -> f64 {
        (self.point() - pos).norm()
    }

    /// All cells whose point lies within `radius` of `center`.
    ///
    /// The disk is not clipped to any workspace bounds.
    pub fn disk(center: &Position, radius: f64) -> Vec<Cell> {
        let r = radius.max(0.0);
        let x_min = (center.x - r).floor() as i32;
        let x_max = (center.x + r).ceil() as i32;
        let y_min = (center.y - r).floor() as i32;
        let y_max = (center.y + r).ceil() as i32;
        let r2 = r * r;

        let mut cells = Vec::new();
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let dx = x as f64 - center.x;
                let dy = y as f64 - center.y;
                if dx * dx + dy * dy <= r2 {
                    cells.push(Cell::new(x, y));
                }
            }
        }
        cells
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Terrain classes produced by the terrain boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Terrain {
    #[default]
    Plain,
    Forest,
    River,
    Lake,
}

impl Terrain {
    pub fn name(&self) -> &'static str {
        match self {
            Terrain::Plain => "plain",
            Terrain::Forest => "forest",
            Terrain::River => "river",
            Terrain::Lake => "lake",
        }
    }
}

/// The kind of a hazard. Drives sensor signature, drift and the
/// intervention table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HazardKind {
    MeteorShower,
    Radiation,
    Flood,
}

impl HazardKind {
    pub fn all() -> [HazardKind; 3] {
        [HazardKind::MeteorShower, HazardKind::Radiation, HazardKind::Flood]
    }

    pub fn name(&self) -> &'static str {
        match self {
            HazardKind::MeteorShower => "meteor_shower",
            HazardKind::Radiation => "radiation",
            HazardKind::Flood => "flood",
        }
    }
}

impl std::fmt::Display for HazardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for HazardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meteor_shower" | "meteor" | "meteorites" => Ok(HazardKind::MeteorShower),
            "radiation" => Ok(HazardKind::Radiation),
            "flood" | "flooding" => Ok(HazardKind::Flood),
            _ => Err(format!("Unknown hazard kind: {}", s)),
        }
    }
}

/// Discrete severity level of a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low = 1,
    High = 2,
}

impl Severity {
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Severity::Low),
            2 => Some(Severity::High),
            _ => None,
        }
    }
}

/// One sensor sample: temperature, radiation, meteorite and flooding channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorVector {
    pub temperature: f64,
    pub radiation: f64,
    pub meteorites: f64,
    pub flooding: f64,
}

impl SensorVector {
    /// Readings of an undisturbed environment.
    pub const BASELINE: SensorVector = SensorVector {
        temperature: 20.0,
        radiation: 0.1,
        meteorites: 0.1,
        flooding: 0.1,
    };

    /// Clips every channel to `[0, 100]`.
    pub fn clipped(self) -> Self {
        let clip = |v: f64| v.clamp(0.0, 100.0);
        Self {
            temperature: clip(self.temperature),
            radiation: clip(self.radiation),
            meteorites: clip(self.meteorites),
            flooding: clip(self.flooding),
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.temperature, self.radiation, self.meteorites, self.flooding]
    }
}

impl Default for SensorVector {
    fn default() -> Self {
        Self::BASELINE
    }
}

/// Rejects NaN, infinite and negative coordinates.
pub fn check_position(pos: &Position, what: &str) -> Result<(), EnvError> {
    if !pos.x.is_finite() || !pos.y.is_finite() || pos.x < 0.0 || pos.y < 0.0 {
        return Err(EnvError::geometry(format!(
            "{} at ({}, {}) is not a valid workspace coordinate",
            what, pos.x, pos.y
        )));
    }
    Ok(())
}

/// Rejects NaN, infinite and negative radii.
pub fn check_radius(radius: f64, what: &str) -> Result<(), EnvError> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(EnvError::geometry(format!("{} radius {} is invalid", what, radius)));
    }
    Ok(())
}
