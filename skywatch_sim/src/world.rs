//! SimWorld - The simulation harness container.

use crate::oracle::{HazardSeed, Oracle};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use skywatch_core::{Mission, MissionConfig, MissionSummary, TickReport, Workspace};
use skywatch_env::{DetectorConfig, EnvError, FlatTerrain, Position, TerrainSource, ThresholdDetector};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors raised while setting up or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compass anchors for the base station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compass {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl std::str::FromStr for Compass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "N" | "NORTH" => Ok(Compass::N),
            "S" | "SOUTH" => Ok(Compass::S),
            "E" | "EAST" => Ok(Compass::E),
            "W" | "O" | "WEST" => Ok(Compass::W),
            "NE" => Ok(Compass::NE),
            "NW" | "NO" => Ok(Compass::NW),
            "SE" => Ok(Compass::SE),
            "SW" | "SO" => Ok(Compass::SW),
            _ => Err(format!("Unknown compass anchor: {}", s)),
        }
    }
}

/// Where the base station sits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePlacement {
    Fixed { x: f64, y: f64 },
    Anchor(Compass),
    Random,
}

impl Default for BasePlacement {
    fn default() -> Self {
        BasePlacement::Anchor(Compass::W)
    }
}

impl std::str::FromStr for BasePlacement {
    type Err = String;

    /// `random`, a compass anchor such as `NE`, or `x,y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("random") || s.eq_ignore_ascii_case("a") {
            return Ok(BasePlacement::Random);
        }
        if let Some((x, y)) = s.split_once(',') {
            let x: f64 = x.trim().parse().map_err(|_| format!("Bad base x: {}", x))?;
            let y: f64 = y.trim().parse().map_err(|_| format!("Bad base y: {}", y))?;
            return Ok(BasePlacement::Fixed { x, y });
        }
        s.parse::<Compass>().map(BasePlacement::Anchor)
    }
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Map width in cells
    pub width: usize,

    /// Map height in cells
    pub height: usize,

    /// Hazards scattered by the oracle
    pub hazard_count: usize,

    /// Minimum distance between two seeded hazards
    pub min_hazard_spacing: f64,

    pub base: BasePlacement,

    /// Forests, lakes and rivers; otherwise all plain
    pub procedural_terrain: bool,

    /// Export a frame every N ticks
    pub export_interval: u64,

    /// Thresholds the drones' anomaly detector applies
    pub detector: DetectorConfig,

    /// Fleet and engine settings, including the master seed
    pub mission: MissionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            hazard_count: 20,
            min_hazard_spacing: 1.0,
            base: BasePlacement::default(),
            procedural_terrain: true,
            export_interval: 10,
            detector: DetectorConfig::default(),
            mission: MissionConfig::default(),
        }
    }
}

impl SimConfig {
    /// Loads a config from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EnvError> {
        if self.width == 0 || self.height == 0 {
            return Err(EnvError::config(format!(
                "map must not be empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.export_interval == 0 {
            return Err(EnvError::config("export_interval must be at least 1"));
        }
        if !self.min_hazard_spacing.is_finite() || self.min_hazard_spacing < 0.0 {
            return Err(EnvError::config("min_hazard_spacing must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.detector.alarm_level) {
            return Err(EnvError::config(format!(
                "detector alarm_level must be in [0, 1], got {}",
                self.detector.alarm_level
            )));
        }
        self.mission.validate()
    }

    pub fn seed(&self) -> u64 {
        self.mission.seed
    }
}

/// The SimWorld - one seeded mission plus its evolution RNG.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    mission: Mission,

    /// Drives hazard escalation and spread
    rng: ChaCha8Rng,
}

impl SimWorld {
    /// Builds a world from the oracle: terrain, base and hazards all derive
    /// from the master seed.
    pub fn new(config: SimConfig) -> Result<Self, EnvError> {
        config.validate()?;
        let seed = config.seed();
        let terrain_seed = seed.wrapping_mul(0x9e3779b97f4a7c15);
        let hazard_seed = seed.wrapping_mul(0x517cc1b727220a95);

        let mut oracle = Oracle::new(terrain_seed, hazard_seed);
        let base = oracle.place_base(&config.base, config.width, config.height)?;
        let seeds = oracle.seed_hazards(
            config.hazard_count,
            config.width,
            config.height,
            &base,
            config.min_hazard_spacing,
            config.mission.min_distance_from_base,
        );

        if config.procedural_terrain {
            let terrain = oracle.generate_terrain(config.width, config.height);
            Self::assemble(config, &terrain, base, &seeds)
        } else {
            let terrain = FlatTerrain::new(config.width, config.height);
            Self::assemble(config, &terrain, base, &seeds)
        }
    }

    /// Builds a world with hand-placed hazards on flat terrain.
    pub fn with_hazards(config: SimConfig, base: Position, hazards: &[HazardSeed]) -> Result<Self, EnvError> {
        config.validate()?;
        let terrain = FlatTerrain::new(config.width, config.height);
        Self::assemble(config, &terrain, base, hazards)
    }

    fn assemble(
        config: SimConfig,
        terrain: &dyn TerrainSource,
        base: Position,
        hazards: &[HazardSeed],
    ) -> Result<Self, EnvError> {
        let mut workspace = Workspace::new(terrain)?;
        for h in hazards {
            workspace.add_hazard(h.position, h.severity, h.radius, h.strength, h.kind)?;
        }
        let mission = Mission::new(config.mission.clone(), workspace, base)?
            .with_detector(Box::new(ThresholdDetector::new(config.detector)));
        info!(
            seed = config.seed(),
            base_x = base.x,
            base_y = base.y,
            hazards = hazards.len(),
            "World assembled"
        );
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed()),
            config,
            mission,
        })
    }

    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    pub fn mission_mut(&mut self) -> &mut Mission {
        &mut self.mission
    }

    pub fn base(&self) -> Position {
        self.mission.energy_model().base()
    }

    /// Advances the mission by one tick.
    pub fn tick(&mut self) -> Result<TickReport, EnvError> {
        self.mission.tick(&mut self.rng)
    }

    /// Runs until completion or the tick limit.
    pub fn run(&mut self) -> Result<MissionSummary, EnvError> {
        self.mission.run(&mut self.rng)
    }
}
