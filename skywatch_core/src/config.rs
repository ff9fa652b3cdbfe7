//! Immutable mission configuration threaded into every component.

use serde::{Deserialize, Serialize};
use skywatch_env::{EnvError, Severity};

/// Target-selection strategy shared by the whole fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Interrupt exploration as soon as an affordable hazard is found.
    #[default]
    Immediate,

    /// Finish exploring before treating anything.
    Exhaustive,

    /// Always chase the most severe known hazard, switching en route.
    Opportunistic,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Immediate => "immediate",
            Strategy::Exhaustive => "exhaustive",
            Strategy::Opportunistic => "opportunistic",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "immediate" | "action" => Ok(Strategy::Immediate),
            "exhaustive" | "exploration" => Ok(Strategy::Exhaustive),
            "opportunistic" | "mixed" => Ok(Strategy::Opportunistic),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// How far map knowledge travels in one gossip phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GossipMode {
    /// One forward and one reverse pass over all pairs.
    #[default]
    TwoPass,

    /// Repeat passes until no drone's knowledge changes.
    FixedPoint,
}

/// Deployment configuration for one mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Number of drones deployed at base
    pub fleet_size: usize,

    /// Battery capacity of every drone
    pub capacity: f64,

    /// Energy restored per tick while at base
    pub recharge_per_tick: f64,

    /// Energy per unit of distance travelled
    pub unit_move_cost: f64,

    /// Energy to treat a low-severity hazard
    pub treatment_cost_low: f64,

    /// Energy to treat a high-severity hazard
    pub treatment_cost_high: f64,

    /// Ticks a drone spends on site treating a hazard
    pub treatment_ticks: u32,

    /// Fraction of capacity required before leaving base
    pub departure_threshold: f64,

    /// Detection radius (also the exploration-claim disk radius)
    pub vision_radius: f64,

    /// Peer-to-peer communication radius
    pub comm_radius: f64,

    /// Distance covered per tick
    pub speed: f64,

    /// Distance from base under which a drone counts as docked
    pub at_base_radius: f64,

    /// Distance under which a drone has reached its target
    pub arrival_tolerance: f64,

    pub strategy: Strategy,

    pub gossip_mode: GossipMode,

    /// Age after which a claim held by a peer is ignored (`None` = never)
    pub claim_ttl_ticks: Option<u64>,

    /// Drones transmit to the base station every N ticks
    pub transmission_interval: u64,

    /// Stride of the cell sample used for exploration feasibility
    pub frontier_sample_step: usize,

    /// Per-tick probability that a low hazard becomes high
    pub escalation_chance: f64,

    /// Per-tick probability that a high hazard spawns a neighbour
    pub spread_chance: f64,

    /// Spawned hazards keep at least this distance from base
    pub min_distance_from_base: f64,

    /// Tick budget
    pub max_ticks: u64,

    /// Master seed
    pub seed: u64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            fleet_size: 5,
            capacity: 100.0,
            recharge_per_tick: 10.0,
            unit_move_cost: 0.1,
            treatment_cost_low: 5.0,
            treatment_cost_high: 15.0,
            treatment_ticks: 1,
            departure_threshold: 0.85,
            vision_radius: 10.0,
            comm_radius: 10.0,
            speed: 5.0,
            at_base_radius: 3.0,
            arrival_tolerance: 0.5,
            strategy: Strategy::Immediate,
            gossip_mode: GossipMode::TwoPass,
            claim_ttl_ticks: None,
            transmission_interval: 1,
            frontier_sample_step: 10,
            escalation_chance: 0.0,
            spread_chance: 0.0,
            min_distance_from_base: 10.0,
            max_ticks: 300,
            seed: 42,
        }
    }
}

impl MissionConfig {
    /// Treatment cost for a severity level.
    pub fn treatment_cost(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.treatment_cost_low,
            Severity::High => self.treatment_cost_high,
        }
    }

    /// Energy a drone must hold before it leaves base.
    pub fn departure_energy(&self) -> f64 {
        self.capacity * self.departure_threshold
    }

    /// Checks that every constant is usable.
    pub fn validate(&self) -> Result<(), EnvError> {
        let positive = [
            ("capacity", self.capacity),
            ("speed", self.speed),
            ("vision_radius", self.vision_radius),
            ("comm_radius", self.comm_radius),
            ("at_base_radius", self.at_base_radius),
            ("arrival_tolerance", self.arrival_tolerance),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(EnvError::config(format!("{} must be positive, got {}", name, value)));
            }
        }

        let non_negative = [
            ("recharge_per_tick", self.recharge_per_tick),
            ("unit_move_cost", self.unit_move_cost),
            ("treatment_cost_low", self.treatment_cost_low),
            ("treatment_cost_high", self.treatment_cost_high),
            ("min_distance_from_base", self.min_distance_from_base),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(EnvError::config(format!("{} must be >= 0, got {}", name, value)));
            }
        }

        if !(self.departure_threshold > 0.0 && self.departure_threshold <= 1.0) {
            return Err(EnvError::config(format!(
                "departure_threshold must be in (0, 1], got {}",
                self.departure_threshold
            )));
        }

        for (name, p) in [
            ("escalation_chance", self.escalation_chance),
            ("spread_chance", self.spread_chance),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EnvError::config(format!("{} must be a probability, got {}", name, p)));
            }
        }

        if self.fleet_size == 0 {
            return Err(EnvError::config("fleet_size must be at least 1"));
        }
        if self.treatment_ticks == 0 {
            return Err(EnvError::config("treatment_ticks must be at least 1"));
        }
        if self.transmission_interval == 0 {
            return Err(EnvError::config("transmission_interval must be at least 1"));
        }
        if self.frontier_sample_step == 0 {
            return Err(EnvError::config("frontier_sample_step must be at least 1"));
        }
        if self.claim_ttl_ticks == Some(0) {
            return Err(EnvError::config("claim_ttl_ticks must be at least 1 when set"));
        }

        Ok(())
    }
}
