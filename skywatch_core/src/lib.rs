//! Skywatch Core - Energy-Aware Cooperative Hazard Response
//!
//! This library drives a fleet of battery-limited drones that explore a
//! bounded area, find hazards and treat them without ever being caught away
//! from base on an empty battery:
//! 1. **Feasibility**: every action is checked against the energy needed to
//!    get home afterwards (`EnergyModel`)
//! 2. **Selection**: three target-selection strategies trade exploration
//!    against treatment (`Drone::decide`)
//! 3. **Coordination**: range-limited gossip, claims with a lower-id
//!    tie-break, and a base station that aggregates reports and ranks
//!    interventions
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Mission                            │
//! │   ┌────────────┐   gossip / announcements   ┌────────────┐ │
//! │   │  Drone #0  │◄──────────────────────────►│  Drone #1  │ │
//! │   │ Knowledge  │                            │ Knowledge  │ │
//! │   └─────┬──────┘                            └─────┬──────┘ │
//! │         │ detect / execute                        │        │
//! │   ┌─────▼─────────────────────────────────────────▼──────┐ │
//! │   │ Workspace (terrain, HazardField, CoverageMap)        │ │
//! │   └──────────────────────────────────────────────────────┘ │
//! │         │ transmissions                                    │
//! │   ┌─────▼──────┐                                           │
//! │   │BaseStation │ -> interventions, priority zones          │
//! │   └────────────┘                                           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rand::SeedableRng;
//! use skywatch_core::{Mission, MissionConfig, Workspace};
//! use skywatch_env::{FlatTerrain, HazardKind, Position, Severity};
//!
//! let mut workspace = Workspace::new(&FlatTerrain::new(30, 30)).unwrap();
//! workspace
//!     .add_hazard(Position::new(20.0, 20.0), Severity::Low, 4.0, 0.8, HazardKind::Flood)
//!     .unwrap();
//!
//! let config = MissionConfig { fleet_size: 3, ..Default::default() };
//! let mut mission = Mission::new(config, workspace, Position::new(0.0, 0.0)).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let report = mission.tick(&mut rng).unwrap();
//! assert_eq!(report.agents.len(), 3);
//! ```

pub mod base_station;
pub mod config;
pub mod drone;
pub mod feasibility;
pub mod gossip;
pub mod grid;
pub mod hazard;
pub mod intervention;
pub mod knowledge;
pub mod mission;
pub mod telemetry;

// Re-export key types for convenience
pub use base_station::{BaseStation, PriorityZone, StationStatus, TransmissionEntry, ZonePriority};
pub use config::{GossipMode, MissionConfig, Strategy};
pub use drone::{Activity, ActivityCounters, Announcement, Drone, DroneState, Target, TickContext};
pub use feasibility::{Denial, EnergyModel, Feasibility, ENERGY_EPSILON};
pub use gossip::{gossip_phase, CommGraph, GossipStats};
pub use grid::{CoverageMap, Workspace};
pub use hazard::{Hazard, HazardEvent, HazardField, HazardOrigin, HazardRecord, HazardStatus};
pub use intervention::{InterventionDescriptor, Responder, Urgency};
pub use knowledge::{Claim, Digest, Knowledge, ZoneClaim};
pub use mission::{Mission, MissionSummary};
pub use telemetry::{ActionEvent, ActionKind, AgentStatus, StrandedEvent, TickReport};
