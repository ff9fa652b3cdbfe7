//! Per-tick observations of the fleet.
//!
//! Nothing here feeds back into decisions; these are plain serializable
//! records for exporters and tests.

use crate::drone::{Activity, DroneState, Target};
use serde::{Deserialize, Serialize};
use skywatch_env::{AgentId, HazardId, Position};

/// What a drone did with its energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Return,
    Treat,
}

/// One energy-consuming action, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub tick: u64,
    pub agent: AgentId,
    pub kind: ActionKind,
    pub from: Position,
    pub to: Position,
    pub energy_before: f64,
    pub energy_after: f64,
    pub hazard: Option<HazardId>,
}

/// A drone found itself away from base without enough energy to get home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrandedEvent {
    pub tick: u64,
    pub agent: AgentId,
    pub position: Position,
    pub energy: f64,
    pub return_cost: f64,
}

/// Snapshot of one drone at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub position: Position,
    pub energy: f64,
    pub state: DroneState,
    pub activity: Activity,
    pub target: Option<Target>,
    pub pending: usize,
    pub known_hazards: usize,
    /// Fraction of the workspace this drone believes explored
    pub explored: f64,
    pub base_blocked: bool,
}

/// Outcome of one mission tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub agents: Vec<AgentStatus>,
    pub coverage: f64,
    pub active_hazards: usize,
    pub messages_sent: u64,
    /// Full coverage and no active hazard
    pub complete: bool,
}
