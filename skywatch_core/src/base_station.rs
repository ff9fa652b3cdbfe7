//! The base station: global aggregation of what the fleet reports.
//!
//! Drones transmit from anywhere; the station only talks back to drones that
//! are docked. Its hazard history is monotone: a cell, once reported, stays
//! in it for the rest of the mission.

use crate::config::MissionConfig;
use crate::drone::{Drone, TickContext};
use crate::feasibility::EnergyModel;
use crate::grid::CoverageMap;
use crate::hazard::{HazardField, HazardRecord};
use crate::intervention::{sort_by_urgency, InterventionDescriptor};
use serde::{Deserialize, Serialize};
use skywatch_env::{AgentId, Cell, EnvError, Position};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Intensity above which a zone is high priority
const HIGH_PRIORITY_INTENSITY: f64 = 0.7;
/// Intensity above which a zone is medium priority
const MEDIUM_PRIORITY_INTENSITY: f64 = 0.5;

/// Log entry for one transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionEntry {
    /// Position in the log
    pub seq: usize,
    pub tick: u64,
    pub agent: AgentId,
    pub position: Position,
    pub energy: f64,
    pub hazards_reported: usize,
    pub new_cells: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZonePriority {
    High,
    Medium,
}

/// A cell whose measured intensity warrants attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityZone {
    pub cell: Cell,
    pub intensity: f64,
    pub priority: ZonePriority,
}

/// Summary counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    pub base: Position,
    pub transmissions: usize,
    pub hazards_known: usize,
    pub hazards_active: usize,
    pub coverage: f64,
    pub interventions: usize,
}

/// Global view held at base.
#[derive(Debug, Clone)]
pub struct BaseStation {
    energy: EnergyModel,
    coverage: CoverageMap,
    hazards: BTreeMap<Cell, HazardRecord>,
    history: BTreeSet<Cell>,
    intensity: BTreeMap<Cell, f64>,
    log: Vec<TransmissionEntry>,
    interventions: Vec<InterventionDescriptor>,
}

impl BaseStation {
    pub fn new(config: &MissionConfig, base: Position, width: usize, height: usize) -> Result<Self, EnvError> {
        Ok(Self {
            energy: EnergyModel::new(config, base)?,
            coverage: CoverageMap::new(width, height),
            hazards: BTreeMap::new(),
            history: BTreeSet::new(),
            intensity: BTreeMap::new(),
            log: Vec::new(),
            interventions: Vec::new(),
        })
    }

    pub fn base(&self) -> Position {
        self.energy.base()
    }

    pub fn coverage(&self) -> &CoverageMap {
        &self.coverage
    }

    pub fn hazards(&self) -> &BTreeMap<Cell, HazardRecord> {
        &self.hazards
    }

    pub fn history(&self) -> &BTreeSet<Cell> {
        &self.history
    }

    pub fn transmissions(&self) -> &[TransmissionEntry] {
        &self.log
    }

    pub fn interventions(&self) -> &[InterventionDescriptor] {
        &self.interventions
    }

    /// Merges a drone's report into the global view. Always succeeds.
    pub fn receive_transmission(&mut self, drone: &Drone, tick: u64) -> bool {
        let new_cells = self.coverage.union_with(&drone.knowledge.explored);

        for record in drone.knowledge.hazards.values() {
            match self.hazards.get_mut(&record.cell) {
                Some(existing) => {
                    existing.merge_from(record);
                }
                None => {
                    self.hazards.insert(record.cell, record.clone());
                }
            }
            self.history.insert(record.cell);
            self.note_intensity(record.cell, record.strength);
        }
        for (cell, intensity) in &drone.knowledge.readings {
            self.note_intensity(*cell, *intensity);
        }

        self.log.push(TransmissionEntry {
            seq: self.log.len(),
            tick,
            agent: drone.id,
            position: drone.position,
            energy: drone.energy,
            hazards_reported: drone.knowledge.hazards.len(),
            new_cells,
        });
        true
    }

    fn note_intensity(&mut self, cell: Cell, intensity: f64) {
        let entry = self.intensity.entry(cell).or_insert(intensity);
        if intensity > *entry {
            *entry = intensity;
        }
    }

    /// Pushes global knowledge to a docked drone. Returns false when the
    /// drone is away from base.
    pub fn send_update(&self, drone: &mut Drone, ctx: &TickContext<'_>) -> bool {
        if !drone.at_base(ctx) {
            return false;
        }
        let cells = drone.knowledge.explored.union_with(&self.coverage);
        let mut records = 0;
        for record in self.hazards.values() {
            if drone.knowledge.observe(record) {
                records += 1;
            }
        }
        debug!(agent = %drone.id, cells, records, "Synchronized with base");
        true
    }

    /// Rebuilds the intervention list from the live hazards reported so far.
    pub fn analyze_interventions(&mut self, hazards: &HazardField) -> Result<&[InterventionDescriptor], EnvError> {
        let mut list = Vec::new();
        for hazard in hazards.active() {
            let cell = hazard.cell();
            if !self.history.contains(&cell) {
                continue;
            }
            let feasibility = self.energy.classify_from_base(&hazard.position, hazard.severity)?;
            list.push(InterventionDescriptor::new(
                hazard.id,
                cell,
                hazard.kind,
                hazard.severity,
                feasibility,
            ));
        }
        sort_by_urgency(&mut list);
        self.interventions = list;
        Ok(&self.interventions)
    }

    /// Cells with high measured intensity, strongest first.
    pub fn priority_zones(&self) -> Vec<PriorityZone> {
        let mut zones: Vec<PriorityZone> = self
            .intensity
            .iter()
            .filter_map(|(cell, intensity)| {
                let priority = if *intensity > HIGH_PRIORITY_INTENSITY {
                    ZonePriority::High
                } else if *intensity > MEDIUM_PRIORITY_INTENSITY {
                    ZonePriority::Medium
                } else {
                    return None;
                };
                Some(PriorityZone {
                    cell: *cell,
                    intensity: *intensity,
                    priority,
                })
            })
            .collect();
        zones.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        zones
    }

    pub fn status(&self) -> StationStatus {
        StationStatus {
            base: self.base(),
            transmissions: self.log.len(),
            hazards_known: self.hazards.len(),
            hazards_active: self.hazards.values().filter(|r| r.is_active()).count(),
            coverage: self.coverage.ratio(),
            interventions: self.interventions.len(),
        }
    }
}
