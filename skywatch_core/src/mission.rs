//! Mission runtime: orchestrates the fleet, the ground truth and the base
//! station one lock-step tick at a time.
//!
//! # Tick phases
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ 1. gossip         forward + reverse map merge between peers  │
//! │ 2. evolution      hazards escalate, spread and drift         │
//! │ 3. detection      every drone scans its vision disk          │
//! │ 4. decision       recharge, sync, select; announcement rounds│
//! │ 5. execution      one movement step or one treatment tick    │
//! │ 6. transmission   drones report to the base station          │
//! │ 7. aggregation    interventions re-ranked                    │
//! │ 8. completion     full coverage and no active hazard         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A geometry error aborts the current phase for the drone concerned only;
//! it is logged and the tick continues.

use crate::base_station::BaseStation;
use crate::config::MissionConfig;
use crate::drone::{Announcement, Drone, TickContext};
use crate::feasibility::EnergyModel;
use crate::gossip::{deliver, gossip_phase, CommGraph};
use crate::grid::Workspace;
use crate::hazard::HazardEvent;
use crate::telemetry::{ActionEvent, StrandedEvent, TickReport};
use rand::Rng;
use serde::{Deserialize, Serialize};
use skywatch_env::{AgentId, Cell, EnvError, HazardDetector, Position, ThresholdDetector};
use tracing::{debug, info, warn};

/// End-of-run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSummary {
    pub ticks_run: u64,
    pub completed_at: Option<u64>,
    pub coverage: f64,
    pub hazards_total: usize,
    pub hazards_treated: usize,
    pub hazards_active: usize,
    pub actions: usize,
    pub stranded: usize,
    pub messages_sent: u64,
}

/// One mission: fleet, ground truth and base station.
pub struct Mission {
    config: MissionConfig,
    energy: EnergyModel,
    workspace: Workspace,
    base: BaseStation,
    drones: Vec<Drone>,
    detector: Box<dyn HazardDetector>,

    /// Next tick to run
    tick: u64,

    events: Vec<ActionEvent>,
    stranded: Vec<StrandedEvent>,
    hazard_events: Vec<(u64, HazardEvent)>,
    messages_sent: u64,
    completed_at: Option<u64>,
}

impl Mission {
    /// Deploys `config.fleet_size` drones at `base`.
    pub fn new(config: MissionConfig, workspace: Workspace, base: Position) -> Result<Self, EnvError> {
        config.validate()?;
        let base_cell = Cell::containing(&base);
        let energy = EnergyModel::new(&config, base)?;
        if !workspace.in_bounds(base_cell) {
            return Err(EnvError::OutOfBounds {
                x: base_cell.x as i64,
                y: base_cell.y as i64,
            });
        }

        let (width, height) = (workspace.width(), workspace.height());
        let station = BaseStation::new(&config, base, width, height)?;
        let drones = (0..config.fleet_size)
            .map(|i| Drone::new(AgentId(i as u32), base, &config, width, height))
            .collect();

        info!(
            fleet = config.fleet_size,
            strategy = %config.strategy,
            width,
            height,
            hazards = workspace.hazards().len(),
            "Mission deployed"
        );

        Ok(Self {
            config,
            energy,
            workspace,
            base: station,
            drones,
            detector: Box::new(ThresholdDetector::default()),
            tick: 0,
            events: Vec::new(),
            stranded: Vec::new(),
            hazard_events: Vec::new(),
            messages_sent: 0,
            completed_at: None,
        })
    }

    /// Replaces the sensor interpretation.
    pub fn with_detector(mut self, detector: Box<dyn HazardDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub fn energy_model(&self) -> &EnergyModel {
        &self.energy
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn base_station(&self) -> &BaseStation {
        &self.base
    }

    pub fn drones(&self) -> &[Drone] {
        &self.drones
    }

    pub fn drones_mut(&mut self) -> &mut [Drone] {
        &mut self.drones
    }

    /// Number of ticks already run.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn events(&self) -> &[ActionEvent] {
        &self.events
    }

    pub fn stranded_events(&self) -> &[StrandedEvent] {
        &self.stranded
    }

    pub fn hazard_events(&self) -> &[(u64, HazardEvent)] {
        &self.hazard_events
    }

    pub fn completed_at(&self) -> Option<u64> {
        self.completed_at
    }

    /// Runs one tick through all eight phases.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<TickReport, EnvError> {
        let tick = self.tick;
        let ctx = TickContext {
            config: &self.config,
            energy: &self.energy,
            tick,
        };

        // 1. Gossip
        let mut graph = CommGraph::of_fleet(&self.drones, self.config.comm_radius);
        gossip_phase(&mut self.drones, &mut graph, &self.config);
        self.messages_sent += graph.messages_sent();

        // 2. Hazard evolution
        let (width, height) = (self.workspace.width(), self.workspace.height());
        let base = self.energy.base();
        let evolved = self
            .workspace
            .hazards_mut()
            .evolve(tick, rng, &self.config, width, height, &base)?;
        for event in evolved {
            match event {
                HazardEvent::Escalated(id) => info!(hazard = %id, tick, "Hazard escalated"),
                HazardEvent::Spawned { id, parent } => {
                    info!(hazard = %id, parent = %parent, tick, "Hazard spread")
                }
            }
            self.hazard_events.push((tick, event));
        }

        // 3. Detection
        for drone in &mut self.drones {
            if let Err(e) = drone.detect(&mut self.workspace, self.detector.as_ref(), &ctx) {
                warn!(agent = %drone.id, error = %e, "Detection aborted");
            }
        }

        // 4. Decision and announcement rounds
        for drone in &mut self.drones {
            drone.recharge(&ctx);
            if drone.ready_to_depart(&ctx) {
                self.base.send_update(drone, &ctx);
            }
        }
        let mut graph = CommGraph::of_fleet(&self.drones, self.config.comm_radius);
        let mut outbox: Vec<Announcement> = Vec::new();
        for drone in &mut self.drones {
            match drone.decide(&ctx) {
                Ok(out) => outbox.extend(out),
                Err(e) => warn!(agent = %drone.id, error = %e, "Decision aborted"),
            }
        }
        for round in 0..=self.drones.len() {
            if outbox.is_empty() {
                break;
            }
            let delivery = deliver(&outbox, &mut self.drones, &mut graph, &ctx);
            outbox = delivery.replies;
            for idx in delivery.invalidated {
                let drone = &mut self.drones[idx];
                debug!(agent = %drone.id, round, "Re-deciding after announcement");
                match drone.decide(&ctx) {
                    Ok(out) => outbox.extend(out),
                    Err(e) => warn!(agent = %drone.id, error = %e, "Decision aborted"),
                }
            }
        }
        if !outbox.is_empty() {
            debug!(undelivered = outbox.len(), "Announcement rounds exhausted");
        }
        self.messages_sent += graph.messages_sent();

        // 5. Execution
        let mut broadcasts = Vec::new();
        for drone in &mut self.drones {
            match drone.execute(&mut self.workspace, &ctx) {
                Ok(exec) => {
                    self.events.extend(exec.events);
                    self.stranded.extend(exec.stranded);
                    broadcasts.extend(exec.announcements);
                }
                Err(e) => warn!(agent = %drone.id, error = %e, "Execution aborted"),
            }
        }
        if !broadcasts.is_empty() {
            let mut graph = CommGraph::of_fleet(&self.drones, self.config.comm_radius);
            let delivery = deliver(&broadcasts, &mut self.drones, &mut graph, &ctx);
            if !delivery.replies.is_empty() {
                deliver(&delivery.replies, &mut self.drones, &mut graph, &ctx);
            }
            self.messages_sent += graph.messages_sent();
        }

        // 6. Transmission
        if tick % self.config.transmission_interval == 0 {
            for drone in &self.drones {
                self.base.receive_transmission(drone, tick);
            }
        }

        // 7. Aggregation
        self.base.analyze_interventions(self.workspace.hazards())?;

        // 8. Completion
        let coverage = self.workspace.coverage_ratio();
        let active_hazards = self.workspace.hazards().active_count();
        let complete = coverage >= 1.0 && active_hazards == 0;
        if complete && self.completed_at.is_none() {
            info!(tick, "Mission complete");
            self.completed_at = Some(tick);
        }

        self.tick += 1;
        Ok(TickReport {
            tick,
            agents: self.drones.iter().map(|d| d.status()).collect(),
            coverage,
            active_hazards,
            messages_sent: self.messages_sent,
            complete,
        })
    }

    /// Ticks until completion or `max_ticks`.
    pub fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<MissionSummary, EnvError> {
        while self.tick < self.config.max_ticks {
            let report = self.tick(rng)?;
            if report.complete {
                break;
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> MissionSummary {
        let hazards = self.workspace.hazards();
        let active = hazards.active_count();
        MissionSummary {
            ticks_run: self.tick,
            completed_at: self.completed_at,
            coverage: self.workspace.coverage_ratio(),
            hazards_total: hazards.len(),
            hazards_treated: hazards.len() - active,
            hazards_active: active,
            actions: self.events.len(),
            stranded: self.stranded.len(),
            messages_sent: self.messages_sent,
        }
    }
}
