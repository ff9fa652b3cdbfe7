//! Scenario runner - executes named missions and checks their invariants.
//!
//! Every run is held to the same safety invariants, checked as it goes:
//! - no action leaves a drone short of the energy to get home
//! - no drone ever strands
//! - ground-truth coverage never shrinks and treated hazards stay treated
//!
//! Each scenario then adds its own assertions on the finished mission.

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::HazardSeed;
use crate::scenarios::ScenarioId;
use crate::world::{BasePlacement, SimConfig, SimWorld};

use serde::{Deserialize, Serialize};
use skywatch_core::{
    ActionKind, Feasibility, HazardEvent, HazardOrigin, HazardStatus, Mission, MissionConfig, Strategy, TickReport,
    ENERGY_EPSILON,
};
use skywatch_env::{AgentId, Cell, EnvError, HazardId, HazardKind, Position, Severity};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Tick at which full coverage with no active hazard was reached
    pub completed_at: Option<u64>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Ground-truth coverage at the end
    pub coverage: f64,

    pub hazards_total: usize,
    pub hazards_treated: usize,

    /// Energy-consuming actions
    pub actions: usize,

    /// Treatment ticks
    pub treat_actions: usize,

    /// Point-to-point messages between drones
    pub messages_sent: u64,

    pub stranded: usize,

    /// Interventions still open at the end
    pub interventions: usize,
}

/// Per-tick invariant checks.
#[derive(Debug, Default)]
struct Monitor {
    last_coverage: f64,
    treated: BTreeSet<HazardId>,
    first_full_coverage: Option<u64>,
}

impl Monitor {
    fn observe(&mut self, report: &TickReport, mission: &Mission) -> Result<(), String> {
        if report.coverage + ENERGY_EPSILON < self.last_coverage {
            return Err(format!(
                "coverage shrank from {:.4} to {:.4} at tick {}",
                self.last_coverage, report.coverage, report.tick
            ));
        }
        self.last_coverage = report.coverage;
        if report.coverage >= 1.0 && self.first_full_coverage.is_none() {
            self.first_full_coverage = Some(report.tick);
        }

        let treated: BTreeSet<HazardId> = mission
            .workspace()
            .hazards()
            .iter()
            .filter(|h| !h.is_active())
            .map(|h| h.id)
            .collect();
        if let Some(id) = self.treated.difference(&treated).next() {
            return Err(format!("{} reverted to active at tick {}", id, report.tick));
        }
        self.treated = treated;

        let capacity = mission.config().capacity;
        for agent in &report.agents {
            if agent.energy < -ENERGY_EPSILON || agent.energy > capacity + ENERGY_EPSILON {
                return Err(format!(
                    "{} energy {:.3} outside [0, {}] at tick {}",
                    agent.id, agent.energy, capacity, report.tick
                ));
            }
        }
        Ok(())
    }
}

/// Every action must leave enough energy to fly home from where it ends.
pub fn check_energy_safety(mission: &Mission) -> Result<(), String> {
    let energy = mission.energy_model();
    for event in mission.events() {
        let home = energy.return_cost(&event.to).map_err(|e| e.to_string())?;
        if event.energy_after < home - ENERGY_EPSILON {
            return Err(format!(
                "{} {:?} at tick {} left {:.4} energy, {:.4} needed to return",
                event.agent, event.kind, event.tick, event.energy_after, home
            ));
        }
    }
    if let Some(s) = mission.stranded_events().first() {
        return Err(format!(
            "{} stranded at tick {} with {:.4} energy, {:.4} needed",
            s.agent, s.tick, s.energy, s.return_cost
        ));
    }
    Ok(())
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Fleet size override for open-field runs
    fleet_size: Option<usize>,

    /// Strategy override for open-field runs
    strategy: Option<Strategy>,

    /// Tick limit override
    max_ticks: Option<u64>,
}

impl ScenarioRunner {
    /// Creates a new runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fleet_size: None,
            strategy: None,
            max_ticks: None,
        }
    }

    pub fn with_fleet_size(mut self, fleet_size: usize) -> Self {
        self.fleet_size = Some(fleet_size);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.drive(scenario.name(), Some(scenario), self.setup(scenario), false).0
    }

    /// Runs a scenario and records sampled frames for export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        self.drive(scenario.name(), Some(scenario), self.setup(scenario), true)
    }

    /// Runs a user-supplied configuration with only the common invariants.
    pub fn run_custom(&self, config: SimConfig) -> (ScenarioResult, SimExport) {
        let config = self.open_field(config);
        self.drive("custom", None, SimWorld::new(config), true)
    }

    fn mission_config(&self, mission: MissionConfig) -> MissionConfig {
        MissionConfig {
            seed: self.seed,
            max_ticks: self.max_ticks.unwrap_or(mission.max_ticks),
            ..mission
        }
    }

    fn open_field(&self, config: SimConfig) -> SimConfig {
        let mut mission = self.mission_config(config.mission.clone());
        if let Some(n) = self.fleet_size {
            mission.fleet_size = n;
        }
        if let Some(strategy) = self.strategy {
            mission.strategy = strategy;
        }
        SimConfig { mission, ..config }
    }

    fn setup(&self, scenario: ScenarioId) -> Result<SimWorld, EnvError> {
        match scenario {
            ScenarioId::Baseline => SimWorld::new(self.open_field(SimConfig::default())),
            ScenarioId::Exhaustive | ScenarioId::Opportunistic => {
                let strategy = if scenario == ScenarioId::Exhaustive {
                    Strategy::Exhaustive
                } else {
                    Strategy::Opportunistic
                };
                let config = SimConfig::default();
                let mission = MissionConfig {
                    strategy,
                    ..self.mission_config(config.mission.clone())
                };
                SimWorld::new(SimConfig { mission, ..config })
            }
            ScenarioId::Wildfire => {
                let config = SimConfig::default();
                let mission = MissionConfig {
                    escalation_chance: 0.01,
                    spread_chance: 0.01,
                    ..config.mission.clone()
                };
                SimWorld::new(self.open_field(SimConfig { mission, ..config }))
            }
            ScenarioId::LoneRadiation => {
                let config = SimConfig {
                    procedural_terrain: false,
                    mission: self.mission_config(MissionConfig {
                        unit_move_cost: 0.5,
                        max_ticks: 120,
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                let hazards = [
                    HazardSeed::new(18.0, 10.0, Severity::High, HazardKind::Radiation),
                    HazardSeed::new(90.0, 90.0, Severity::High, HazardKind::Radiation),
                ];
                SimWorld::with_hazards(config, Position::new(10.0, 10.0), &hazards)
            }
            ScenarioId::RelayGossip => {
                let config = SimConfig {
                    width: 60,
                    height: 60,
                    mission: MissionConfig {
                        fleet_size: 3,
                        max_ticks: 1,
                        seed: self.seed,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let hazards = [HazardSeed::new(50.0, 50.0, Severity::High, HazardKind::Flood)];
                let mut world = SimWorld::with_hazards(config, Position::new(30.0, 30.0), &hazards)?;

                let mission = world.mission_mut();
                let record = match mission.workspace().hazards().get(HazardId(0)) {
                    Some(h) => h.record(0),
                    None => return Err(EnvError::config("relay hazard missing")),
                };
                for (drone, x) in mission.drones_mut().iter_mut().zip([10.0, 18.0, 26.0]) {
                    drone.position = Position::new(x, 30.0);
                }
                mission.drones_mut()[0].knowledge.observe(&record);
                Ok(world)
            }
            ScenarioId::LastReserve => {
                let config = SimConfig {
                    width: 60,
                    height: 60,
                    mission: self.mission_config(MissionConfig {
                        fleet_size: 1,
                        max_ticks: 200,
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                let hazards = [HazardSeed::new(44.0, 40.0, Severity::Low, HazardKind::MeteorShower)];
                let mut world = SimWorld::with_hazards(config, Position::new(0.0, 0.0), &hazards)?;

                let mission = world.mission_mut();
                let spot = Position::new(40.0, 40.0);
                let reserve = mission.energy_model().return_cost(&spot)?;
                let drone = &mut mission.drones_mut()[0];
                drone.position = spot;
                drone.energy = reserve;
                Ok(world)
            }
            ScenarioId::FullCoverage => {
                let config = SimConfig {
                    width: 20,
                    height: 20,
                    hazard_count: 0,
                    procedural_terrain: false,
                    base: BasePlacement::Fixed { x: 1.0, y: 1.0 },
                    mission: self.mission_config(MissionConfig {
                        fleet_size: 2,
                        max_ticks: 150,
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                SimWorld::new(config)
            }
            ScenarioId::ClaimConflict => {
                let config = SimConfig {
                    width: 30,
                    height: 30,
                    mission: self.mission_config(MissionConfig {
                        fleet_size: 2,
                        max_ticks: 40,
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                let hazards = [HazardSeed::new(8.0, 2.0, Severity::Low, HazardKind::Radiation)];
                SimWorld::with_hazards(config, Position::new(2.0, 2.0), &hazards)
            }
        }
    }

    fn drive(
        &self,
        name: &str,
        scenario: Option<ScenarioId>,
        world: Result<SimWorld, EnvError>,
        record: bool,
    ) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(name, self.seed);
        let mut world = match world {
            Ok(world) => world,
            Err(e) => {
                let reason = format!("setup failed: {}", e);
                warn!(scenario = name, %reason, "Scenario aborted");
                export.failure_reason = Some(reason.clone());
                return (self.failed(name, reason), export);
            }
        };

        info!(scenario = name, seed = world.config.seed(), "Running scenario");
        let max_ticks = world.config.mission.max_ticks;
        let interval = world.config.export_interval;
        let mut monitor = Monitor::default();
        let mut failure = None;

        while world.mission().current_tick() < max_ticks {
            let report = match world.tick() {
                Ok(report) => report,
                Err(e) => {
                    failure = Some(format!("tick {} failed: {}", world.mission().current_tick(), e));
                    break;
                }
            };
            if let Err(reason) = monitor.observe(&report, world.mission()) {
                failure = Some(reason);
                break;
            }
            let complete = report.complete;
            if report.tick % 25 == 0 {
                debug!(
                    tick = report.tick,
                    coverage = report.coverage,
                    active = report.active_hazards,
                    "Progress"
                );
            }
            if record && (report.tick % interval == 0 || complete) {
                export.add_frame(SimFrame::capture(report, world.mission()));
            }
            if complete {
                break;
            }
        }

        let mission = world.mission();
        if failure.is_none() {
            failure = check_energy_safety(mission).err();
        }
        if failure.is_none() {
            if let Some(scenario) = scenario {
                failure = verify(scenario, mission, &monitor).err();
            }
        }

        let passed = failure.is_none();
        export.finalize(mission, passed, failure.clone());
        let summary = mission.summary();
        let result = ScenarioResult {
            scenario: name.to_string(),
            seed: self.seed,
            passed,
            total_ticks: summary.ticks_run,
            completed_at: summary.completed_at,
            failure_reason: failure,
            metrics: ScenarioMetrics {
                coverage: summary.coverage,
                hazards_total: summary.hazards_total,
                hazards_treated: summary.hazards_treated,
                actions: summary.actions,
                treat_actions: mission.events().iter().filter(|e| e.kind == ActionKind::Treat).count(),
                messages_sent: summary.messages_sent,
                stranded: summary.stranded,
                interventions: mission.base_station().interventions().len(),
            },
        };
        (result, export)
    }

    fn failed(&self, name: &str, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario: name.to_string(),
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            completed_at: None,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

fn treated_by(mission: &Mission, id: HazardId) -> Option<AgentId> {
    match mission.workspace().hazards().get(id).map(|h| h.status) {
        Some(HazardStatus::Treated { by, .. }) => Some(by),
        _ => None,
    }
}

/// Scenario-specific assertions on a finished mission.
fn verify(scenario: ScenarioId, mission: &Mission, monitor: &Monitor) -> Result<(), String> {
    match scenario {
        ScenarioId::Baseline | ScenarioId::Exhaustive | ScenarioId::Opportunistic => Ok(()),
        ScenarioId::LoneRadiation => {
            let energy = mission.energy_model();
            let near = Position::new(18.0, 10.0);
            let far = Position::new(90.0, 90.0);
            let near_class = energy.classify_from_base(&near, Severity::High).map_err(|e| e.to_string())?;
            let far_class = energy.classify_from_base(&far, Severity::High).map_err(|e| e.to_string())?;
            if near_class != Feasibility::Feasible || far_class != Feasibility::Infeasible {
                return Err(format!("classified near={:?} far={:?}", near_class, far_class));
            }
            if mission
                .events()
                .iter()
                .any(|e| e.kind == ActionKind::Treat && e.hazard == Some(HazardId(1)))
            {
                return Err("infeasible hazard was treated".into());
            }
            if treated_by(mission, HazardId(0)).is_none() {
                return Err("reachable hazard left untreated".into());
            }
            let station = mission.base_station();
            if !station.history().contains(&Cell::containing(&near)) {
                return Err("reachable hazard never reported to base".into());
            }
            if station.interventions().iter().any(|d| d.hazard == HazardId(0)) {
                return Err("treated hazard still on the intervention list".into());
            }
            let mislabelled = mission
                .base_station()
                .interventions()
                .iter()
                .any(|d| d.hazard == HazardId(1) && d.feasibility != Feasibility::Infeasible);
            if mislabelled {
                return Err("far hazard listed as feasible".into());
            }
            Ok(())
        }
        ScenarioId::RelayGossip => {
            let missing: Vec<String> = mission
                .drones()
                .iter()
                .filter(|d| !d.knowledge.hazards.contains_key(&HazardId(0)))
                .map(|d| d.id.to_string())
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(format!("hazard not relayed to {}", missing.join(", ")))
            }
        }
        ScenarioId::LastReserve => {
            let first = mission
                .events()
                .first()
                .ok_or_else(|| "drone never moved".to_string())?;
            if first.tick != 0 || first.kind != ActionKind::Return {
                return Err(format!("first action was {:?} at tick {}", first.kind, first.tick));
            }
            let docked = mission
                .events()
                .iter()
                .position(|e| e.kind == ActionKind::Move)
                .unwrap_or(mission.events().len());
            if mission.events()[..docked].iter().any(|e| e.kind == ActionKind::Treat) {
                return Err("treated before recharging".into());
            }
            Ok(())
        }
        ScenarioId::FullCoverage => match (monitor.first_full_coverage, mission.completed_at()) {
            (Some(full), Some(done)) if full == done => Ok(()),
            (full, done) => Err(format!(
                "full coverage at {:?} but completion at {:?}",
                full, done
            )),
        },
        ScenarioId::Wildfire => {
            for (tick, event) in mission.hazard_events() {
                match event {
                    HazardEvent::Escalated(id) => {
                        let hazard = mission
                            .workspace()
                            .hazards()
                            .get(*id)
                            .ok_or_else(|| format!("escalated unknown {}", id))?;
                        if hazard.severity != Severity::High {
                            return Err(format!("{} escalated at tick {} but is not high", id, tick));
                        }
                    }
                    HazardEvent::Spawned { id, parent } => {
                        let hazard = mission
                            .workspace()
                            .hazards()
                            .get(*id)
                            .ok_or_else(|| format!("spawned unknown {}", id))?;
                        if hazard.origin != (HazardOrigin::Spawned { parent: *parent }) {
                            return Err(format!("{} has wrong origin", id));
                        }
                        if hazard.spawn_tick != *tick {
                            return Err(format!("{} spawn tick mismatch", id));
                        }
                    }
                }
            }
            Ok(())
        }
        ScenarioId::ClaimConflict => {
            let treaters: BTreeSet<AgentId> = mission
                .events()
                .iter()
                .filter(|e| e.kind == ActionKind::Treat && e.hazard == Some(HazardId(0)))
                .map(|e| e.agent)
                .collect();
            if treaters.len() > 1 {
                return Err(format!("{} drones treated the same hazard", treaters.len()));
            }
            match treated_by(mission, HazardId(0)) {
                Some(AgentId(0)) => Ok(()),
                other => Err(format!("contested hazard treated by {:?}", other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> ScenarioRunner {
        ScenarioRunner::new(42).with_max_ticks(60)
    }

    #[test]
    fn test_baseline_scenario() {
        let result = quick().run(ScenarioId::Baseline);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.coverage > 0.0);
        assert_eq!(result.metrics.stranded, 0);
    }

    #[test]
    fn test_strategy_scenarios_stay_safe() {
        for scenario in [ScenarioId::Exhaustive, ScenarioId::Opportunistic] {
            let result = quick().run(scenario);
            assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
        }
    }

    #[test]
    fn test_lone_radiation_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::LoneRadiation);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.hazards_treated, 1);
    }

    #[test]
    fn test_reachable_high_radiation_leaves_worklist() {
        let runner = ScenarioRunner::new(42);
        let (result, export) = runner.run_with_export(ScenarioId::LoneRadiation);
        assert!(result.passed, "{:?}", result.failure_reason);

        let near = export.frames.last().unwrap().hazards.iter().find(|h| h.id == HazardId(0)).unwrap();
        assert_eq!(near.severity, Severity::High);
        assert!(near.treated);
        assert!(export
            .events
            .iter()
            .any(|e| e.kind == ActionKind::Treat && e.hazard == Some(HazardId(0))));
        assert!(export.interventions.iter().all(|d| d.hazard != HazardId(0)));
        assert!(export
            .interventions
            .iter()
            .filter(|d| d.hazard == HazardId(1))
            .all(|d| d.feasibility == Feasibility::Infeasible));
    }

    #[test]
    fn test_relay_gossip_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::RelayGossip);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.total_ticks, 1);
    }

    #[test]
    fn test_last_reserve_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::LastReserve);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_full_coverage_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::FullCoverage);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.completed_at.is_some());
        assert_eq!(result.metrics.coverage, 1.0);
    }

    #[test]
    fn test_wildfire_scenario() {
        let result = quick().run(ScenarioId::Wildfire);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_claim_conflict_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ClaimConflict);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.treat_actions >= 1);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = quick().with_max_ticks(30).run(ScenarioId::Opportunistic);
        let b = quick().with_max_ticks(30).run(ScenarioId::Opportunistic);
        assert_eq!(a.metrics.actions, b.metrics.actions);
        assert_eq!(a.metrics.messages_sent, b.metrics.messages_sent);
        assert_eq!(a.metrics.coverage, b.metrics.coverage);
    }

    #[test]
    fn test_export_records_frames() {
        let (result, export) = ScenarioRunner::new(7).with_max_ticks(25).run_with_export(ScenarioId::Baseline);
        assert!(result.passed);
        assert_eq!(export.frames.len(), 3);
        assert_eq!(export.frames[0].tick, 0);
        assert_eq!(export.events.len(), result.metrics.actions);
        assert!(export.summary.is_some());
    }

    #[test]
    fn test_setup_failure_is_reported() {
        let config = SimConfig {
            width: 0,
            ..Default::default()
        };
        let (result, export) = ScenarioRunner::new(1).run_custom(config);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().starts_with("setup failed"));
        assert!(export.failure_reason.is_some());
    }
}
