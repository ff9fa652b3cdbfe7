//! The drone: detection, target selection and execution.
//!
//! A drone acts in three steps each tick, driven by the mission:
//!
//! 1. [`Drone::detect`] marks what it can see and records hazards in range.
//! 2. [`Drone::decide`] re-validates its target and picks a new one under
//!    the configured [`Strategy`], emitting [`Announcement`]s for peers.
//! 3. [`Drone::execute`] moves one step or treats, re-checking the energy
//!    budget before every step.
//!
//! Every movement keeps `energy >= return_cost(position)`: a step that would
//! break that bound is replaced by a step toward base.

use crate::config::{MissionConfig, Strategy};
use crate::feasibility::{Denial, EnergyModel, ENERGY_EPSILON};
use crate::grid::Workspace;
use crate::hazard::{HazardRecord, TreatmentProgress};
use crate::knowledge::{Claim, Knowledge, ZoneClaim};
use crate::telemetry::{ActionEvent, ActionKind, AgentStatus, StrandedEvent};
use serde::{Deserialize, Serialize};
use skywatch_env::{AgentId, Cell, EnvError, HazardDetector, HazardId, Position, Severity};
use tracing::{debug, info, warn};

/// Shared, read-only inputs of one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub config: &'a MissionConfig,
    pub energy: &'a EnergyModel,
    pub tick: u64,
}

/// Where a drone is heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Target {
    Explore(Cell),
    Hazard(HazardId),
    Base,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneState {
    Recharging,
    Exploring,
    MovingToHazard,
    Treating,
    Returning,
    Waiting,
}

impl DroneState {
    pub fn name(&self) -> &'static str {
        match self {
            DroneState::Recharging => "recharging",
            DroneState::Exploring => "exploring",
            DroneState::MovingToHazard => "moving_to_hazard",
            DroneState::Treating => "treating",
            DroneState::Returning => "returning",
            DroneState::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for DroneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a drone spent a tick doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Recharging,
    Moving,
    Exploring,
    Treating,
    Waiting,
}

/// Ticks spent per activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub recharging: u64,
    pub moving: u64,
    pub exploring: u64,
    pub treating: u64,
    pub waiting: u64,
}

impl ActivityCounters {
    pub fn record(&mut self, activity: Activity) {
        match activity {
            Activity::Recharging => self.recharging += 1,
            Activity::Moving => self.moving += 1,
            Activity::Exploring => self.exploring += 1,
            Activity::Treating => self.treating += 1,
            Activity::Waiting => self.waiting += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.recharging + self.moving + self.exploring + self.treating + self.waiting
    }
}

/// Messages broadcast to drones in communication range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Announcement {
    ClaimHazard { from: AgentId, hazard: HazardId, tick: u64 },
    ClaimZone { from: AgentId, center: Cell, tick: u64 },
    /// `tick` is the start tick of the lease being given up
    Release { from: AgentId, hazard: HazardId, tick: u64 },
    Treated { from: AgentId, record: HazardRecord },
}

impl Announcement {
    pub fn sender(&self) -> AgentId {
        match self {
            Announcement::ClaimHazard { from, .. }
            | Announcement::ClaimZone { from, .. }
            | Announcement::Release { from, .. }
            | Announcement::Treated { from, .. } => *from,
        }
    }
}

/// How a drone reacted to an announcement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reaction {
    /// The drone lost its target and must decide again
    pub invalidated: bool,

    /// Claim refreshed by the drone that keeps a contested target
    pub reply: Option<Announcement>,
}

/// Everything one execution step produced.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub events: Vec<ActionEvent>,
    pub announcements: Vec<Announcement>,
    pub stranded: Option<StrandedEvent>,
}

/// Outcome of target selection before it is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Plan {
    Go(Target),
    /// Charge up for a hazard that needs more energy than is stored
    Recharge,
    Idle,
}

/// A drone of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: AgentId,

    pub position: Position,

    /// Stored energy in `[0, capacity]`
    pub energy: f64,

    pub knowledge: Knowledge,

    pub target: Option<Target>,

    pub state: DroneState,

    /// Activity of the last executed tick
    pub activity: Activity,

    pub counters: ActivityCounters,

    /// Positions after every move, starting at base
    pub path: Vec<Position>,

    /// Exploration zone announced for the current exploration target
    pub zone: Option<ZoneClaim>,

    /// No target was reachable from base at the last decision
    pub base_blocked: bool,

    /// Hazards first learned in this tick's detection
    fresh: Vec<HazardId>,

    stranded: bool,
}

impl Drone {
    /// Deploys a fully charged drone at base.
    pub fn new(id: AgentId, base: Position, config: &MissionConfig, width: usize, height: usize) -> Self {
        Self {
            id,
            position: base,
            energy: config.capacity,
            knowledge: Knowledge::new(width, height),
            target: None,
            state: DroneState::Waiting,
            activity: Activity::Waiting,
            counters: ActivityCounters::default(),
            path: vec![base],
            zone: None,
            base_blocked: false,
            fresh: Vec::new(),
            stranded: false,
        }
    }

    pub fn at_base(&self, ctx: &TickContext<'_>) -> bool {
        (self.position - ctx.energy.base()).norm() <= ctx.config.at_base_radius
    }

    pub fn is_stranded(&self) -> bool {
        self.stranded
    }

    fn has_outbound_target(&self) -> bool {
        matches!(self.target, Some(Target::Explore(_)) | Some(Target::Hazard(_)))
    }

    // ----------------------------------------------------------------------
    // Detection
    // ----------------------------------------------------------------------

    /// Marks the vision disk explored and records every hazard in range.
    ///
    /// Returns the hazards this drone had never heard of before.
    pub fn detect(
        &mut self,
        workspace: &mut Workspace,
        detector: &dyn HazardDetector,
        ctx: &TickContext<'_>,
    ) -> Result<Vec<HazardId>, EnvError> {
        self.fresh.clear();
        let radius = ctx.config.vision_radius;

        workspace.mark_explored(&self.position, radius)?;
        for cell in Cell::disk(&self.position, radius) {
            self.knowledge.explored.mark(cell);
        }

        for hazard in workspace.hazards().iter() {
            if (hazard.position - self.position).norm() > radius {
                continue;
            }
            let known = self.knowledge.hazards.contains_key(&hazard.id);
            self.knowledge.observe(&hazard.record(ctx.tick));
            if !known && hazard.is_active() {
                debug!(agent = %self.id, hazard = %hazard.id, kind = %hazard.kind, "Hazard detected");
                self.fresh.push(hazard.id);
            }
        }

        let sample = workspace.sensor_signature_at(&self.position)?;
        let (alarm, intensity) = detector.detect_anomaly(&sample);
        if alarm {
            self.knowledge.note_reading(Cell::containing(&self.position), intensity);
        }

        Ok(self.fresh.clone())
    }

    // ----------------------------------------------------------------------
    // Docking
    // ----------------------------------------------------------------------

    /// Recharges while docked. Returns whether energy was added.
    pub fn recharge(&mut self, ctx: &TickContext<'_>) -> bool {
        if !self.at_base(ctx) || self.state == DroneState::Treating {
            return false;
        }
        let capacity = ctx.config.capacity;
        if self.energy >= capacity {
            return false;
        }
        self.energy = (self.energy + ctx.config.recharge_per_tick).min(capacity);
        true
    }

    /// Docked, idle and charged enough to leave.
    pub fn ready_to_depart(&self, ctx: &TickContext<'_>) -> bool {
        self.at_base(ctx)
            && !self.has_outbound_target()
            && self.energy + ENERGY_EPSILON >= ctx.config.departure_energy()
    }

    // ----------------------------------------------------------------------
    // Decision
    // ----------------------------------------------------------------------

    /// Re-validates the current target and selects the next one.
    pub fn decide(&mut self, ctx: &TickContext<'_>) -> Result<Vec<Announcement>, EnvError> {
        let mut out = Vec::new();

        if self.state == DroneState::Treating && matches!(self.target, Some(Target::Hazard(_))) {
            return Ok(out);
        }

        for id in self.knowledge.expire_claims(ctx.tick, ctx.config.claim_ttl_ticks) {
            debug!(agent = %self.id, hazard = %id, "Claim expired");
        }
        self.drop_stale_target(ctx);

        let at_base = self.at_base(ctx);
        if at_base && !self.has_outbound_target() {
            if self.energy + ENERGY_EPSILON < ctx.config.departure_energy() {
                self.state = DroneState::Recharging;
                return Ok(out);
            }
        } else if !at_base && !ctx.energy.has_reserve(self.energy, &self.position)? {
            if self.target != Some(Target::Base) {
                debug!(agent = %self.id, energy = self.energy, "No reserve left, returning");
            }
            self.set_target(Some(Target::Base), ctx, &mut out);
            return Ok(out);
        }

        let plan = match ctx.config.strategy {
            Strategy::Immediate => self.plan_immediate(ctx, at_base)?,
            Strategy::Exhaustive => self.plan_exhaustive(ctx, at_base)?,
            Strategy::Opportunistic => self.plan_opportunistic(ctx, at_base)?,
        };
        self.apply_plan(plan, at_base, ctx, &mut out);
        Ok(out)
    }

    fn drop_stale_target(&mut self, ctx: &TickContext<'_>) {
        match self.target {
            Some(Target::Hazard(id)) => {
                let active = self.knowledge.hazards.get(&id).map(|r| r.is_active()).unwrap_or(false);
                if !active || self.knowledge.claimed_by_other(id, self.id) {
                    debug!(agent = %self.id, "{}", Denial::StaleClaim(id));
                    self.target = None;
                    self.state = DroneState::Waiting;
                }
            }
            Some(Target::Explore(cell)) => {
                if self.knowledge.explored.is_marked(cell)
                    || self.knowledge.in_peer_zone(cell, self.id, ctx.config.vision_radius)
                {
                    self.target = None;
                    self.zone = None;
                }
            }
            Some(Target::Base) | None => {}
        }
    }

    fn plan_immediate(&self, ctx: &TickContext<'_>, at_base: bool) -> Result<Plan, EnvError> {
        if let Some(t @ Target::Hazard(_)) = self.target {
            if self.can_continue(t, ctx)? {
                return Ok(Plan::Go(t));
            }
        }
        if let Some(id) = self.best_hazard(ctx)? {
            return Ok(Plan::Go(Target::Hazard(id)));
        }
        // Away from base only a fresh detection turns the drone home; once
        // homing, it keeps going
        let fresh_only = !at_base && self.target != Some(Target::Base);
        if self.recharge_candidate(ctx, at_base, fresh_only)?.is_some() {
            return Ok(Plan::Recharge);
        }
        self.plan_exploration(ctx)
    }

    fn plan_exhaustive(&self, ctx: &TickContext<'_>, at_base: bool) -> Result<Plan, EnvError> {
        if let Some(t @ Target::Hazard(_)) = self.target {
            if self.can_continue(t, ctx)? {
                return Ok(Plan::Go(t));
            }
        }

        if !self.exploration_done(ctx)? {
            return match self.plan_exploration(ctx)? {
                Plan::Idle if !at_base => Ok(Plan::Recharge),
                plan => Ok(plan),
            };
        }

        if let Some(id) = self.best_hazard(ctx)? {
            return Ok(Plan::Go(Target::Hazard(id)));
        }
        if self.recharge_candidate(ctx, at_base, false)?.is_some() {
            return Ok(Plan::Recharge);
        }
        self.plan_exploration(ctx)
    }

    fn plan_opportunistic(&self, ctx: &TickContext<'_>, at_base: bool) -> Result<Plan, EnvError> {
        let best = self.best_hazard(ctx)?;

        if let Some(t @ Target::Hazard(current)) = self.target {
            if self.can_continue(t, ctx)? {
                if let Some(candidate) = best {
                    if self.severity_of(candidate) > self.severity_of(current) {
                        debug!(agent = %self.id, from = %current, to = %candidate, "Switching to more severe hazard");
                        return Ok(Plan::Go(Target::Hazard(candidate)));
                    }
                }
                return Ok(Plan::Go(t));
            }
        }

        if let Some(id) = best {
            return Ok(Plan::Go(Target::Hazard(id)));
        }
        if self.recharge_candidate(ctx, at_base, false)?.is_some() {
            return Ok(Plan::Recharge);
        }
        self.plan_exploration(ctx)
    }

    /// Keep the current frontier, or pick the nearest one.
    fn plan_exploration(&self, ctx: &TickContext<'_>) -> Result<Plan, EnvError> {
        if let Some(t @ Target::Explore(_)) = self.target {
            if self.can_continue(t, ctx)? {
                return Ok(Plan::Go(t));
            }
        }
        Ok(match self.nearest_frontier(ctx)? {
            Some(cell) => Plan::Go(Target::Explore(cell)),
            None => Plan::Idle,
        })
    }

    fn apply_plan(&mut self, plan: Plan, at_base: bool, ctx: &TickContext<'_>, out: &mut Vec<Announcement>) {
        match plan {
            Plan::Go(target) => {
                self.base_blocked = false;
                self.set_target(Some(target), ctx, out);
            }
            Plan::Recharge if at_base => {
                self.set_target(None, ctx, out);
                self.state = DroneState::Recharging;
            }
            Plan::Idle if at_base => {
                if !self.base_blocked {
                    debug!(agent = %self.id, "Nothing reachable from base");
                }
                self.base_blocked = true;
                self.set_target(None, ctx, out);
                self.state = DroneState::Waiting;
            }
            Plan::Recharge | Plan::Idle => self.set_target(Some(Target::Base), ctx, out),
        }
    }

    /// Switches target, releasing the old claim and announcing the new one.
    fn set_target(&mut self, target: Option<Target>, ctx: &TickContext<'_>, out: &mut Vec<Announcement>) {
        if self.target != target {
            if let Some(Target::Hazard(old)) = self.target {
                if let Some(claim) = self.knowledge.release_own(old, self.id) {
                    out.push(Announcement::Release {
                        from: self.id,
                        hazard: old,
                        tick: claim.since_tick,
                    });
                }
            }
            self.zone = None;

            match target {
                Some(Target::Hazard(id)) => {
                    self.knowledge.hazard_claims.insert(
                        id,
                        Claim {
                            agent: self.id,
                            since_tick: ctx.tick,
                        },
                    );
                    debug!(agent = %self.id, hazard = %id, "Claiming hazard");
                    out.push(Announcement::ClaimHazard {
                        from: self.id,
                        hazard: id,
                        tick: ctx.tick,
                    });
                }
                Some(Target::Explore(cell)) => {
                    self.zone = Some(ZoneClaim {
                        center: cell,
                        since_tick: ctx.tick,
                    });
                    out.push(Announcement::ClaimZone {
                        from: self.id,
                        center: cell,
                        tick: ctx.tick,
                    });
                }
                Some(Target::Base) | None => {}
            }
            self.target = target;
        }

        self.state = match self.target {
            Some(Target::Explore(_)) => DroneState::Exploring,
            Some(Target::Hazard(_)) => DroneState::MovingToHazard,
            Some(Target::Base) => DroneState::Returning,
            None if self.state == DroneState::Recharging => DroneState::Recharging,
            None => DroneState::Waiting,
        };
    }

    fn severity_of(&self, id: HazardId) -> Severity {
        self.knowledge
            .hazards
            .get(&id)
            .map(|r| r.severity)
            .unwrap_or(Severity::Low)
    }

    fn can_continue(&self, target: Target, ctx: &TickContext<'_>) -> Result<bool, EnvError> {
        match target {
            Target::Hazard(id) => match self.knowledge.hazards.get(&id) {
                Some(r) if r.is_active() && !self.knowledge.claimed_by_other(id, self.id) => ctx
                    .energy
                    .round_trip_affordable(
                        self.energy,
                        &self.position,
                        &r.position,
                        ctx.energy.treatment_cost(r.severity),
                    ),
                _ => Ok(false),
            },
            Target::Explore(cell) => {
                if self.knowledge.explored.is_marked(cell)
                    || self.knowledge.in_peer_zone(cell, self.id, ctx.config.vision_radius)
                {
                    return Ok(false);
                }
                ctx.energy
                    .round_trip_affordable(self.energy, &self.position, &cell.point(), 0.0)
            }
            Target::Base => Ok(true),
        }
    }

    /// Known, active, unclaimed, affordable hazard: severity first, then
    /// distance, then id.
    pub fn best_hazard(&self, ctx: &TickContext<'_>) -> Result<Option<HazardId>, EnvError> {
        let mut best: Option<(Severity, f64, HazardId)> = None;
        for id in &self.knowledge.pending {
            let Some(record) = self.knowledge.hazards.get(id) else {
                continue;
            };
            if !record.is_active() || self.knowledge.claimed_by_other(*id, self.id) {
                continue;
            }
            let cost = ctx.energy.treatment_cost(record.severity);
            if !ctx
                .energy
                .round_trip_affordable(self.energy, &self.position, &record.position, cost)?
            {
                continue;
            }
            let distance = (record.position - self.position).norm();
            let better = match best {
                None => true,
                Some((sev, dist, bid)) => {
                    record.severity > sev
                        || (record.severity == sev && distance < dist)
                        || (record.severity == sev && distance == dist && *id < bid)
                }
            };
            if better {
                best = Some((record.severity, distance, *id));
            }
        }
        Ok(best.map(|(_, _, id)| id))
    }

    /// An unclaimed hazard that is out of reach now but treatable after a
    /// full recharge.
    ///
    /// Measured from the current position when docked, from base otherwise.
    /// With `fresh_only` only hazards detected this tick qualify.
    fn recharge_candidate(
        &self,
        ctx: &TickContext<'_>,
        at_base: bool,
        fresh_only: bool,
    ) -> Result<Option<HazardId>, EnvError> {
        if at_base && self.energy + ENERGY_EPSILON >= ctx.config.capacity {
            return Ok(None);
        }
        let origin = if at_base { self.position } else { ctx.energy.base() };
        for id in &self.knowledge.pending {
            if fresh_only && !self.fresh.contains(id) {
                continue;
            }
            let Some(record) = self.knowledge.hazards.get(id) else {
                continue;
            };
            if !record.is_active() || self.knowledge.claimed_by_other(*id, self.id) {
                continue;
            }
            let cost = ctx.energy.hazard_mission_cost(&origin, &record.position, record.severity)?;
            if cost <= ctx.config.capacity + ENERGY_EPSILON {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    /// Nearest unexplored cell outside peer zones whose round trip is
    /// affordable. Ties keep the first cell in row-major order.
    pub fn nearest_frontier(&self, ctx: &TickContext<'_>) -> Result<Option<Cell>, EnvError> {
        let mut best: Option<(f64, Cell)> = None;
        for cell in self.knowledge.explored.unmarked() {
            if self.knowledge.in_peer_zone(cell, self.id, ctx.config.vision_radius) {
                continue;
            }
            let distance = cell.distance_to(&self.position);
            if matches!(best, Some((d, _)) if distance >= d) {
                continue;
            }
            if ctx
                .energy
                .round_trip_affordable(self.energy, &self.position, &cell.point(), 0.0)?
            {
                best = Some((distance, cell));
            }
        }
        Ok(best.map(|(_, cell)| cell))
    }

    /// Sampled personal coverage is complete or out of reach for good.
    pub fn exploration_done(&self, ctx: &TickContext<'_>) -> Result<bool, EnvError> {
        if self.knowledge.explored.is_complete() {
            return Ok(true);
        }
        let explored = &self.knowledge.explored;
        let possible = ctx.energy.exploration_still_possible(
            self.energy,
            &self.position,
            explored.width(),
            explored.height(),
            ctx.config.frontier_sample_step,
            |cell| explored.is_marked(cell),
        )?;
        Ok(!possible)
    }

    // ----------------------------------------------------------------------
    // Announcements
    // ----------------------------------------------------------------------

    /// Applies a peer's announcement.
    pub fn receive(&mut self, announcement: &Announcement, ctx: &TickContext<'_>) -> Reaction {
        let mut reaction = Reaction::default();
        if announcement.sender() == self.id {
            return reaction;
        }
        let keep_backup = ctx.config.strategy == Strategy::Exhaustive;

        match announcement {
            Announcement::ClaimHazard { from, hazard, tick } => {
                let theirs = Claim {
                    agent: *from,
                    since_tick: *tick,
                };
                if self.target == Some(Target::Hazard(*hazard)) && self.state != DroneState::Treating {
                    if self.id < *from {
                        let mine = Claim {
                            agent: self.id,
                            since_tick: ctx.tick,
                        };
                        self.knowledge.hazard_claims.insert(*hazard, mine);
                        reaction.reply = Some(Announcement::ClaimHazard {
                            from: self.id,
                            hazard: *hazard,
                            tick: ctx.tick,
                        });
                    } else {
                        debug!(agent = %self.id, hazard = %hazard, winner = %from, "Lost hazard claim");
                        self.knowledge.hazard_claims.insert(*hazard, theirs);
                        if !keep_backup {
                            self.knowledge.pending.retain(|p| p != hazard);
                        }
                        self.target = None;
                        self.state = DroneState::Waiting;
                        reaction.invalidated = true;
                    }
                } else if self.target == Some(Target::Hazard(*hazard)) {
                    // Already on site: the treating claim in the arena settles it
                    reaction.reply = Some(Announcement::ClaimHazard {
                        from: self.id,
                        hazard: *hazard,
                        tick: ctx.tick,
                    });
                } else {
                    self.knowledge.note_claim(*hazard, theirs, self.id, keep_backup);
                }
            }
            Announcement::ClaimZone { from, center, tick } => {
                self.knowledge.zone_claims.insert(
                    *from,
                    ZoneClaim {
                        center: *center,
                        since_tick: *tick,
                    },
                );
                if let Some(Target::Explore(cell)) = self.target {
                    if center.distance_to(&cell.point()) <= ctx.config.vision_radius {
                        if self.id < *from {
                            reaction.reply = Some(Announcement::ClaimZone {
                                from: self.id,
                                center: cell,
                                tick: ctx.tick,
                            });
                        } else {
                            self.target = None;
                            self.zone = None;
                            self.state = DroneState::Waiting;
                            reaction.invalidated = true;
                        }
                    }
                }
            }
            Announcement::Release { from, hazard, tick } => {
                self.knowledge.release_claim(
                    *hazard,
                    Claim {
                        agent: *from,
                        since_tick: *tick,
                    },
                );
            }
            Announcement::Treated { record, .. } => {
                self.knowledge.observe(record);
                if self.target == Some(Target::Hazard(record.id)) {
                    self.target = None;
                    self.state = DroneState::Waiting;
                    reaction.invalidated = true;
                }
            }
        }
        reaction
    }

    // ----------------------------------------------------------------------
    // Execution
    // ----------------------------------------------------------------------

    /// Moves one step or applies one tick of treatment.
    pub fn execute(&mut self, workspace: &mut Workspace, ctx: &TickContext<'_>) -> Result<Execution, EnvError> {
        let mut exec = Execution::default();
        let at_base = self.at_base(ctx);

        if !at_base && ctx.energy.must_return_now(self.energy, &self.position)? {
            if !self.stranded {
                let return_cost = ctx.energy.return_cost(&self.position)?;
                warn!(
                    agent = %self.id,
                    energy = self.energy,
                    return_cost,
                    "Drone stranded away from base"
                );
                self.stranded = true;
                exec.stranded = Some(StrandedEvent {
                    tick: ctx.tick,
                    agent: self.id,
                    position: self.position,
                    energy: self.energy,
                    return_cost,
                });
            }
            self.finish_tick(Activity::Waiting);
            return Ok(exec);
        }

        let activity = match self.target {
            Some(Target::Hazard(id)) => self.pursue_hazard(id, workspace, ctx, &mut exec)?,
            Some(Target::Explore(cell)) => {
                let dest = cell.point();
                let moved = self.step_toward(&dest, ActionKind::Move, workspace, ctx, &mut exec)?;
                if self.target == Some(Target::Explore(cell))
                    && (self.position - dest).norm() <= ctx.config.arrival_tolerance
                {
                    self.knowledge.explored.mark(cell);
                    workspace.mark_cell(cell);
                }
                match (moved, self.target) {
                    (true, Some(Target::Explore(_))) => Activity::Exploring,
                    (true, _) => Activity::Moving,
                    (false, _) => Activity::Waiting,
                }
            }
            Some(Target::Base) => self.head_home(workspace, ctx, &mut exec)?,
            None if self.state == DroneState::Recharging && at_base => Activity::Recharging,
            None => Activity::Waiting,
        };

        self.finish_tick(activity);
        Ok(exec)
    }

    fn finish_tick(&mut self, activity: Activity) {
        self.activity = activity;
        self.counters.record(activity);
    }

    fn head_home(
        &mut self,
        workspace: &mut Workspace,
        ctx: &TickContext<'_>,
        exec: &mut Execution,
    ) -> Result<Activity, EnvError> {
        let base = ctx.energy.base();
        let moved = self.step_toward(&base, ActionKind::Return, workspace, ctx, exec)?;
        if (self.position - base).norm() <= ctx.config.arrival_tolerance {
            self.target = None;
            self.state = if self.energy + ENERGY_EPSILON < ctx.config.departure_energy() {
                DroneState::Recharging
            } else {
                DroneState::Waiting
            };
            debug!(agent = %self.id, energy = self.energy, "Docked at base");
        }
        Ok(if moved { Activity::Moving } else { Activity::Waiting })
    }

    fn pursue_hazard(
        &mut self,
        id: HazardId,
        workspace: &mut Workspace,
        ctx: &TickContext<'_>,
        exec: &mut Execution,
    ) -> Result<Activity, EnvError> {
        let Some(record) = self.knowledge.hazards.get(&id) else {
            self.target = None;
            return Ok(Activity::Waiting);
        };
        let dest = record.position;

        if (self.position - dest).norm() > ctx.config.arrival_tolerance {
            let moved = self.step_toward(&dest, ActionKind::Move, workspace, ctx, exec)?;
            return Ok(if moved { Activity::Moving } else { Activity::Waiting });
        }

        match self.treat(id, workspace, ctx, exec) {
            Ok(activity) => Ok(activity),
            Err(Denial::StaleClaim(id)) => {
                debug!(agent = %self.id, "{}", Denial::StaleClaim(id));
                if let Some(hazard) = workspace.hazards().get(id) {
                    self.knowledge.observe(&hazard.record(ctx.tick));
                }
                if let Some(holder) = workspace.hazards().get(id).and_then(|h| h.claimant()) {
                    self.knowledge.hazard_claims.insert(
                        id,
                        Claim {
                            agent: holder,
                            since_tick: ctx.tick,
                        },
                    );
                }
                self.target = None;
                self.state = DroneState::Waiting;
                Ok(Activity::Waiting)
            }
            Err(denial) => {
                debug!(agent = %self.id, hazard = %id, "{}", denial);
                let mut out = Vec::new();
                self.set_target(Some(Target::Base), ctx, &mut out);
                exec.announcements.extend(out);
                self.head_home(workspace, ctx, exec)
            }
        }
    }

    fn treat(
        &mut self,
        id: HazardId,
        workspace: &mut Workspace,
        ctx: &TickContext<'_>,
        exec: &mut Execution,
    ) -> Result<Activity, Denial> {
        let hazard = workspace.hazards().get(id).ok_or(Denial::StaleClaim(id))?;
        if !hazard.is_active() || matches!(hazard.claimant(), Some(other) if other != self.id) {
            return Err(Denial::StaleClaim(id));
        }

        let first_tick = hazard.claimant() != Some(self.id);
        let energy_before = self.energy;
        if first_tick {
            let cost = ctx.energy.treatment_cost(hazard.severity);
            let return_cost = ctx
                .energy
                .return_cost(&self.position)
                .map_err(|_| Denial::StaleClaim(id))?;
            if self.energy - cost < return_cost - ENERGY_EPSILON {
                return Err(Denial::InsufficientEnergy {
                    need: cost + return_cost,
                    have: self.energy,
                });
            }
            self.energy = (self.energy - cost).max(0.0);
        }

        let progress =
            workspace
                .hazards_mut()
                .treat_step(id, self.id, ctx.tick, ctx.config.treatment_ticks)?;

        if first_tick {
            exec.events.push(ActionEvent {
                tick: ctx.tick,
                agent: self.id,
                kind: ActionKind::Treat,
                from: self.position,
                to: self.position,
                energy_before,
                energy_after: self.energy,
                hazard: Some(id),
            });
        }

        match progress {
            TreatmentProgress::InProgress { .. } => {
                self.state = DroneState::Treating;
            }
            TreatmentProgress::Completed => {
                let record = workspace
                    .hazards()
                    .get(id)
                    .map(|h| h.record(ctx.tick))
                    .ok_or(Denial::StaleClaim(id))?;
                info!(agent = %self.id, hazard = %id, kind = %record.kind, tick = ctx.tick, "Hazard treated");
                self.knowledge.observe(&record);
                self.knowledge.forget_work(id);
                self.target = None;
                self.state = DroneState::Waiting;
                exec.announcements.push(Announcement::Treated {
                    from: self.id,
                    record,
                });
            }
        }
        Ok(Activity::Treating)
    }

    /// One movement step of at most `speed` toward `dest`.
    ///
    /// Falls back to a step toward base when the step would leave too little
    /// energy to return. Returns whether the drone moved.
    fn step_toward(
        &mut self,
        dest: &Position,
        kind: ActionKind,
        workspace: &mut Workspace,
        ctx: &TickContext<'_>,
        exec: &mut Execution,
    ) -> Result<bool, EnvError> {
        let delta = dest - self.position;
        let distance = delta.norm();
        if distance <= f64::EPSILON {
            return Ok(false);
        }
        let step = distance.min(ctx.config.speed);
        let next = self.position + delta * (step / distance);
        let cost = step * ctx.config.unit_move_cost;

        if !ctx.energy.can_afford(self.energy, cost, &next)? {
            if kind == ActionKind::Return {
                return Ok(false);
            }
            debug!(agent = %self.id, energy = self.energy, "Step unaffordable, heading home");
            let mut out = Vec::new();
            self.set_target(Some(Target::Base), ctx, &mut out);
            exec.announcements.extend(out);
            let base = ctx.energy.base();
            return self.step_toward(&base, ActionKind::Return, workspace, ctx, exec);
        }

        let from = self.position;
        let energy_before = self.energy;
        self.position = next;
        self.energy = (self.energy - cost).max(0.0);
        self.path.push(next);
        self.mark_segment(&from, &next, workspace);

        exec.events.push(ActionEvent {
            tick: ctx.tick,
            agent: self.id,
            kind,
            from,
            to: next,
            energy_before,
            energy_after: self.energy,
            hazard: match self.target {
                Some(Target::Hazard(id)) => Some(id),
                _ => None,
            },
        });
        Ok(true)
    }

    /// Marks the cells crossed by a straight segment.
    fn mark_segment(&mut self, from: &Position, to: &Position, workspace: &mut Workspace) {
        let length = (to - from).norm();
        let samples = (length * 2.0).ceil().max(1.0) as usize;
        for i in 0..=samples {
            let p = from + (to - from) * (i as f64 / samples as f64);
            let cell = Cell::containing(&p);
            self.knowledge.explored.mark(cell);
            workspace.mark_cell(cell);
        }
    }

    /// Snapshot for telemetry.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id,
            position: self.position,
            energy: self.energy,
            state: self.state,
            activity: self.activity,
            target: self.target,
            pending: self.knowledge.pending.len(),
            known_hazards: self.knowledge.hazards.len(),
            explored: self.knowledge.explored.ratio(),
            base_blocked: self.base_blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::HazardStatus;
    use approx::assert_relative_eq;
    use skywatch_env::{FlatTerrain, HazardKind, ThresholdDetector};

    struct Fixture {
        config: MissionConfig,
        energy: EnergyModel,
        workspace: Workspace,
    }

    impl Fixture {
        fn new(config: MissionConfig, size: usize) -> Self {
            let energy = EnergyModel::new(&config, Position::new(0.0, 0.0)).unwrap();
            let workspace = Workspace::new(&FlatTerrain::new(size, size)).unwrap();
            Self {
                config,
                energy,
                workspace,
            }
        }

        fn ctx(&self, tick: u64) -> TickContext<'_> {
            TickContext {
                config: &self.config,
                energy: &self.energy,
                tick,
            }
        }

        fn drone(&self, id: u32) -> Drone {
            Drone::new(AgentId(id), Position::new(0.0, 0.0), &self.config,
                self.workspace.width(), self.workspace.height())
        }
    }

    #[test]
    fn test_detect_records_hazards_in_range() {
        let mut fx = Fixture::new(MissionConfig::default(), 50);
        fx.workspace
            .add_hazard(Position::new(5.0, 5.0), Severity::High, 3.0, 0.8, HazardKind::Radiation)
            .unwrap();
        fx.workspace
            .add_hazard(Position::new(40.0, 40.0), Severity::Low, 3.0, 0.8, HazardKind::Flood)
            .unwrap();
        let mut drone = fx.drone(0);
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 0 };

        let fresh = drone
            .detect(&mut fx.workspace, &ThresholdDetector::default(), &ctx)
            .unwrap();
        assert_eq!(fresh, vec![HazardId(0)]);
        assert_eq!(drone.knowledge.pending, vec![HazardId(0)]);
        assert!(drone.knowledge.explored.is_marked(Cell::new(7, 7)));
        assert!(fx.workspace.is_explored(Cell::new(7, 7)));

        let again = drone
            .detect(&mut fx.workspace, &ThresholdDetector::default(), &ctx)
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_no_reserve_means_return() {
        let fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(0);
        drone.position = Position::new(50.0, 0.0);
        drone.energy = 5.0; // exactly the return cost
        drone.target = Some(Target::Explore(Cell::new(60, 0)));

        let out = drone.decide(&fx.ctx(3)).unwrap();
        assert_eq!(drone.target, Some(Target::Base));
        assert_eq!(drone.state, DroneState::Returning);
        assert!(out.iter().all(|a| !matches!(a, Announcement::ClaimHazard { .. })));
    }

    #[test]
    fn test_recharging_until_departure_energy() {
        let fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(0);
        drone.energy = 50.0;
        let ctx = fx.ctx(0);

        drone.decide(&ctx).unwrap();
        assert_eq!(drone.state, DroneState::Recharging);
        assert_eq!(drone.target, None);

        for _ in 0..4 {
            assert!(drone.recharge(&ctx));
        }
        assert_relative_eq!(drone.energy, 90.0);
        assert!(drone.ready_to_depart(&ctx));
        drone.decide(&ctx).unwrap();
        assert_eq!(drone.state, DroneState::Exploring);
    }

    #[test]
    fn test_frontier_is_nearest_row_major() {
        let fx = Fixture::new(MissionConfig::default(), 20);
        let mut drone = fx.drone(0);
        drone.knowledge.explored.mark(Cell::new(0, 0));
        // (1, 0) and (0, 1) are equally near; row-major picks (1, 0)
        assert_eq!(drone.nearest_frontier(&fx.ctx(0)).unwrap(), Some(Cell::new(1, 0)));
    }

    #[test]
    fn test_frontier_skips_peer_zones() {
        let fx = Fixture::new(MissionConfig::default(), 30);
        let mut drone = fx.drone(0);
        drone.knowledge.zone_claims.insert(
            AgentId(1),
            ZoneClaim {
                center: Cell::new(0, 0),
                since_tick: 0,
            },
        );
        let cell = drone.nearest_frontier(&fx.ctx(0)).unwrap().unwrap();
        assert!(cell.distance_to(&Position::new(0.0, 0.0)) > 10.0);
    }

    #[test]
    fn test_immediate_prefers_high_severity() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        fx.workspace
            .add_hazard(Position::new(3.0, 3.0), Severity::Low, 2.0, 0.5, HazardKind::Flood)
            .unwrap();
        fx.workspace
            .add_hazard(Position::new(8.0, 0.0), Severity::High, 2.0, 0.9, HazardKind::Radiation)
            .unwrap();
        let mut drone = fx.drone(0);
        for h in fx.workspace.hazards().iter() {
            drone.knowledge.observe(&h.record(0));
        }

        let out = drone.decide(&fx.ctx(0)).unwrap();
        assert_eq!(drone.target, Some(Target::Hazard(HazardId(1))));
        assert_eq!(drone.state, DroneState::MovingToHazard);
        assert_eq!(
            out,
            vec![Announcement::ClaimHazard {
                from: AgentId(0),
                hazard: HazardId(1),
                tick: 0
            }]
        );
    }

    #[test]
    fn test_exhaustive_explores_first() {
        let config = MissionConfig {
            strategy: Strategy::Exhaustive,
            ..Default::default()
        };
        let mut fx = Fixture::new(config, 100);
        fx.workspace
            .add_hazard(Position::new(3.0, 3.0), Severity::High, 2.0, 0.5, HazardKind::Flood)
            .unwrap();
        let mut drone = fx.drone(0);
        drone.knowledge.observe(&fx.workspace.hazards().get(HazardId(0)).unwrap().record(0));

        drone.decide(&fx.ctx(0)).unwrap();
        assert!(matches!(drone.target, Some(Target::Explore(_))));

        // Once everything is explored the hazard is next
        let mut done = fx.drone(1);
        for cell in Cell::disk(&Position::new(50.0, 50.0), 200.0) {
            done.knowledge.explored.mark(cell);
        }
        done.knowledge.observe(&fx.workspace.hazards().get(HazardId(0)).unwrap().record(0));
        done.decide(&fx.ctx(0)).unwrap();
        assert_eq!(done.target, Some(Target::Hazard(HazardId(0))));
    }

    #[test]
    fn test_opportunistic_switches_to_more_severe() {
        let config = MissionConfig {
            strategy: Strategy::Opportunistic,
            ..Default::default()
        };
        let mut fx = Fixture::new(config, 100);
        fx.workspace
            .add_hazard(Position::new(30.0, 0.0), Severity::Low, 2.0, 0.5, HazardKind::Flood)
            .unwrap();
        fx.workspace
            .add_hazard(Position::new(40.0, 0.0), Severity::High, 2.0, 0.9, HazardKind::Radiation)
            .unwrap();
        let mut drone = fx.drone(0);
        drone
            .knowledge
            .observe(&fx.workspace.hazards().get(HazardId(0)).unwrap().record(0));
        drone.decide(&fx.ctx(0)).unwrap();
        assert_eq!(drone.target, Some(Target::Hazard(HazardId(0))));

        drone
            .knowledge
            .observe(&fx.workspace.hazards().get(HazardId(1)).unwrap().record(1));
        let out = drone.decide(&fx.ctx(1)).unwrap();
        assert_eq!(drone.target, Some(Target::Hazard(HazardId(1))));
        assert!(out.contains(&Announcement::Release {
            from: AgentId(0),
            hazard: HazardId(0),
            tick: 0,
        }));
        assert_eq!(drone.knowledge.claim_holder(HazardId(0)), None);
    }

    #[test]
    fn test_lower_id_keeps_contested_claim() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        fx.workspace
            .add_hazard(Position::new(5.0, 0.0), Severity::High, 2.0, 0.9, HazardKind::Radiation)
            .unwrap();
        let record = fx.workspace.hazards().get(HazardId(0)).unwrap().record(0);
        let mut low = fx.drone(0);
        let mut high = fx.drone(1);
        low.knowledge.observe(&record);
        high.knowledge.observe(&record);
        let ctx = fx.ctx(0);

        let from_low = low.decide(&ctx).unwrap();
        let from_high = high.decide(&ctx).unwrap();

        let r_high = high.receive(&from_low[0], &ctx);
        let r_low = low.receive(&from_high[0], &ctx);
        assert!(r_high.invalidated);
        assert!(!r_low.invalidated);
        assert!(r_low.reply.is_some());
        assert_eq!(low.target, Some(Target::Hazard(HazardId(0))));
        assert_eq!(high.target, None);

        high.decide(&ctx).unwrap();
        assert!(matches!(high.target, Some(Target::Explore(_))));
    }

    #[test]
    fn test_zone_claim_invalidates_nearby_exploration() {
        let fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(3);
        let ctx = fx.ctx(0);
        drone.decide(&ctx).unwrap();
        let Some(Target::Explore(cell)) = drone.target else {
            panic!("expected exploration target");
        };

        let reaction = drone.receive(
            &Announcement::ClaimZone {
                from: AgentId(1),
                center: cell,
                tick: 0,
            },
            &ctx,
        );
        assert!(reaction.invalidated);
        drone.decide(&ctx).unwrap();
        let Some(Target::Explore(next)) = drone.target else {
            panic!("expected exploration target");
        };
        assert!(next.distance_to(&cell.point()) > 10.0);
    }

    #[test]
    fn test_execute_moves_and_logs() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(0);
        drone.target = Some(Target::Explore(Cell::new(20, 0)));
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 1 };

        let exec = drone.execute(&mut fx.workspace, &ctx).unwrap();
        assert_relative_eq!(drone.position.x, 5.0);
        assert_relative_eq!(drone.energy, 99.5);
        assert_eq!(exec.events.len(), 1);
        assert_eq!(exec.events[0].kind, ActionKind::Move);
        assert_relative_eq!(exec.events[0].energy_before, 100.0);
        assert_eq!(drone.activity, Activity::Exploring);
        assert!(fx.workspace.is_explored(Cell::new(3, 0)));
    }

    #[test]
    fn test_unaffordable_step_turns_home() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(0);
        drone.position = Position::new(40.0, 0.0);
        drone.energy = 4.2; // return cost 4.0, step outward costs 0.5
        drone.target = Some(Target::Explore(Cell::new(60, 0)));
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 1 };

        let exec = drone.execute(&mut fx.workspace, &ctx).unwrap();
        assert_eq!(drone.target, Some(Target::Base));
        assert_eq!(exec.events[0].kind, ActionKind::Return);
        assert_relative_eq!(drone.position.x, 35.0);
        assert!(drone.energy >= energy.return_cost(&drone.position).unwrap());
    }

    #[test]
    fn test_treatment_completes_and_broadcasts() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        fx.workspace
            .add_hazard(Position::new(10.0, 0.0), Severity::High, 2.0, 0.9, HazardKind::Radiation)
            .unwrap();
        let mut drone = fx.drone(0);
        drone.position = Position::new(10.0, 0.0);
        drone.energy = 50.0;
        drone
            .knowledge
            .observe(&fx.workspace.hazards().get(HazardId(0)).unwrap().record(0));
        drone.target = Some(Target::Hazard(HazardId(0)));
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 7 };

        let exec = drone.execute(&mut fx.workspace, &ctx).unwrap();
        assert_relative_eq!(drone.energy, 35.0);
        assert_eq!(drone.target, None);
        assert_eq!(exec.events[0].kind, ActionKind::Treat);
        assert!(matches!(exec.announcements[0], Announcement::Treated { .. }));
        assert_eq!(
            fx.workspace.hazards().get(HazardId(0)).unwrap().status,
            HazardStatus::Treated {
                by: AgentId(0),
                tick: 7
            }
        );
        assert!(drone.knowledge.pending.is_empty());
    }

    #[test]
    fn test_stale_claim_on_site() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        fx.workspace
            .add_hazard(Position::new(10.0, 0.0), Severity::Low, 2.0, 0.9, HazardKind::Flood)
            .unwrap();
        fx.workspace
            .hazards_mut()
            .treat_step(HazardId(0), AgentId(5), 0, 1)
            .unwrap();
        let mut drone = fx.drone(0);
        drone.position = Position::new(10.0, 0.0);
        drone.knowledge.observe(&HazardRecord {
            status: HazardStatus::default(),
            ..fx.workspace.hazards().get(HazardId(0)).unwrap().record(0)
        });
        drone.target = Some(Target::Hazard(HazardId(0)));
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 2 };

        let before = drone.energy;
        drone.execute(&mut fx.workspace, &ctx).unwrap();
        assert_eq!(drone.target, None);
        assert_eq!(drone.energy, before);
        assert!(drone.knowledge.pending.is_empty());
    }

    #[test]
    fn test_stranded_recorded_once() {
        let mut fx = Fixture::new(MissionConfig::default(), 100);
        let mut drone = fx.drone(0);
        drone.position = Position::new(50.0, 0.0);
        drone.energy = 1.0;
        drone.target = Some(Target::Base);
        let config = fx.config.clone();
        let energy = fx.energy;
        let ctx = TickContext { config: &config, energy: &energy, tick: 1 };

        let first = drone.execute(&mut fx.workspace, &ctx).unwrap();
        let second = drone.execute(&mut fx.workspace, &ctx).unwrap();
        assert!(first.stranded.is_some());
        assert!(second.stranded.is_none());
        assert!(drone.is_stranded());
        assert_eq!(drone.position, Position::new(50.0, 0.0));
    }

    #[test]
    fn test_activity_counters() {
        let mut counters = ActivityCounters::default();
        counters.record(Activity::Moving);
        counters.record(Activity::Moving);
        counters.record(Activity::Treating);
        assert_eq!(counters.moving, 2);
        assert_eq!(counters.total(), 3);
    }
}
