//! Hazard entities, their snapshots and the hazard arena.
//!
//! The canonical hazards live in a [`HazardField`], an index-addressed arena
//! owned by the workspace grid. Drones and the base station never hold
//! references into it: they keep [`HazardRecord`] snapshots tagged with the
//! tick they were observed, and reconcile conflicting snapshots with
//! [`HazardRecord::merge_from`].
//!
//! # Lifecycle
//!
//! `Active -> Treated` is the only transition, and it is terminal. A treated
//! hazard stays in the arena for audit and visualization but never evolves
//! or spreads again.

use crate::config::MissionConfig;
use crate::feasibility::Denial;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};
use skywatch_env::{
    check_position, check_radius, AgentId, Cell, EnvError, HazardId, HazardKind, Position,
    Severity,
};
use std::cmp::Ordering;

/// Radius cap for spreading radiation
const RADIATION_MAX_RADIUS: f64 = 20.0;
/// Radius cap for an expanding flood
const FLOOD_MAX_RADIUS: f64 = 18.0;
/// Radius floor for a receding flood
const FLOOD_MIN_RADIUS: f64 = 5.0;
/// Tick at which floods start to recede
const FLOOD_RECESSION_TICK: u64 = 100;

/// Lifecycle state of a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HazardStatus {
    Active { treating: Option<AgentId> },
    Treated { by: AgentId, tick: u64 },
}

impl HazardStatus {
    pub fn is_treated(&self) -> bool {
        matches!(self, HazardStatus::Treated { .. })
    }
}

impl Default for HazardStatus {
    fn default() -> Self {
        HazardStatus::Active { treating: None }
    }
}

/// Where a hazard came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum HazardOrigin {
    Seeded,
    Spawned { parent: HazardId },
}

/// A canonical hazard zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub id: HazardId,

    pub position: Position,

    pub severity: Severity,

    /// Effect radius of the sensor signature
    pub radius: f64,

    /// Field strength in `[0, 1]`
    pub strength: f64,

    pub kind: HazardKind,

    pub status: HazardStatus,

    pub spawn_tick: u64,

    pub origin: HazardOrigin,

    /// Ticks of treatment already applied by the current claimant
    pub progress: u32,
}

impl Hazard {
    pub fn cell(&self) -> Cell {
        Cell::containing(&self.position)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_treated()
    }

    /// The drone currently treating this hazard, if any.
    pub fn claimant(&self) -> Option<AgentId> {
        match self.status {
            HazardStatus::Active { treating } => treating,
            HazardStatus::Treated { .. } => None,
        }
    }

    /// Gaussian field influence at `pos`.
    pub fn influence_at(&self, pos: &Position) -> f64 {
        let d2 = (self.position - pos).norm_squared();
        if self.radius <= 0.0 {
            return if d2 == 0.0 { self.strength } else { 0.0 };
        }
        self.strength * (-d2 / (2.0 * self.radius * self.radius)).exp()
    }

    /// Per-channel contribution to a sensor reading at `pos`:
    /// `[temperature, radiation, meteorites, flooding]`.
    pub fn signature_at(&self, pos: &Position) -> [f64; 4] {
        let i = self.influence_at(pos);
        match self.kind {
            HazardKind::MeteorShower => [10.0 * i, 0.0, i, 0.0],
            HazardKind::Radiation => [15.0 * i, i, 0.0, 0.0],
            HazardKind::Flood => [5.0 * i, 0.0, 0.3 * i, i],
        }
    }

    /// Kind-specific drift of strength and radius.
    pub fn drift(&mut self, tick: u64) {
        match self.kind {
            HazardKind::MeteorShower => {
                let variation = (tick as f64 * 0.1).sin() * 0.15;
                self.strength = (self.strength + variation).clamp(0.3, 1.0);
            }
            HazardKind::Radiation => {
                if tick % 20 == 0 {
                    self.radius = (self.radius + 0.2).min(RADIATION_MAX_RADIUS);
                    self.strength = (self.strength - 0.01).max(0.4);
                }
            }
            HazardKind::Flood => {
                if tick < FLOOD_RECESSION_TICK {
                    if tick % 15 == 0 {
                        self.radius = (self.radius + 0.5).min(FLOOD_MAX_RADIUS);
                        self.strength = (self.strength + 0.02).min(1.0);
                    }
                } else if tick % 25 == 0 {
                    self.radius = (self.radius - 0.3).max(FLOOD_MIN_RADIUS);
                    self.strength = (self.strength - 0.015).max(0.3);
                }
            }
        }
    }

    /// Snapshot of this hazard as observed at `tick`.
    pub fn record(&self, tick: u64) -> HazardRecord {
        HazardRecord {
            id: self.id,
            cell: self.cell(),
            position: self.position,
            kind: self.kind,
            severity: self.severity,
            radius: self.radius,
            strength: self.strength,
            status: self.status,
            observed_tick: tick,
        }
    }
}

/// A drone's or the base station's view of a hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardRecord {
    pub id: HazardId,
    pub cell: Cell,
    pub position: Position,
    pub kind: HazardKind,
    pub severity: Severity,
    pub radius: f64,
    pub strength: f64,
    pub status: HazardStatus,
    pub observed_tick: u64,
}

impl HazardRecord {
    pub fn is_active(&self) -> bool {
        !self.status.is_treated()
    }

    /// Orders two snapshots of the same hazard.
    ///
    /// Treated beats active, then the later observation wins, then the higher
    /// severity, then the larger radius.
    pub fn dominance(&self, other: &HazardRecord) -> Ordering {
        self.status
            .is_treated()
            .cmp(&other.status.is_treated())
            .then(self.observed_tick.cmp(&other.observed_tick))
            .then(self.severity.cmp(&other.severity))
            .then(self.radius.total_cmp(&other.radius))
    }

    /// True when `self` is a strictly better view than `other`.
    pub fn dominates(&self, other: &HazardRecord) -> bool {
        self.dominance(other) == Ordering::Greater
    }

    /// Replaces `self` with `other` if `other` dominates. Returns whether
    /// anything changed. Merging the same record twice is a no-op.
    pub fn merge_from(&mut self, other: &HazardRecord) -> bool {
        if other.dominates(self) {
            *self = other.clone();
            true
        } else {
            false
        }
    }
}

/// Outcome of one tick of treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentProgress {
    InProgress { done: u32, required: u32 },
    Completed,
}

/// Something the evolution phase did to the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HazardEvent {
    Escalated(HazardId),
    Spawned { id: HazardId, parent: HazardId },
}

/// Index-addressed arena of every hazard that ever existed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HazardField {
    hazards: Vec<Hazard>,
}

impl HazardField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hazard and returns its id.
    pub fn add(
        &mut self,
        position: Position,
        severity: Severity,
        radius: f64,
        strength: f64,
        kind: HazardKind,
        tick: u64,
        origin: HazardOrigin,
    ) -> Result<HazardId, EnvError> {
        check_position(&position, "hazard")?;
        check_radius(radius, "hazard")?;
        if !strength.is_finite() {
            return Err(EnvError::geometry(format!("hazard strength {} is invalid", strength)));
        }

        let id = HazardId(self.hazards.len());
        self.hazards.push(Hazard {
            id,
            position,
            severity,
            radius,
            strength: strength.clamp(0.0, 1.0),
            kind,
            status: HazardStatus::default(),
            spawn_tick: tick,
            origin,
            progress: 0,
        });
        Ok(id)
    }

    pub fn get(&self, id: HazardId) -> Option<&Hazard> {
        self.hazards.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hazard> {
        self.hazards.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Hazard> {
        self.hazards.iter().filter(|h| h.is_active())
    }

    pub fn len(&self) -> usize {
        self.hazards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// The hazard whose position falls in `cell`, if any.
    pub fn at_cell(&self, cell: Cell) -> Option<HazardId> {
        self.hazards.iter().find(|h| h.cell() == cell).map(|h| h.id)
    }

    /// Applies one tick of treatment by `agent`.
    ///
    /// The first call takes the treating claim. Fails with `StaleClaim` when
    /// the hazard is already treated or held by another drone.
    pub fn treat_step(
        &mut self,
        id: HazardId,
        agent: AgentId,
        tick: u64,
        required_ticks: u32,
    ) -> Result<TreatmentProgress, Denial> {
        let hazard = self.hazards.get_mut(id.0).ok_or(Denial::StaleClaim(id))?;
        match hazard.status {
            HazardStatus::Treated { .. } => return Err(Denial::StaleClaim(id)),
            HazardStatus::Active { treating: Some(other) } if other != agent => {
                return Err(Denial::StaleClaim(id))
            }
            HazardStatus::Active { treating: None } => hazard.progress = 0,
            HazardStatus::Active { .. } => {}
        }

        hazard.status = HazardStatus::Active { treating: Some(agent) };
        hazard.progress += 1;
        let required = required_ticks.max(1);
        if hazard.progress >= required {
            hazard.status = HazardStatus::Treated { by: agent, tick };
            Ok(TreatmentProgress::Completed)
        } else {
            Ok(TreatmentProgress::InProgress {
                done: hazard.progress,
                required,
            })
        }
    }

    /// Drops `agent`'s treating claim, if it holds one.
    pub fn release(&mut self, id: HazardId, agent: AgentId) {
        if let Some(hazard) = self.hazards.get_mut(id.0) {
            if hazard.status == (HazardStatus::Active { treating: Some(agent) }) {
                hazard.status = HazardStatus::Active { treating: None };
                hazard.progress = 0;
            }
        }
    }

    /// Advances every active hazard by one tick.
    ///
    /// Low hazards may escalate, high hazards may spawn a low neighbour of
    /// the same kind, then every pre-existing active hazard drifts. Hazards
    /// spawned here are appended after the pass and first evolve next tick.
    pub fn evolve<R: Rng + ?Sized>(
        &mut self,
        tick: u64,
        rng: &mut R,
        config: &MissionConfig,
        width: usize,
        height: usize,
        base: &Position,
    ) -> Result<Vec<HazardEvent>, EnvError> {
        let escalate = Bernoulli::new(config.escalation_chance)
            .map_err(|e| EnvError::config(format!("escalation_chance: {}", e)))?;
        let spread = Bernoulli::new(config.spread_chance)
            .map_err(|e| EnvError::config(format!("spread_chance: {}", e)))?;

        let mut events = Vec::new();
        let mut spawns: Vec<(Cell, HazardId)> = Vec::new();
        let existing = self.hazards.len();

        for idx in 0..existing {
            if !self.hazards[idx].is_active() {
                continue;
            }

            if self.hazards[idx].severity == Severity::Low && escalate.sample(rng) {
                self.hazards[idx].severity = Severity::High;
                events.push(HazardEvent::Escalated(HazardId(idx)));
            }

            if self.hazards[idx].severity == Severity::High && spread.sample(rng) {
                let candidates = self.free_neighbours(idx, &spawns, config, width, height, base);
                if let Some(cell) = candidates.choose(rng) {
                    spawns.push((*cell, HazardId(idx)));
                }
            }

            self.hazards[idx].drift(tick);
        }

        for (cell, parent) in spawns {
            let (kind, radius, strength) = {
                let p = &self.hazards[parent.0];
                (p.kind, p.radius, p.strength * 0.5)
            };
            let id = self.add(
                cell.point(),
                Severity::Low,
                radius,
                strength,
                kind,
                tick,
                HazardOrigin::Spawned { parent },
            )?;
            events.push(HazardEvent::Spawned { id, parent });
        }

        Ok(events)
    }

    /// In-bounds, unoccupied neighbour cells far enough from base.
    fn free_neighbours(
        &self,
        idx: usize,
        pending: &[(Cell, HazardId)],
        config: &MissionConfig,
        width: usize,
        height: usize,
        base: &Position,
    ) -> Vec<Cell> {
        let center = self.hazards[idx].cell();
        let mut cells = Vec::with_capacity(8);
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let cell = Cell::new(center.x + dx, center.y + dy);
                if cell.x < 0 || cell.y < 0 || cell.x as usize >= width || cell.y as usize >= height {
                    continue;
                }
                if cell.distance_to(base) < config.min_distance_from_base {
                    continue;
                }
                let occupied = self.hazards.iter().any(|h| h.cell() == cell)
                    || pending.iter().any(|(c, _)| *c == cell);
                if !occupied {
                    cells.push(cell);
                }
            }
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn field_with(kind: HazardKind, severity: Severity) -> HazardField {
        let mut field = HazardField::new();
        field
            .add(Position::new(50.0, 50.0), severity, 10.0, 0.6, kind, 0, HazardOrigin::Seeded)
            .unwrap();
        field
    }

    fn record(tick: u64, severity: Severity, radius: f64, treated: bool) -> HazardRecord {
        HazardRecord {
            id: HazardId(0),
            cell: Cell::new(5, 5),
            position: Position::new(5.0, 5.0),
            kind: HazardKind::Radiation,
            severity,
            radius,
            strength: 0.5,
            status: if treated {
                HazardStatus::Treated { by: AgentId(0), tick }
            } else {
                HazardStatus::default()
            },
            observed_tick: tick,
        }
    }

    #[test]
    fn test_influence_is_gaussian() {
        let field = field_with(HazardKind::Radiation, Severity::High);
        let h = field.get(HazardId(0)).unwrap();
        assert_relative_eq!(h.influence_at(&Position::new(50.0, 50.0)), 0.6);
        let one_sigma = h.influence_at(&Position::new(60.0, 50.0));
        assert_relative_eq!(one_sigma, 0.6 * (-0.5f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_radiation_drift() {
        let mut field = field_with(HazardKind::Radiation, Severity::Low);
        let h = &mut field.hazards[0];
        h.drift(19);
        assert_eq!(h.radius, 10.0);
        h.drift(20);
        assert_relative_eq!(h.radius, 10.2);
        assert_relative_eq!(h.strength, 0.59);
    }

    #[test]
    fn test_flood_expands_then_recedes() {
        let mut field = field_with(HazardKind::Flood, Severity::Low);
        let h = &mut field.hazards[0];
        h.drift(15);
        assert_relative_eq!(h.radius, 10.5);
        assert_relative_eq!(h.strength, 0.62);
        h.drift(100);
        assert_relative_eq!(h.radius, 10.2);
        assert_relative_eq!(h.strength, 0.605);
    }

    #[test]
    fn test_meteor_strength_stays_clamped() {
        let mut field = field_with(HazardKind::MeteorShower, Severity::Low);
        for tick in 0..500 {
            field.hazards[0].drift(tick);
            let s = field.hazards[0].strength;
            assert!((0.3..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_dominance_order() {
        let active_late = record(10, Severity::Low, 5.0, false);
        let treated_early = record(3, Severity::Low, 5.0, true);
        assert!(treated_early.dominates(&active_late));

        let early = record(3, Severity::High, 9.0, false);
        assert!(active_late.dominates(&early));

        let low = record(3, Severity::Low, 9.0, false);
        assert!(early.dominates(&low));

        let small = record(3, Severity::High, 4.0, false);
        assert!(early.dominates(&small));
        assert!(!early.dominates(&early.clone()));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut mine = record(3, Severity::Low, 5.0, false);
        let theirs = record(8, Severity::High, 5.0, false);
        assert!(mine.merge_from(&theirs));
        assert!(!mine.merge_from(&theirs));
        assert_eq!(mine, theirs);
    }

    #[test]
    fn test_treatment_claims_and_completes() {
        let mut field = field_with(HazardKind::Radiation, Severity::High);
        let id = HazardId(0);
        assert_eq!(
            field.treat_step(id, AgentId(1), 4, 2),
            Ok(TreatmentProgress::InProgress { done: 1, required: 2 })
        );
        assert_eq!(field.get(id).unwrap().claimant(), Some(AgentId(1)));
        assert_eq!(field.treat_step(id, AgentId(2), 4, 2), Err(Denial::StaleClaim(id)));
        assert_eq!(field.treat_step(id, AgentId(1), 5, 2), Ok(TreatmentProgress::Completed));
        assert_eq!(
            field.get(id).unwrap().status,
            HazardStatus::Treated { by: AgentId(1), tick: 5 }
        );
        assert_eq!(field.treat_step(id, AgentId(1), 6, 2), Err(Denial::StaleClaim(id)));
        assert_eq!(field.active_count(), 0);
    }

    #[test]
    fn test_release_only_by_holder() {
        let mut field = field_with(HazardKind::Flood, Severity::Low);
        let id = HazardId(0);
        field.treat_step(id, AgentId(1), 0, 3).unwrap();
        field.release(id, AgentId(2));
        assert_eq!(field.get(id).unwrap().claimant(), Some(AgentId(1)));
        field.release(id, AgentId(1));
        assert_eq!(field.get(id).unwrap().claimant(), None);
    }

    #[test]
    fn test_certain_escalation_and_spread() {
        let config = MissionConfig {
            escalation_chance: 1.0,
            spread_chance: 1.0,
            min_distance_from_base: 0.0,
            ..Default::default()
        };
        let mut field = field_with(HazardKind::Radiation, Severity::Low);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let base = Position::new(0.0, 0.0);

        let events = field.evolve(1, &mut rng, &config, 100, 100, &base).unwrap();
        assert_eq!(events[0], HazardEvent::Escalated(HazardId(0)));
        assert!(matches!(events[1], HazardEvent::Spawned { parent: HazardId(0), .. }));
        assert_eq!(field.len(), 2);

        let child = field.get(HazardId(1)).unwrap();
        assert_eq!(child.severity, Severity::Low);
        assert_eq!(child.kind, HazardKind::Radiation);
        assert_eq!(child.origin, HazardOrigin::Spawned { parent: HazardId(0) });
        assert!(child.cell().distance_to(&field.get(HazardId(0)).unwrap().position) < 1.5);
    }

    #[test]
    fn test_treated_hazards_do_not_evolve() {
        let config = MissionConfig {
            escalation_chance: 1.0,
            spread_chance: 1.0,
            ..Default::default()
        };
        let mut field = field_with(HazardKind::Radiation, Severity::Low);
        field.treat_step(HazardId(0), AgentId(0), 0, 1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let events = field
            .evolve(20, &mut rng, &config, 100, 100, &Position::new(0.0, 0.0))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(field.get(HazardId(0)).unwrap().radius, 10.0);
    }

    #[test]
    fn test_spawn_respects_base_distance() {
        let config = MissionConfig {
            spread_chance: 1.0,
            min_distance_from_base: 500.0,
            ..Default::default()
        };
        let mut field = field_with(HazardKind::Flood, Severity::High);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let events = field
            .evolve(1, &mut rng, &config, 100, 100, &Position::new(0.0, 0.0))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn test_add_rejects_invalid_geometry() {
        let mut field = HazardField::new();
        let bad = field.add(
            Position::new(f64::NAN, 1.0),
            Severity::Low,
            3.0,
            0.5,
            HazardKind::Flood,
            0,
            HazardOrigin::Seeded,
        );
        assert!(bad.is_err());
        let bad_radius = field.add(
            Position::new(1.0, 1.0),
            Severity::Low,
            -3.0,
            0.5,
            HazardKind::Flood,
            0,
            HazardOrigin::Seeded,
        );
        assert!(bad_radius.is_err());
    }
}
