//! The resource-feasibility model.
//!
//! Every decision in the fleet goes through [`EnergyModel`] before a drone
//! commits to anything. The model is a pure function of the mission
//! constants and the base position: it never mutates state, and it only
//! fails when handed coordinates that are not valid workspace geometry.
//!
//! The central quantity is the *return cost*, the energy needed to fly
//! straight home from a point. An action is affordable when the energy left
//! after it still covers the return cost from where the action ends.

use crate::config::MissionConfig;
use serde::{Deserialize, Serialize};
use skywatch_env::{check_position, Cell, EnvError, HazardId, Position, Severity};
use thiserror::Error;

/// Slack used in energy comparisons to absorb floating-point drift.
pub const ENERGY_EPSILON: f64 = 1e-9;

/// Why an action was refused.
///
/// Never a failure of the mission: callers fall back to returning or
/// waiting, or re-select a target.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Denial {
    #[error("Insufficient energy: need {need:.2}, have {have:.2}")]
    InsufficientEnergy { need: f64, have: f64 },

    #[error("Drone is not at base")]
    NotAtBase,

    /// The hazard was treated or taken by another drone in the meantime
    #[error("Stale claim on {0}")]
    StaleClaim(HazardId),
}

/// Whether a hazard can ever be treated by a fully charged drone flying
/// out of base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feasibility {
    Feasible,
    Infeasible,
}

/// Pure energy-budget oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyModel {
    base: Position,
    unit_move_cost: f64,
    capacity: f64,
    departure_threshold: f64,
    treatment_cost_low: f64,
    treatment_cost_high: f64,
}

impl EnergyModel {
    /// Builds the model for a base position.
    pub fn new(config: &MissionConfig, base: Position) -> Result<Self, EnvError> {
        check_position(&base, "base")?;
        Ok(Self {
            base,
            unit_move_cost: config.unit_move_cost,
            capacity: config.capacity,
            departure_threshold: config.departure_threshold,
            treatment_cost_low: config.treatment_cost_low,
            treatment_cost_high: config.treatment_cost_high,
        })
    }

    pub fn base(&self) -> Position {
        self.base
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn unit_move_cost(&self) -> f64 {
        self.unit_move_cost
    }

    /// Treatment cost for a severity level.
    pub fn treatment_cost(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.treatment_cost_low,
            Severity::High => self.treatment_cost_high,
        }
    }

    /// Energy to fly from `from` to `to`.
    pub fn travel_cost(&self, from: &Position, to: &Position) -> Result<f64, EnvError> {
        check_position(from, "origin")?;
        check_position(to, "destination")?;
        Ok((to - from).norm() * self.unit_move_cost)
    }

    /// `distance(pos, base) * unit_move_cost`.
    pub fn return_cost(&self, pos: &Position) -> Result<f64, EnvError> {
        self.travel_cost(pos, &self.base)
    }

    /// True when `energy - action_cost` still covers the return from `after`.
    pub fn can_afford(&self, energy: f64, action_cost: f64, after: &Position) -> Result<bool, EnvError> {
        Ok(energy - action_cost >= self.return_cost(after)? - ENERGY_EPSILON)
    }

    /// Hard emergency: the drone cannot even reach base any more.
    pub fn must_return_now(&self, energy: f64, pos: &Position) -> Result<bool, EnvError> {
        Ok(energy < self.return_cost(pos)? - ENERGY_EPSILON)
    }

    /// True when the drone holds strictly more energy than its return cost.
    ///
    /// A drone away from base without reserve accepts no new target.
    pub fn has_reserve(&self, energy: f64, pos: &Position) -> Result<bool, EnvError> {
        Ok(energy > self.return_cost(pos)? + ENERGY_EPSILON)
    }

    /// `from -> to -> base` travel plus an on-site cost.
    pub fn round_trip_cost(&self, from: &Position, to: &Position, on_site: f64) -> Result<f64, EnvError> {
        Ok(self.travel_cost(from, to)? + self.return_cost(to)? + on_site)
    }

    /// Full cost of flying to a hazard, treating it and returning.
    pub fn hazard_mission_cost(
        &self,
        from: &Position,
        hazard: &Position,
        severity: Severity,
    ) -> Result<f64, EnvError> {
        self.round_trip_cost(from, hazard, self.treatment_cost(severity))
    }

    /// True when a full round trip via `to` fits in `energy`.
    pub fn round_trip_affordable(
        &self,
        energy: f64,
        from: &Position,
        to: &Position,
        on_site: f64,
    ) -> Result<bool, EnvError> {
        Ok(self.round_trip_cost(from, to, on_site)? <= energy + ENERGY_EPSILON)
    }

    /// Base-to-hazard-to-base cost compared against full capacity.
    pub fn classify_from_base(&self, hazard: &Position, severity: Severity) -> Result<Feasibility, EnvError> {
        let cost = self.hazard_mission_cost(&self.base, hazard, severity)?;
        Ok(if cost > self.capacity + ENERGY_EPSILON {
            Feasibility::Infeasible
        } else {
            Feasibility::Feasible
        })
    }

    /// Whether any sampled unexplored cell is still reachable.
    ///
    /// Evaluated from base with the departure budget, because every sortie
    /// starts there after recharging. A drone that cannot get home at all has
    /// no exploration left.
    pub fn exploration_still_possible<F>(
        &self,
        energy: f64,
        pos: &Position,
        width: usize,
        height: usize,
        sample_step: usize,
        is_explored: F,
    ) -> Result<bool, EnvError>
    where
        F: Fn(Cell) -> bool,
    {
        if self.must_return_now(energy, pos)? {
            return Ok(false);
        }

        let budget = self.capacity * self.departure_threshold;
        let step = sample_step.max(1);
        for y in (0..height).step_by(step) {
            for x in (0..width).step_by(step) {
                let cell = Cell::new(x as i32, y as i32);
                if is_explored(cell) {
                    continue;
                }
                if 2.0 * self.return_cost(&cell.point())? <= budget + ENERGY_EPSILON {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> EnergyModel {
        EnergyModel::new(&MissionConfig::default(), Position::new(0.0, 0.0)).unwrap()
    }

    #[test]
    fn test_return_cost() {
        let m = model();
        assert_relative_eq!(m.return_cost(&Position::new(30.0, 40.0)).unwrap(), 5.0);
        assert_eq!(m.return_cost(&Position::new(0.0, 0.0)).unwrap(), 0.0);
    }

    #[test]
    fn test_can_afford() {
        let m = model();
        let far = Position::new(100.0, 0.0); // return cost 10
        assert!(m.can_afford(20.0, 10.0, &far).unwrap());
        assert!(!m.can_afford(20.0, 10.5, &far).unwrap());
    }

    #[test]
    fn test_must_return_and_reserve_at_the_boundary() {
        let m = model();
        let pos = Position::new(50.0, 0.0); // return cost 5
        assert!(!m.must_return_now(5.0, &pos).unwrap());
        assert!(!m.has_reserve(5.0, &pos).unwrap());
        assert!(m.must_return_now(4.9, &pos).unwrap());
        assert!(m.has_reserve(5.1, &pos).unwrap());
    }

    #[test]
    fn test_round_trip_cost() {
        let m = model();
        let from = Position::new(0.0, 0.0);
        let to = Position::new(0.0, 20.0);
        assert_relative_eq!(m.round_trip_cost(&from, &to, 5.0).unwrap(), 9.0);
        assert_relative_eq!(
            m.hazard_mission_cost(&from, &to, Severity::High).unwrap(),
            19.0
        );
    }

    #[test]
    fn test_classify_from_base() {
        let m = model();
        // 2 * 425 * 0.1 + 15 = 100 -> exactly feasible
        assert_eq!(
            m.classify_from_base(&Position::new(425.0, 0.0), Severity::High).unwrap(),
            Feasibility::Feasible
        );
        assert_eq!(
            m.classify_from_base(&Position::new(426.0, 0.0), Severity::High).unwrap(),
            Feasibility::Infeasible
        );
    }

    #[test]
    fn test_exploration_possible_from_base() {
        let m = model();
        let here = Position::new(0.0, 0.0);
        // Everything explored: nothing left
        assert!(!m
            .exploration_still_possible(100.0, &here, 50, 50, 10, |_| true)
            .unwrap());
        // Nothing explored: the base cell itself is reachable
        assert!(m
            .exploration_still_possible(100.0, &here, 50, 50, 10, |_| false)
            .unwrap());
    }

    #[test]
    fn test_exploration_uses_departure_budget_not_current_energy() {
        let m = model();
        let here = Position::new(0.0, 0.0);
        // Only (400, 0) unexplored: 2 * 400 * 0.1 = 80 <= 85
        let only_far = |c: Cell| c != Cell::new(400, 0);
        assert!(m
            .exploration_still_possible(1.0, &here, 401, 1, 10, only_far)
            .unwrap());
        // Only (430, 0) unexplored: 86 > 85
        let too_far = |c: Cell| c != Cell::new(430, 0);
        assert!(!m
            .exploration_still_possible(100.0, &here, 431, 1, 10, too_far)
            .unwrap());
    }

    #[test]
    fn test_stranded_drone_cannot_explore() {
        let m = model();
        let far = Position::new(300.0, 0.0); // return cost 30
        assert!(!m
            .exploration_still_possible(10.0, &far, 50, 50, 10, |_| false)
            .unwrap());
    }

    #[test]
    fn test_denial_messages() {
        let denial = Denial::InsufficientEnergy { need: 12.0, have: 3.5 };
        assert_eq!(denial.to_string(), "Insufficient energy: need 12.00, have 3.50");
        assert_eq!(Denial::StaleClaim(HazardId(4)).to_string(), "Stale claim on hz#4");
    }

    #[test]
    fn test_invalid_geometry() {
        let m = model();
        assert!(matches!(
            m.return_cost(&Position::new(f64::NAN, 0.0)),
            Err(EnvError::InvalidGeometry(_))
        ));
        assert!(EnergyModel::new(&MissionConfig::default(), Position::new(-1.0, 0.0)).is_err());
    }
}
