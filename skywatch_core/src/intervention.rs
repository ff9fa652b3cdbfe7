//! Intervention planning: who should respond to a hazard, how urgently and
//! with what equipment.

use crate::feasibility::Feasibility;
use serde::{Deserialize, Serialize};
use skywatch_env::{Cell, HazardId, HazardKind, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Responder {
    Human,
    Robot,
}

/// Ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
}

impl Urgency {
    /// 0 for critical up to 3 for low.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Urgency::Critical => "critical",
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One row of the response table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRule {
    pub responder: Responder,
    pub urgency: Urgency,
    pub equipment: &'static [&'static str],
}

/// Fixed `(kind, severity)` response table.
pub fn response_rule(kind: HazardKind, severity: Severity) -> ResponseRule {
    use HazardKind::*;
    use Severity::{High, Low};

    match (kind, severity) {
        (Radiation, Low) => ResponseRule {
            responder: Responder::Robot,
            urgency: Urgency::High,
            equipment: &["dosimeter", "lead shielding"],
        },
        (Radiation, High) => ResponseRule {
            responder: Responder::Robot,
            urgency: Urgency::Critical,
            equipment: &["dosimeter", "lead shielding", "decontamination kit"],
        },
        (Flood, Low) => ResponseRule {
            responder: Responder::Robot,
            urgency: Urgency::Low,
            equipment: &["water pump"],
        },
        (Flood, High) => ResponseRule {
            responder: Responder::Human,
            urgency: Urgency::High,
            equipment: &["water pump", "sandbags", "rescue boat"],
        },
        (MeteorShower, Low) => ResponseRule {
            responder: Responder::Robot,
            urgency: Urgency::Medium,
            equipment: &["debris-clearing arm"],
        },
        (MeteorShower, High) => ResponseRule {
            responder: Responder::Human,
            urgency: Urgency::Critical,
            equipment: &["debris-clearing arm", "fire suppressant", "thermal camera"],
        },
    }
}

/// A planned response to one live hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionDescriptor {
    pub hazard: HazardId,
    pub cell: Cell,
    pub kind: HazardKind,
    pub severity: Severity,
    pub responder: Responder,
    pub urgency: Urgency,
    pub equipment: Vec<String>,
    pub feasibility: Feasibility,
}

impl InterventionDescriptor {
    pub fn new(hazard: HazardId, cell: Cell, kind: HazardKind, severity: Severity, feasibility: Feasibility) -> Self {
        let rule = response_rule(kind, severity);
        Self {
            hazard,
            cell,
            kind,
            severity,
            responder: rule.responder,
            urgency: rule.urgency,
            equipment: rule.equipment.iter().map(|e| e.to_string()).collect(),
            feasibility,
        }
    }
}

/// Stable sort by urgency: equal urgencies keep their input order.
pub fn sort_by_urgency(list: &mut [InterventionDescriptor]) {
    list.sort_by_key(|d| d.urgency.rank());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows() {
        let r = response_rule(HazardKind::Radiation, Severity::High);
        assert_eq!(r.responder, Responder::Robot);
        assert_eq!(r.urgency, Urgency::Critical);
        assert!(r.equipment.contains(&"decontamination kit"));

        let f = response_rule(HazardKind::Flood, Severity::High);
        assert_eq!(f.responder, Responder::Human);
        assert_eq!(f.urgency, Urgency::High);

        assert_eq!(response_rule(HazardKind::Flood, Severity::Low).urgency, Urgency::Low);
        assert_eq!(
            response_rule(HazardKind::MeteorShower, Severity::Low).urgency,
            Urgency::Medium
        );
    }

    #[test]
    fn test_sort_is_stable() {
        let mk = |id: usize, kind, severity| {
            InterventionDescriptor::new(HazardId(id), Cell::new(id as i32, 0), kind, severity, Feasibility::Feasible)
        };
        let mut list = vec![
            mk(0, HazardKind::Flood, Severity::Low),
            mk(1, HazardKind::MeteorShower, Severity::High),
            mk(2, HazardKind::Radiation, Severity::Low),
            mk(3, HazardKind::Radiation, Severity::High),
            mk(4, HazardKind::MeteorShower, Severity::Low),
        ];
        sort_by_urgency(&mut list);
        let order: Vec<usize> = list.iter().map(|d| d.hazard.0).collect();
        assert_eq!(order, vec![1, 3, 2, 4, 0]);
    }

    #[test]
    fn test_urgency_rank() {
        assert!(Urgency::Critical < Urgency::Low);
        assert_eq!(Urgency::Medium.rank(), 2);
        assert_eq!(Urgency::High.to_string(), "high");
    }
}
