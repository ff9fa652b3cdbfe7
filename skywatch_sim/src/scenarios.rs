//! Named mission scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SKY-001: Default deployment on procedural terrain
    Baseline,

    /// SKY-002: Full exploration before any treatment
    Exhaustive,

    /// SKY-003: Most severe known hazard first, switching en route
    Opportunistic,

    /// SKY-004: One hazard in reach, one beyond the round-trip budget
    LoneRadiation,

    /// SKY-005: Hazard knowledge relayed along a chain of drones
    RelayGossip,

    /// SKY-006: A drone with exactly its return cost left
    LastReserve,

    /// SKY-007: Hazard-free map explored to completion
    FullCoverage,

    /// SKY-008: Hazards escalate and spread during the mission
    Wildfire,

    /// SKY-009: Two drones race for the same hazard
    ClaimConflict,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::Exhaustive,
            ScenarioId::Opportunistic,
            ScenarioId::LoneRadiation,
            ScenarioId::RelayGossip,
            ScenarioId::LastReserve,
            ScenarioId::FullCoverage,
            ScenarioId::Wildfire,
            ScenarioId::ClaimConflict,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::Exhaustive => "exhaustive",
            ScenarioId::Opportunistic => "opportunistic",
            ScenarioId::LoneRadiation => "lone_radiation",
            ScenarioId::RelayGossip => "relay_gossip",
            ScenarioId::LastReserve => "last_reserve",
            ScenarioId::FullCoverage => "full_coverage",
            ScenarioId::Wildfire => "wildfire",
            ScenarioId::ClaimConflict => "claim_conflict",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "5 drones, 20 hazards, immediate strategy; nobody strands",
            ScenarioId::Exhaustive => "Exhaustive strategy on the baseline map; nobody strands",
            ScenarioId::Opportunistic => "Opportunistic strategy on the baseline map; nobody strands",
            ScenarioId::LoneRadiation => "Near high-radiation hazard is treated, the far one is infeasible and left alone",
            ScenarioId::RelayGossip => "One gossip phase carries a hazard across three drones",
            ScenarioId::LastReserve => "Drone at its return cost heads home instead of treating",
            ScenarioId::FullCoverage => "Completion is signalled on the tick coverage reaches 1.0",
            ScenarioId::Wildfire => "Escalation and spread keep the lifecycle consistent",
            ScenarioId::ClaimConflict => "Only the lower-id drone treats a contested hazard",
        }
    }

    /// Whether the scenario accepts fleet and strategy overrides.
    pub fn is_open_field(&self) -> bool {
        matches!(self, ScenarioId::Baseline | ScenarioId::Wildfire)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
