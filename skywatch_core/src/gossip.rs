//! Range-limited peer-to-peer knowledge exchange.
//!
//! Two kinds of traffic share the communication graph:
//!
//! - **Map merge**: every pair of drones in range swaps digests. Both sides
//!   snapshot before either merges, so neither sees a half-merged peer. A
//!   forward pass over ascending pairs followed by a reverse pass lets
//!   knowledge hop across a chain of drones within one tick.
//! - **Announcements**: claims, releases and treatment notices, delivered to
//!   every drone within range of the sender.

use crate::config::{GossipMode, MissionConfig, Strategy};
use crate::drone::{Announcement, Drone, TickContext};
use skywatch_env::Position;
use tracing::debug;

/// Who can hear whom this phase.
#[derive(Debug, Clone)]
pub struct CommGraph {
    /// agent index -> indices within communication range, ascending
    adjacency: Vec<Vec<usize>>,

    /// Total point-to-point messages sent (digests and announcements)
    messages_sent: u64,
}

impl CommGraph {
    /// Links every pair of positions at most `radius` apart.
    pub fn from_positions(positions: &[Position], radius: f64) -> Self {
        let n = positions.len();
        let mut adjacency = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if (positions[i] - positions[j]).norm() <= radius {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }
        Self {
            adjacency,
            messages_sent: 0,
        }
    }

    /// Builds the graph from the drones' current positions.
    pub fn of_fleet(drones: &[Drone], radius: f64) -> Self {
        let positions: Vec<Position> = drones.iter().map(|d| d.position).collect();
        Self::from_positions(&positions, radius)
    }

    /// Returns the neighbors of an agent.
    pub fn neighbors(&self, idx: usize) -> &[usize] {
        self.adjacency.get(idx).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Ascending `(i, j)` pairs with `i < j` that can talk.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, list) in self.adjacency.iter().enumerate() {
            pairs.extend(list.iter().filter(|j| **j > i).map(|j| (i, *j)));
        }
        pairs
    }

    /// Returns the total number of messages sent.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Returns the total number of agents in the graph.
    pub fn agent_count(&self) -> usize {
        self.adjacency.len()
    }
}

/// Summary of one gossip phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipStats {
    /// Full forward+reverse passes run
    pub passes: usize,

    /// Pair exchanges that changed at least one side
    pub productive_exchanges: usize,
}

/// Mutable references to two distinct drones.
fn pair_mut(drones: &mut [Drone], i: usize, j: usize) -> (&mut Drone, &mut Drone) {
    debug_assert!(i < j);
    let (left, right) = drones.split_at_mut(j);
    (&mut left[i], &mut right[0])
}

/// Swaps digests between drones `i < j`. Returns whether either changed.
fn exchange(drones: &mut [Drone], i: usize, j: usize, keep_backup: bool) -> bool {
    let (a, b) = pair_mut(drones, i, j);
    let from_a = a.knowledge.digest(a.id, a.zone);
    let from_b = b.knowledge.digest(b.id, b.zone);
    let a_changed = a.knowledge.absorb(&from_b, a.id, keep_backup);
    let b_changed = b.knowledge.absorb(&from_a, b.id, keep_backup);
    a_changed || b_changed
}

/// Runs the map-merge phase over the fleet.
pub fn gossip_phase(drones: &mut [Drone], graph: &mut CommGraph, config: &MissionConfig) -> GossipStats {
    let keep_backup = config.strategy == Strategy::Exhaustive;
    let forward = graph.pairs();
    let mut stats = GossipStats::default();

    // A fixed point needs at most one pass per hop of the longest chain
    let max_passes = match config.gossip_mode {
        GossipMode::TwoPass => 1,
        GossipMode::FixedPoint => drones.len().max(1),
    };

    for _ in 0..max_passes {
        let mut changed = false;
        for &(i, j) in forward.iter().chain(forward.iter().rev()) {
            graph.messages_sent += 2;
            if exchange(drones, i, j, keep_backup) {
                stats.productive_exchanges += 1;
                changed = true;
            }
        }
        stats.passes += 1;
        if !changed {
            break;
        }
    }

    debug!(
        passes = stats.passes,
        productive = stats.productive_exchanges,
        "Gossip phase done"
    );
    stats
}

/// Result of delivering one batch of announcements.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    /// Indices of drones whose target was invalidated
    pub invalidated: Vec<usize>,

    /// Claims re-asserted by drones that kept a contested target
    pub replies: Vec<Announcement>,
}

/// Hands each announcement to every drone in range of its sender.
pub fn deliver(
    announcements: &[Announcement],
    drones: &mut [Drone],
    graph: &mut CommGraph,
    ctx: &TickContext<'_>,
) -> Delivery {
    let mut delivery = Delivery::default();
    for announcement in announcements {
        let sender = announcement.sender();
        let Some(from) = drones.iter().position(|d| d.id == sender) else {
            continue;
        };
        let receivers: Vec<usize> = graph.neighbors(from).to_vec();
        for idx in receivers {
            graph.messages_sent += 1;
            let reaction = drones[idx].receive(announcement, ctx);
            if reaction.invalidated && !delivery.invalidated.contains(&idx) {
                delivery.invalidated.push(idx);
            }
            if let Some(reply) = reaction.reply {
                delivery.replies.push(reply);
            }
        }
    }
    delivery.invalidated.sort_unstable();
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feasibility::EnergyModel;
    use crate::hazard::{HazardField, HazardOrigin};
    use skywatch_env::{AgentId, Cell, HazardId, HazardKind, Severity};

    fn fleet(positions: &[(f64, f64)], config: &MissionConfig) -> Vec<Drone> {
        positions
            .iter()
            .enumerate()
            .map(|(i, (x, y))| {
                let mut d = Drone::new(AgentId(i as u32), Position::new(0.0, 0.0), config, 100, 100);
                d.position = Position::new(*x, *y);
                d
            })
            .collect()
    }

    fn hazard_record(pos: (f64, f64), severity: Severity) -> crate::hazard::HazardRecord {
        let mut field = HazardField::new();
        field
            .add(
                Position::new(pos.0, pos.1),
                severity,
                5.0,
                0.8,
                HazardKind::Radiation,
                0,
                HazardOrigin::Seeded,
            )
            .unwrap();
        field.get(HazardId(0)).unwrap().record(0)
    }

    #[test]
    fn test_graph_topology() {
        let positions = [
            Position::new(0.0, 0.0),
            Position::new(8.0, 0.0),
            Position::new(16.0, 0.0),
            Position::new(50.0, 50.0),
        ];
        let graph = CommGraph::from_positions(&positions, 10.0);
        assert_eq!(graph.neighbors(1), &[0, 2]);
        assert_eq!(graph.neighbors(0), &[1]);
        assert!(graph.neighbors(3).is_empty());
        assert_eq!(graph.pairs(), vec![(0, 1), (1, 2)]);
        assert_eq!(graph.agent_count(), 4);
    }

    #[test]
    fn test_one_pass_copies_hazard_to_peer() {
        let config = MissionConfig::default();
        let mut drones = fleet(&[(0.0, 0.0), (6.0, 0.0)], &config);
        let record = hazard_record((40.0, 40.0), Severity::High);
        drones[0].knowledge.observe(&record);

        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);
        gossip_phase(&mut drones, &mut graph, &config);

        let copied = &drones[1].knowledge.hazards[&HazardId(0)];
        assert_eq!(copied.position, record.position);
        assert_eq!(copied.severity, Severity::High);
        assert_eq!(drones[1].knowledge.pending, vec![HazardId(0)]);
    }

    #[test]
    fn test_two_pass_reaches_along_a_chain() {
        let config = MissionConfig::default();
        // 2 can only hear 1, 1 can hear 0 and 2
        let mut drones = fleet(&[(0.0, 0.0), (8.0, 0.0), (16.0, 0.0)], &config);
        drones[2].knowledge.explored.mark(Cell::new(99, 99));
        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);

        gossip_phase(&mut drones, &mut graph, &config);
        assert!(drones[0].knowledge.explored.is_marked(Cell::new(99, 99)));
    }

    #[test]
    fn test_out_of_range_drones_learn_nothing() {
        let config = MissionConfig::default();
        let mut drones = fleet(&[(0.0, 0.0), (30.0, 0.0)], &config);
        drones[0].knowledge.observe(&hazard_record((5.0, 5.0), Severity::Low));
        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);
        gossip_phase(&mut drones, &mut graph, &config);
        assert!(drones[1].knowledge.hazards.is_empty());
        assert_eq!(graph.messages_sent(), 0);
    }

    #[test]
    fn test_fixed_point_stops_when_nothing_changes() {
        let config = MissionConfig {
            gossip_mode: GossipMode::FixedPoint,
            ..Default::default()
        };
        let mut drones = fleet(&[(0.0, 0.0), (8.0, 0.0), (16.0, 0.0), (24.0, 0.0)], &config);
        drones[3].knowledge.observe(&hazard_record((60.0, 60.0), Severity::Low));
        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);

        let stats = gossip_phase(&mut drones, &mut graph, &config);
        assert!(drones.iter().all(|d| d.knowledge.hazards.contains_key(&HazardId(0))));
        assert!(stats.passes >= 2);

        let again = gossip_phase(&mut drones, &mut graph, &config);
        assert_eq!(again.passes, 1);
        assert_eq!(again.productive_exchanges, 0);
    }

    #[test]
    fn test_announcements_reach_only_neighbors() {
        let config = MissionConfig::default();
        let energy = EnergyModel::new(&config, Position::new(0.0, 0.0)).unwrap();
        let ctx = TickContext {
            config: &config,
            energy: &energy,
            tick: 4,
        };
        let mut drones = fleet(&[(0.0, 0.0), (5.0, 0.0), (40.0, 0.0)], &config);
        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);

        let claim = Announcement::ClaimHazard {
            from: AgentId(0),
            hazard: HazardId(7),
            tick: 4,
        };
        let delivery = deliver(&[claim], &mut drones, &mut graph, &ctx);
        assert!(delivery.invalidated.is_empty());
        assert_eq!(drones[1].knowledge.claim_holder(HazardId(7)), Some(AgentId(0)));
        assert_eq!(drones[2].knowledge.claim_holder(HazardId(7)), None);
        assert_eq!(graph.messages_sent(), 1);
    }

    #[test]
    fn test_release_outlives_stale_copies_in_chain() {
        let config = MissionConfig::default();
        let energy = EnergyModel::new(&config, Position::new(0.0, 0.0)).unwrap();
        let ctx = TickContext {
            config: &config,
            energy: &energy,
            tick: 2,
        };
        // 0 and 2 only reach each other through 1
        let mut drones = fleet(&[(0.0, 0.0), (8.0, 0.0), (16.0, 0.0)], &config);
        let hazard = HazardId(0);
        drones[0].knowledge.observe(&hazard_record((40.0, 40.0), Severity::High));
        drones[0].knowledge.hazard_claims.insert(
            hazard,
            crate::knowledge::Claim {
                agent: AgentId(0),
                since_tick: 1,
            },
        );
        let mut graph = CommGraph::of_fleet(&drones, config.comm_radius);
        gossip_phase(&mut drones, &mut graph, &config);
        assert_eq!(drones[2].knowledge.claim_holder(hazard), Some(AgentId(0)));
        assert!(drones[2].knowledge.pending.is_empty());

        // The release is heard by drone 1 only
        let claim = drones[0].knowledge.release_own(hazard, AgentId(0)).unwrap();
        let release = Announcement::Release {
            from: AgentId(0),
            hazard,
            tick: claim.since_tick,
        };
        deliver(&[release], &mut drones, &mut graph, &ctx);
        assert_eq!(drones[1].knowledge.claim_holder(hazard), None);
        assert_eq!(drones[2].knowledge.claim_holder(hazard), Some(AgentId(0)));

        gossip_phase(&mut drones, &mut graph, &config);
        for drone in &drones {
            assert_eq!(drone.knowledge.claim_holder(hazard), None);
            assert_eq!(drone.knowledge.pending, vec![hazard]);
        }
    }
}
