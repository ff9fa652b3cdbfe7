//! What a single drone believes about the world.
//!
//! Knowledge only ever grows by merging: explored cells are OR-merged,
//! hazard records are reconciled by dominance, and claims follow a
//! newest-wins rule with the lower agent id breaking same-tick ties. A
//! released lease leaves a tombstone that travels with the digest, so a
//! peer that never heard the release cannot gossip the claim back. Every
//! merge reports whether it changed anything so that gossip can detect a
//! fixed point.

use crate::grid::CoverageMap;
use crate::hazard::HazardRecord;
use serde::{Deserialize, Serialize};
use skywatch_env::{AgentId, Cell, HazardId};
use std::collections::BTreeMap;

/// A soft lease on a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub agent: AgentId,
    pub since_tick: u64,
}

impl Claim {
    /// True when `self` should replace `other` for the same hazard.
    pub fn supersedes(&self, other: &Claim) -> bool {
        self.since_tick > other.since_tick
            || (self.since_tick == other.since_tick && self.agent < other.agent)
    }

    /// Whether the lease is still honoured at `now`.
    pub fn is_live(&self, now: u64, ttl: Option<u64>) -> bool {
        match ttl {
            Some(ttl) => now.saturating_sub(self.since_tick) < ttl,
            None => true,
        }
    }
}

/// A peer's current exploration target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneClaim {
    pub center: Cell,
    pub since_tick: u64,
}

/// Snapshot of a drone's knowledge handed to a peer during gossip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub sender: AgentId,
    pub explored: CoverageMap,
    pub hazards: Vec<HazardRecord>,
    pub hazard_claims: Vec<(HazardId, Claim)>,
    /// Leases the sender knows were given up
    pub released: Vec<(HazardId, Claim)>,
    /// The sender's own exploration zone, if it is exploring
    pub zone: Option<ZoneClaim>,
}

/// Personal maps, pending work and known claims of one drone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    /// Cells this drone saw or was told about
    pub explored: CoverageMap,

    pub hazards: BTreeMap<HazardId, HazardRecord>,

    /// Known hazards in discovery order, candidates for treatment
    pub pending: Vec<HazardId>,

    /// Hazard claims, including this drone's own
    pub hazard_claims: BTreeMap<HazardId, Claim>,

    /// Newest released lease tick per hazard and agent
    pub released: BTreeMap<HazardId, BTreeMap<AgentId, u64>>,

    /// Exploration zones of peers
    pub zone_claims: BTreeMap<AgentId, ZoneClaim>,

    /// Peak detector intensity per cell where an alarm fired
    pub readings: BTreeMap<Cell, f64>,
}

impl Knowledge {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            explored: CoverageMap::new(width, height),
            hazards: BTreeMap::new(),
            pending: Vec::new(),
            hazard_claims: BTreeMap::new(),
            released: BTreeMap::new(),
            zone_claims: BTreeMap::new(),
            readings: BTreeMap::new(),
        }
    }

    /// Inserts or merges a hazard record. Returns whether anything changed.
    pub fn observe(&mut self, record: &HazardRecord) -> bool {
        let changed = match self.hazards.get_mut(&record.id) {
            Some(mine) => mine.merge_from(record),
            None => {
                self.hazards.insert(record.id, record.clone());
                if record.is_active() && !self.pending.contains(&record.id) {
                    self.pending.push(record.id);
                }
                true
            }
        };

        if changed && record.status.is_treated() {
            self.forget_work(record.id);
        }
        changed
    }

    /// Drops a hazard from pending work and its claim.
    pub fn forget_work(&mut self, id: HazardId) {
        self.pending.retain(|p| *p != id);
        self.hazard_claims.remove(&id);
    }

    /// Records a peer's claim. A non-exhaustive drone drops the hazard from
    /// its pending queue once someone else holds it.
    pub fn note_claim(&mut self, id: HazardId, claim: Claim, me: AgentId, keep_backup: bool) -> bool {
        if self.hazards.get(&id).map(|r| !r.is_active()).unwrap_or(false) || self.is_released(id, &claim) {
            return false;
        }
        let changed = match self.hazard_claims.get(&id) {
            Some(existing) if existing == &claim || !claim.supersedes(existing) => false,
            _ => {
                self.hazard_claims.insert(id, claim);
                true
            }
        };
        if changed && claim.agent != me && !keep_backup {
            self.pending.retain(|p| *p != id);
        }
        changed
    }

    /// Whether `claim` was given up at or after its own start tick.
    pub fn is_released(&self, id: HazardId, claim: &Claim) -> bool {
        self.released
            .get(&id)
            .and_then(|by_agent| by_agent.get(&claim.agent))
            .map(|tick| claim.since_tick <= *tick)
            .unwrap_or(false)
    }

    /// Records that `released` was given up, drops it if held and puts the
    /// hazard back in the pending queue if it is still active. Returns
    /// whether anything changed.
    pub fn release_claim(&mut self, id: HazardId, released: Claim) -> bool {
        let by_agent = self.released.entry(id).or_default();
        let changed = match by_agent.get(&released.agent) {
            Some(tick) if *tick >= released.since_tick => false,
            _ => {
                by_agent.insert(released.agent, released.since_tick);
                true
            }
        };

        let held = self.hazard_claims.get(&id).copied();
        match held {
            Some(claim) if claim.agent == released.agent && claim.since_tick <= released.since_tick => {
                self.hazard_claims.remove(&id);
                let active = self.hazards.get(&id).map(|r| r.is_active()).unwrap_or(false);
                if active && !self.pending.contains(&id) {
                    self.pending.push(id);
                }
                true
            }
            _ => changed,
        }
    }

    /// Gives up this drone's own lease on `id`, if it holds one.
    pub fn release_own(&mut self, id: HazardId, me: AgentId) -> Option<Claim> {
        let claim = self.hazard_claims.get(&id).copied().filter(|c| c.agent == me)?;
        self.release_claim(id, claim);
        Some(claim)
    }

    /// Drops leases older than `ttl` (no-op without a ttl).
    pub fn expire_claims(&mut self, now: u64, ttl: Option<u64>) -> Vec<HazardId> {
        let expired: Vec<(HazardId, Claim)> = self
            .hazard_claims
            .iter()
            .filter(|(_, c)| !c.is_live(now, ttl))
            .map(|(id, c)| (*id, *c))
            .collect();
        for (id, claim) in &expired {
            self.release_claim(*id, *claim);
        }
        self.zone_claims.retain(|_, z| match ttl {
            Some(ttl) => now.saturating_sub(z.since_tick) < ttl,
            None => true,
        });
        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// The agent holding `id`, if any.
    pub fn claim_holder(&self, id: HazardId) -> Option<AgentId> {
        self.hazard_claims.get(&id).map(|c| c.agent)
    }

    pub fn claimed_by_other(&self, id: HazardId, me: AgentId) -> bool {
        matches!(self.claim_holder(id), Some(agent) if agent != me)
    }

    /// True when `cell` lies within `radius` of some peer's zone.
    pub fn in_peer_zone(&self, cell: Cell, me: AgentId, radius: f64) -> bool {
        self.zone_claims.iter().any(|(agent, zone)| {
            *agent != me && zone.center.distance_to(&cell.point()) <= radius
        })
    }

    /// Keeps the highest detector intensity per cell.
    pub fn note_reading(&mut self, cell: Cell, intensity: f64) {
        let entry = self.readings.entry(cell).or_insert(intensity);
        if intensity > *entry {
            *entry = intensity;
        }
    }

    /// Copies everything a peer may learn from this drone.
    pub fn digest(&self, sender: AgentId, zone: Option<ZoneClaim>) -> Digest {
        Digest {
            sender,
            explored: self.explored.clone(),
            hazards: self.hazards.values().cloned().collect(),
            hazard_claims: self.hazard_claims.iter().map(|(id, c)| (*id, *c)).collect(),
            released: self
                .released
                .iter()
                .flat_map(|(id, by_agent)| {
                    by_agent.iter().map(move |(agent, tick)| {
                        (
                            *id,
                            Claim {
                                agent: *agent,
                                since_tick: *tick,
                            },
                        )
                    })
                })
                .collect(),
            zone,
        }
    }

    /// Merges a peer's digest. Returns whether anything changed.
    pub fn absorb(&mut self, digest: &Digest, me: AgentId, keep_backup: bool) -> bool {
        let mut changed = self.explored.union_with(&digest.explored) > 0;

        for record in &digest.hazards {
            changed |= self.observe(record);
        }
        for (id, claim) in &digest.released {
            changed |= self.release_claim(*id, *claim);
        }
        for (id, claim) in &digest.hazard_claims {
            changed |= self.note_claim(*id, *claim, me, keep_backup);
        }

        if digest.sender != me {
            let before = self.zone_claims.get(&digest.sender).copied();
            match digest.zone {
                Some(zone) => {
                    self.zone_claims.insert(digest.sender, zone);
                }
                None => {
                    self.zone_claims.remove(&digest.sender);
                }
            }
            changed |= before != digest.zone;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::HazardStatus;
    use skywatch_env::{HazardKind, Position, Severity};

    fn record(id: usize, tick: u64, treated: bool) -> HazardRecord {
        HazardRecord {
            id: HazardId(id),
            cell: Cell::new(id as i32, 0),
            position: Position::new(id as f64, 0.0),
            kind: HazardKind::Flood,
            severity: Severity::Low,
            radius: 4.0,
            strength: 0.5,
            status: if treated {
                HazardStatus::Treated { by: AgentId(9), tick }
            } else {
                HazardStatus::default()
            },
            observed_tick: tick,
        }
    }

    fn claim(agent: u32, since_tick: u64) -> Claim {
        Claim {
            agent: AgentId(agent),
            since_tick,
        }
    }

    #[test]
    fn test_observe_queues_active_hazards() {
        let mut k = Knowledge::new(10, 10);
        assert!(k.observe(&record(1, 0, false)));
        assert!(!k.observe(&record(1, 0, false)));
        assert_eq!(k.pending, vec![HazardId(1)]);

        assert!(k.observe(&record(1, 2, true)));
        assert!(k.pending.is_empty());
    }

    #[test]
    fn test_claim_supersedes() {
        assert!(claim(3, 5).supersedes(&claim(1, 4)));
        assert!(claim(1, 5).supersedes(&claim(3, 5)));
        assert!(!claim(3, 5).supersedes(&claim(1, 5)));
    }

    #[test]
    fn test_peer_claim_drops_pending_unless_backup() {
        let me = AgentId(0);
        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.note_claim(HazardId(1), claim(2, 1), me, true);
        assert_eq!(k.pending, vec![HazardId(1)]);
        assert!(k.claimed_by_other(HazardId(1), me));

        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.note_claim(HazardId(1), claim(2, 1), me, false);
        assert!(k.pending.is_empty());

        assert!(k.release_claim(HazardId(1), claim(2, 1)));
        assert_eq!(k.pending, vec![HazardId(1)]);
        assert!(!k.claimed_by_other(HazardId(1), me));
    }

    #[test]
    fn test_release_by_non_holder_is_ignored() {
        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.note_claim(HazardId(1), claim(2, 1), AgentId(0), false);
        k.release_claim(HazardId(1), claim(3, 1));
        assert_eq!(k.claim_holder(HazardId(1)), Some(AgentId(2)));
        assert!(k.pending.is_empty());
    }

    #[test]
    fn test_claim_expiry() {
        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.note_claim(HazardId(1), claim(2, 10), AgentId(0), false);

        assert!(k.expire_claims(100, None).is_empty());
        assert!(k.expire_claims(14, Some(5)).is_empty());
        assert_eq!(k.expire_claims(15, Some(5)), vec![HazardId(1)]);
        assert_eq!(k.pending, vec![HazardId(1)]);
    }

    #[test]
    fn test_absorb_is_idempotent() {
        let mut a = Knowledge::new(10, 10);
        let mut b = Knowledge::new(10, 10);
        b.explored.mark(Cell::new(4, 4));
        b.observe(&record(2, 3, false));
        b.note_claim(HazardId(2), claim(1, 3), AgentId(1), false);
        let zone = ZoneClaim {
            center: Cell::new(8, 8),
            since_tick: 3,
        };
        let digest = b.digest(AgentId(1), Some(zone));

        assert!(a.absorb(&digest, AgentId(0), false));
        assert!(!a.absorb(&digest, AgentId(0), false));
        assert!(a.explored.is_marked(Cell::new(4, 4)));
        assert!(a.claimed_by_other(HazardId(2), AgentId(0)));
        assert!(a.in_peer_zone(Cell::new(6, 8), AgentId(0), 3.0));
        assert!(!a.in_peer_zone(Cell::new(0, 0), AgentId(0), 3.0));
    }

    #[test]
    fn test_treated_record_clears_claims() {
        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.note_claim(HazardId(1), claim(2, 1), AgentId(0), true);
        k.observe(&record(1, 4, true));
        assert_eq!(k.claim_holder(HazardId(1)), None);
        // Claims on treated hazards are not accepted again
        assert!(!k.note_claim(HazardId(1), claim(3, 5), AgentId(0), true));
    }

    #[test]
    fn test_released_claim_does_not_return_through_gossip() {
        let (a, b, c) = (AgentId(0), AgentId(1), AgentId(2));
        let mut kb = Knowledge::new(10, 10);
        let mut kc = Knowledge::new(10, 10);
        kb.observe(&record(1, 0, false));
        kc.observe(&record(1, 0, false));

        // B hears A's claim and passes it on to C
        assert!(kb.note_claim(HazardId(1), claim(0, 3), b, false));
        assert!(kc.absorb(&kb.digest(b, None), c, false));
        assert!(kc.claimed_by_other(HazardId(1), c));

        // A gives the hazard up; only B is in range
        assert!(kb.release_claim(HazardId(1), claim(0, 3)));
        assert_eq!(kb.pending, vec![HazardId(1)]);

        // C still holds the stale lease and gossips it back to B
        kb.absorb(&kc.digest(c, None), b, false);
        assert!(!kb.claimed_by_other(HazardId(1), b));
        assert_eq!(kb.pending, vec![HazardId(1)]);

        // The tombstone reaches C on the next exchange
        assert!(kc.absorb(&kb.digest(b, None), c, false));
        assert!(!kc.claimed_by_other(HazardId(1), c));
        assert_eq!(kc.pending, vec![HazardId(1)]);
        assert!(!kc.absorb(&kb.digest(b, None), c, false));

        // A later claim by the same agent is accepted again
        assert!(kc.note_claim(HazardId(1), claim(0, 4), c, false));
        assert_eq!(kc.claim_holder(HazardId(1)), Some(a));
    }

    #[test]
    fn test_release_before_claim_blocks_stale_claim() {
        let me = AgentId(0);
        let mut k = Knowledge::new(10, 10);
        k.observe(&record(1, 0, false));
        k.release_claim(HazardId(1), claim(2, 5));
        assert!(!k.note_claim(HazardId(1), claim(2, 5), me, false));
        assert!(!k.claimed_by_other(HazardId(1), me));
        assert_eq!(k.pending, vec![HazardId(1)]);
    }

    #[test]
    fn test_readings_keep_peak() {
        let mut k = Knowledge::new(10, 10);
        k.note_reading(Cell::new(1, 1), 0.6);
        k.note_reading(Cell::new(1, 1), 0.55);
        k.note_reading(Cell::new(1, 1), 0.8);
        assert_eq!(k.readings[&Cell::new(1, 1)], 0.8);
    }
}
