//! Leader schedule - deterministic choice of the proposer for each height

use crate::types::{Height, PeerId};
use std::collections::HashMap;

/// Maps a height to the sequencer entitled to propose it.
///
/// Implementations must be pure functions of their construction inputs and
/// the height, so every honest sequencer computes the same leader.
pub trait LeaderSchedule: Send + Sync {
    fn leader_for(&self, height: Height) -> PeerId;
}

/// Stake-weighted round robin.
///
/// Peers `0..n` each own `weight` consecutive slots of a cycle whose length is
/// the total stake; height `h` falls on slot `h % total`.
#[derive(Debug, Clone)]
pub struct StakeWeightedSchedule {
    /// (peer, cumulative upper bound of its slot range)
    slots: Vec<(PeerId, u64)>,
    total: u64,
}

impl StakeWeightedSchedule {
    pub fn new(peer_count: usize, stake_weights: &HashMap<PeerId, u64>) -> Self {
        let peers = 0..peer_count as PeerId;
        let mut weights: Vec<(PeerId, u64)> = peers
            .map(|id| (id, stake_weights.get(&id).copied().unwrap_or(0)))
            .collect();

        // No stake anywhere: everyone gets an equal turn
        if weights.iter().all(|(_, w)| *w == 0) {
            for (_, w) in weights.iter_mut() {
                *w = 1;
            }
        }

        let mut total = 0u64;
        let slots = weights
            .into_iter()
            .filter(|(_, w)| *w > 0)
            .map(|(id, w)| {
                total = total.saturating_add(w);
                (id, total)
            })
            .collect();

        Self { slots, total }
    }

    /// Length of one full rotation
    pub fn cycle_len(&self) -> u64 {
        self.total
    }
}

impl LeaderSchedule for StakeWeightedSchedule {
    fn leader_for(&self, height: Height) -> PeerId {
        if self.total == 0 {
            return 0;
        }
        let slot = height % self.total;
        self.slots
            .iter()
            .find(|(_, upper)| slot < *upper)
            .map(|(id, _)| *id)
            .unwrap_or(0)
    }
}

/// Always elects the same sequencer
#[derive(Debug, Clone, Copy)]
pub struct FixedSchedule(pub PeerId);

impl LeaderSchedule for FixedSchedule {
    fn leader_for(&self, _height: Height) -> PeerId {
        self.0
    }
}
