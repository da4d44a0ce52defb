//! Next-hop selection policies.
//!
//! A policy sees only the candidates that already passed the state
//! checks (not the inbound face, no scope violation, transport not
//! down) and applies the interface-weight logic: weight 0 means
//! ineligible, and selection works tier by tier from the highest
//! weight down. Used without the retry engine, a policy is the
//! degenerate "select only" strategy for hosts that retransmit
//! themselves.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::FaceId;

/// A next hop that passed the state eligibility checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub face: FaceId,
    pub interface: String,
}

/// Weight-tiered next-hop selection.
pub trait SelectionPolicy {
    /// Short name used in telemetry.
    fn name(&self) -> &'static str;

    /// Pick an outgoing face, or `None` when no candidate is eligible
    /// at any tier.
    fn select(&mut self, candidates: &[Candidate]) -> Option<FaceId>;

    /// Configured weight of an interface; unknown interfaces weigh 0.
    fn weight_of(&self, interface: &str) -> u32;

    /// Whether `interface` sits at the top weight tier. Retries are
    /// hosted only on main interfaces.
    fn is_main_interface(&self, interface: &str) -> bool;
}

fn top_tier(weights: &HashMap<String, u32>) -> u32 {
    weights.values().copied().max().unwrap_or(0)
}

/// Descending list of the distinct positive weights in the table.
fn tiers(weights: &HashMap<String, u32>) -> Vec<u32> {
    let mut tiers: Vec<u32> = weights.values().copied().filter(|&w| w > 0).collect();
    tiers.sort_unstable_by(|a, b| b.cmp(a));
    tiers.dedup();
    tiers
}

/// Weighted random selection with tiered fall-through.
///
/// At each tier the eligible candidates are drawn from with
/// probability proportional to their weight (a uniform draw over the
/// cumulative prefix sums); lower tiers are consulted only when every
/// higher tier is empty.
#[must_use]
pub struct WeightedRandomPolicy {
    weights: HashMap<String, u32>,
    top_tier: u32,
    rng: StdRng,
}

impl WeightedRandomPolicy {
    pub fn new(weights: HashMap<String, u32>) -> Self {
        Self::with_rng(weights, StdRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_rng(weights: HashMap<String, u32>, rng: StdRng) -> Self {
        let top_tier = top_tier(&weights);
        Self {
            weights,
            top_tier,
            rng,
        }
    }
}

impl SelectionPolicy for WeightedRandomPolicy {
    fn name(&self) -> &'static str {
        "weighted-random"
    }

    fn select(&mut self, candidates: &[Candidate]) -> Option<FaceId> {
        for tier in tiers(&self.weights) {
            let eligible: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| self.weight_of(&c.interface) == tier)
                .collect();
            if eligible.is_empty() {
                continue;
            }

            let total: u32 = eligible
                .iter()
                .map(|c| self.weight_of(&c.interface))
                .sum();
            let drawn = self.rng.gen_range(1..=total);
            let mut cumulative = 0;
            for candidate in &eligible {
                cumulative += self.weight_of(&candidate.interface);
                if drawn <= cumulative {
                    return Some(candidate.face);
                }
            }
        }
        None
    }

    fn weight_of(&self, interface: &str) -> u32 {
        self.weights.get(interface).copied().unwrap_or(0)
    }

    fn is_main_interface(&self, interface: &str) -> bool {
        self.top_tier > 0 && self.weight_of(interface) == self.top_tier
    }
}

/// Preferred/fallback selection: the first eligible candidate at the
/// highest non-empty tier, with no randomness.
#[must_use]
pub struct PreferredPolicy {
    weights: HashMap<String, u32>,
    top_tier: u32,
}

impl PreferredPolicy {
    pub fn new(weights: HashMap<String, u32>) -> Self {
        let top_tier = top_tier(&weights);
        Self { weights, top_tier }
    }
}

impl SelectionPolicy for PreferredPolicy {
    fn name(&self) -> &'static str {
        "preferred"
    }

    fn select(&mut self, candidates: &[Candidate]) -> Option<FaceId> {
        for tier in tiers(&self.weights) {
            if let Some(candidate) = candidates
                .iter()
                .find(|c| self.weight_of(&c.interface) == tier)
            {
                return Some(candidate.face);
            }
        }
        None
    }

    fn weight_of(&self, interface: &str) -> u32 {
        self.weights.get(interface).copied().unwrap_or(0)
    }

    fn is_main_interface(&self, interface: &str) -> bool {
        self.top_tier > 0 && self.weight_of(interface) == self.top_tier
    }
}
