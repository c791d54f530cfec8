use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::PropagationConfig;
use crate::core::graph::WalletGraph;
use crate::core::{Flag, MAX_RISK, WalletIdx};
use crate::store::FlagStore;

/// Hop limits above this would overflow the exact fraction arithmetic.
const MAX_SUPPORTED_HOPS: usize = 32;

/// Proximity risk: every wallet within `max_hops` of a maximally risky
/// wallet receives `MAX_RISK / d` per seed at distance `d`, summed and
/// clipped to `MAX_RISK`.
pub struct Propagator {
    max_hops: usize,
    reason: String,
}

impl Propagator {
    pub fn new(config: &PropagationConfig) -> Self {
        let mut max_hops = config.max_hops;
        if max_hops > MAX_SUPPORTED_HOPS {
            warn!("propagation max_hops {max_hops} clamped to {MAX_SUPPORTED_HOPS}");
            max_hops = MAX_SUPPORTED_HOPS;
        }
        Self {
            max_hops,
            reason: config.reason.clone(),
        }
    }

    /// Wallets whose current score is [`MAX_RISK`]. The store wins over the
    /// score the graph was seeded with, so flags merged earlier in the same
    /// run take part.
    pub fn seeds(&self, graph: &WalletGraph, store: &FlagStore) -> Vec<WalletIdx> {
        (0..graph.wallet_count())
            .filter(|&idx| {
                let wallet = graph.wallet(idx);
                let score = store
                    .get(&wallet.address)
                    .map(|e| e.score)
                    .unwrap_or(wallet.risk_score);
                score >= MAX_RISK
            })
            .collect()
    }

    /// Per-wallet count of seeds found at each hop distance (index 0 = 1 hop).
    ///
    /// Seed traversals run in parallel; counts are integers so the reduction
    /// gives the same answer in any order.
    pub fn hit_counts(&self, graph: &WalletGraph, seeds: &[WalletIdx]) -> BTreeMap<WalletIdx, Vec<u32>> {
        if self.max_hops == 0 {
            return BTreeMap::new();
        }
        let is_seed: Vec<bool> = {
            let mut v = vec![false; graph.wallet_count()];
            for &s in seeds {
                v[s] = true;
            }
            v
        };
        let hops = self.max_hops;

        let merged = seeds
            .par_iter()
            .fold(HashMap::<WalletIdx, Vec<u32>>::new, |mut acc, &seed| {
                for (node, dist) in graph.bfs(seed, hops) {
                    if dist == 0 || is_seed[node] {
                        continue;
                    }
                    acc.entry(node).or_insert_with(|| vec![0; hops])[dist - 1] += 1;
                }
                acc
            })
            .reduce(HashMap::new, |mut left, right| {
                for (node, counts) in right {
                    let slot = left.entry(node).or_insert_with(|| vec![0; hops]);
                    for (a, b) in slot.iter_mut().zip(counts) {
                        *a += b;
                    }
                }
                left
            });

        merged.into_iter().collect()
    }

    /// Clipped propagated score from per-distance seed counts.
    ///
    /// Computed exactly over the common denominator lcm(1..=max_hops) and
    /// rounded down.
    pub fn score(&self, counts: &[u32]) -> u8 {
        let denom = lcm_up_to(counts.len());
        let cap = MAX_RISK as u128 * denom;
        let mut total: u128 = 0;
        for (i, &n) in counts.iter().enumerate() {
            let d = (i + 1) as u128;
            total += n as u128 * MAX_RISK as u128 * (denom / d);
            if total >= cap {
                return MAX_RISK;
            }
        }
        (total / denom) as u8
    }

    /// Build one proposal per reached wallet, ordered by wallet index.
    pub fn propose(&self, graph: &WalletGraph, store: &FlagStore) -> Vec<Flag> {
        let seeds = self.seeds(graph, store);
        let counts = self.hit_counts(graph, &seeds);
        let flags: Vec<Flag> = counts
            .into_iter()
            .filter_map(|(idx, hits)| {
                let score = self.score(&hits);
                (score > 0).then(|| Flag::new(graph.wallet(idx).address.clone(), self.reason.clone(), score))
            })
            .collect();
        info!(seeds = seeds.len(), proposals = flags.len(), "risk propagation computed");
        flags
    }
}

fn gcd(a: u128, b: u128) -> u128 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm_up_to(n: usize) -> u128 {
    (1..=n as u128).fold(1, |acc, k| acc / gcd(acc, k) * k)
}
