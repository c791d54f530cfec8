use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use super::links::links;
use super::{window, Detector, Snapshot};
use crate::config::CyclingConfig;
use crate::core::{ChainFamily, WalletIdx};

/// Funds forwarded almost immediately: `A -> B` followed by `B -> *` within
/// the window flags `A`. Account chains only; zero-value transfers ignored.
pub struct QuickCycling {
    window: Duration,
    score: u8,
}

impl QuickCycling {
    pub fn new(config: &CyclingConfig) -> Self {
        Self {
            window: window(
                "cycling.time_window_seconds",
                config.time_window_seconds,
                CyclingConfig::default().time_window_seconds,
                Duration::try_seconds,
            ),
            score: config.score,
        }
    }
}

impl Detector for QuickCycling {
    fn name(&self) -> &str {
        "quick_cycling"
    }

    fn reason(&self) -> &str {
        "quick fund cycling"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        let links: Vec<_> = links(snapshot.graph, ChainFamily::Ethereum)
            .into_iter()
            .filter(|l| l.value > 0.0)
            .collect();

        let mut sends: HashMap<WalletIdx, Vec<DateTime<Utc>>> = HashMap::new();
        for l in &links {
            sends.entry(l.from).or_default().push(l.timestamp);
        }
        for times in sends.values_mut() {
            times.sort_unstable();
        }

        let mut flagged = BTreeSet::new();
        for l in &links {
            let Some(onward) = sends.get(&l.to) else {
                continue;
            };
            let first = onward.partition_point(|t| *t < l.timestamp);
            if onward.get(first).is_some_and(|t| *t - l.timestamp < self.window) {
                flagged.insert(l.from);
            }
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GraphBuilder;
    use crate::core::builder::tests::make_record;
    use crate::core::Chain;

    fn detect(chain: Chain, hop_delay_secs: i64) -> (bool, bool) {
        let seed = HashMap::new();
        let records = vec![
            make_record("t1", "a", "b", 1.0, 0),
            make_record("t2", "b", "c", 1.0, hop_delay_secs),
        ];
        let (graph, _) = GraphBuilder::new(&seed).build(vec![(chain, records)]);
        let hits = QuickCycling::new(&CyclingConfig::default()).detect(&Snapshot::new(&graph, None));
        (
            hits.contains(&graph.index_of("a").unwrap()),
            hits.contains(&graph.index_of("b").unwrap()),
        )
    }

    #[test]
    fn forward_within_five_minutes_flags_origin() {
        assert_eq!(detect(Chain::Eth, 120), (true, false));
    }

    #[test]
    fn slow_forward_not_flagged() {
        assert_eq!(detect(Chain::Eth, 300), (false, false));
    }

    #[test]
    fn earlier_onward_send_does_not_count() {
        assert_eq!(detect(Chain::Eth, -60), (false, false));
    }

    #[test]
    fn bitcoin_family_ignored() {
        assert_eq!(detect(Chain::Btc, 10), (false, false));
    }
}
