use std::collections::BTreeSet;

use chrono::Duration;

use super::links::{all_links, by_sender};
use super::{window, Detector, Snapshot};
use crate::config::{StructuringConfig, ValueThresholds};
use crate::core::WalletIdx;

/// Many small outgoing transfers packed into a rolling window.
pub struct Structuring {
    min_tx_count: usize,
    window: Duration,
    thresholds: ValueThresholds,
    score: u8,
}

impl Structuring {
    pub fn new(config: &StructuringConfig) -> Self {
        Self {
            min_tx_count: config.min_tx_count,
            window: window(
                "structuring.time_window_hours",
                config.time_window_hours,
                StructuringConfig::default().time_window_hours,
                Duration::try_hours,
            ),
            thresholds: config.value_threshold.clone(),
            score: config.score,
        }
    }
}

impl Detector for Structuring {
    fn name(&self) -> &str {
        "structuring"
    }

    fn reason(&self) -> &str {
        "structuring (many small txs)"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        if self.min_tx_count == 0 {
            return BTreeSet::new();
        }
        let links = all_links(snapshot.graph);
        let mut flagged = BTreeSet::new();

        for (sender, sent) in by_sender(&links) {
            let mut times: Vec<_> = sent
                .iter()
                .filter(|l| l.value <= self.thresholds.for_chain(l.chain))
                .map(|l| l.timestamp)
                .collect();
            if times.len() < self.min_tx_count {
                continue;
            }
            times.sort_unstable();

            // any min_tx_count consecutive small sends spanning at most the window
            let n = self.min_tx_count;
            if times.windows(n).any(|w| w[n - 1] - w[0] <= self.window) {
                flagged.insert(sender);
            }
        }
        flagged
    }
}
