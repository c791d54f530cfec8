use std::collections::{BTreeSet, HashSet};

use chrono::Duration;

use super::links::{by_sender, links};
use super::{window, Detector, Snapshot};
use crate::config::PeelingConfig;
use crate::core::{ChainFamily, WalletIdx};

/// Rapid dispersion: a wallet paying many distinct counterparties inside the
/// trailing window that ends at the snapshot's reference instant.
pub struct PeelingChain {
    min_outputs: usize,
    window: Duration,
    score: u8,
}

impl PeelingChain {
    pub fn new(config: &PeelingConfig) -> Self {
        Self {
            min_outputs: config.min_outputs,
            window: window(
                "peeling.time_window_minutes",
                config.time_window_minutes,
                PeelingConfig::default().time_window_minutes,
                Duration::try_minutes,
            ),
            score: config.score,
        }
    }
}

impl Detector for PeelingChain {
    fn name(&self) -> &str {
        "peeling_chain"
    }

    fn reason(&self) -> &str {
        "rapid fund dispersion (peeling chain)"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        let start = snapshot.as_of - self.window;
        let mut flagged = BTreeSet::new();

        // each family once, with its own linkage model
        for family in ChainFamily::ALL {
            let recent: Vec<_> = links(snapshot.graph, family)
                .into_iter()
                .filter(|l| l.timestamp >= start && l.timestamp <= snapshot.as_of)
                .collect();
            for (sender, sent) in by_sender(&recent) {
                let counterparties: HashSet<WalletIdx> = sent.iter().map(|l| l.to).collect();
                if counterparties.len() >= self.min_outputs {
                    flagged.insert(sender);
                }
            }
        }
        flagged
    }
}
