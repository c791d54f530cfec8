use std::collections::{BTreeSet, HashMap, HashSet};

use super::links::{all_links, by_sender};
use super::{Detector, Snapshot};
use crate::config::{FanOutConfig, InflowConfig};
use crate::core::WalletIdx;

/// Wallets paying more than `min_counterparties` distinct receivers, over the
/// whole snapshot.
pub struct HighCounterparty {
    min_counterparties: usize,
    score: u8,
}

impl HighCounterparty {
    pub fn new(config: &FanOutConfig) -> Self {
        Self {
            min_counterparties: config.min_counterparties,
            score: config.score,
        }
    }
}

impl Detector for HighCounterparty {
    fn name(&self) -> &str {
        "high_counterparty"
    }

    fn reason(&self) -> &str {
        "high counterparty count"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        let links = all_links(snapshot.graph);
        by_sender(&links)
            .into_iter()
            .filter(|(_, sent)| {
                let receivers: HashSet<WalletIdx> = sent.iter().map(|l| l.to).collect();
                receivers.len() > self.min_counterparties
            })
            .map(|(sender, _)| sender)
            .collect()
    }
}

/// Aggregation points: many deposits from many distinct senders.
pub struct HighInflow {
    min_transfers: usize,
    min_senders: usize,
    score: u8,
}

impl HighInflow {
    pub fn new(config: &InflowConfig) -> Self {
        Self {
            min_transfers: config.min_transfers,
            min_senders: config.min_senders,
            score: config.score,
        }
    }
}

impl Detector for HighInflow {
    fn name(&self) -> &str {
        "high_inflow"
    }

    fn reason(&self) -> &str {
        "high inflow from multiple wallets"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        let mut inflow: HashMap<WalletIdx, (usize, HashSet<WalletIdx>)> = HashMap::new();
        for link in all_links(snapshot.graph) {
            let entry = inflow.entry(link.to).or_default();
            entry.0 += 1;
            entry.1.insert(link.from);
        }
        inflow
            .into_iter()
            .filter(|(_, (count, senders))| *count > self.min_transfers && senders.len() >= self.min_senders)
            .map(|(receiver, _)| receiver)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GraphBuilder;
    use crate::core::builder::tests::make_record;
    use crate::core::graph::WalletGraph;
    use crate::core::{Chain, TransferRecord};

    fn graph_of(records: Vec<TransferRecord>) -> WalletGraph {
        let seed = HashMap::new();
        GraphBuilder::new(&seed).build(vec![(Chain::Erc20, records)]).0
    }

    fn fan_out(count: usize) -> Vec<TransferRecord> {
        (0..count)
            .map(|i| make_record(&format!("t{i}"), "hub", &format!("d{i}"), 1.0, i as i64 * 86_400))
            .collect()
    }

    #[test]
    fn fan_out_needs_more_than_fifty() {
        let detector = HighCounterparty::new(&FanOutConfig::default());

        let graph = graph_of(fan_out(50));
        assert!(detector.detect(&Snapshot::new(&graph, None)).is_empty());

        let graph = graph_of(fan_out(51));
        let hits = detector.detect(&Snapshot::new(&graph, None));
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![graph.index_of("hub").unwrap()]);
    }

    fn deposits(count: usize, senders: usize) -> Vec<TransferRecord> {
        (0..count)
            .map(|i| make_record(&format!("t{i}"), &format!("s{}", i % senders), "sink", 1.0, i as i64))
            .collect()
    }

    #[test]
    fn inflow_flagged_with_enough_transfers_and_senders() {
        let graph = graph_of(deposits(51, 20));
        let hits = HighInflow::new(&InflowConfig::default()).detect(&Snapshot::new(&graph, None));
        assert!(hits.contains(&graph.index_of("sink").unwrap()));
    }

    #[test]
    fn inflow_needs_more_than_fifty_transfers() {
        let graph = graph_of(deposits(50, 25));
        let hits = HighInflow::new(&InflowConfig::default()).detect(&Snapshot::new(&graph, None));
        assert!(hits.is_empty());
    }

    #[test]
    fn inflow_needs_twenty_distinct_senders() {
        let graph = graph_of(deposits(80, 19));
        let hits = HighInflow::new(&InflowConfig::default()).detect(&Snapshot::new(&graph, None));
        assert!(hits.is_empty());
    }
}
