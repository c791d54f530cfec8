use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::links::OutputKey;
use super::{Detector, Snapshot};
use crate::config::MixerConfig;
use crate::core::graph::WalletGraph;
use crate::core::{ChainFamily, WalletIdx};

/// A UTXO transaction whose outputs all carry the same value.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualOutputTx {
    pub tx_ref: String,
    pub output_count: usize,
    pub value: f64,
    pub recipients: Vec<WalletIdx>,
}

/// Find UTXO transactions with at least `min_outputs` outputs and exactly one
/// distinct output value.
///
/// The ledger repeats an output once per input, so outputs are deduplicated
/// by output index (or by recipient when no index is recorded).
pub fn find_equal_output_txs(graph: &WalletGraph, min_outputs: usize) -> Vec<EqualOutputTx> {
    let mut txs: BTreeMap<&str, BTreeMap<OutputKey, (WalletIdx, f64)>> = BTreeMap::new();
    for t in graph
        .transfers()
        .iter()
        .filter(|t| t.chain.family() == ChainFamily::Bitcoin)
    {
        txs.entry(t.tx_ref.as_str())
            .or_default()
            .entry(OutputKey::of(t))
            .or_insert((t.destination, t.value));
    }

    let mut found = Vec::new();
    for (tx_ref, outputs) in txs {
        if outputs.len() < min_outputs {
            continue;
        }
        let distinct: HashSet<u64> = outputs.values().map(|(_, v)| v.to_bits()).collect();
        if distinct.len() != 1 {
            continue;
        }
        let recipients: BTreeSet<WalletIdx> = outputs.values().map(|(w, _)| *w).collect();
        let value = outputs.values().next().map(|(_, v)| *v).unwrap_or_default();
        found.push(EqualOutputTx {
            tx_ref: tx_ref.to_string(),
            output_count: outputs.len(),
            value,
            recipients: recipients.into_iter().collect(),
        });
    }
    found
}

/// Flags every recipient of an equal-output transaction.
pub struct EqualOutputMixer {
    min_outputs: usize,
    score: u8,
}

impl EqualOutputMixer {
    pub fn new(config: &MixerConfig) -> Self {
        Self {
            min_outputs: config.min_outputs,
            score: config.score,
        }
    }
}

impl Detector for EqualOutputMixer {
    fn name(&self) -> &str {
        "equal_output_mixer"
    }

    fn reason(&self) -> &str {
        "equal-output mixer pattern"
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx> {
        find_equal_output_txs(snapshot.graph, self.min_outputs)
            .into_iter()
            .flat_map(|tx| tx.recipients)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GraphBuilder;
    use crate::core::builder::tests::make_record;
    use crate::core::{Chain, TransferRecord};
    use std::collections::HashMap;

    fn make_tx(tx: &str, inputs: &[&str], outputs: &[f64]) -> Vec<TransferRecord> {
        let mut records = Vec::new();
        for input in inputs {
            for (n, value) in outputs.iter().enumerate() {
                let mut r = make_record(tx, input, &format!("{tx}-out{n}"), *value, 0);
                r.output_index = Some(n as u32);
                records.push(r);
            }
        }
        records
    }

    fn detect(records: Vec<TransferRecord>) -> (WalletGraph, BTreeSet<WalletIdx>) {
        let seed = HashMap::new();
        let (graph, _) = GraphBuilder::new(&seed).build(vec![(Chain::Btc, records)]);
        let hits = EqualOutputMixer::new(&MixerConfig::default()).detect(&Snapshot::new(&graph, None));
        (graph, hits)
    }

    #[test]
    fn six_equal_outputs_flag_all_recipients() {
        let (graph, hits) = detect(make_tx("mix", &["in"], &[5.0; 6]));
        assert_eq!(hits.len(), 6);
        for n in 0..6 {
            let idx = graph.index_of(&format!("mix-out{n}")).unwrap();
            assert!(hits.contains(&idx));
        }
        assert!(!hits.contains(&graph.index_of("in").unwrap()));
    }

    #[test]
    fn five_distinct_outputs_not_flagged() {
        let (_, hits) = detect(make_tx("pay", &["in"], &[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert!(hits.is_empty());
    }

    #[test]
    fn four_equal_outputs_under_threshold() {
        let (_, hits) = detect(make_tx("small", &["in"], &[5.0; 4]));
        assert!(hits.is_empty());
    }

    #[test]
    fn one_odd_output_breaks_the_pattern() {
        // change output makes two distinct values
        let mut outputs = vec![1_000_000.0; 5];
        outputs.push(50_000.0);
        let (_, hits) = detect(make_tx("cj", &["in"], &outputs));
        assert!(hits.is_empty());
    }

    #[test]
    fn many_inputs_do_not_inflate_output_count() {
        // 3 inputs x 4 outputs is 12 ledger rows but only 4 outputs
        let (_, hits) = detect(make_tx("consolidate", &["a", "b", "c"], &[5.0; 4]));
        assert!(hits.is_empty());

        let (graph, hits) = detect(make_tx("mix", &["a", "b", "c"], &[5.0; 5]));
        assert_eq!(hits.len(), 5);
        assert_eq!(find_equal_output_txs(&graph, 5)[0].output_count, 5);
    }

    #[test]
    fn account_chain_transfers_are_ignored() {
        let seed = HashMap::new();
        let records: Vec<_> = (0..6)
            .map(|n| make_record("eth-tx", "a", &format!("b{n}"), 5.0, 0))
            .collect();
        let (graph, _) = GraphBuilder::new(&seed).build(vec![(Chain::Eth, records)]);
        assert!(find_equal_output_txs(&graph, 5).is_empty());
    }

    #[test]
    fn empty_graph() {
        let graph = WalletGraph::new();
        assert!(find_equal_output_txs(&graph, 5).is_empty());
    }
}
