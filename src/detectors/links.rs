use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::core::graph::WalletGraph;
use crate::core::{Chain, ChainFamily, Linkage, WalletIdx};

/// A sender -> receiver relation as a chain family's linkage model sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub from: WalletIdx,
    pub to: WalletIdx,
    pub chain: Chain,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Identity of one output inside a UTXO transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum OutputKey {
    Index(u32),
    Address(WalletIdx),
}

impl OutputKey {
    pub(crate) fn of(transfer: &crate::core::Transfer) -> Self {
        transfer
            .output_index
            .map(OutputKey::Index)
            .unwrap_or(OutputKey::Address(transfer.destination))
    }
}

/// Derive links for one chain family.
///
/// Account chains link each transfer directly. UTXO chains join every input
/// address of a transaction with every output of that same transaction.
pub fn links(graph: &WalletGraph, family: ChainFamily) -> Vec<Link> {
    match family.linkage() {
        Linkage::Direct => graph
            .transfers()
            .iter()
            .filter(|t| t.chain.family() == family)
            .map(|t| Link {
                from: t.source,
                to: t.destination,
                chain: t.chain,
                value: t.value,
                timestamp: t.timestamp,
            })
            .collect(),
        Linkage::SharedTxRef => joined_links(graph, family),
    }
}

/// Links of every chain family, concatenated.
pub fn all_links(graph: &WalletGraph) -> Vec<Link> {
    ChainFamily::ALL
        .iter()
        .flat_map(|&family| links(graph, family))
        .collect()
}

struct TxGroup {
    chain: Chain,
    timestamp: DateTime<Utc>,
    inputs: Vec<WalletIdx>,
    outputs: BTreeMap<OutputKey, (WalletIdx, f64)>,
}

fn joined_links(graph: &WalletGraph, family: ChainFamily) -> Vec<Link> {
    // BTreeMap keeps the output deterministic for a given graph
    let mut groups: BTreeMap<&str, TxGroup> = BTreeMap::new();
    for t in graph.transfers().iter().filter(|t| t.chain.family() == family) {
        let group = groups.entry(t.tx_ref.as_str()).or_insert_with(|| TxGroup {
            chain: t.chain,
            timestamp: t.timestamp,
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
        });
        if !group.inputs.contains(&t.source) {
            group.inputs.push(t.source);
        }
        group.outputs.entry(OutputKey::of(t)).or_insert((t.destination, t.value));
    }

    let mut out = Vec::new();
    for group in groups.values() {
        for &from in &group.inputs {
            for &(to, value) in group.outputs.values() {
                out.push(Link {
                    from,
                    to,
                    chain: group.chain,
                    value,
                    timestamp: group.timestamp,
                });
            }
        }
    }
    out
}

/// Group links by sender, preserving link order within each sender.
pub fn by_sender(links: &[Link]) -> HashMap<WalletIdx, Vec<&Link>> {
    let mut map: HashMap<WalletIdx, Vec<&Link>> = HashMap::new();
    for link in links {
        map.entry(link.from).or_default().push(link);
    }
    map
}
