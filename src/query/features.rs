use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Subgraph;
use crate::core::{Chain, ChainFamily, MAX_RISK};

/// Column order of [`NodeFeatures::to_row`].
pub const FEATURE_NAMES: [&str; 15] = [
    "degree",
    "in_degree",
    "out_degree",
    "incoming_count",
    "outgoing_count",
    "total_sent",
    "total_received",
    "avg_fee",
    "tx_volume",
    "avg_sent",
    "avg_received",
    "neighbor_risk_mean",
    "neighbor_risk_max",
    "chain_bitcoin",
    "chain_ethereum",
];

/// Keeps the averages finite for wallets with no transfers in one direction.
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeFeatures {
    pub degree: usize,
    pub in_degree: usize,
    pub out_degree: usize,
    pub incoming_count: u64,
    pub outgoing_count: u64,
    pub total_sent: f64,
    pub total_received: f64,
    pub avg_fee: f64,
    pub tx_volume: u64,
    pub avg_sent: f64,
    pub avg_received: f64,
    pub neighbor_risk_mean: f64,
    pub neighbor_risk_max: u8,
    pub chain: ChainFamily,
}

impl NodeFeatures {
    pub fn to_row(&self) -> Vec<f64> {
        vec![
            self.degree as f64,
            self.in_degree as f64,
            self.out_degree as f64,
            self.incoming_count as f64,
            self.outgoing_count as f64,
            self.total_sent,
            self.total_received,
            self.avg_fee,
            self.tx_volume as f64,
            self.avg_sent,
            self.avg_received,
            self.neighbor_risk_mean,
            self.neighbor_risk_max as f64,
            (self.chain == ChainFamily::Bitcoin) as u8 as f64,
            (self.chain == ChainFamily::Ethereum) as u8 as f64,
        ]
    }
}

/// One feature row per subgraph node, in node order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureMatrix {
    pub nodes: Vec<NodeFeatures>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.nodes.iter().map(NodeFeatures::to_row).collect()
    }
}

/// Pure summary of a subgraph. Degrees and neighbor risk only see edges
/// inside the subgraph; counters and totals come from the full graph.
pub fn summarize(sub: &Subgraph) -> FeatureMatrix {
    let n = sub.nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut out_degree = vec![0usize; n];
    let mut neighbors = vec![BTreeSet::new(); n];
    for e in &sub.edges {
        out_degree[e.source] += 1;
        in_degree[e.destination] += 1;
        if e.source != e.destination {
            neighbors[e.source].insert(e.destination);
            neighbors[e.destination].insert(e.source);
        }
    }

    let nodes = sub
        .nodes
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let risks: Vec<u8> = neighbors[i].iter().map(|&j| sub.nodes[j].risk_score).collect();
            let neighbor_risk_mean = if risks.is_empty() {
                0.0
            } else {
                risks.iter().map(|&r| r as f64).sum::<f64>() / risks.len() as f64
            };
            NodeFeatures {
                degree: in_degree[i] + out_degree[i],
                in_degree: in_degree[i],
                out_degree: out_degree[i],
                incoming_count: w.incoming_count,
                outgoing_count: w.outgoing_count,
                total_sent: w.total_sent,
                total_received: w.total_received,
                avg_fee: w.avg_fee(),
                tx_volume: w.incoming_count + w.outgoing_count,
                avg_sent: w.total_sent / (w.outgoing_count as f64 + EPSILON),
                avg_received: w.total_received / (w.incoming_count as f64 + EPSILON),
                neighbor_risk_mean,
                neighbor_risk_max: risks.iter().copied().max().unwrap_or(0),
                chain: w.chain,
            }
        })
        .collect();

    FeatureMatrix { nodes }
}

/// `rgb(0,255,255)` at risk 0 shading to `rgb(255,0,0)` at [`MAX_RISK`].
pub fn risk_colour(risk: u8) -> String {
    let r = 255 * risk.min(MAX_RISK) as u32 / MAX_RISK as u32;
    let gb = 255 - r;
    format!("rgb({r},{gb},{gb})")
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadNode {
    pub id: usize,
    pub wallet: String,
    pub chain: ChainFamily,
    pub flagged: bool,
    pub reason: Option<String>,
    pub risk_score: u8,
    pub hops: usize,
    pub incoming_count: u64,
    pub outgoing_count: u64,
    pub total_sent: f64,
    pub total_received: f64,
    pub colour: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadEdge {
    pub source: usize,
    pub target: usize,
    pub tx_ref: String,
    pub chain: Chain,
    pub value: f64,
    pub fee: Option<f64>,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
}

/// Visualization payload for one neighborhood.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPayload {
    pub center: String,
    pub nodes: Vec<PayloadNode>,
    pub edges: Vec<PayloadEdge>,
}

impl GraphPayload {
    pub fn from_subgraph(sub: &Subgraph) -> Self {
        let nodes = sub
            .nodes
            .iter()
            .zip(&sub.hops)
            .enumerate()
            .map(|(id, (w, &hops))| PayloadNode {
                id,
                wallet: w.address.clone(),
                chain: w.chain,
                flagged: w.flagged,
                reason: w.reason.clone(),
                risk_score: w.risk_score,
                hops,
                incoming_count: w.incoming_count,
                outgoing_count: w.outgoing_count,
                total_sent: w.total_sent,
                total_received: w.total_received,
                colour: risk_colour(w.risk_score),
            })
            .collect();
        let edges = sub
            .edges
            .iter()
            .map(|e| PayloadEdge {
                source: e.source,
                target: e.destination,
                tx_ref: e.tx_ref.clone(),
                chain: e.chain,
                value: e.value,
                fee: e.fee,
                block_height: e.block_height,
                timestamp: e.timestamp,
            })
            .collect();
        Self {
            center: sub.center().address.clone(),
            nodes,
            edges,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GraphBuilder;
    use crate::core::builder::tests::make_record;
    use crate::core::graph::WalletGraph;
    use crate::query::get_subgraph;
    use crate::store::FlagEntry;
    use std::collections::HashMap;

    fn make_graph() -> WalletGraph {
        let mut seed = HashMap::new();
        seed.insert("bad".to_string(), FlagEntry { reason: "OFAC Sanctioned Wallet".into(), score: 10 });
        seed.insert("meh".to_string(), FlagEntry { reason: "structuring (many small txs)".into(), score: 6 });
        let mut paid = make_record("t0", "a", "b", 4.0, 0);
        paid.fee = Some(0.5);
        let records = vec![
            paid,
            make_record("t1", "a", "b", 2.0, 10),
            make_record("t2", "bad", "a", 3.0, 20),
            make_record("t3", "meh", "a", 1.0, 30),
            make_record("t4", "b", "far", 1.0, 40),
        ];
        GraphBuilder::new(&seed).build(vec![(Chain::Eth, records)]).0
    }

    #[test]
    fn summarizes_center_wallet() {
        let graph = make_graph();
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        let features = summarize(&sub);
        assert_eq!(features.len(), sub.nodes.len());

        let a = &features.nodes[0];
        assert_eq!(a.out_degree, 2);
        assert_eq!(a.in_degree, 2);
        assert_eq!(a.degree, 4);
        assert_eq!(a.tx_volume, 4);
        assert_eq!(a.total_sent, 6.0);
        assert!((a.avg_sent - 3.0).abs() < 1e-5);
        assert!((a.avg_fee - 0.25).abs() < 1e-12);
        // neighbors b (0), bad (10), meh (6)
        assert_eq!(a.neighbor_risk_max, 10);
        assert!((a.neighbor_risk_mean - 16.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn degrees_only_count_edges_inside_subgraph() {
        let graph = make_graph();
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        let features = summarize(&sub);
        let b = sub.position("b").unwrap();
        // b -> far is outside the ball
        assert_eq!(features.nodes[b].out_degree, 0);
        assert_eq!(features.nodes[b].outgoing_count, 1);
    }

    #[test]
    fn row_layout_matches_names() {
        let graph = make_graph();
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        let rows = summarize(&sub).rows();
        assert!(rows.iter().all(|r| r.len() == FEATURE_NAMES.len()));
        assert_eq!(&rows[0][13..], &[0.0, 1.0]);
    }

    #[test]
    fn colour_scale() {
        assert_eq!(risk_colour(0), "rgb(0,255,255)");
        assert_eq!(risk_colour(10), "rgb(255,0,0)");
        assert_eq!(risk_colour(5), "rgb(127,128,128)");
        assert_eq!(risk_colour(200), "rgb(255,0,0)");
    }

    #[test]
    fn payload_serializes_nodes_and_edges() {
        let graph = make_graph();
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        let payload = GraphPayload::from_subgraph(&sub);
        assert_eq!(payload.center, "a");
        assert_eq!(payload.edges.len(), sub.edges.len());

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        let bad = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["wallet"] == "bad")
            .unwrap();
        assert_eq!(bad["colour"], "rgb(255,0,0)");
        assert_eq!(bad["reason"], "OFAC Sanctioned Wallet");
        assert_eq!(json["edges"][0]["chain"], "ETH");
    }
}
