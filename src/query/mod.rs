pub mod features;

use std::collections::HashMap;

use thiserror::Error;

use crate::core::graph::WalletGraph;
use crate::core::{Transfer, Wallet};
use crate::error::EngineError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("wallet not in graph: {0}")]
    NotFound(String),
}

impl From<QueryError> for EngineError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::NotFound(wallet) => EngineError::UnknownWallet(wallet),
        }
    }
}

/// Induced neighborhood of one wallet.
///
/// Nodes are in BFS discovery order, so the queried wallet is always node 0.
/// Edge endpoints are positions in `nodes`, not graph indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Subgraph {
    pub nodes: Vec<Wallet>,
    pub hops: Vec<usize>,
    pub edges: Vec<Transfer>,
}

impl Subgraph {
    pub fn center(&self) -> &Wallet {
        &self.nodes[0]
    }

    pub fn position(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|w| w.address == address)
    }

    /// `(source, destination)` pairs over node positions.
    pub fn edge_list(&self) -> Vec<(usize, usize)> {
        self.edges.iter().map(|e| (e.source, e.destination)).collect()
    }
}

/// All wallets within `max_hops` of `wallet` in the undirected projection,
/// with every transfer whose endpoints both lie in that ball.
pub fn get_subgraph(graph: &WalletGraph, wallet: &str, max_hops: usize) -> Result<Subgraph, QueryError> {
    let start = graph
        .index_of(wallet)
        .ok_or_else(|| QueryError::NotFound(wallet.to_string()))?;

    let ball = graph.bfs(start, max_hops);
    let local: HashMap<usize, usize> = ball.iter().enumerate().map(|(pos, &(idx, _))| (idx, pos)).collect();

    let mut ids: Vec<usize> = ball
        .iter()
        .flat_map(|&(idx, _)| graph.outgoing_ids(idx).iter().copied())
        .filter(|&id| local.contains_key(&graph.transfer(id).destination))
        .collect();
    ids.sort_unstable();

    let edges = ids
        .into_iter()
        .map(|id| {
            let t = graph.transfer(id);
            Transfer {
                source: local[&t.source],
                destination: local[&t.destination],
                ..t.clone()
            }
        })
        .collect();

    Ok(Subgraph {
        nodes: ball.iter().map(|&(idx, _)| graph.wallet(idx).clone()).collect(),
        hops: ball.iter().map(|&(_, d)| d).collect(),
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GraphBuilder;
    use crate::core::builder::tests::make_record;
    use crate::core::Chain;
    use std::collections::BTreeSet;

    fn make_graph(edges: &[(&str, &str)]) -> WalletGraph {
        let seed = HashMap::new();
        let records = edges
            .iter()
            .enumerate()
            .map(|(i, (a, b))| make_record(&format!("t{i}"), a, b, 1.0, i as i64))
            .collect();
        GraphBuilder::new(&seed).build(vec![(Chain::Eth, records)]).0
    }

    fn addresses(sub: &Subgraph) -> BTreeSet<&str> {
        sub.nodes.iter().map(|w| w.address.as_str()).collect()
    }

    #[test]
    fn one_hop_from_middle_of_path() {
        let graph = make_graph(&[("a", "b"), ("b", "c")]);
        let sub = get_subgraph(&graph, "b", 1).unwrap();
        assert_eq!(addresses(&sub), BTreeSet::from(["a", "b", "c"]));
        assert_eq!(sub.center().address, "b");
        assert_eq!(sub.edges.len(), 2);
    }

    #[test]
    fn one_hop_from_end_of_path() {
        let graph = make_graph(&[("a", "b"), ("b", "c")]);
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        assert_eq!(addresses(&sub), BTreeSet::from(["a", "b"]));
        assert_eq!(sub.edge_list(), vec![(0, 1)]);
    }

    #[test]
    fn induced_edges_include_non_tree_edges() {
        // triangle plus a parallel edge: BFS tree has 2 edges, induced has 4
        let graph = make_graph(&[("a", "b"), ("a", "c"), ("b", "c"), ("a", "b")]);
        let sub = get_subgraph(&graph, "a", 1).unwrap();
        assert_eq!(sub.nodes.len(), 3);
        assert_eq!(sub.edges.len(), 4);
        let b = sub.position("b").unwrap();
        let c = sub.position("c").unwrap();
        assert!(sub.edge_list().contains(&(b, c)));
    }

    #[test]
    fn zero_hops_is_the_wallet_alone() {
        let graph = make_graph(&[("a", "b"), ("a", "a")]);
        let sub = get_subgraph(&graph, "a", 0).unwrap();
        assert_eq!(sub.nodes.len(), 1);
        // the self-transfer lies inside the ball
        assert_eq!(sub.edge_list(), vec![(0, 0)]);
    }

    #[test]
    fn hop_distances_reported() {
        let graph = make_graph(&[("a", "b"), ("b", "c"), ("c", "d")]);
        let sub = get_subgraph(&graph, "a", 2).unwrap();
        let c = sub.position("c").unwrap();
        assert_eq!(sub.hops[c], 2);
        assert!(sub.position("d").is_none());
    }

    #[test]
    fn unknown_wallet_is_not_found() {
        let graph = make_graph(&[("a", "b")]);
        let err = get_subgraph(&graph, "zzz", 2).unwrap_err();
        assert_eq!(err, QueryError::NotFound("zzz".into()));
        assert!(matches!(EngineError::from(err), EngineError::UnknownWallet(w) if w == "zzz"));
    }
}
