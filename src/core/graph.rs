use std::collections::{HashMap, VecDeque};

use super::{Transfer, Wallet, WalletIdx};

const UNVISITED: u32 = u32::MAX;

/// Directed multigraph of wallets and transfers.
///
/// Nodes are addressed by a dense index handed out in insertion order; the
/// address map is only consulted at the edges of the API. Adjacency is kept
/// as per-node lists of transfer ids so parallel edges survive.
#[derive(Debug, Default, Clone)]
pub struct WalletGraph {
    index: HashMap<String, WalletIdx>,
    wallets: Vec<Wallet>,
    transfers: Vec<Transfer>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl WalletGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn index_of(&self, address: &str) -> Option<WalletIdx> {
        self.index.get(address).copied()
    }

    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.index_of(address).map(|idx| &self.wallets[idx])
    }

    pub fn wallet(&self, idx: WalletIdx) -> &Wallet {
        &self.wallets[idx]
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn transfer(&self, id: usize) -> &Transfer {
        &self.transfers[id]
    }

    /// Transfer ids leaving `idx`.
    pub fn outgoing_ids(&self, idx: WalletIdx) -> &[usize] {
        &self.outgoing[idx]
    }

    /// Transfer ids arriving at `idx`.
    pub fn incoming_ids(&self, idx: WalletIdx) -> &[usize] {
        &self.incoming[idx]
    }

    pub fn outgoing(&self, idx: WalletIdx) -> impl Iterator<Item = &Transfer> {
        self.outgoing[idx].iter().map(|&id| &self.transfers[id])
    }

    pub fn incoming(&self, idx: WalletIdx) -> impl Iterator<Item = &Transfer> {
        self.incoming[idx].iter().map(|&id| &self.transfers[id])
    }

    /// Insert a wallet unless its address is already present. Returns its index.
    pub(crate) fn insert_wallet(&mut self, wallet: Wallet) -> WalletIdx {
        if let Some(&idx) = self.index.get(&wallet.address) {
            return idx;
        }
        let idx = self.wallets.len();
        self.index.insert(wallet.address.clone(), idx);
        self.wallets.push(wallet);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        idx
    }

    pub(crate) fn wallet_mut(&mut self, idx: WalletIdx) -> &mut Wallet {
        &mut self.wallets[idx]
    }

    /// Append an edge. Counters are maintained by the builder, not here.
    pub(crate) fn push_transfer(&mut self, transfer: Transfer) -> usize {
        let id = self.transfers.len();
        self.outgoing[transfer.source].push(id);
        self.incoming[transfer.destination].push(id);
        self.transfers.push(transfer);
        id
    }

    /// Distinct neighbors of `idx` in the undirected projection, ascending.
    pub fn neighbors(&self, idx: WalletIdx) -> Vec<WalletIdx> {
        let mut out: Vec<WalletIdx> = self
            .outgoing(idx)
            .map(|t| t.destination)
            .chain(self.incoming(idx).map(|t| t.source))
            .filter(|&n| n != idx)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Breadth-first search over the undirected projection.
    ///
    /// Returns `(wallet, hop distance)` pairs in discovery order, starting with
    /// `(start, 0)`. Nodes farther than `max_hops` are not visited.
    pub fn bfs(&self, start: WalletIdx, max_hops: usize) -> Vec<(WalletIdx, usize)> {
        let mut dist = vec![UNVISITED; self.wallets.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        dist[start] = 0;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            let d = dist[node] as usize;
            order.push((node, d));
            if d == max_hops {
                continue;
            }
            let next = self.outgoing[node]
                .iter()
                .map(|&id| self.transfers[id].destination)
                .chain(self.incoming[node].iter().map(|&id| self.transfers[id].source));
            for n in next {
                if dist[n] == UNVISITED {
                    dist[n] = (d + 1) as u32;
                    queue.push_back(n);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Chain, ChainFamily};
    use chrono::Utc;

    fn edge(graph: &mut WalletGraph, from: &str, to: &str) {
        let s = graph.insert_wallet(Wallet::new(from, ChainFamily::Ethereum));
        let d = graph.insert_wallet(Wallet::new(to, ChainFamily::Ethereum));
        graph.push_transfer(Transfer {
            source: s,
            destination: d,
            chain: Chain::Eth,
            value: 1.0,
            fee: None,
            block_height: 1,
            timestamp: Utc::now(),
            tx_ref: format!("{from}->{to}"),
            output_index: None,
        });
    }

    #[test]
    fn insert_wallet_is_idempotent() {
        let mut g = WalletGraph::new();
        let a = g.insert_wallet(Wallet::new("a", ChainFamily::Bitcoin));
        let again = g.insert_wallet(Wallet::new("a", ChainFamily::Ethereum));
        assert_eq!(a, again);
        assert_eq!(g.wallet_count(), 1);
        assert_eq!(g.wallet(a).chain, ChainFamily::Bitcoin);
    }

    #[test]
    fn parallel_edges_are_kept() {
        let mut g = WalletGraph::new();
        edge(&mut g, "a", "b");
        edge(&mut g, "a", "b");
        assert_eq!(g.transfer_count(), 2);
        let a = g.index_of("a").unwrap();
        assert_eq!(g.outgoing_ids(a).len(), 2);
        assert_eq!(g.neighbors(a).len(), 1);
    }

    #[test]
    fn bfs_respects_hop_limit_and_direction_agnostic() {
        let mut g = WalletGraph::new();
        edge(&mut g, "a", "b");
        edge(&mut g, "c", "b");
        edge(&mut g, "c", "d");
        let b = g.index_of("b").unwrap();

        let one: Vec<_> = g.bfs(b, 1).into_iter().map(|(n, _)| g.wallet(n).address.clone()).collect();
        assert_eq!(one.len(), 3);
        assert!(one.contains(&"a".to_string()) && one.contains(&"c".to_string()));

        let two = g.bfs(b, 2);
        let d = g.index_of("d").unwrap();
        assert!(two.contains(&(d, 2)));
    }

    #[test]
    fn bfs_zero_hops_is_just_start() {
        let mut g = WalletGraph::new();
        edge(&mut g, "a", "b");
        let a = g.index_of("a").unwrap();
        assert_eq!(g.bfs(a, 0), vec![(a, 0)]);
    }

    #[test]
    fn self_loop_is_not_a_neighbor() {
        let mut g = WalletGraph::new();
        edge(&mut g, "a", "a");
        let a = g.index_of("a").unwrap();
        assert!(g.neighbors(a).is_empty());
        assert_eq!(g.bfs(a, 3).len(), 1);
    }
}
