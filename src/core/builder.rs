use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::graph::WalletGraph;
use super::{Chain, MalformedRecord, Transfer, TransferRecord, Wallet};
use crate::store::FlagEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Counters {
    incoming: u64,
    outgoing: u64,
    sent: f64,
    received: f64,
    fees: f64,
}

#[derive(Debug, Clone)]
struct ValidTransfer {
    from: String,
    to: String,
    value: f64,
    fee: Option<f64>,
    block_height: u64,
    timestamp: DateTime<Utc>,
    tx_ref: String,
    output_index: Option<u32>,
}

/// Everything one chain worker derived from its stream.
///
/// Workers never share state; partials are combined by
/// [`GraphBuilder::merge`] in a fixed chain order.
#[derive(Debug)]
pub struct ChainPartial {
    pub chain: Chain,
    order: Vec<String>,
    counters: HashMap<String, Counters>,
    transfers: Vec<ValidTransfer>,
    pub malformed: Vec<MalformedRecord>,
}

impl ChainPartial {
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }
}

/// Validate and accumulate one chain's ordered transfer stream.
pub fn accumulate(chain: Chain, records: impl IntoIterator<Item = TransferRecord>) -> ChainPartial {
    let mut partial = ChainPartial {
        chain,
        order: Vec::new(),
        counters: HashMap::new(),
        transfers: Vec::new(),
        malformed: Vec::new(),
    };

    for record in records {
        let valid = match validate(chain, record) {
            Ok(v) => v,
            Err(bad) => {
                debug!(%chain, tx_ref = %bad.reference, reason = bad.reason, "skipping malformed transfer");
                partial.malformed.push(bad);
                continue;
            }
        };

        for addr in [&valid.from, &valid.to] {
            if !partial.counters.contains_key(addr) {
                partial.counters.insert(addr.clone(), Counters::default());
                partial.order.push(addr.clone());
            }
        }

        if let Some(c) = partial.counters.get_mut(&valid.from) {
            c.outgoing += 1;
            c.sent += valid.value;
            c.fees += valid.fee.unwrap_or(0.0);
        }
        if let Some(c) = partial.counters.get_mut(&valid.to) {
            c.incoming += 1;
            c.received += valid.value;
        }
        partial.transfers.push(valid);
    }

    partial
}

fn validate(chain: Chain, record: TransferRecord) -> Result<ValidTransfer, MalformedRecord> {
    let bad = |reason: &'static str, reference: &str| MalformedRecord {
        source: chain.to_string(),
        reference: reference.to_string(),
        reason,
    };

    if record.tx_ref.trim().is_empty() {
        return Err(bad("missing tx reference", ""));
    }
    let from = match record.from.as_deref().map(str::trim) {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => return Err(bad("missing source address", &record.tx_ref)),
    };
    let to = match record.to.as_deref().map(str::trim) {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => return Err(bad("missing destination address", &record.tx_ref)),
    };
    if !record.value.is_finite() || record.value < 0.0 {
        return Err(bad("invalid value", &record.tx_ref));
    }
    if let Some(fee) = record.fee {
        if !fee.is_finite() || fee < 0.0 {
            return Err(bad("invalid fee", &record.tx_ref));
        }
    }

    Ok(ValidTransfer {
        from,
        to,
        value: record.value,
        fee: record.fee,
        block_height: record.block_height,
        timestamp: record.timestamp,
        tx_ref: record.tx_ref,
        output_index: record.output_index,
    })
}

/// Summary of one graph build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub transfers: usize,
    pub wallets: usize,
    pub malformed: BTreeMap<Chain, usize>,
}

impl BuildReport {
    pub fn malformed_total(&self) -> usize {
        self.malformed.values().sum()
    }
}

/// Assembles a fresh [`WalletGraph`] from chain partials.
///
/// New wallets inherit flag state from a flag store snapshot taken when the
/// run started.
pub struct GraphBuilder<'a> {
    seed: &'a HashMap<String, FlagEntry>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(seed: &'a HashMap<String, FlagEntry>) -> Self {
        Self { seed }
    }

    /// Accumulate and merge all streams on the calling thread.
    pub fn build(&self, streams: Vec<(Chain, Vec<TransferRecord>)>) -> (WalletGraph, BuildReport) {
        let partials = streams
            .into_iter()
            .map(|(chain, records)| accumulate(chain, records))
            .collect();
        self.merge(partials)
    }

    pub fn merge(&self, mut partials: Vec<ChainPartial>) -> (WalletGraph, BuildReport) {
        // Completion order of workers must not leak into indices or sums.
        partials.sort_by_key(|p| p.chain);

        let mut graph = WalletGraph::new();
        let mut report = BuildReport::default();

        for partial in partials {
            let chain = partial.chain;
            let family = chain.family();

            for addr in &partial.order {
                let mut wallet = Wallet::new(addr.clone(), family);
                if let Some(entry) = self.seed.get(addr) {
                    wallet.flagged = entry.score > 0;
                    wallet.reason = Some(entry.reason.clone());
                    wallet.risk_score = entry.score;
                }
                let idx = graph.insert_wallet(wallet);
                if let Some(c) = partial.counters.get(addr) {
                    let w = graph.wallet_mut(idx);
                    w.incoming_count += c.incoming;
                    w.outgoing_count += c.outgoing;
                    w.total_sent += c.sent;
                    w.total_received += c.received;
                    w.fees_paid += c.fees;
                }
            }

            let count = partial.transfers.len();
            for t in partial.transfers {
                let (Some(source), Some(destination)) = (graph.index_of(&t.from), graph.index_of(&t.to)) else {
                    continue;
                };
                graph.push_transfer(Transfer {
                    source,
                    destination,
                    chain,
                    value: t.value,
                    fee: t.fee,
                    block_height: t.block_height,
                    timestamp: t.timestamp,
                    tx_ref: t.tx_ref,
                    output_index: t.output_index,
                });
            }

            if !partial.malformed.is_empty() {
                warn!(%chain, skipped = partial.malformed.len(), "malformed transfers skipped");
            }
            report.malformed.insert(chain, partial.malformed.len());
            info!(%chain, transfers = count, "chain merged into graph");
        }

        report.transfers = graph.transfer_count();
        report.wallets = graph.wallet_count();
        info!(
            "Graph built: {} wallets, {} transfers, {} malformed skipped",
            report.wallets,
            report.transfers,
            report.malformed_total()
        );
        (graph, report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn make_record(tx: &str, from: &str, to: &str, value: f64, secs: i64) -> TransferRecord {
        TransferRecord {
            tx_ref: tx.to_string(),
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            value,
            fee: None,
            block_height: 800_000,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            output_index: None,
        }
    }

    fn no_seed() -> HashMap<String, FlagEntry> {
        HashMap::new()
    }

    #[test]
    fn counter_sums_match_transfer_count() {
        let seed = no_seed();
        let streams = vec![
            (Chain::Eth, vec![
                make_record("t1", "a", "b", 1.0, 0),
                make_record("t2", "b", "c", 2.0, 1),
                make_record("t3", "a", "b", 3.0, 2),
            ]),
            (Chain::Btc, vec![make_record("t4", "x", "a", 0.5, 0)]),
        ];
        let (graph, report) = GraphBuilder::new(&seed).build(streams);
        let out: u64 = graph.wallets().iter().map(|w| w.outgoing_count).sum();
        let inc: u64 = graph.wallets().iter().map(|w| w.incoming_count).sum();
        assert_eq!(out, 4);
        assert_eq!(inc, 4);
        assert_eq!(report.transfers, 4);
        assert_eq!(graph.transfer_count(), 4);
    }

    #[test]
    fn aggregates_and_missing_fee() {
        let seed = no_seed();
        let mut with_fee = make_record("t1", "a", "b", 4.0, 0);
        with_fee.fee = Some(0.2);
        let without_fee = make_record("t2", "a", "c", 6.0, 1);
        let (graph, _) = GraphBuilder::new(&seed).build(vec![(Chain::Eth, vec![with_fee, without_fee])]);

        let a = graph.get("a").unwrap();
        assert_eq!(a.outgoing_count, 2);
        assert!((a.total_sent - 10.0).abs() < 1e-9);
        assert!((a.avg_fee() - 0.1).abs() < 1e-9);
        assert!((graph.get("b").unwrap().total_received - 4.0).abs() < 1e-9);

        let stored_fees: Vec<_> = graph.transfers().iter().map(|t| t.fee).collect();
        assert!(stored_fees.contains(&None));
        assert!(stored_fees.contains(&Some(0.2)));
    }

    #[test]
    fn malformed_records_are_counted_not_fatal() {
        let seed = no_seed();
        let mut no_to = make_record("t1", "a", "b", 1.0, 0);
        no_to.to = None;
        let mut empty_from = make_record("t2", "a", "b", 1.0, 0);
        empty_from.from = Some("  ".into());
        let negative = make_record("t3", "a", "b", -1.0, 0);
        let ok = make_record("t4", "a", "b", 1.0, 0);

        let (graph, report) =
            GraphBuilder::new(&seed).build(vec![(Chain::Erc20, vec![no_to, empty_from, negative, ok])]);
        assert_eq!(report.malformed[&Chain::Erc20], 3);
        assert_eq!(report.malformed_total(), 3);
        assert_eq!(graph.transfer_count(), 1);
    }

    #[test]
    fn wallets_seeded_from_flag_snapshot() {
        let mut seed = HashMap::new();
        seed.insert("bad".to_string(), FlagEntry { reason: "OFAC Sanctioned Wallet".into(), score: 10 });
        let (graph, _) =
            GraphBuilder::new(&seed).build(vec![(Chain::Eth, vec![make_record("t", "bad", "ok", 1.0, 0)])]);
        let bad = graph.get("bad").unwrap();
        assert!(bad.flagged);
        assert_eq!(bad.risk_score, 10);
        assert_eq!(bad.reason.as_deref(), Some("OFAC Sanctioned Wallet"));
        let ok = graph.get("ok").unwrap();
        assert!(!ok.flagged);
        assert_eq!(ok.risk_score, 0);
    }

    #[test]
    fn zero_score_seed_is_not_flagged() {
        let mut seed = HashMap::new();
        seed.insert("cleared".to_string(), FlagEntry { reason: "manual review".into(), score: 0 });
        let (graph, _) =
            GraphBuilder::new(&seed).build(vec![(Chain::Eth, vec![make_record("t", "cleared", "x", 1.0, 0)])]);
        let cleared = graph.get("cleared").unwrap();
        assert!(!cleared.flagged);
        assert_eq!(cleared.reason.as_deref(), Some("manual review"));
    }

    #[test]
    fn merge_order_does_not_depend_on_worker_completion() {
        let seed = no_seed();
        let eth = || accumulate(Chain::Eth, vec![make_record("e", "a", "b", 1.5, 0)]);
        let btc = || accumulate(Chain::Btc, vec![make_record("b", "b", "c", 2.5, 0)]);

        let (g1, _) = GraphBuilder::new(&seed).merge(vec![eth(), btc()]);
        let (g2, _) = GraphBuilder::new(&seed).merge(vec![btc(), eth()]);
        assert_eq!(g1.wallets(), g2.wallets());
        // BTC merges first, so the shared wallet carries the Bitcoin tag
        assert_eq!(g1.get("b").unwrap().chain, crate::core::ChainFamily::Bitcoin);
    }
}
