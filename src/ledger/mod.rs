use std::collections::HashMap;

use crate::core::{Chain, TransferRecord};
use crate::error::EngineError;

/// Per-chain source of transfer records, ordered by timestamp.
pub trait LedgerReader: Send + Sync {
    fn read_chain(&self, chain: Chain) -> Result<Vec<TransferRecord>, EngineError>;
}

/// Ledger held in memory. Records are sorted by timestamp on read.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    chains: HashMap<Chain, Vec<TransferRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, chain: Chain, records: impl IntoIterator<Item = TransferRecord>) -> Self {
        self.chains.entry(chain).or_default().extend(records);
        self
    }
}

impl LedgerReader for MemoryLedger {
    fn read_chain(&self, chain: Chain) -> Result<Vec<TransferRecord>, EngineError> {
        let mut records = self.chains.get(&chain).cloned().unwrap_or_default();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::tests::make_record;

    #[test]
    fn reads_in_timestamp_order() {
        let ledger = MemoryLedger::new().with(
            Chain::Eth,
            vec![make_record("late", "a", "b", 1.0, 50), make_record("early", "a", "c", 1.0, 5)],
        );
        let refs: Vec<_> = ledger.read_chain(Chain::Eth).unwrap().into_iter().map(|r| r.tx_ref).collect();
        assert_eq!(refs, vec!["early", "late"]);
    }

    #[test]
    fn absent_chain_is_empty() {
        let ledger = MemoryLedger::new().with(Chain::Btc, vec![make_record("t", "a", "b", 1.0, 0)]);
        assert!(ledger.read_chain(Chain::Erc20).unwrap().is_empty());
        assert_eq!(ledger.read_chain(Chain::Btc).unwrap().len(), 1);
    }
}
