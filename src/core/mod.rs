pub mod builder;
pub mod graph;
pub mod pipeline;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Score ceiling. Also the seed value for propagation.
pub const MAX_RISK: u8 = 10;

/// Dense index of a wallet inside one [`graph::WalletGraph`].
pub type WalletIdx = usize;

/// An ingestion stream. ERC20 token transfers live on the Ethereum family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "ERC20")]
    Erc20,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Btc, Chain::Eth, Chain::Erc20];

    pub fn family(self) -> ChainFamily {
        match self {
            Chain::Btc => ChainFamily::Bitcoin,
            Chain::Eth | Chain::Erc20 => ChainFamily::Ethereum,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Btc => "BTC",
            Chain::Eth => "ETH",
            Chain::Erc20 => "ERC20",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Ok(Chain::Btc),
            "ETH" => Ok(Chain::Eth),
            "ERC20" => Ok(Chain::Erc20),
            other => Err(format!("unknown chain {other:?}")),
        }
    }
}

/// Wallet chain tag. Determines how senders are linked to receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainFamily {
    Bitcoin,
    Ethereum,
}

impl ChainFamily {
    pub const ALL: [ChainFamily; 2] = [ChainFamily::Bitcoin, ChainFamily::Ethereum];

    pub fn linkage(self) -> Linkage {
        match self {
            ChainFamily::Bitcoin => Linkage::SharedTxRef,
            ChainFamily::Ethereum => Linkage::Direct,
        }
    }
}

/// How a chain family relates senders to receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Account model: every transfer is a direct sender -> receiver edge.
    Direct,
    /// UTXO model: every input address of a transaction is joined with
    /// every output address of the same transaction.
    SharedTxRef,
}

/// A raw transfer row as yielded by a ledger reader.
///
/// Endpoints are optional because the ledger may hold rows with missing
/// addresses; the builder skips and counts those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tx_ref: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: f64,
    pub fee: Option<f64>,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    /// Output position inside the transaction (UTXO chains only).
    pub output_index: Option<u32>,
}

/// A graph node. Counters start at zero; `reason` is `None` and
/// `risk_score` is 0 unless the flag store already knows the address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    pub chain: ChainFamily,
    pub incoming_count: u64,
    pub outgoing_count: u64,
    pub total_sent: f64,
    pub total_received: f64,
    /// Sum of fees over outgoing transfers, absent fees counted as zero.
    pub fees_paid: f64,
    pub flagged: bool,
    pub reason: Option<String>,
    pub risk_score: u8,
}

impl Wallet {
    pub fn new(address: impl Into<String>, chain: ChainFamily) -> Self {
        Self {
            address: address.into(),
            chain,
            incoming_count: 0,
            outgoing_count: 0,
            total_sent: 0.0,
            total_received: 0.0,
            fees_paid: 0.0,
            flagged: false,
            reason: None,
            risk_score: 0,
        }
    }

    pub fn avg_fee(&self) -> f64 {
        if self.outgoing_count == 0 {
            0.0
        } else {
            self.fees_paid / self.outgoing_count as f64
        }
    }
}

/// A graph edge. Parallel transfers between the same pair stay distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: WalletIdx,
    pub destination: WalletIdx,
    pub chain: Chain,
    pub value: f64,
    pub fee: Option<f64>,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_ref: String,
    pub output_index: Option<u32>,
}

/// A (reason, score) proposal for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flag {
    pub wallet: String,
    pub reason: String,
    pub score: u8,
}

impl Flag {
    /// Scores above [`MAX_RISK`] are clipped.
    pub fn new(wallet: impl Into<String>, reason: impl Into<String>, score: u8) -> Self {
        Self {
            wallet: wallet.into(),
            reason: reason.into(),
            score: score.min(MAX_RISK),
        }
    }
}

/// A record the builder or a feed could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub source: String,
    pub reference: String,
    pub reason: &'static str,
}
