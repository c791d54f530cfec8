use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::core::Chain;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub store: StoreConfig,
    pub detectors: DetectorConfig,
    pub feeds: Vec<FeedConfig>,
    pub propagation: PropagationConfig,
    pub query: QueryConfig,
    pub classifier: ClassifierConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: String,
    pub chains: Vec<Chain>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DetectorConfig {
    /// Reference instant for trailing windows. Defaults to the newest
    /// transfer in the snapshot.
    pub as_of: Option<DateTime<Utc>>,
    pub mixer: MixerConfig,
    pub peeling: PeelingConfig,
    pub structuring: StructuringConfig,
    pub fan_out: FanOutConfig,
    pub inflow: InflowConfig,
    pub cycling: CyclingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MixerConfig {
    pub min_outputs: usize,
    pub score: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PeelingConfig {
    pub min_outputs: usize,
    pub time_window_minutes: i64,
    pub score: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StructuringConfig {
    pub min_tx_count: usize,
    pub time_window_hours: i64,
    pub value_threshold: ValueThresholds,
    pub score: u8,
}

/// Per-chain ceiling for a "small" transfer, in the chain's native unit.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValueThresholds {
    pub btc: f64,
    pub eth: f64,
    pub erc20: f64,
}

impl ValueThresholds {
    pub fn for_chain(&self, chain: Chain) -> f64 {
        match chain {
            Chain::Btc => self.btc,
            Chain::Eth => self.eth,
            Chain::Erc20 => self.erc20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FanOutConfig {
    /// Flag when distinct counterparties exceed this.
    pub min_counterparties: usize,
    pub score: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InflowConfig {
    /// Flag when received transfers exceed this...
    pub min_transfers: usize,
    /// ...and come from at least this many distinct senders.
    pub min_senders: usize,
    pub score: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CyclingConfig {
    pub enabled: bool,
    pub time_window_seconds: i64,
    pub score: u8,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// One address per line, or `asset,address` pairs.
    Addresses,
    /// `wallet_address,reason,risk_score` with a header row.
    Csv,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub path: String,
    pub format: FeedFormat,
    #[serde(default = "default_feed_reason")]
    pub reason: String,
    #[serde(default = "default_feed_score")]
    pub score: u8,
    /// Asset tags to keep from an `asset,address` list. Empty keeps all.
    #[serde(default)]
    pub assets: Vec<String>,
}

fn default_feed_reason() -> String {
    "External list".into()
}

fn default_feed_score() -> u8 {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PropagationConfig {
    /// Proximity propagation is dormant unless switched on here.
    pub enabled: bool,
    pub max_hops: usize,
    pub reason: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub max_hops: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub path: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger.db".into(),
            chains: Chain::ALL.to_vec(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/flags.db".into(),
        }
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            min_outputs: 5,
            score: 9,
        }
    }
}

impl Default for PeelingConfig {
    fn default() -> Self {
        Self {
            min_outputs: 5,
            time_window_minutes: 10,
            score: 8,
        }
    }
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            min_tx_count: 20,
            time_window_hours: 168,
            value_threshold: ValueThresholds::default(),
            score: 8,
        }
    }
}

impl Default for ValueThresholds {
    fn default() -> Self {
        Self {
            btc: 0.1,
            eth: 10.0,
            erc20: 10.0,
        }
    }
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            min_counterparties: 50,
            score: 7,
        }
    }
}

impl Default for InflowConfig {
    fn default() -> Self {
        Self {
            min_transfers: 50,
            min_senders: 20,
            score: 8,
        }
    }
}

impl Default for CyclingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_window_seconds: 300,
            score: 6,
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hops: 3,
            reason: "Proximity to risky wallets.".into(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { max_hops: 2 }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            password: None,
            timeout_seconds: 10,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let c = Config::default();
        assert_eq!(c.detectors.mixer.min_outputs, 5);
        assert_eq!(c.detectors.peeling.time_window_minutes, 10);
        assert_eq!(c.detectors.structuring.min_tx_count, 20);
        assert_eq!(c.detectors.structuring.time_window_hours, 168);
        assert_eq!(c.detectors.fan_out.min_counterparties, 50);
        assert_eq!(c.detectors.inflow.min_senders, 20);
        assert!(!c.propagation.enabled);
        assert_eq!(c.propagation.max_hops, 3);
        assert_eq!(c.query.max_hops, 2);
        assert_eq!(c.ledger.chains, Chain::ALL.to_vec());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: Config = toml::from_str(
            r#"
            [ledger]
            chains = ["ETH"]

            [detectors.structuring.value_threshold]
            btc = 0.5

            [propagation]
            enabled = true

            [[feeds]]
            name = "ofac"
            path = "data/sdn.txt"
            format = "addresses"
            reason = "OFAC Sanctioned Wallet"
            assets = ["XBT", "ETH"]
            "#,
        )
        .unwrap();
        assert_eq!(c.ledger.chains, vec![Chain::Eth]);
        assert_eq!(c.ledger.path, "data/ledger.db");
        assert_eq!(c.detectors.structuring.value_threshold.for_chain(Chain::Btc), 0.5);
        assert_eq!(c.detectors.structuring.value_threshold.for_chain(Chain::Erc20), 10.0);
        assert!(c.propagation.enabled);
        assert_eq!(c.propagation.max_hops, 3);
        assert_eq!(c.feeds.len(), 1);
        assert_eq!(c.feeds[0].score, 10);
        assert_eq!(c.feeds[0].format, FeedFormat::Addresses);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let c = Config::load("/nonexistent/riskgraph.toml");
        assert_eq!(c.query.max_hops, 2);
    }
}
