pub mod counterparty;
pub mod cycling;
pub mod links;
pub mod mixer;
pub mod peeling;
pub mod structuring;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::core::graph::WalletGraph;
use crate::core::{Flag, WalletIdx};

/// Immutable point-in-time view every detector reads.
pub struct Snapshot<'a> {
    pub graph: &'a WalletGraph,
    /// End of every trailing window.
    pub as_of: DateTime<Utc>,
}

impl<'a> Snapshot<'a> {
    /// `as_of` falls back to the newest transfer, then to the wall clock.
    pub fn new(graph: &'a WalletGraph, as_of: Option<DateTime<Utc>>) -> Self {
        let as_of = as_of
            .or_else(|| graph.transfers().iter().map(|t| t.timestamp).max())
            .unwrap_or_else(Utc::now);
        Self { graph, as_of }
    }
}

/// Window length from config. Negative or unrepresentable values fall back
/// to `default`.
pub(crate) fn window(setting: &str, value: i64, default: i64, to_duration: fn(i64) -> Option<Duration>) -> Duration {
    match to_duration(value).filter(|d| *d >= Duration::zero()) {
        Some(d) => d,
        None => {
            warn!("{setting} = {value} is not a usable window, using {default}");
            to_duration(default).unwrap_or_else(Duration::zero)
        }
    }
}

/// A heuristic that selects suspicious wallets from a snapshot.
/// Every wallet it returns is proposed with the same (reason, score).
pub trait Detector {
    fn name(&self) -> &str;
    fn reason(&self) -> &str;
    fn score(&self) -> u8;
    fn detect(&self, snapshot: &Snapshot) -> BTreeSet<WalletIdx>;
}

/// Flags produced by one detector invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub detector: String,
    pub flags: Vec<Flag>,
}

/// The configured detectors, run side by side.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector + Send + Sync>>,
}

impl DetectorSet {
    pub fn from_config(config: &DetectorConfig) -> Self {
        let mut detectors: Vec<Box<dyn Detector + Send + Sync>> = vec![
            Box::new(mixer::EqualOutputMixer::new(&config.mixer)),
            Box::new(peeling::PeelingChain::new(&config.peeling)),
            Box::new(structuring::Structuring::new(&config.structuring)),
            Box::new(counterparty::HighCounterparty::new(&config.fan_out)),
            Box::new(counterparty::HighInflow::new(&config.inflow)),
        ];
        if config.cycling.enabled {
            detectors.push(Box::new(cycling::QuickCycling::new(&config.cycling)));
        }
        Self { detectors }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run every detector against the same snapshot in parallel.
    pub fn run(&self, snapshot: &Snapshot) -> Vec<DetectorOutput> {
        self.detectors
            .par_iter()
            .map(|detector| {
                let hits = detector.detect(snapshot);
                info!(detector = detector.name(), wallets = hits.len(), "detector finished");
                DetectorOutput {
                    detector: detector.name().to_string(),
                    flags: hits
                        .into_iter()
                        .map(|idx| {
                            Flag::new(
                                snapshot.graph.wallet(idx).address.clone(),
                                detector.reason(),
                                detector.score(),
                            )
                        })
                        .collect(),
                }
            })
            .collect()
    }
}
