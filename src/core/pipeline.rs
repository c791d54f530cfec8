use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::core::builder::{accumulate, BuildReport, GraphBuilder};
use crate::core::graph::WalletGraph;
use crate::core::Flag;
use crate::detectors::{DetectorSet, Snapshot};
use crate::error::EngineError;
use crate::export::write_export;
use crate::feeds::load_feed;
use crate::ledger::LedgerReader;
use crate::propagation::Propagator;
use crate::store::{FlagStore, MergeSummary};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectReport {
    /// Wallets each detector proposed, in detector order.
    pub per_detector: Vec<(String, usize)>,
    pub merge: MergeSummary,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedReport {
    pub feeds: usize,
    pub malformed: usize,
    pub merge: MergeSummary,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub build: BuildReport,
    pub detect: DetectReport,
    pub feeds: FeedReport,
    /// `None` when propagation is switched off.
    pub propagation: Option<MergeSummary>,
    pub exported: usize,
}

/// One batch run: build, detect, ingest feeds, propagate, export.
///
/// Every phase is re-derivable from the ledger and the flag store, so a run
/// aborted at any phase boundary can simply be repeated.
pub struct Pipeline {
    config: Config,
    ledger: Arc<dyn LedgerReader>,
    store: FlagStore,
}

impl Pipeline {
    pub fn new(config: Config, ledger: Arc<dyn LedgerReader>, store: FlagStore) -> Self {
        Self { config, ledger, store }
    }

    pub fn store(&self) -> &FlagStore {
        &self.store
    }

    /// Read every configured chain on its own blocking worker, then merge
    /// the partial results into one graph.
    pub async fn build(&self) -> Result<(Arc<WalletGraph>, BuildReport), EngineError> {
        info!(chains = self.config.ledger.chains.len(), "Build phase started");
        let workers: Vec<_> = self
            .config
            .ledger
            .chains
            .iter()
            .map(|&chain| {
                let ledger = Arc::clone(&self.ledger);
                tokio::task::spawn_blocking(move || {
                    let records = ledger.read_chain(chain)?;
                    info!(%chain, records = records.len(), "ledger stream read");
                    Ok::<_, EngineError>(accumulate(chain, records))
                })
            })
            .collect();

        let mut partials = Vec::with_capacity(workers.len());
        for worker in workers {
            partials.push(worker.await??);
        }

        let seed = self.store.snapshot();
        let (graph, report) =
            tokio::task::spawn_blocking(move || GraphBuilder::new(&seed).merge(partials)).await?;
        Ok((Arc::new(graph), report))
    }

    /// Run all detectors on one snapshot and merge their proposals as a
    /// single batch.
    pub async fn detect(&self, graph: Arc<WalletGraph>) -> Result<DetectReport, EngineError> {
        let config = self.config.detectors.clone();
        let outputs = tokio::task::spawn_blocking(move || {
            let detectors = DetectorSet::from_config(&config);
            info!(detectors = ?detectors.names(), "Detect phase started");
            detectors.run(&Snapshot::new(&graph, config.as_of))
        })
        .await?;

        let per_detector = outputs.iter().map(|o| (o.detector.clone(), o.flags.len())).collect();
        let proposals: Vec<Flag> = outputs.into_iter().flat_map(|o| o.flags).collect();
        let merge = self.store.merge(&proposals)?;
        info!(proposed = merge.proposed, changed = merge.changed, "Detect phase merged");
        Ok(DetectReport { per_detector, merge })
    }

    /// Load every configured external list. Any unreadable list aborts the
    /// phase before anything is merged.
    pub async fn ingest_feeds(&self) -> Result<FeedReport, EngineError> {
        let feeds = self.config.feeds.clone();
        let batches = tokio::task::spawn_blocking(move || {
            feeds.iter().map(load_feed).collect::<Result<Vec<_>, EngineError>>()
        })
        .await??;

        let mut report = FeedReport::default();
        let mut proposals = Vec::new();
        for batch in batches {
            report.feeds += 1;
            report.malformed += batch.malformed.len();
            proposals.extend(batch.flags);
        }
        report.merge = self.store.merge(&proposals)?;
        info!(
            feeds = report.feeds,
            changed = report.merge.changed,
            malformed = report.malformed,
            "Feed phase merged"
        );
        Ok(report)
    }

    /// Proximity propagation, whatever the config switch says.
    pub async fn propagate(&self, graph: Arc<WalletGraph>) -> Result<MergeSummary, EngineError> {
        let propagator = Propagator::new(&self.config.propagation);
        let store = self.store.clone();
        let proposals = tokio::task::spawn_blocking(move || propagator.propose(&graph, &store)).await?;
        let merge = self.store.merge(&proposals)?;
        info!(proposed = merge.proposed, changed = merge.changed, "Propagation phase merged");
        Ok(merge)
    }

    pub fn export(&self) -> Result<usize, EngineError> {
        write_export(&self.store, self.config.export.path.as_deref())
    }

    /// Every phase in order. Propagation only runs when enabled in config.
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        let (graph, build) = self.build().await?;
        let detect = self.detect(Arc::clone(&graph)).await?;
        let feeds = self.ingest_feeds().await?;
        let propagation = if self.config.propagation.enabled {
            Some(self.propagate(graph).await?)
        } else {
            info!("Propagation disabled, skipping");
            None
        };
        let exported = self.export()?;
        if build.malformed_total() > 0 {
            warn!(skipped = build.malformed_total(), "run finished with malformed ledger rows");
        }
        info!(wallets = build.wallets, flagged = exported, "Run complete");
        Ok(RunReport {
            build,
            detect,
            feeds,
            propagation,
            exported,
        })
    }
}
