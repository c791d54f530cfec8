use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{Flag, MAX_RISK};
use crate::error::EngineError;

/// The stored (reason, score) for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagEntry {
    pub reason: String,
    pub score: u8,
}

/// Result of a single monotonic upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Raised,
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub proposed: usize,
    pub changed: usize,
}

/// Durable backing for the flag store. Implementations must apply the same
/// strictly-greater rule so that re-persisting is idempotent.
pub trait FlagPersistence: Send + Sync {
    fn load_all(&self) -> Result<Vec<Flag>, EngineError>;
    fn persist(&self, flags: &[Flag]) -> Result<(), EngineError>;
}

/// Monotonic wallet -> (reason, score) map.
///
/// A stored score only ever increases; its reason is replaced only together
/// with a strictly greater score. Each upsert locks a single key.
#[derive(Clone, Default)]
pub struct FlagStore {
    entries: Arc<DashMap<String, FlagEntry>>,
    persistence: Option<Arc<dyn FlagPersistence>>,
}

impl FlagStore {
    /// A store that lives only for this process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store backed by `persistence`, loading every stored flag.
    pub fn open(persistence: Arc<dyn FlagPersistence>) -> Result<Self, EngineError> {
        let stored = persistence.load_all()?;
        let store = Self {
            entries: Arc::new(DashMap::with_capacity(stored.len())),
            persistence: Some(persistence),
        };
        for flag in stored {
            store.upsert(&flag.wallet, &flag.reason, flag.score);
        }
        info!("Flag store loaded {} wallets", store.len());
        Ok(store)
    }

    /// Per-key compare-and-set. Does not touch persistence.
    pub fn upsert(&self, wallet: &str, reason: &str, score: u8) -> MergeOutcome {
        self.swap(wallet, reason, score).0
    }

    /// Like `upsert`, but also hands back the entry that was replaced.
    fn swap(&self, wallet: &str, reason: &str, score: u8) -> (MergeOutcome, Option<FlagEntry>) {
        let score = score.min(MAX_RISK);
        let entry = FlagEntry {
            reason: reason.to_string(),
            score,
        };
        match self.entries.entry(wallet.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                (MergeOutcome::Inserted, None)
            }
            Entry::Occupied(mut slot) => {
                if score > slot.get().score {
                    // reason and score move together under the entry lock
                    let previous = std::mem::replace(slot.get_mut(), entry);
                    (MergeOutcome::Raised, Some(previous))
                } else {
                    (MergeOutcome::Unchanged, None)
                }
            }
        }
    }

    /// Apply a batch of proposals and persist the ones that changed state.
    ///
    /// Persistence is written in one batch. If it fails, the error is
    /// returned and every entry this batch wrote is put back, so the same
    /// batch can be merged again.
    pub fn merge(&self, flags: &[Flag]) -> Result<MergeSummary, EngineError> {
        let mut changed = Vec::new();
        let mut undo = Vec::new();
        for flag in flags {
            let (outcome, previous) = self.swap(&flag.wallet, &flag.reason, flag.score);
            if outcome.changed() {
                debug!(wallet = %flag.wallet, score = flag.score, ?outcome, "flag merged");
                changed.push(flag.clone());
                undo.push(previous);
            }
        }
        if let Some(persistence) = &self.persistence {
            if !changed.is_empty() {
                if let Err(e) = persistence.persist(&changed) {
                    warn!(flags = changed.len(), "persist failed, rolling back merge");
                    self.rollback(&changed, undo);
                    return Err(e);
                }
            }
        }
        Ok(MergeSummary {
            proposed: flags.len(),
            changed: changed.len(),
        })
    }

    /// Newest write first, so a wallet raised twice in one batch ends up
    /// where it started. Entries raised since by someone else are kept.
    fn rollback(&self, written: &[Flag], previous: Vec<Option<FlagEntry>>) {
        for (flag, previous) in written.iter().zip(previous).rev() {
            let Entry::Occupied(mut slot) = self.entries.entry(flag.wallet.clone()) else {
                continue;
            };
            let current = slot.get();
            if current.score != flag.score.min(MAX_RISK) || current.reason != flag.reason {
                continue;
            }
            match previous {
                Some(entry) => *slot.get_mut() = entry,
                None => {
                    slot.remove();
                }
            }
        }
    }

    pub fn get(&self, wallet: &str) -> Option<FlagEntry> {
        self.entries.get(wallet).map(|e| e.value().clone())
    }

    /// All stored flags, ordered by wallet.
    pub fn get_all(&self) -> Vec<Flag> {
        let mut all: Vec<Flag> = self
            .entries
            .iter()
            .map(|e| Flag {
                wallet: e.key().clone(),
                reason: e.value().reason.clone(),
                score: e.value().score,
            })
            .collect();
        all.sort_by(|a, b| a.wallet.cmp(&b.wallet));
        all
    }

    /// Point-in-time copy used to seed a graph build.
    pub fn snapshot(&self) -> HashMap<String, FlagEntry> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
