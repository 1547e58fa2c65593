//! Per-dataset invalidation epochs.
//!
//! Every dataset has a monotonically increasing epoch. Invalidation bumps it
//! before purging. A producer snapshots the epoch before doing expensive work
//! and only writes its result if the epoch is unchanged, so a translation
//! computed against the pre-retrain corpus can never land in the cache after
//! the purge.
//!
//! Each bump also records a fence: the instant of the invalidation. Entries
//! written earlier are treated as absent on read even if the bulk delete of
//! their tier failed, so a retrained dataset never serves pre-retrain SQL.

use dashmap::DashMap;
use unibi_core::{DatasetId, Timestamp};

/// A point in a dataset's invalidation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub fn sequence(&self) -> u64 {
        self.0
    }

    pub fn is_newer_than(&self, other: &Epoch) -> bool {
        self.0 > other.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EpochState {
    sequence: u64,
    /// Millisecond timestamp of the latest bump.
    fenced_at_ms: Option<i64>,
}

/// Epoch registry for all datasets.
#[derive(Debug, Default)]
pub struct DatasetEpochs {
    epochs: DashMap<DatasetId, EpochState>,
}

impl DatasetEpochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, dataset_id: &DatasetId) -> Epoch {
        Epoch(self.epochs.get(dataset_id).map(|e| e.sequence).unwrap_or(0))
    }

    /// Advance the dataset's epoch, fence entries written before `now`, and
    /// return the new epoch.
    pub fn bump(&self, dataset_id: &DatasetId, now: Timestamp) -> Epoch {
        let mut entry = self.epochs.entry(dataset_id.clone()).or_default();
        entry.sequence += 1;
        entry.fenced_at_ms = Some(now.timestamp_millis());
        Epoch(entry.sequence)
    }

    pub fn is_current(&self, dataset_id: &DatasetId, epoch: Epoch) -> bool {
        self.current(dataset_id) == epoch
    }

    /// Whether an entry written at `created_at` under epoch `written_in`
    /// predates the dataset's latest invalidation.
    ///
    /// Timestamps are compared at millisecond precision, which is what byte
    /// backends keep. Within the fence's millisecond the epoch decides.
    pub fn is_fenced(&self, dataset_id: &DatasetId, created_at: Timestamp, written_in: u64) -> bool {
        let Some(state) = self.epochs.get(dataset_id).map(|e| *e) else {
            return false;
        };
        match state.fenced_at_ms {
            None => false,
            Some(fence) => {
                let created = created_at.timestamp_millis();
                created < fence || (created == fence && written_in < state.sequence)
            }
        }
    }
}
