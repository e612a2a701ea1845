//! The snapshot module contains the record and store trait for aggregate
//! snapshots.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Aggregate, Error, Result};

/// A stored snapshot: an aggregate's memento at exactly `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The ID of the aggregate this snapshot belongs to.
    aggregate_id: String,
    /// The version of the aggregate when this snapshot was taken.
    version: i64,
    /// When the snapshot was taken.
    timestamp: DateTime<Utc>,
    /// The serialized memento.
    memento: Vec<u8>,
}

impl Snapshot {
    /// Creates a new stored snapshot.
    pub fn new(
        aggregate_id: String,
        version: i64,
        timestamp: DateTime<Utc>,
        memento: Vec<u8>,
    ) -> Self {
        Self {
            aggregate_id,
            version,
            timestamp,
            memento,
        }
    }

    /// Returns the aggregate ID.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Returns the version of the aggregate when this snapshot was taken.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns when the snapshot was taken.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the serialized memento.
    pub fn memento(&self) -> &[u8] {
        &self.memento
    }
}

/// Builds the conflict raised when `incoming` does not supersede `existing`.
///
/// Shared by every backend so they agree on the strict rule: a snapshot is
/// accepted only if its version is greater than the stored one.
pub(crate) fn ensure_supersedes(existing: &Snapshot, incoming: &Snapshot) -> Result<()> {
    if existing.version >= incoming.version {
        return Err(Error::ConcurrencyConflict {
            id: incoming.aggregate_id.clone(),
            expected: incoming.version,
            actual: existing.version,
        });
    }
    Ok(())
}

/// A snapshot store is responsible for persisting and loading snapshots.
///
/// Snapshots are an optimization to reduce the time it takes to hydrate an
/// aggregate. Instead of replaying all events from the beginning of time, an
/// aggregate can be restored from a recent snapshot and then only replay the
/// events that occurred after it. The store may be emptied at any time
/// without losing data.
#[async_trait]
pub trait SnapshotStore<A: Aggregate>: Send + Sync {
    /// Loads the latest snapshot for a given aggregate.
    async fn find_latest(&self, aggregate_id: &A::Id) -> Result<Option<Snapshot>>;

    /// Stores a snapshot, replacing the previous one.
    ///
    /// Fails with [`Error::ConcurrencyConflict`] if the stored snapshot's
    /// version is greater than or equal to the incoming one; the stored
    /// snapshot is then left untouched. The comparison and the write are
    /// atomic with respect to other `store` calls for the same aggregate.
    async fn store(&self, snapshot: Snapshot) -> Result<()>;

    /// Discards the snapshot of an aggregate, if any.
    async fn remove(&self, aggregate_id: &A::Id) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(version: i64) -> Snapshot {
        Snapshot::new("a".into(), version, Utc::now(), vec![])
    }

    #[test]
    fn newer_snapshot_supersedes() {
        assert!(ensure_supersedes(&snap(3), &snap(4)).is_ok());
    }

    #[test]
    fn equal_or_older_snapshot_conflicts() {
        for incoming in [3, 2] {
            let err = ensure_supersedes(&snap(3), &snap(incoming)).expect_err("must conflict");
            assert_eq!(
                err,
                Error::ConcurrencyConflict {
                    id: "a".into(),
                    expected: incoming,
                    actual: 3,
                }
            );
        }
    }
}
