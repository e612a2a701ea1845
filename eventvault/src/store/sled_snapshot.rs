//! A persistent `SnapshotStore` implementation using `sled`.
use std::marker::PhantomData;

use async_trait::async_trait;
use sled::{
    Tree,
    transaction::{TransactionError, abort},
};
use tracing::instrument;

use crate::{
    Aggregate, Error, Result,
    snapshot::{Snapshot, SnapshotStore, ensure_supersedes},
};

fn to_store_error(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}

fn decode(aggregate_id: &str, value: &[u8]) -> Result<Snapshot> {
    serde_json::from_slice(value).map_err(|e| Error::CorruptedState {
        id: aggregate_id.to_string(),
        reason: format!("undecodable snapshot record: {e}"),
    })
}

/// A persistent, thread-safe snapshot store using `sled`.
///
/// This store uses a `sled::Tree` to store snapshots, which is an ordered
/// key-value store. Each aggregate's snapshot is stored under a key
/// corresponding to its ID.
#[derive(Debug)]
pub struct SledSnapshotStore<A: Aggregate> {
    tree: Tree,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> SledSnapshotStore<A> {
    /// Creates a new `SledSnapshotStore`.
    ///
    /// It is recommended to open a dedicated `sled::Tree` for snapshots,
    /// separate from the ones used for events.
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<A> SnapshotStore<A> for SledSnapshotStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id))]
    async fn find_latest(&self, aggregate_id: &A::Id) -> Result<Option<Snapshot>> {
        let key = aggregate_id.to_string();
        match self.tree.get(&key).map_err(to_store_error)? {
            Some(value) => decode(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, snapshot), fields(aggregate_id = snapshot.aggregate_id(), version = snapshot.version()))]
    async fn store(&self, snapshot: Snapshot) -> Result<()> {
        let key = snapshot.aggregate_id().to_string();
        let value = serde_json::to_vec(&snapshot).map_err(|e| Error::Serialization(e.to_string()))?;

        let stored = self.tree.transaction(|tx| {
            if let Some(existing) = tx.get(key.as_bytes())? {
                let existing = match decode(&key, &existing) {
                    Ok(existing) => existing,
                    Err(e) => return abort(e),
                };
                if let Err(e) = ensure_supersedes(&existing, &snapshot) {
                    return abort(e);
                }
            }
            tx.insert(key.as_bytes(), value.clone())?;
            Ok(())
        });

        match stored {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(to_store_error(e)),
        }
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id))]
    async fn remove(&self, aggregate_id: &A::Id) -> Result<()> {
        self.tree
            .remove(aggregate_id.to_string())
            .map_err(to_store_error)?;
        Ok(())
    }
}
