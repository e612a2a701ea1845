//! An in-memory snapshot store.
use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::instrument;

use crate::{
    Aggregate, Result,
    snapshot::{Snapshot, SnapshotStore, ensure_supersedes},
};

/// An in-memory, thread-safe snapshot store.
///
/// This is useful for testing or for applications that do not require a
/// persistent snapshot store.
#[derive(Debug)]
pub struct InMemorySnapshotStore<A: Aggregate> {
    snapshots: Arc<DashMap<String, Snapshot>>,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> Default for InMemorySnapshotStore<A> {
    fn default() -> Self {
        Self {
            snapshots: Arc::new(DashMap::new()),
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> Clone for InMemorySnapshotStore<A> {
    fn clone(&self) -> Self {
        Self {
            snapshots: self.snapshots.clone(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<A> SnapshotStore<A> for InMemorySnapshotStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id))]
    async fn find_latest(&self, aggregate_id: &A::Id) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .get(&aggregate_id.to_string())
            .map(|r| r.clone()))
    }

    #[instrument(skip(self, snapshot), fields(aggregate_id = snapshot.aggregate_id(), version = snapshot.version()))]
    async fn store(&self, snapshot: Snapshot) -> Result<()> {
        // The entry guard holds the shard lock across compare and write.
        match self.snapshots.entry(snapshot.aggregate_id().to_string()) {
            Entry::Occupied(mut existing) => {
                ensure_supersedes(existing.get(), &snapshot)?;
                existing.insert(snapshot);
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id))]
    async fn remove(&self, aggregate_id: &A::Id) -> Result<()> {
        self.snapshots.remove(&aggregate_id.to_string());
        Ok(())
    }
}
