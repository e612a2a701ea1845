//! Rebuilds aggregates from the latest snapshot plus the event tail.
use std::{marker::PhantomData, sync::Arc};

use tracing::{debug, instrument};

use crate::{
    Aggregate, Error, Event, EventProcessor, EventStore, Result, Serializer, SnapshotStore,
};

/// Reconstructs aggregates from an event store and an optional snapshot
/// store.
pub struct Rehydrator<A, ES, SS, S>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
    S: Serializer,
{
    event_store: Arc<ES>,
    snapshot_store: Option<Arc<SS>>,
    processor: Arc<EventProcessor>,
    serializer: Arc<S>,
    _phantom: PhantomData<A>,
}

impl<A, ES, SS, S> Rehydrator<A, ES, SS, S>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
    S: Serializer,
{
    /// Creates a new `Rehydrator`.
    pub fn new(
        event_store: Arc<ES>,
        snapshot_store: Option<Arc<SS>>,
        processor: Arc<EventProcessor>,
        serializer: Arc<S>,
    ) -> Self {
        Self {
            event_store,
            snapshot_store,
            processor,
            serializer,
            _phantom: PhantomData,
        }
    }

    /// Loads `id`, returning the aggregate and the highest version applied.
    ///
    /// Fails with [`Error::UnknownIdentity`] when there is neither a snapshot
    /// nor an event, and with [`Error::CorruptedState`] when the snapshot is
    /// ahead of the stream or the stream is not contiguous.
    #[instrument(skip(self), fields(aggregate.id = %id, aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load(&self, id: &A::Id) -> Result<(A, i64)> {
        let dispatch = self.processor.table::<A>()?;

        let snapshot = match &self.snapshot_store {
            Some(snapshot_store) => snapshot_store.find_latest(id).await?,
            None => None,
        };

        let mut aggregate = A::new(id.clone());
        let snapshot_version = match &snapshot {
            Some(snapshot) => {
                let memento = self.serializer.deserialize(snapshot.memento())?;
                aggregate.restore_memento(memento);
                Some(snapshot.version())
            }
            None => None,
        };
        let mut version = snapshot_version.unwrap_or(0);

        let tail = self.event_store.load_since(id, version).await?;
        debug!(snapshot_version, tail = tail.len(), "replaying event tail");

        match (snapshot_version, tail.last()) {
            (None, None) => return Err(Error::UnknownIdentity(id.to_string())),
            (Some(snapshot_version), None) => {
                let stream_version = self.event_store.current_version(id).await?;
                if snapshot_version > stream_version {
                    return Err(Error::CorruptedState {
                        id: id.to_string(),
                        reason: format!(
                            "snapshot version {snapshot_version} is ahead of stream version {stream_version}"
                        ),
                    });
                }
            }
            _ => {}
        }

        for record in tail {
            if record.version() != version + 1 {
                return Err(Error::CorruptedState {
                    id: id.to_string(),
                    reason: format!(
                        "expected event version {} but found {}",
                        version + 1,
                        record.version()
                    ),
                });
            }
            let event: A::Event = self.serializer.deserialize(record.payload())?;
            if event.event_type() != record.event_type() {
                return Err(Error::CorruptedState {
                    id: id.to_string(),
                    reason: format!(
                        "event {} is tagged `{}` but decodes as `{}`",
                        record.version(),
                        record.event_type(),
                        event.event_type()
                    ),
                });
            }
            dispatch.apply(&mut aggregate, &event)?;
            version = record.version();
        }

        Ok((aggregate, version))
    }
}

impl<A, ES, SS, S> Clone for Rehydrator<A, ES, SS, S>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
    S: Serializer,
{
    fn clone(&self) -> Self {
        Self {
            event_store: self.event_store.clone(),
            snapshot_store: self.snapshot_store.clone(),
            processor: self.processor.clone(),
            serializer: self.serializer.clone(),
            _phantom: PhantomData,
        }
    }
}
