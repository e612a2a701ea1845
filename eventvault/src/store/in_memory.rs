//! An in-memory event store, useful for testing and development.

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{instrument, warn};

use crate::{Aggregate, Error, EventStore, Result, StoredEvent, store::validate_batch};

type EventStream = Arc<Mutex<Vec<StoredEvent>>>;

/// Thread-safe map keyed by aggregate_id
type StoreMap = DashMap<String, EventStream>;

/// An in-memory, thread-safe event store.
///
/// Each identity owns its own stream lock. The map itself is only touched to
/// find that lock, so writers to different identities never wait on each
/// other while appending.
pub struct InMemoryEventStore<A: Aggregate> {
    streams: Arc<StoreMap>,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> Default for InMemoryEventStore<A> {
    fn default() -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> Clone for InMemoryEventStore<A> {
    fn clone(&self) -> Self {
        Self {
            streams: self.streams.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> InMemoryEventStore<A> {
    /// Number of identities with a stream.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn stream(&self, aggregate_id: &str) -> Option<EventStream> {
        self.streams.get(aggregate_id).map(|s| s.value().clone())
    }
}

#[async_trait]
impl<A> EventStore<A> for InMemoryEventStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(id = %id))]
    async fn current_version(&self, id: &A::Id) -> Result<i64> {
        let Some(stream) = self.stream(&id.to_string()) else {
            return Ok(0);
        };
        let version = stream.lock().last().map(StoredEvent::version).unwrap_or(0);
        Ok(version)
    }

    #[instrument(skip(self, events), fields(id = %id))]
    async fn append(
        &self,
        id: &A::Id,
        expected_version: i64,
        events: Vec<StoredEvent>,
        final_version: i64,
    ) -> Result<()> {
        let aggregate_id = id.to_string();
        validate_batch(&aggregate_id, expected_version, &events, final_version)?;

        loop {
            let stream = self
                .streams
                .entry(aggregate_id.clone())
                .or_default()
                .value()
                .clone();
            let mut guard = stream.lock();

            // A concurrent remove may have detached this stream while we waited.
            if !self
                .streams
                .get(&aggregate_id)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &stream))
            {
                continue;
            }

            let current_version = guard.last().map(StoredEvent::version).unwrap_or(0);
            if current_version != expected_version {
                warn!(current_version, "stale expected version");
                return Err(Error::ConcurrencyConflict {
                    id: aggregate_id,
                    expected: expected_version,
                    actual: current_version,
                });
            }

            guard.extend(events);
            return Ok(());
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn load_since(&self, id: &A::Id, since_version: i64) -> Result<Vec<StoredEvent>> {
        let Some(stream) = self.stream(&id.to_string()) else {
            return Ok(Vec::new());
        };
        let events = stream
            .lock()
            .iter()
            .filter(|e| e.version() > since_version)
            .cloned()
            .collect();
        Ok(events)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn remove(&self, id: &A::Id) -> Result<()> {
        if let Some((_, stream)) = self.streams.remove(&id.to_string()) {
            stream.lock().clear();
        }
        Ok(())
    }
}
