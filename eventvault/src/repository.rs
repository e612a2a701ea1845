//! Provides a generic repository for interacting with aggregates.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    Aggregate, AggregateRoot, Clock, Error, Event, EventProcessor, EventStore, JsonSerializer,
    Rehydrator, Result, Serializer, Snapshot, SnapshotStore, StoredEvent, SystemClock,
};

/// Defines the standard interface for a repository.
#[async_trait]
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Starts a brand-new aggregate at version 0.
    ///
    /// Nothing is written until [`save`](Repository::save). If the identity
    /// already has history that save fails with a concurrency conflict.
    fn create(&self, id: A::Id) -> Result<AggregateRoot<A>>;
    /// Loads an aggregate instance from the store.
    async fn load(&self, id: &A::Id) -> Result<AggregateRoot<A>>;
    /// Appends the aggregate's pending events.
    async fn save(&self, aggregate: &mut AggregateRoot<A>) -> Result<SaveOutcome>;
}

/// What happened to the snapshot step of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The cadence did not call for a snapshot, or no snapshot store is set.
    Skipped,
    /// A snapshot was stored at this version.
    Stored(i64),
    /// Taking or storing the snapshot failed. The events are committed
    /// regardless.
    Failed(Error),
}

/// The result of a successful [`Repository::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The aggregate's version after the save.
    pub version: i64,
    /// The snapshot step.
    pub snapshot: SnapshotOutcome,
}

/// Repository settings that can be read from an application's config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Take a snapshot whenever a save crosses a multiple of this many
    /// events. `None` or `0` disables snapshots.
    pub snapshot_frequency: Option<u64>,
}

/// A generic, high-level repository for loading and saving aggregates.
///
/// This repository simplifies the common load-handle-save cycle by
/// orchestrating the `EventStore` and an optional `SnapshotStore`.
pub struct GenericRepository<A, ES, SS, S = JsonSerializer>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
    S: Serializer,
{
    store: Arc<ES>,
    snapshot_store: Option<Arc<SS>>,
    processor: Arc<EventProcessor>,
    serializer: Arc<S>,
    clock: Arc<dyn Clock>,
    rehydrator: Rehydrator<A, ES, SS, S>,
    snapshot_frequency: Option<u64>,
}

impl<A, ES, SS> GenericRepository<A, ES, SS, JsonSerializer>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
{
    /// Creates a new `GenericRepository` using JSON encoding and the system
    /// clock.
    pub fn new(
        store: Arc<ES>,
        snapshot_store: Option<Arc<SS>>,
        processor: Arc<EventProcessor>,
    ) -> Self {
        let serializer = Arc::new(JsonSerializer);
        Self {
            rehydrator: Rehydrator::new(
                store.clone(),
                snapshot_store.clone(),
                processor.clone(),
                serializer.clone(),
            ),
            store,
            snapshot_store,
            processor,
            serializer,
            clock: Arc::new(SystemClock),
            snapshot_frequency: None,
        }
    }
}

impl<A, ES, SS, S> GenericRepository<A, ES, SS, S>
where
    A: Aggregate,
    ES: EventStore<A>,
    SS: SnapshotStore<A>,
    S: Serializer,
{
    /// Replaces the serializer used for payloads and mementos.
    pub fn with_serializer<S2: Serializer>(
        self,
        serializer: S2,
    ) -> GenericRepository<A, ES, SS, S2> {
        let serializer = Arc::new(serializer);
        GenericRepository {
            rehydrator: Rehydrator::new(
                self.store.clone(),
                self.snapshot_store.clone(),
                self.processor.clone(),
                serializer.clone(),
            ),
            store: self.store,
            snapshot_store: self.snapshot_store,
            processor: self.processor,
            serializer,
            clock: self.clock,
            snapshot_frequency: self.snapshot_frequency,
        }
    }

    /// Replaces the clock used to stamp events and snapshots.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the frequency at which snapshots should be created.
    ///
    /// For example, a value of `Some(100)` means a snapshot will be created
    /// every 100 events.
    pub fn with_snapshot_frequency(mut self, frequency: Option<u64>) -> Self {
        self.snapshot_frequency = frequency.filter(|n| *n > 0);
        self
    }

    /// Applies a [`RepositoryConfig`].
    pub fn with_config(self, config: RepositoryConfig) -> Self {
        self.with_snapshot_frequency(config.snapshot_frequency)
    }

    /// The rehydrator backing [`load`](Repository::load).
    pub fn rehydrator(&self) -> &Rehydrator<A, ES, SS, S> {
        &self.rehydrator
    }

    fn snapshot_due(&self, before: i64, after: i64) -> bool {
        match self.snapshot_frequency {
            Some(n) => {
                let n = n as i64;
                after / n > before / n
            }
            None => false,
        }
    }

    fn encode(&self, root: &AggregateRoot<A>) -> Result<Vec<StoredEvent>> {
        let aggregate_id = root.id().to_string();
        root.pending_events()
            .iter()
            .map(|pending| {
                Ok(StoredEvent::new(
                    aggregate_id.clone(),
                    A::AGGREGATE_TYPE.to_string(),
                    pending.event.event_type().to_string(),
                    pending.event.event_version(),
                    pending.version,
                    pending.timestamp,
                    self.serializer.serialize(&pending.event)?,
                ))
            })
            .collect()
    }

    async fn take_snapshot(&self, snapshot_store: &SS, root: &AggregateRoot<A>) -> SnapshotOutcome {
        let memento = match self.serializer.serialize(&root.state().create_memento()) {
            Ok(memento) => memento,
            Err(e) => return SnapshotOutcome::Failed(e),
        };
        let snapshot = Snapshot::new(
            root.id().to_string(),
            root.version(),
            self.clock.now(),
            memento,
        );
        match snapshot_store.store(snapshot).await {
            Ok(()) => SnapshotOutcome::Stored(root.version()),
            Err(e) => {
                warn!(error = %e, "snapshot not stored; events remain committed");
                SnapshotOutcome::Failed(e)
            }
        }
    }
}

#[async_trait]
impl<A, ES, SS, S> Repository<A> for GenericRepository<A, ES, SS, S>
where
    A: Aggregate,
    ES: EventStore<A> + 'static,
    SS: SnapshotStore<A> + 'static,
    S: Serializer + 'static,
{
    fn create(&self, id: A::Id) -> Result<AggregateRoot<A>> {
        Ok(AggregateRoot::new(
            A::new(id),
            0,
            self.processor.table::<A>()?,
            self.clock.clone(),
        ))
    }

    #[instrument(skip(self), fields(aggregate.id = %id))]
    async fn load(&self, id: &A::Id) -> Result<AggregateRoot<A>> {
        let (aggregate, version) = self.rehydrator.load(id).await?;
        Ok(AggregateRoot::new(
            aggregate,
            version,
            self.processor.table::<A>()?,
            self.clock.clone(),
        ))
    }

    #[instrument(skip(self, aggregate), fields(aggregate.id = %aggregate.id(), version = aggregate.version()))]
    async fn save(&self, aggregate: &mut AggregateRoot<A>) -> Result<SaveOutcome> {
        if !aggregate.has_pending_events() {
            return Ok(SaveOutcome {
                version: aggregate.version(),
                snapshot: SnapshotOutcome::Skipped,
            });
        }

        let version_before_save = aggregate.persisted_version();
        let version_after_save = aggregate.version();
        let events = self.encode(aggregate)?;

        if let Err(e) = self
            .store
            .append(aggregate.id(), version_before_save, events, version_after_save)
            .await
        {
            if e.is_conflict() {
                warn!(error = %e, "append rejected");
            }
            return Err(e);
        }
        aggregate.mark_committed();

        let snapshot = match &self.snapshot_store {
            Some(snapshot_store) if self.snapshot_due(version_before_save, version_after_save) => {
                self.take_snapshot(snapshot_store, aggregate).await
            }
            _ => SnapshotOutcome::Skipped,
        };

        Ok(SaveOutcome {
            version: version_after_save,
            snapshot,
        })
    }
}

#[async_trait]
impl<A, R> Repository<A> for Arc<R>
where
    A: Aggregate,
    R: Repository<A> + Send + Sync,
{
    fn create(&self, id: A::Id) -> Result<AggregateRoot<A>> {
        (**self).create(id)
    }

    async fn load(&self, aggregate_id: &A::Id) -> Result<AggregateRoot<A>> {
        (**self).load(aggregate_id).await
    }

    async fn save(&self, aggregate: &mut AggregateRoot<A>) -> Result<SaveOutcome> {
        (**self).save(aggregate).await
    }
}
