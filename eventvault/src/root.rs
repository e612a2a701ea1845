//! The live, in-memory aggregate handed out by a repository.
use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{Aggregate, Clock, DispatchTable, Error, Event, Result};

/// An event raised since load, waiting for the next save.
#[derive(Debug, Clone)]
pub struct PendingEvent<E> {
    /// The version the aggregate reached by applying the event.
    pub version: i64,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: E,
}

/// An aggregate instance together with its version bookkeeping.
///
/// A root is owned by the code path that loaded it. Two callers loading the
/// same identity get two independent roots; whichever saves second loses the
/// version check.
pub struct AggregateRoot<A: Aggregate> {
    aggregate: A,
    version: i64,
    persisted_version: i64,
    pending: Vec<PendingEvent<A::Event>>,
    dispatch: Arc<DispatchTable<A>>,
    clock: Arc<dyn Clock>,
}

impl<A: Aggregate + fmt::Debug> fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("aggregate", &self.aggregate)
            .field("version", &self.version)
            .field("persisted_version", &self.persisted_version)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Wraps an aggregate whose stored history ends at `version`.
    pub fn new(
        aggregate: A,
        version: i64,
        dispatch: Arc<DispatchTable<A>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            aggregate,
            version,
            persisted_version: version,
            pending: Vec::new(),
            dispatch,
            clock,
        }
    }

    /// Returns the unique identifier of the aggregate.
    pub fn id(&self) -> &A::Id {
        self.aggregate.id()
    }

    /// The version including pending events.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The version the store held when this root was loaded or last saved.
    /// It is the expected version of the next append.
    pub fn persisted_version(&self) -> i64 {
        self.persisted_version
    }

    /// Read access to the domain state.
    pub fn state(&self) -> &A {
        &self.aggregate
    }

    /// Events raised since load or the last successful save.
    pub fn pending_events(&self) -> &[PendingEvent<A::Event>] {
        &self.pending
    }

    /// Returns `true` if a save would append anything.
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Applies a new event and buffers it for the next save.
    ///
    /// An event without a registered handler is rejected and not buffered.
    /// Returns the version the aggregate reached.
    pub fn raise(&mut self, event: A::Event) -> Result<i64> {
        self.dispatch.apply(&mut self.aggregate, &event)?;
        self.version += 1;
        self.pending.push(PendingEvent {
            version: self.version,
            timestamp: self.clock.now(),
            event,
        });
        Ok(self.version)
    }

    /// Runs a command through [`Aggregate::handle`] and raises every event it
    /// returns. Returns how many events were raised.
    ///
    /// Either every event is raised or none is: if any returned event has no
    /// handler the command fails with [`Error::UnhandledEvent`] and the root is
    /// left untouched.
    pub async fn execute(&mut self, command: A::Command) -> Result<usize> {
        let events = self
            .aggregate
            .handle(command)
            .await
            .map_err(|e| Error::Rejected(e.to_string()))?;
        if let Some(unhandled) = events
            .iter()
            .find(|event| !self.dispatch.handles(event.event_type()))
        {
            return Err(Error::UnhandledEvent {
                aggregate_type: A::AGGREGATE_TYPE,
                event_type: unhandled.event_type().to_string(),
            });
        }
        let raised = events.len();
        for event in events {
            self.raise(event)?;
        }
        Ok(raised)
    }

    /// Consumes the root, returning the domain state.
    pub fn into_inner(self) -> A {
        self.aggregate
    }

    /// Records that the store now holds every pending event.
    pub(crate) fn mark_committed(&mut self) {
        self.pending.clear();
        self.persisted_version = self.version;
    }
}
