//! # Event-Sourced Aggregate Persistence
//!
//! `eventvault` records every state change of an aggregate as an ordered,
//! append-only stream of events, rebuilds aggregates from that stream
//! (optionally fast-forwarded by a snapshot) and uses optimistic concurrency
//! so two writers can never silently interleave an aggregate's history.
//!
//! ## Core Concepts
//!
//! - **[`Aggregate`]**: the user-defined state of one entity. It declares its
//!   event handlers once, through [`Aggregate::handlers`].
//! - **[`Event`]**: an immutable fact. Events are stored as [`StoredEvent`]
//!   records whose payload has been encoded by a [`Serializer`].
//! - **[`EventStore`]**: the per-identity, version-checked event log. It is
//!   the single source of truth.
//! - **[`SnapshotStore`]**: a cache of the latest [`Snapshot`] per identity.
//!   It only ever accepts strictly newer snapshots.
//! - **[`EventProcessor`]**: the owned registry of dispatch tables, built
//!   and validated once at registration time.
//! - **[`Rehydrator`]**: snapshot + event tail -> live aggregate.
//! - **[`Repository`]**: the load / save entry point used by command
//!   handlers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eventvault::{
//!     Aggregate, Event, EventProcessor, Handlers, Originator, async_trait,
//!     repository::{GenericRepository, Repository},
//!     store::{in_memory::InMemoryEventStore, in_memory_snapshot::InMemorySnapshotStore},
//! };
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
//! pub enum AccountEvent {
//!     Opened { initial_balance: u64 },
//!     Credited { amount: u64 },
//! }
//!
//! impl Event for AccountEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             AccountEvent::Opened { .. } => "Opened",
//!             AccountEvent::Credited { .. } => "Credited",
//!         }
//!     }
//!     fn event_version(&self) -> u16 {
//!         1
//!     }
//!     fn event_types() -> &'static [&'static str] {
//!         &["Opened", "Credited"]
//!     }
//! }
//!
//! #[derive(Debug)]
//! pub struct Account {
//!     id: Uuid,
//!     balance: u64,
//! }
//!
//! impl Originator for Account {
//!     type Memento = u64;
//!     fn create_memento(&self) -> u64 {
//!         self.balance
//!     }
//!     fn restore_memento(&mut self, memento: u64) {
//!         self.balance = memento;
//!     }
//! }
//!
//! #[async_trait]
//! impl Aggregate for Account {
//!     const AGGREGATE_TYPE: &'static str = "account";
//!     type Id = Uuid;
//!     type Event = AccountEvent;
//!     type Command = u64;
//!     type Error = std::convert::Infallible;
//!
//!     fn new(id: Uuid) -> Self {
//!         Self { id, balance: 0 }
//!     }
//!
//!     fn id(&self) -> &Uuid {
//!         &self.id
//!     }
//!
//!     fn handlers(handlers: &mut Handlers<Self>) {
//!         handlers
//!             .on("Opened", |account: &mut Account, event: &AccountEvent| {
//!                 if let AccountEvent::Opened { initial_balance } = event {
//!                     account.balance = *initial_balance;
//!                 }
//!             })
//!             .on("Credited", |account: &mut Account, event: &AccountEvent| {
//!                 if let AccountEvent::Credited { amount } = event {
//!                     account.balance += *amount;
//!                 }
//!             });
//!     }
//!
//!     async fn handle(&self, amount: u64) -> Result<Vec<AccountEvent>, Self::Error> {
//!         Ok(vec![AccountEvent::Credited { amount }])
//!     }
//! }
//!
//! async fn deposit() -> eventvault::Result<()> {
//!     let processor = Arc::new(EventProcessor::new().with::<Account>()?);
//!     let repo = GenericRepository::new(
//!         Arc::new(InMemoryEventStore::<Account>::default()),
//!         Some(Arc::new(InMemorySnapshotStore::<Account>::default())),
//!         processor,
//!     )
//!     .with_snapshot_frequency(Some(100));
//!
//!     let id = Uuid::new_v4();
//!     let mut account = repo.create(id)?;
//!     account.raise(AccountEvent::Opened { initial_balance: 10 })?;
//!     repo.save(&mut account).await?;
//!
//!     let mut account = repo.load(&id).await?;
//!     account.execute(5).await?;
//!     repo.save(&mut account).await?;
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

use std::fmt::Debug;

pub use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

pub mod clock;
pub mod cloudevent;
pub mod memento;
pub mod processor;
pub mod rehydrator;
pub mod repository;
pub mod root;
pub mod serializer;
pub mod snapshot;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use cloudevent::CloudEvent;
pub use memento::Originator;
pub use processor::{DispatchTable, EventProcessor, Handlers};
pub use rehydrator::Rehydrator;
pub use repository::{GenericRepository, Repository, RepositoryConfig, SaveOutcome, SnapshotOutcome};
pub use root::AggregateRoot;
pub use serializer::{JsonSerializer, Serializer};
pub use snapshot::{Snapshot, SnapshotStore};

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A version-checked write lost a race. For event appends `expected` is
    /// the caller's expected version; for snapshots it is the version of the
    /// rejected snapshot. `actual` is the version held by the store.
    #[error("concurrency conflict on aggregate {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        id: String,
        /// The version the writer relied on.
        expected: i64,
        /// The version found in the store.
        actual: i64,
    },
    /// Neither a snapshot nor any event exists for the identity.
    #[error("unknown aggregate {0}")]
    UnknownIdentity(String),
    /// No handler is registered for this aggregate type / event type pair.
    #[error("no handler for event `{event_type}` on aggregate type `{aggregate_type}`")]
    UnhandledEvent {
        /// The aggregate type being dispatched to.
        aggregate_type: &'static str,
        /// The event type that had no handler.
        event_type: String,
    },
    /// An aggregate's handler declarations are invalid.
    #[error("handler registration failed for `{aggregate_type}`: {reason}")]
    Registration {
        /// The aggregate type being registered.
        aggregate_type: &'static str,
        /// What was wrong with the declarations.
        reason: String,
    },
    /// Stored events and snapshots contradict each other.
    #[error("corrupted state for aggregate {id}: {reason}")]
    CorruptedState {
        /// The affected aggregate.
        id: String,
        /// The violated invariant.
        reason: String,
    },
    /// An append batch whose versions do not line up with its bounds.
    #[error("invalid event batch: {0}")]
    InvalidBatch(String),
    /// A payload or memento could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Wraps an error from the underlying event or snapshot store.
    #[error("event store error: {0}")]
    Store(String),
    /// The aggregate refused a command.
    #[error("command rejected: {0}")]
    Rejected(String),
}

impl Error {
    /// Returns `true` for a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns `true` for errors that indicate a programming defect or broken
    /// stored data rather than a condition the caller can react to.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnhandledEvent { .. } | Self::Registration { .. } | Self::CorruptedState { .. }
        )
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An event payload.
///
/// Events must be serializable, deserializable, clonable, and debuggable.
/// The `Event` derive macro from `eventvault-derive` implements this trait
/// for enums.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync {
    /// Returns the type tag under which this event is stored and dispatched.
    fn event_type(&self) -> &'static str;

    /// Returns the version of the event's schema.
    fn event_version(&self) -> u16;

    /// Every type tag this event type can produce. Handler registration
    /// rejects handlers for tags outside this list.
    fn event_types() -> &'static [&'static str]
    where
        Self: Sized;
}

/// Uniquely identifies an aggregate instance.
pub trait AggregateId:
    Eq + std::hash::Hash + Clone + Send + Sync + ToString + Debug + std::fmt::Display + 'static
{
    /// Creates a new, unique aggregate ID.
    fn new() -> Self;
}

impl AggregateId for Uuid {
    fn new() -> Self {
        Uuid::new_v4()
    }
}

/// An aggregate is a consistency boundary. It is the fundamental building block
/// of the domain model.
///
/// Implementors hold only domain state. Versions and not-yet-persisted events
/// are tracked by the [`AggregateRoot`] wrapping them.
#[async_trait]
pub trait Aggregate: Originator + Send + Sync + Sized + 'static {
    /// Name of the aggregate type, recorded on every stored event.
    const AGGREGATE_TYPE: &'static str;
    /// The type of the aggregate's unique identifier.
    type Id: AggregateId;
    /// The type of events that this aggregate produces.
    type Event: Event;
    /// The type of commands that this aggregate can handle.
    type Command: Debug + Send;
    /// The type of error that this aggregate can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates an instance in its empty state.
    fn new(id: Self::Id) -> Self;

    /// Returns the unique identifier of the aggregate.
    fn id(&self) -> &Self::Id;

    /// Declares one handler per event type. Called once per
    /// [`EventProcessor::register`].
    fn handlers(handlers: &mut Handlers<Self>);

    /// Handles a command and returns the events it produces.
    async fn handle(
        &self,
        command: Self::Command,
    ) -> std::result::Result<Vec<Self::Event>, Self::Error>;
}

/// A stored event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// The ID of the aggregate this event belongs to.
    aggregate_id: String,
    /// The aggregate type that produced the event.
    aggregate_type: String,
    /// The type tag of the event.
    event_type: String,
    /// The version of the event's schema.
    event_version: u16,
    /// The version of the aggregate after this event was applied.
    version: i64,
    /// When the event was raised.
    timestamp: DateTime<Utc>,
    /// The serialized event payload.
    payload: Vec<u8>,
}

impl StoredEvent {
    /// Creates a new stored event.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregate_id: String,
        aggregate_type: String,
        event_type: String,
        event_version: u16,
        version: i64,
        timestamp: DateTime<Utc>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type,
            event_type,
            event_version,
            version,
            timestamp,
            payload,
        }
    }

    /// Returns the ID of the aggregate this event belongs to.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    /// Returns the aggregate type that produced the event.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }
    /// Returns the type tag of the event.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
    /// Returns the version of the event's schema.
    pub fn event_version(&self) -> u16 {
        self.event_version
    }
    /// Returns the version of the aggregate after this event was applied.
    pub fn version(&self) -> i64 {
        self.version
    }
    /// Returns when the event was raised.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    /// Returns the serialized payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// The trait for event stores.
///
/// Every identity owns an independent stream. Implementations must make the
/// version check and the write of [`append`](EventStore::append) a single
/// atomic step per identity, and must not block callers working on other
/// identities.
#[async_trait]
pub trait EventStore<A: Aggregate>: Send + Sync {
    /// Returns the highest recorded version, or 0 for an unknown identity.
    async fn current_version(&self, id: &A::Id) -> Result<i64>;

    /// Appends a batch of events for a given aggregate.
    ///
    /// Fails with [`Error::ConcurrencyConflict`] if the stored version is not
    /// `expected_version`, and with [`Error::InvalidBatch`] unless the events
    /// carry exactly the versions `expected_version + 1 ..= final_version`.
    /// Either the whole batch is recorded or nothing is.
    async fn append(
        &self,
        id: &A::Id,
        expected_version: i64,
        events: Vec<StoredEvent>,
        final_version: i64,
    ) -> Result<()>;

    /// Loads the full event stream for a given aggregate.
    async fn load_all(&self, id: &A::Id) -> Result<Vec<StoredEvent>> {
        self.load_since(id, 0).await
    }

    /// Loads the events with a version strictly greater than `since_version`,
    /// in ascending order.
    async fn load_since(&self, id: &A::Id, since_version: i64) -> Result<Vec<StoredEvent>>;

    /// Destroys an aggregate's whole history. Administrative use only.
    async fn remove(&self, id: &A::Id) -> Result<()>;
}
