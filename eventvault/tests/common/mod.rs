//! Shared fixtures: a small bank-account aggregate and repository wiring.
#![allow(dead_code, missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eventvault::{
    Aggregate, Clock, EventProcessor, GenericRepository, Handlers, JsonSerializer, Originator,
    Serializer, StoredEvent, async_trait,
    store::{in_memory::InMemoryEventStore, in_memory_snapshot::InMemorySnapshotStore},
};
use eventvault_derive::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Event)]
pub enum AccountEvent {
    Opened { owner: String },
    Deposited { amount: u64 },
    Withdrawn { amount: u64 },
    #[event(version = 2)]
    Frozen,
    /// Declared but deliberately without a handler.
    Annotated { note: String },
}

#[derive(Debug)]
pub enum AccountCommand {
    Open(String),
    Deposit(u64),
    Withdraw(u64),
    Freeze,
    DepositWithNote(u64, String),
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account already open")]
    AlreadyOpen,
    #[error("account is not open")]
    NotOpen,
    #[error("account is frozen")]
    Frozen,
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMemento {
    pub owner: Option<String>,
    pub balance: u64,
    pub frozen: bool,
}

#[derive(Debug, Clone)]
pub struct Account {
    id: Uuid,
    pub owner: Option<String>,
    pub balance: u64,
    pub frozen: bool,
    /// Handler invocations on this instance. Not part of the memento.
    pub applied: usize,
}

impl Originator for Account {
    type Memento = AccountMemento;

    fn create_memento(&self) -> AccountMemento {
        AccountMemento {
            owner: self.owner.clone(),
            balance: self.balance,
            frozen: self.frozen,
        }
    }

    fn restore_memento(&mut self, memento: AccountMemento) {
        self.owner = memento.owner;
        self.balance = memento.balance;
        self.frozen = memento.frozen;
    }
}

#[async_trait]
impl Aggregate for Account {
    const AGGREGATE_TYPE: &'static str = "account";
    type Id = Uuid;
    type Event = AccountEvent;
    type Command = AccountCommand;
    type Error = AccountError;

    fn new(id: Uuid) -> Self {
        Self {
            id,
            owner: None,
            balance: 0,
            frozen: false,
            applied: 0,
        }
    }

    fn id(&self) -> &Uuid {
        &self.id
    }

    fn handlers(handlers: &mut Handlers<Self>) {
        handlers
            .on("Opened", |account: &mut Account, event: &AccountEvent| {
                if let AccountEvent::Opened { owner } = event {
                    account.owner = Some(owner.clone());
                }
                account.applied += 1;
            })
            .on("Deposited", |account: &mut Account, event: &AccountEvent| {
                if let AccountEvent::Deposited { amount } = event {
                    account.balance += amount;
                }
                account.applied += 1;
            })
            .on("Withdrawn", |account: &mut Account, event: &AccountEvent| {
                if let AccountEvent::Withdrawn { amount } = event {
                    account.balance -= amount;
                }
                account.applied += 1;
            })
            .on("Frozen", |account: &mut Account, _: &AccountEvent| {
                account.frozen = true;
                account.applied += 1;
            });
    }

    async fn handle(&self, command: AccountCommand) -> Result<Vec<AccountEvent>, AccountError> {
        match command {
            AccountCommand::Open(owner) => match self.owner {
                Some(_) => Err(AccountError::AlreadyOpen),
                None => Ok(vec![AccountEvent::Opened { owner }]),
            },
            _ if self.owner.is_none() => Err(AccountError::NotOpen),
            _ if self.frozen => Err(AccountError::Frozen),
            AccountCommand::Deposit(amount) => Ok(vec![AccountEvent::Deposited { amount }]),
            AccountCommand::Withdraw(amount) if amount > self.balance => {
                Err(AccountError::InsufficientFunds {
                    balance: self.balance,
                    requested: amount,
                })
            }
            AccountCommand::Withdraw(amount) => Ok(vec![AccountEvent::Withdrawn { amount }]),
            AccountCommand::Freeze => Ok(vec![AccountEvent::Frozen]),
            AccountCommand::DepositWithNote(amount, note) => Ok(vec![
                AccountEvent::Deposited { amount },
                AccountEvent::Annotated { note },
            ]),
        }
    }
}

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
}

pub type EventStoreFixture = InMemoryEventStore<Account>;
pub type SnapshotStoreFixture = InMemorySnapshotStore<Account>;
pub type AccountRepository = GenericRepository<Account, EventStoreFixture, SnapshotStoreFixture>;

pub fn processor() -> Arc<EventProcessor> {
    Arc::new(
        EventProcessor::new()
            .with::<Account>()
            .expect("account handlers are valid"),
    )
}

pub struct Fixture {
    pub repo: AccountRepository,
    pub events: Arc<EventStoreFixture>,
    pub snapshots: Arc<SnapshotStoreFixture>,
    pub processor: Arc<EventProcessor>,
}

pub fn fixture(snapshot_frequency: Option<u64>) -> Fixture {
    let events = Arc::new(EventStoreFixture::default());
    let snapshots = Arc::new(SnapshotStoreFixture::default());
    let processor = processor();
    let repo = GenericRepository::new(events.clone(), Some(snapshots.clone()), processor.clone())
        .with_snapshot_frequency(snapshot_frequency)
        .with_clock(Arc::new(FixedClock(fixed_time())));
    Fixture {
        repo,
        events,
        snapshots,
        processor,
    }
}

/// Encodes an event the way the repository does, for writing straight to a
/// store.
pub fn stored(id: &Uuid, version: i64, event: &AccountEvent) -> StoredEvent {
    use eventvault::Event as _;
    StoredEvent::new(
        id.to_string(),
        Account::AGGREGATE_TYPE.to_string(),
        event.event_type().to_string(),
        event.event_version(),
        version,
        fixed_time(),
        JsonSerializer.serialize(event).expect("serialize"),
    )
}

pub fn opened() -> AccountEvent {
    AccountEvent::Opened {
        owner: "ada".into(),
    }
}

pub fn deposit(amount: u64) -> AccountEvent {
    AccountEvent::Deposited { amount }
}
