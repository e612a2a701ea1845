//! A persistent `EventStore` implementation using `sled`.

use std::marker::PhantomData;

use async_trait::async_trait;
use sled::transaction::{TransactionError, abort};
use tracing::instrument;

use crate::{Aggregate, Error, EventStore, Result, StoredEvent, store::validate_batch};

/// Key holding the stream's current version.
const HEAD_KEY: &[u8] = b"head";
/// Prefix of every event key; the version follows in big-endian so that key
/// order is version order.
const EVENT_PREFIX: u8 = b'e';

fn event_key(version: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(EVENT_PREFIX);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn decode_version(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_be_bytes)
}

fn to_store_error(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}

/// A persistent, thread-safe event store using `sled`.
///
/// Every aggregate gets its own `sled::Tree`, so appends to different
/// aggregates never contend. Within a tree the version check and the inserts
/// run in one sled transaction. The tree is created by the first append;
/// reads of an unknown identity leave the database unchanged.
#[derive(Clone)]
pub struct SledEventStore<A: Aggregate> {
    db: sled::Db,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> SledEventStore<A> {
    /// Creates a new `SledEventStore`.
    pub fn new(db: sled::Db) -> Self {
        Self {
            db,
            _phantom: PhantomData,
        }
    }

    fn tree_name(aggregate_id: &str) -> String {
        format!("events/{aggregate_id}")
    }

    fn tree(&self, aggregate_id: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(Self::tree_name(aggregate_id))
            .map_err(to_store_error)
    }

    /// Opens the aggregate's tree only if an append has already created it.
    fn existing_tree(&self, aggregate_id: &str) -> Result<Option<sled::Tree>> {
        let name = Self::tree_name(aggregate_id);
        if !self
            .db
            .tree_names()
            .iter()
            .any(|existing| existing.as_ref() == name.as_bytes())
        {
            return Ok(None);
        }
        self.db.open_tree(name).map(Some).map_err(to_store_error)
    }

    fn decode(aggregate_id: &str, value: &[u8]) -> Result<StoredEvent> {
        serde_json::from_slice(value).map_err(|e| Error::CorruptedState {
            id: aggregate_id.to_string(),
            reason: format!("undecodable event record: {e}"),
        })
    }
}

#[async_trait]
impl<A> EventStore<A> for SledEventStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(id = %id))]
    async fn current_version(&self, id: &A::Id) -> Result<i64> {
        let aggregate_id = id.to_string();
        let Some(tree) = self.existing_tree(&aggregate_id)? else {
            return Ok(0);
        };
        match tree.get(HEAD_KEY).map_err(to_store_error)? {
            Some(head) => decode_version(&head).ok_or_else(|| Error::CorruptedState {
                id: aggregate_id,
                reason: "undecodable stream head".into(),
            }),
            None => Ok(0),
        }
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

        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            let value = serde_json::to_vec(event).map_err(|e| Error::Serialization(e.to_string()))?;
            records.push((event_key(event.version()), value));
        }

        let tree = self.tree(&aggregate_id)?;
        let committed = tree.transaction(|tx| {
            let current_version = match tx.get(HEAD_KEY)? {
                Some(head) => match decode_version(&head) {
                    Some(version) => version,
                    None => {
                        return abort(Error::CorruptedState {
                            id: aggregate_id.clone(),
                            reason: "undecodable stream head".into(),
                        });
                    }
                },
                None => 0,
            };
            if current_version != expected_version {
                return abort(Error::ConcurrencyConflict {
                    id: aggregate_id.clone(),
                    expected: expected_version,
                    actual: current_version,
                });
            }
            for (key, value) in &records {
                tx.insert(key.clone(), value.clone())?;
            }
            tx.insert(HEAD_KEY, final_version.to_be_bytes().to_vec())?;
            Ok(())
        });

        match committed {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(to_store_error(e)),
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn load_since(&self, id: &A::Id, since_version: i64) -> Result<Vec<StoredEvent>> {
        let aggregate_id = id.to_string();
        let Some(tree) = self.existing_tree(&aggregate_id)? else {
            return Ok(Vec::new());
        };
        let start = event_key(since_version.saturating_add(1).max(1));
        let end = [EVENT_PREFIX + 1];

        tree.range(start.as_slice()..&end[..])
            .map(|res| {
                let (_, value) = res.map_err(to_store_error)?;
                Self::decode(&aggregate_id, &value)
            })
            .collect()
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn remove(&self, id: &A::Id) -> Result<()> {
        self.db
            .drop_tree(Self::tree_name(&id.to_string()))
            .map_err(to_store_error)?;
        Ok(())
    }
}
