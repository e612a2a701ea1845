//! The store module contains the implementations of the event and snapshot
//! stores.

use crate::{Error, Result, StoredEvent};

// The in-memory implementations are compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory event store.
pub mod in_memory;

#[cfg(feature = "in-memory")]
/// An in-memory snapshot store.
pub mod in_memory_snapshot;

// The persistent `sled` implementations are compiled when the `sled-storage`
// feature is enabled.
#[cfg(feature = "sled-storage")]
/// A persistent event store using `sled`.
pub mod sled;

#[cfg(feature = "sled-storage")]
/// A persistent snapshot store using `sled`.
pub mod sled_snapshot;

// SQLx / Postgres implementation compiled when the `postgres-storage` feature
// is enabled.
#[cfg(feature = "postgres-storage")]
pub mod sqlx_postgres;

/// Checks that `events` is exactly the run `expected_version + 1 ..=
/// final_version` for `aggregate_id`. Every backend calls this before taking
/// its per-identity lock or transaction.
pub fn validate_batch(
    aggregate_id: &str,
    expected_version: i64,
    events: &[StoredEvent],
    final_version: i64,
) -> Result<()> {
    if expected_version < 0 {
        return Err(Error::InvalidBatch(format!(
            "expected version {expected_version} is negative"
        )));
    }
    if final_version - expected_version != events.len() as i64 {
        return Err(Error::InvalidBatch(format!(
            "{} events cannot move version {expected_version} to {final_version}",
            events.len()
        )));
    }
    for (offset, event) in events.iter().enumerate() {
        let version = expected_version + 1 + offset as i64;
        if event.version() != version {
            return Err(Error::InvalidBatch(format!(
                "event at position {offset} has version {} instead of {version}",
                event.version()
            )));
        }
        if event.aggregate_id() != aggregate_id {
            return Err(Error::InvalidBatch(format!(
                "event {version} belongs to aggregate {} not {aggregate_id}",
                event.aggregate_id()
            )));
        }
    }
    Ok(())
}
