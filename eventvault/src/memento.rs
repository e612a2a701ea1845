//! Capture and restore an aggregate's internal state as an opaque memento.
use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

/// Produces and consumes mementos of its own state.
///
/// A memento taken at version `V` must describe exactly the state reached by
/// replaying events `1..=V` from an empty instance; the snapshot machinery
/// relies on that equivalence.
pub trait Originator {
    /// The serializable state payload.
    type Memento: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    /// Captures the current state.
    fn create_memento(&self) -> Self::Memento;

    /// Overwrites the current state with a previously captured one.
    fn restore_memento(&mut self, memento: Self::Memento);
}
