//! CloudEvent conversion utilities.
//!
//! Committed events can be handed to external consumers as CloudEvents 1.0
//! envelopes. The conversion is deterministic: converting the same
//! [`StoredEvent`] twice yields the same `id`, so consumers can de-duplicate.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use cloudevents::AttributesReader;
//! use eventvault::{StoredEvent, cloudevent::CloudEvent};
//!
//! let stored = StoredEvent::new(
//!     "4f1c".into(),
//!     "account".into(),
//!     "Credited".into(),
//!     1,
//!     7,
//!     Utc::now(),
//!     br#"{"Credited":{"amount":5}}"#.to_vec(),
//! );
//! let ce = CloudEvent::try_from(&stored).unwrap();
//! assert_eq!(ce.into_inner().id(), "4f1c:7");
//! ```

use crate::{Error, Result, StoredEvent};
use cloudevents::event::{Data, Event as CeEvent, EventBuilder, EventBuilderV10};
use tracing::instrument;
use url::Url;

/// Newtype wrapper around `cloudevents_sdk::Event` so we can provide
/// conversions without violating Rust's orphan rules.
#[derive(Debug, Clone)]
pub struct CloudEvent(pub CeEvent);

impl CloudEvent {
    /// Returns the inner [`cloudevents_sdk::Event`].
    #[must_use]
    pub fn into_inner(self) -> CeEvent {
        self.0
    }

    /// Builds a [`CloudEvent`] from a stored event with an explicit source
    /// and payload media type.
    #[instrument(skip(event), fields(aggregate_id = event.aggregate_id(), version = event.version()))]
    pub fn from_stored_with_source(
        event: &StoredEvent,
        source: Url,
        content_type: &str,
    ) -> Result<Self> {
        let ce = EventBuilderV10::new()
            .id(format!("{}:{}", event.aggregate_id(), event.version()))
            .ty(event.event_type())
            .source(source)
            .subject(event.aggregate_id())
            .time(event.timestamp())
            .extension("sequence", event.version())
            .data(content_type, Data::Binary(event.payload().to_vec()))
            .build()
            .map_err(|e| Error::Serialization(format!("failed to build CloudEvent: {e}")))?;

        Ok(Self(ce))
    }

    /// The default source of a stored event: `urn:eventvault:{aggregate_type}`.
    pub fn default_source(event: &StoredEvent) -> Result<Url> {
        Url::parse(&format!("urn:eventvault:{}", event.aggregate_type()))
            .map_err(|e| Error::Serialization(format!("invalid CloudEvent source: {e}")))
    }
}

impl TryFrom<&StoredEvent> for CloudEvent {
    type Error = Error;

    /// Uses [`CloudEvent::default_source`] and assumes JSON payloads.
    fn try_from(event: &StoredEvent) -> Result<Self> {
        let source = Self::default_source(event)?;
        Self::from_stored_with_source(event, source, "application/json")
    }
}
