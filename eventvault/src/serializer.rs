//! The serialization boundary used for event payloads and snapshot mementos.
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Turns values into storable bytes and back.
///
/// Round-tripping must preserve every observable field of the value.
pub trait Serializer: Send + Sync {
    /// The media type of the produced bytes, e.g. `application/json`.
    fn content_type(&self) -> &'static str;

    /// Encodes a value.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decodes a value previously produced by [`serialize`](Serializer::serialize).
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// `serde_json` encoding. The default for every repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
