use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{DiskLoc, Result, StoreError};

/// Width of the length prefix in front of every encoded document.
pub const LEN_PREFIX: usize = 4;

/// Document stored in a record.
///
/// The store itself only needs the encoded length, field lookup for index
/// keys and a few metadata fields; everything else is opaque. On disk a
/// document is a little-endian `u32` total length (prefix included) followed
/// by its JSON text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level fields in insertion order.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the document into a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Sets a top-level field, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Top-level field `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Field at a dotted path, descending through embedded objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut cur = self.0.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_object()?.get(part)?;
        }
        Some(cur)
    }

    /// String field `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Encodes with the length prefix; fails when longer than `max_len`.
    pub fn encode(&self, max_len: u32) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.0)
            .map_err(|err| StoreError::invalid(format!("document not encodable: {err}")))?;
        let total = json.len() + LEN_PREFIX;
        if total > max_len as usize {
            return Err(StoreError::invalid(format!(
                "document of {total} bytes exceeds the {max_len} byte limit"
            )));
        }
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Decodes a length-prefixed payload read from the record at `loc`.
    pub fn decode(loc: DiskLoc, payload: &[u8]) -> Result<Self> {
        let corrupt = |reason| StoreError::CorruptRecord { loc, reason };
        if payload.len() < LEN_PREFIX {
            return Err(corrupt("payload shorter than its length prefix"));
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&payload[..LEN_PREFIX]);
        if u32::from_le_bytes(prefix) as usize != payload.len() {
            return Err(corrupt("payload length prefix mismatch"));
        }
        serde_json::from_slice(&payload[LEN_PREFIX..])
            .map(Self)
            .map_err(|_| corrupt("payload is not a valid document"))
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StoreError::invalid(format!(
                "document must be an object, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}
