use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::primitives::bytes::ord;
use crate::storage::document::Document;
use crate::types::{Result, StoreError};

mod tag {
    pub const NULL: u8 = 0x10;
    pub const NUMBER: u8 = 0x20;
    pub const STRING: u8 = 0x30;
    pub const OBJECT: u8 = 0x40;
    pub const ARRAY: u8 = 0x50;
    pub const BOOL: u8 = 0x60;
}

/// One component of a key pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyField {
    /// Dotted field path.
    pub path: String,
    /// Components with a negative direction sort in reverse.
    pub descending: bool,
}

/// Ordered list of field paths an index is built over.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPattern {
    fields: SmallVec<[KeyField; 2]>,
    spec: Document,
}

impl KeyPattern {
    /// Parses a pattern such as `{ "a": 1, "b.c": -1 }`.
    pub fn from_document(spec: &Document) -> Result<Self> {
        if spec.as_map().is_empty() {
            return Err(StoreError::invalid("key pattern has no fields"));
        }
        let mut fields = SmallVec::new();
        for (path, direction) in spec.as_map() {
            let Some(direction) = direction.as_f64() else {
                return Err(StoreError::invalid(format!(
                    "key pattern field {path} needs a numeric direction"
                )));
            };
            if path.is_empty() {
                return Err(StoreError::invalid("key pattern has an empty field path"));
            }
            fields.push(KeyField {
                path: path.clone(),
                descending: direction < 0.0,
            });
        }
        Ok(Self {
            fields,
            spec: spec.clone(),
        })
    }

    /// Components in pattern order.
    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    /// The pattern as it was defined.
    pub fn document(&self) -> &Document {
        &self.spec
    }

    /// Conventional index name, e.g. `a_1_b.c_-1`.
    pub fn default_name(&self) -> String {
        self.spec
            .as_map()
            .iter()
            .map(|(path, dir)| format!("{path}_{dir}"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Encoded index key; byte order matches value order component by component.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IndexKey(Vec<u8>);

impl IndexKey {
    /// Encodes one key from per-field values; `None` stands for a missing field.
    pub fn from_values(pattern: &KeyPattern, values: &[Option<&Value>]) -> Self {
        let mut out = Vec::new();
        for (field, value) in pattern.fields().iter().zip(values) {
            let start = out.len();
            encode_component(&mut out, *value);
            if field.descending {
                out[start..].iter_mut().for_each(|b| *b = !*b);
            }
        }
        Self(out)
    }

    /// Raw encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

fn encode_component(out: &mut Vec<u8>, value: Option<&Value>) {
    match value {
        None | Some(Value::Null) => out.push(tag::NULL),
        Some(Value::Bool(b)) => {
            out.push(tag::BOOL);
            out.push(u8::from(*b));
        }
        Some(Value::Number(n)) => {
            out.push(tag::NUMBER);
            ord::put_f64_be(out, n.as_f64().unwrap_or(0.0));
        }
        Some(Value::String(s)) => {
            out.push(tag::STRING);
            ord::put_str_key(out, s);
        }
        Some(v @ Value::Object(_)) => {
            out.push(tag::OBJECT);
            ord::put_str_key(out, &v.to_string());
        }
        Some(v @ Value::Array(_)) => {
            out.push(tag::ARRAY);
            ord::put_str_key(out, &v.to_string());
        }
    }
}

/// Key set a document contributes to an index over `pattern`.
///
/// A document with none of the pattern's fields contributes no key. When the
/// first field holds an array the document is multikey and contributes one key
/// per element; arrays in later fields are indexed as whole values.
pub fn extract_keys(pattern: &KeyPattern, doc: &Document) -> BTreeSet<IndexKey> {
    let mut values: SmallVec<[Option<&Value>; 2]> = pattern
        .fields()
        .iter()
        .map(|field| doc.get_path(&field.path))
        .collect();
    let mut keys = BTreeSet::new();
    if values.iter().all(Option::is_none) {
        return keys;
    }
    match values[0] {
        Some(Value::Array(items)) => {
            for item in items {
                values[0] = Some(item);
                keys.insert(IndexKey::from_values(pattern, &values));
            }
        }
        _ => {
            keys.insert(IndexKey::from_values(pattern, &values));
        }
    }
    keys
}

/// Keys to drop and keys to add when a document changes.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct KeyDiff {
    /// In the old key set only.
    pub removed: Vec<IndexKey>,
    /// In the new key set only.
    pub added: Vec<IndexKey>,
}

impl KeyDiff {
    /// Returns true when the key sets are equal.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Set difference in both directions; keys present in both sets are untouched.
pub fn diff_keys(old: &BTreeSet<IndexKey>, new: &BTreeSet<IndexKey>) -> KeyDiff {
    KeyDiff {
        removed: old.difference(new).cloned().collect(),
        added: new.difference(old).cloned().collect(),
    }
}
