//! Composite object identities.
//!
//! An [`ObjectId`] names one persisted (or about to be persisted) object:
//! the entity type plus its ordered primary-key values. Its canonical
//! string form `Type:id1:id2` is what crosses boundaries wherever object
//! identity has to be stored as an opaque string.

use crate::error::{Error, IdentityErrorKind, Result};
use crate::pattern::matches_pattern;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Leading character of dummy key values issued for unsaved objects.
pub const DUMMY_PREFIX: char = '~';

const SEPARATOR: char = ':';

const TYPE_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

static DUMMY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Composite identifier: type plus ordered primary-key values.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectId {
    type_name: String,
    ids: Vec<Value>,
}

impl ObjectId {
    /// Create an identity from a type name and key values.
    pub fn new(type_name: impl Into<String>, ids: Vec<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            ids,
        }
    }

    /// Create an identity with a single key value.
    pub fn single(type_name: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::new(type_name, vec![id.into()])
    }

    /// Create an unsaved identity with `key_count` distinct dummy values.
    pub fn dummy(type_name: impl Into<String>, key_count: usize) -> Self {
        let ids = (0..key_count.max(1)).map(|_| Self::next_dummy_value()).collect();
        Self::new(type_name, ids)
    }

    /// Issue a fresh dummy key value.
    pub fn next_dummy_value() -> Value {
        let n = DUMMY_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        Value::Text(format!("{DUMMY_PREFIX}{n}"))
    }

    /// Is this value a placeholder that must be replaced before persistence?
    pub fn is_dummy_value(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Text(s) => s.starts_with(DUMMY_PREFIX),
            _ => false,
        }
    }

    /// Does any key position still hold a dummy?
    pub fn is_dummy(&self) -> bool {
        self.ids.is_empty() || self.ids.iter().any(Self::is_dummy_value)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn ids(&self) -> &[Value] {
        &self.ids
    }

    /// The first key value (the only one for single-key types).
    pub fn first_id(&self) -> &Value {
        self.ids.first().unwrap_or(&Value::Null)
    }

    /// Replace the key value at `index`.
    pub fn set_id(&mut self, index: usize, value: Value) {
        if index < self.ids.len() {
            self.ids[index] = value;
        }
    }

    /// Check that the type name is a valid identifier.
    pub fn is_valid_type_name(name: &str) -> bool {
        matches_pattern(name, TYPE_NAME_PATTERN)
    }

    /// Parse the canonical `Type:id1:id2` form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(SEPARATOR);
        let type_name = parts.next().unwrap_or_default();
        if !Self::is_valid_type_name(type_name) {
            return Err(Error::identity(
                IdentityErrorKind::Malformed,
                format!("'{s}' does not start with a valid type name"),
            ));
        }
        let ids = parts
            .map(|part| {
                if part.is_empty() {
                    Err(Error::identity(
                        IdentityErrorKind::Malformed,
                        format!("'{s}' contains an empty key value"),
                    ))
                } else {
                    Ok(part
                        .parse::<i64>()
                        .map_or_else(|_| Value::Text(part.to_string()), Value::BigInt))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        if ids.is_empty() {
            return Err(Error::identity(
                IdentityErrorKind::Malformed,
                format!("'{s}' has no key values"),
            ));
        }
        Ok(Self::new(type_name, ids))
    }

    /// Parse and check the result against an expected type and key count.
    pub fn parse_for(s: &str, type_name: &str, key_count: usize) -> Result<Self> {
        let oid = Self::parse(s)?;
        oid.check(type_name, key_count)?;
        Ok(oid)
    }

    /// Verify that this identity belongs to `type_name` and carries `key_count` values.
    pub fn check(&self, type_name: &str, key_count: usize) -> Result<()> {
        if self.type_name != type_name {
            return Err(Error::identity(
                IdentityErrorKind::TypeMismatch,
                format!("'{self}' is not an identity of type '{type_name}'"),
            ));
        }
        if self.ids.len() != key_count {
            return Err(Error::identity(
                IdentityErrorKind::KeyCount,
                format!(
                    "'{self}' has {} key values, type '{type_name}' declares {key_count}",
                    self.ids.len()
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        for id in &self.ids {
            write!(f, "{SEPARATOR}{id}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name.hash(state);
        for id in &self.ids {
            id.to_string().hash(state);
        }
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name.cmp(&other.type_name).then_with(|| {
            self.ids
                .iter()
                .zip(&other.ids)
                .map(|(a, b)| a.sort_cmp(b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| self.ids.len().cmp(&other.ids.len()))
        })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
