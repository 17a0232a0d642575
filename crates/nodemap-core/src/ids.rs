//! Primary key generation.

use crate::error::Result;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Issues primary key values for new objects.
pub trait IdGenerator: Send + Sync {
    /// The next key value for `type_name`.
    fn next_id(&self, type_name: &str) -> Result<Value>;
}

/// Per-type increasing integer sequences, starting at 1.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    next: Mutex<HashMap<String, i64>>,
}

impl SequenceIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the sequence of `type_name` continue at `next`.
    #[must_use]
    pub fn starting_at(self, type_name: impl Into<String>, next: i64) -> Self {
        self.next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_name.into(), next);
        self
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self, type_name: &str) -> Result<Value> {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let counter = next.entry(type_name.to_string()).or_insert(1);
        let id = *counter;
        *counter += 1;
        tracing::trace!(type_name, id, "Issued primary key");
        Ok(Value::BigInt(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_per_type() {
        let ids = SequenceIdGenerator::new().starting_at("Book", 7);
        assert_eq!(ids.next_id("Book").unwrap(), Value::BigInt(7));
        assert_eq!(ids.next_id("Book").unwrap(), Value::BigInt(8));
        assert_eq!(ids.next_id("Page").unwrap(), Value::BigInt(1));
    }
}
