//! Lightweight object handles.

use crate::node::Node;
use crate::oid::ObjectId;
use crate::value::Value;
use std::collections::BTreeMap;

/// Identity of an object plus whatever attribute values are already known.
///
/// A proxy avoids loading a full object when only its identity (or a
/// foreign key it holds) is needed. The persistence facade turns a proxy
/// into a full node on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProxy {
    oid: ObjectId,
    cached: BTreeMap<String, Value>,
}

impl ObjectProxy {
    #[must_use]
    pub fn new(oid: ObjectId) -> Self {
        Self {
            oid,
            cached: BTreeMap::new(),
        }
    }

    /// Snapshot a node's identity and values.
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self {
            oid: node.oid().clone(),
            cached: node.values().clone(),
        }
    }

    /// Add a known attribute value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cached.insert(name.into(), value.into());
        self
    }

    pub fn oid(&self) -> &ObjectId {
        &self.oid
    }

    pub fn type_name(&self) -> &str {
        self.oid.type_name()
    }

    /// A cached attribute value, if known.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.cached.get(name)
    }
}

impl From<ObjectId> for ObjectProxy {
    fn from(oid: ObjectId) -> Self {
        Self::new(oid)
    }
}
