//! Identity Map pattern: one node instance per object identity.
//!
//! The identity map ensures that each stored object corresponds to exactly
//! one [`NodeRef`] within a session:
//!
//! - **Uniqueness**: the same identity always yields the same node
//! - **Consistency**: changes made through one handle are seen by every other
//! - **Precedence**: in-memory changes win over freshly read rows
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new();
//! let first = map.get_or_insert(node_from_row);
//! let second = map.get_or_insert(same_row_again);
//! assert!(first.ptr_eq(&second));
//! ```

use nodemap_core::{Node, NodeRef, ObjectId};
use std::collections::HashMap;

/// Nodes known to a session, keyed by identity.
#[derive(Debug, Default)]
pub struct IdentityMap {
    objects: HashMap<ObjectId, NodeRef>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` under its current identity, replacing any previous entry.
    ///
    /// Dummy identities are never registered.
    pub fn insert(&mut self, node: NodeRef) -> NodeRef {
        let oid = node.oid();
        if oid.is_dummy() {
            tracing::trace!(oid = %oid, "Dummy identity not registered");
            return node;
        }
        self.objects.insert(oid, node.clone());
        node
    }

    pub fn get(&self, oid: &ObjectId) -> Option<NodeRef> {
        self.objects.get(oid).cloned()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.objects.contains_key(oid)
    }

    /// Forget the node registered under `oid`.
    ///
    /// Returns true if a node was removed.
    pub fn remove(&mut self, oid: &ObjectId) -> bool {
        self.objects.remove(oid).is_some()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The registered node for `node`'s identity, or `node` itself once registered.
    ///
    /// A freshly loaded row never overwrites a node that is already known.
    pub fn get_or_insert(&mut self, node: Node) -> NodeRef {
        if let Some(existing) = self.objects.get(node.oid()) {
            return existing.clone();
        }
        self.insert(NodeRef::new(node))
    }

    /// Forget `node` under whatever identity it was registered with.
    ///
    /// Used when a node's identity changed or the node was deleted.
    pub fn forget(&mut self, node: &NodeRef) -> bool {
        let before = self.objects.len();
        self.objects.retain(|_, entry| !entry.ptr_eq(node));
        self.objects.len() != before
    }

    /// All registered nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.objects.values()
    }

    /// Registered nodes of `type_name`.
    pub fn nodes_of<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a NodeRef> + 'a {
        self.objects
            .iter()
            .filter(move |(oid, _)| oid.type_name() == type_name)
            .map(|(_, node)| node)
    }

    /// Registered nodes with unsaved changes.
    pub fn pending(&self) -> Vec<NodeRef> {
        self.objects
            .values()
            .filter(|n| n.read().needs_storage())
            .cloned()
            .collect()
    }
}
