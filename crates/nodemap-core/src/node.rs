//! Runtime object instances.
//!
//! A [`Node`] carries attribute values, its identity, a lifecycle state and
//! the relation edits made since it was loaded. Nodes are shared through
//! [`NodeRef`] handles so a change made through one handle is visible
//! through every other handle to the same object.

use crate::oid::ObjectId;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created in memory, never persisted.
    New,
    /// Loaded or persisted, unchanged since.
    Clean,
    /// Changed since it was loaded.
    Dirty,
    /// Scheduled for removal.
    Deleted,
}

/// A pending edge to a node added under a relation role.
#[derive(Debug, Clone)]
pub struct AddedEdge {
    /// Role of the related node as seen from the owner of the edge.
    pub role: String,
    pub node: NodeRef,
}

/// A pending removal of the relation to another object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedEdge {
    pub role: String,
    pub oid: ObjectId,
}

/// Re-order instruction for the children of a node.
#[derive(Debug, Clone)]
pub struct NodeOrder {
    /// All children in their intended order.
    pub ordered: Vec<NodeRef>,
    /// The children that actually moved; `None` requests a full reorder.
    pub moved: Option<Vec<ObjectId>>,
    /// Role of the children as seen from the container; `None` orders by the
    /// children's default sort key.
    pub role: Option<String>,
}

impl NodeOrder {
    /// Full reorder of `ordered`.
    pub fn full(ordered: Vec<NodeRef>, role: Option<&str>) -> Self {
        Self {
            ordered,
            moved: None,
            role: role.map(str::to_string),
        }
    }

    /// Partial move of `moved` within `ordered`.
    pub fn moved(ordered: Vec<NodeRef>, moved: Vec<ObjectId>, role: Option<&str>) -> Self {
        Self {
            ordered,
            moved: Some(moved),
            role: role.map(str::to_string),
        }
    }
}

/// A domain object instance.
#[derive(Debug, Clone)]
pub struct Node {
    oid: ObjectId,
    values: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
    state: NodeState,
    added: Vec<AddedEdge>,
    deleted: Vec<DeletedEdge>,
    order: Option<NodeOrder>,
}

impl Node {
    /// Create a new, unsaved node with the given (usually dummy) identity.
    #[must_use]
    pub fn new(oid: ObjectId) -> Self {
        Self {
            oid,
            values: BTreeMap::new(),
            changed: BTreeSet::new(),
            state: NodeState::New,
            added: Vec::new(),
            deleted: Vec::new(),
            order: None,
        }
    }

    /// Create a clean node from loaded values.
    #[must_use]
    pub fn loaded(oid: ObjectId, values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            state: NodeState::Clean,
            ..Self::new(oid)
        }
    }

    pub fn oid(&self) -> &ObjectId {
        &self.oid
    }

    /// Replace the identity (after primary key assignment).
    pub fn set_oid(&mut self, oid: ObjectId) {
        self.oid = oid;
    }

    pub fn type_name(&self) -> &str {
        self.oid.type_name()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub fn is_new(&self) -> bool {
        self.state == NodeState::New
    }

    pub fn is_deleted(&self) -> bool {
        self.state == NodeState::Deleted
    }

    /// Has this node anything to write?
    pub fn needs_storage(&self) -> bool {
        matches!(self.state, NodeState::New | NodeState::Dirty | NodeState::Deleted)
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value of an attribute, NULL if unset.
    pub fn value(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Set an attribute value, marking a clean node dirty if the value changed.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if self.values.get(&name) == Some(&value) {
            return;
        }
        if self.state != NodeState::New {
            self.changed.insert(name.clone());
        }
        self.values.insert(name, value);
        self.touch();
    }

    /// Attributes set since the node was loaded or last persisted.
    pub fn changed_attributes(&self) -> &BTreeSet<String> {
        &self.changed
    }

    /// Set an attribute value without changing the lifecycle state.
    pub fn init_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Record that `other` was added under `role`.
    pub fn add_node(&mut self, role: impl Into<String>, other: &NodeRef) {
        self.added.push(AddedEdge {
            role: role.into(),
            node: other.clone(),
        });
        self.touch();
    }

    /// Record that the relation to `oid` under `role` was removed.
    pub fn delete_node(&mut self, role: impl Into<String>, oid: ObjectId) {
        self.deleted.push(DeletedEdge {
            role: role.into(),
            oid,
        });
        self.touch();
    }

    pub fn added_nodes(&self) -> &[AddedEdge] {
        &self.added
    }

    pub fn deleted_nodes(&self) -> &[DeletedEdge] {
        &self.deleted
    }

    /// Attach a re-order instruction for this node's children.
    pub fn set_order(&mut self, order: NodeOrder) {
        self.order = Some(order);
        self.touch();
    }

    pub fn order(&self) -> Option<&NodeOrder> {
        self.order.as_ref()
    }

    /// Drop pending edges and the order instruction (after persistence).
    pub fn clear_pending(&mut self) {
        self.added.clear();
        self.deleted.clear();
        self.order = None;
    }

    /// Mark the node as persisted: clean, no changes, no pending edits.
    pub fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
        self.changed.clear();
        self.clear_pending();
    }

    fn touch(&mut self) {
        if self.state == NodeState::Clean {
            self.state = NodeState::Dirty;
        }
    }
}

/// Shared handle to a [`Node`].
///
/// Locks are poison tolerant: a panic while a node was locked does not make
/// the node unreadable afterwards.
#[derive(Clone)]
pub struct NodeRef(Arc<RwLock<Node>>);

impl NodeRef {
    #[must_use]
    pub fn new(node: Node) -> Self {
        Self(Arc::new(RwLock::new(node)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Node> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Node> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current identity (cloned, the lock is released on return).
    pub fn oid(&self) -> ObjectId {
        self.read().oid().clone()
    }

    pub fn value(&self, name: &str) -> Value {
        self.read().value(name)
    }

    pub fn set_value(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.write().set_value(name, value);
    }

    pub fn state(&self) -> NodeState {
        self.read().state()
    }

    /// Do both handles point to the same node?
    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(node) => write!(f, "NodeRef({})", node.oid()),
            Err(_) => f.write_str("NodeRef(<locked>)"),
        }
    }
}

impl From<Node> for NodeRef {
    fn from(node: Node) -> Self {
        Self::new(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_dirty_clean_nodes_only() {
        let mut node = Node::loaded(ObjectId::single("Book", 1), BTreeMap::new());
        node.set_value("title", "A");
        assert_eq!(node.state(), NodeState::Dirty);
        assert!(node.changed_attributes().contains("title"));
        node.mark_clean();
        assert_eq!(node.state(), NodeState::Clean);
        assert!(node.changed_attributes().is_empty());

        let mut fresh = Node::new(ObjectId::dummy("Book", 1));
        fresh.set_value("title", "A");
        assert_eq!(fresh.state(), NodeState::New);
    }

    #[test]
    fn test_unchanged_value_keeps_node_clean() {
        let mut values = BTreeMap::new();
        values.insert("title".to_string(), Value::from("A"));
        let mut node = Node::loaded(ObjectId::single("Book", 1), values);
        node.set_value("title", "A");
        assert_eq!(node.state(), NodeState::Clean);
        node.init_value("title", "B");
        assert_eq!(node.state(), NodeState::Clean);
    }

    #[test]
    fn test_edges_and_clear() {
        let book = NodeRef::new(Node::loaded(ObjectId::single("Book", 7), BTreeMap::new()));
        let mut chapter = Node::loaded(ObjectId::single("Chapter", 1), BTreeMap::new());
        chapter.add_node("Book", &book);
        chapter.delete_node("Book", ObjectId::single("Book", 3));
        chapter.set_order(NodeOrder::full(Vec::new(), None));
        assert_eq!(chapter.state(), NodeState::Dirty);
        assert_eq!(chapter.added_nodes().len(), 1);
        assert!(chapter.added_nodes()[0].node.ptr_eq(&book));
        assert_eq!(chapter.deleted_nodes()[0].oid, ObjectId::single("Book", 3));

        chapter.clear_pending();
        assert!(chapter.added_nodes().is_empty());
        assert!(chapter.deleted_nodes().is_empty());
        assert!(chapter.order().is_none());
    }

    #[test]
    fn test_node_ref_shares_state() {
        let a = NodeRef::new(Node::new(ObjectId::dummy("Book", 1)));
        let b = a.clone();
        a.set_value("title", "Shared");
        assert_eq!(b.value("title"), Value::from("Shared"));
        assert!(a.ptr_eq(&b));
    }
}
