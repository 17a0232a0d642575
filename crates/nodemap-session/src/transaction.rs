//! Nodes in flight between two commits.

use nodemap_core::{Criteria, NodeRef, ObjectId};

/// Nodes created or deleted since the last commit.
///
/// Loaded nodes that are merely changed stay in the identity map; the
/// transaction holds what the identity map cannot: new nodes whose identity
/// is not assigned yet and deleted nodes on their way out.
#[derive(Debug, Default)]
pub struct Transaction {
    nodes: Vec<NodeRef>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `node` until the next commit or rollback.
    pub fn register(&mut self, node: &NodeRef) {
        if !self.contains(node) {
            self.nodes.push(node.clone());
        }
    }

    pub fn contains(&self, node: &NodeRef) -> bool {
        self.nodes.iter().any(|n| n.ptr_eq(node))
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    /// The live in-flight node with identity `oid`.
    pub fn get(&self, oid: &ObjectId) -> Option<NodeRef> {
        self.nodes
            .iter()
            .find(|n| {
                let node = n.read();
                !node.is_deleted() && node.oid() == oid
            })
            .cloned()
    }

    /// Live in-flight nodes of `type_name` whose current values match `criteria`.
    pub fn find(&self, type_name: &str, criteria: &[Criteria]) -> Vec<NodeRef> {
        self.nodes
            .iter()
            .filter(|n| {
                let node = n.read();
                node.type_name() == type_name
                    && !node.is_deleted()
                    && Criteria::matches_all(criteria, |c| node.get_value(&c.attribute))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forget every in-flight node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodemap_core::{Node, NodeState, Value};

    fn junction(page: i64, document: i64) -> NodeRef {
        let mut node = Node::new(ObjectId::dummy("NMPageDocument", 2));
        node.set_value("fk_page_id", page);
        node.set_value("fk_document_id", document);
        NodeRef::new(node)
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut tx = Transaction::new();
        let node = junction(3, 9);
        tx.register(&node);
        tx.register(&node);
        assert_eq!(tx.len(), 1);
        assert!(tx.contains(&node));
        tx.clear();
        assert!(tx.is_empty());
    }

    #[test]
    fn test_find_matches_in_memory_values() {
        let mut tx = Transaction::new();
        let wanted = junction(3, 9);
        tx.register(&wanted);
        tx.register(&junction(3, 10));

        let criteria = vec![
            Criteria::equal("NMPageDocument", "fk_page_id", 3),
            Criteria::equal("NMPageDocument", "fk_document_id", 9),
        ];
        let found = tx.find("NMPageDocument", &criteria);
        assert_eq!(found.len(), 1);
        assert!(found[0].ptr_eq(&wanted));
        assert!(tx.find("Page", &[]).is_empty());

        wanted.write().set_state(NodeState::Deleted);
        assert!(tx.find("NMPageDocument", &criteria).is_empty());
    }

    #[test]
    fn test_get_by_identity() {
        let mut tx = Transaction::new();
        let node = junction(3, 9);
        tx.register(&node);
        let oid = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(9)]);
        assert!(tx.get(&oid).is_none());

        node.write().set_oid(oid.clone());
        assert!(tx.get(&oid).unwrap().ptr_eq(&node));
    }
}
