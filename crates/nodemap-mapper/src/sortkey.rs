//! Sort key rebalancing for user-ordered relations.
//!
//! Sort keys are fractional. Moving one entry writes only that entry's key,
//! set halfway between its new neighbours; a full reorder rewrites the keys
//! of all entries into a strictly increasing sequence.

use crate::facade::PersistenceFacade;
use crate::mapper::RdbMapper;
use nodemap_core::error::ConfigErrorKind;
use nodemap_core::{
    Error, NodeOrder, NodeRef, ObjectId, RelationDescription, RelationKind, Result,
    SortKeyDefinition, Value,
};

/// Where the sort field for an ordered relation lives.
#[derive(Debug)]
struct SortTarget {
    definition: SortKeyDefinition,
    /// Set when the key sits on the junction objects of a many-to-many relation.
    junction: Option<JunctionPath>,
}

#[derive(Debug, Clone)]
struct JunctionPath {
    this_end: RelationDescription,
    other_end: RelationDescription,
}

impl RdbMapper {
    /// Rewrite sort keys according to the node's order instruction, if any.
    pub fn rebalance_sort_keys(&self, node: &NodeRef, facade: &dyn PersistenceFacade) -> Result<()> {
        let Some(order) = node.read().order().cloned() else {
            return Ok(());
        };
        if order.ordered.is_empty() {
            return Ok(());
        }
        let target = self.sort_target(&order)?;
        let carriers = order
            .ordered
            .iter()
            .map(|entry| self.sort_carrier(node, entry, &target, facade))
            .collect::<Result<Vec<_>>>()?;

        match &order.moved {
            Some(moved) => move_entries(&order, moved, &carriers, &target.definition),
            None => reorder_entries(&carriers, &target.definition),
        }
        Ok(())
    }

    fn sort_target(&self, order: &NodeOrder) -> Result<SortTarget> {
        let Some(role) = order.role.as_deref() else {
            let entry_type = order.ordered[0].oid().type_name().to_string();
            let entry_ty = self.schema.type_description(&entry_type)?;
            let definition = entry_ty
                .own_sort_key(None)
                .cloned()
                .ok_or_else(|| not_sortable(format!("type '{entry_type}' has no default sort key")))?;
            return Ok(SortTarget {
                definition,
                junction: None,
            });
        };

        let relation = self.ty.require_relation(role)?;
        match &relation.kind {
            RelationKind::ManyToMany { this_end, other_end } => {
                let junction = self.schema.type_description(&this_end.other_type)?;
                let definition = junction
                    .own_sort_key(Some(&relation.this_role))
                    .cloned()
                    .ok_or_else(|| {
                        not_sortable(format!(
                            "junction '{}' has no sort key for role '{}'",
                            junction.name, relation.this_role
                        ))
                    })?;
                Ok(SortTarget {
                    definition,
                    junction: Some(JunctionPath {
                        this_end: (**this_end).clone(),
                        other_end: (**other_end).clone(),
                    }),
                })
            }
            RelationKind::ManyToOne { .. } | RelationKind::OneToMany { .. } => {
                let entry_ty = self.schema.type_description(&relation.other_type)?;
                let definition = entry_ty
                    .own_sort_key(Some(&relation.this_role))
                    .cloned()
                    .ok_or_else(|| {
                        not_sortable(format!(
                            "'{}' has no sort key for role '{}'",
                            entry_ty.name, relation.this_role
                        ))
                    })?;
                Ok(SortTarget {
                    definition,
                    junction: None,
                })
            }
        }
    }

    /// The object carrying the sort field for `entry`: the junction object
    /// linking it to `container`, or the entry itself.
    fn sort_carrier(
        &self,
        container: &NodeRef,
        entry: &NodeRef,
        target: &SortTarget,
        facade: &dyn PersistenceFacade,
    ) -> Result<Option<NodeRef>> {
        let Some(path) = &target.junction else {
            return Ok(Some(entry.clone()));
        };
        let entry_id = match &path.other_end.kind {
            RelationKind::ManyToOne { id_name, .. } => entry.value(id_name),
            _ => entry.oid().first_id().clone(),
        };
        let (junction, criteria) = self.junction_criteria(container, &path.this_end, &path.other_end, entry_id)?;
        let carrier = facade.load_objects(&junction, &criteria, true)?.into_iter().next();
        if carrier.is_none() {
            tracing::warn!(entry = %entry.oid(), "No junction object carries the sort key, entry skipped");
        }
        Ok(carrier)
    }
}

fn not_sortable(message: String) -> Error {
    Error::config(ConfigErrorKind::NotSortable, message)
}

fn sort_value(carrier: &NodeRef, field: &str) -> f64 {
    carrier.value(field).as_f64().unwrap_or(0.0)
}

/// Partial move: each moved entry gets the mean of its neighbours' keys.
///
/// A missing neighbour is synthesized one step beyond the present one in the
/// sort direction. Entries without any neighbour keep their key.
fn move_entries(order: &NodeOrder, moved: &[ObjectId], carriers: &[Option<NodeRef>], definition: &SortKeyDefinition) {
    let field = definition.sort_field.as_str();
    let step = definition.sort_direction.sign();
    for (i, entry) in order.ordered.iter().enumerate() {
        if !moved.contains(&entry.oid()) {
            continue;
        }
        let Some(carrier) = &carriers[i] else {
            continue;
        };
        let left = i
            .checked_sub(1)
            .and_then(|j| carriers[j].as_ref())
            .map(|c| sort_value(c, field));
        let right = carriers
            .get(i + 1)
            .and_then(Option::as_ref)
            .map(|c| sort_value(c, field));
        let (left, right) = match (left, right) {
            (Some(l), Some(r)) => (l, r),
            (None, Some(r)) => (r - step, r),
            (Some(l), None) => (l, l + step),
            (None, None) => continue,
        };
        let value = (left + right) / 2.0;
        tracing::debug!(entry = %entry.oid(), field, value, "Moved entry");
        carrier.set_value(field, Value::Double(value));
    }
}

/// Full reorder: the existing keys, sorted and made unique, assigned in caller order.
fn reorder_entries(carriers: &[Option<NodeRef>], definition: &SortKeyDefinition) {
    let field = definition.sort_field.as_str();
    let present: Vec<&NodeRef> = carriers.iter().flatten().collect();
    let mut values: Vec<f64> = present.iter().map(|c| sort_value(c, field)).collect();
    values.sort_by(f64::total_cmp);
    let mut keys = strictly_increasing(&values);
    if definition.sort_direction.is_desc() {
        keys.reverse();
    }
    let mut written = 0;
    for (carrier, key) in present.into_iter().zip(keys) {
        if carrier.value(field).as_f64() != Some(key) {
            carrier.set_value(field, Value::Double(key));
            written += 1;
        }
    }
    tracing::debug!(field, entries = carriers.len(), written, "Reordered entries");
}

/// Turn an ascending sequence into a strictly increasing one of the same length.
///
/// A value not above its predecessor becomes the mean of the predecessor and
/// the next larger input value, or the predecessor plus one at the end.
fn strictly_increasing(sorted: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(sorted.len());
    for (i, &value) in sorted.iter().enumerate() {
        match out.last().copied() {
            Some(prev) if value <= prev => {
                let next = sorted[i + 1..].iter().copied().find(|&n| n > prev);
                out.push(next.map_or(prev + 1.0, |n| (prev + n) / 2.0));
            }
            _ => out.push(value),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::{TestFacade, mapper};
    use nodemap_core::{Node, NodeState};
    use std::collections::BTreeMap;

    fn chapter(id: i64, key: f64) -> NodeRef {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::BigInt(id));
        values.insert("fk_book_id".to_string(), Value::BigInt(7));
        values.insert("sortkey_book".to_string(), Value::Double(key));
        NodeRef::new(Node::loaded(ObjectId::single("Chapter", id), values))
    }

    fn book() -> NodeRef {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::BigInt(7));
        NodeRef::new(Node::loaded(ObjectId::single("Book", 7), values))
    }

    fn keys(nodes: &[NodeRef]) -> Vec<f64> {
        nodes.iter().map(|n| sort_value(n, "sortkey_book")).collect()
    }

    #[test]
    fn test_strictly_increasing() {
        assert_eq!(strictly_increasing(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0]);
        assert_eq!(strictly_increasing(&[1.0, 1.0, 1.0, 2.0]), vec![1.0, 1.5, 1.75, 2.0]);
        assert_eq!(strictly_increasing(&[0.0, 0.0]), vec![0.0, 1.0]);
        assert_eq!(strictly_increasing(&[1.0, 1.0, 2.0, 2.0]), vec![1.0, 1.5, 2.0, 3.0]);
        assert!(strictly_increasing(&[]).is_empty());
    }

    #[test]
    fn test_partial_move_touches_only_moved_entry() {
        let books = mapper("Book");
        let facade = TestFacade::new();
        let chapters: Vec<NodeRef> = (1..=5).map(|i| chapter(i, i as f64)).collect();
        // Move chapter 5 to the second position.
        let ordered = vec![
            chapters[0].clone(),
            chapters[4].clone(),
            chapters[1].clone(),
            chapters[2].clone(),
            chapters[3].clone(),
        ];
        let container = book();
        container
            .write()
            .set_order(NodeOrder::moved(ordered.clone(), vec![chapters[4].oid()], Some("Chapter")));
        books.rebalance_sort_keys(&container, &facade).unwrap();

        assert_eq!(keys(&ordered), vec![1.0, 1.5, 2.0, 3.0, 4.0]);
        let dirty: Vec<ObjectId> = chapters
            .iter()
            .filter(|c| c.state() == NodeState::Dirty)
            .map(NodeRef::oid)
            .collect();
        assert_eq!(dirty, vec![ObjectId::single("Chapter", 5)]);
    }

    #[test]
    fn test_partial_move_to_either_end() {
        let books = mapper("Book");
        let facade = TestFacade::new();
        let (a, b, c) = (chapter(1, 1.0), chapter(2, 2.0), chapter(3, 3.0));
        let container = book();
        container
            .write()
            .set_order(NodeOrder::moved(vec![c.clone(), a.clone(), b.clone()], vec![c.oid()], Some("Chapter")));
        books.rebalance_sort_keys(&container, &facade).unwrap();
        assert_eq!(sort_value(&c, "sortkey_book"), 0.5);

        container
            .write()
            .set_order(NodeOrder::moved(vec![a.clone(), b.clone(), c.clone()], vec![c.oid()], Some("Chapter")));
        books.rebalance_sort_keys(&container, &facade).unwrap();
        assert_eq!(sort_value(&c, "sortkey_book"), 2.5);
    }

    #[test]
    fn test_full_reorder_resolves_duplicates() {
        let books = mapper("Book");
        let facade = TestFacade::new();
        let chapters = vec![chapter(1, 1.0), chapter(2, 1.0), chapter(3, 1.0), chapter(4, 2.0)];
        let ordered = vec![
            chapters[3].clone(),
            chapters[1].clone(),
            chapters[0].clone(),
            chapters[2].clone(),
        ];
        let container = book();
        container.write().set_order(NodeOrder::full(ordered.clone(), Some("Chapter")));
        books.rebalance_sort_keys(&container, &facade).unwrap();

        let assigned = keys(&ordered);
        assert_eq!(assigned, vec![1.0, 1.5, 1.75, 2.0]);
        assert!(assigned.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(chapters[0].state(), NodeState::Dirty);
        assert_eq!(chapters[2].state(), NodeState::Dirty);
    }

    fn descending() -> SortKeyDefinition {
        SortKeyDefinition::new(Some("Book"), "sortkey_book", nodemap_core::SortDirection::Desc)
    }

    #[test]
    fn test_descending_move_to_either_end() {
        let (a, b, c) = (chapter(1, 3.0), chapter(2, 2.0), chapter(3, 1.0));
        let to_front = NodeOrder::moved(vec![c.clone(), a.clone(), b.clone()], vec![c.oid()], Some("Chapter"));
        let carriers: Vec<Option<NodeRef>> = to_front.ordered.iter().cloned().map(Some).collect();
        move_entries(&to_front, &[c.oid()], &carriers, &descending());
        // Above the first key, since keys fall along the order
        assert_eq!(sort_value(&c, "sortkey_book"), 3.5);

        let (a, b, c) = (chapter(1, 3.0), chapter(2, 2.0), chapter(3, 1.0));
        let to_back = NodeOrder::moved(vec![b.clone(), c.clone(), a.clone()], vec![a.oid()], Some("Chapter"));
        let carriers: Vec<Option<NodeRef>> = to_back.ordered.iter().cloned().map(Some).collect();
        move_entries(&to_back, &[a.oid()], &carriers, &descending());
        assert_eq!(sort_value(&a, "sortkey_book"), 0.5);
        assert_eq!(keys(&[b, c]), vec![2.0, 1.0]);
    }

    #[test]
    fn test_descending_full_reorder_resolves_duplicates() {
        let ordered = vec![chapter(1, 1.0), chapter(2, 1.0), chapter(3, 2.0)];
        let carriers: Vec<Option<NodeRef>> = ordered.iter().cloned().map(Some).collect();
        reorder_entries(&carriers, &descending());

        let assigned = keys(&ordered);
        assert_eq!(assigned, vec![2.0, 1.5, 1.0]);
        assert!(assigned.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(ordered[1].state(), NodeState::Dirty);
    }

    #[test]
    fn test_many_to_many_key_lives_on_junction() {
        let pages = mapper("Page");
        let junction = |document: i64, key: f64| {
            let mut values = BTreeMap::new();
            values.insert("fk_page_id".to_string(), Value::BigInt(3));
            values.insert("fk_document_id".to_string(), Value::BigInt(document));
            values.insert("sortkey_page".to_string(), Value::Double(key));
            let oid = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(document)]);
            NodeRef::new(Node::loaded(oid, values))
        };
        let (j1, j2) = (junction(8, 1.0), junction(9, 2.0));
        let facade = TestFacade::new().with(j1.clone()).with(j2.clone());
        let document = |id: i64| {
            let mut values = BTreeMap::new();
            values.insert("id".to_string(), Value::BigInt(id));
            NodeRef::new(Node::loaded(ObjectId::single("Document", id), values))
        };
        let page = {
            let mut values = BTreeMap::new();
            values.insert("id".to_string(), Value::BigInt(3));
            NodeRef::new(Node::loaded(ObjectId::single("Page", 3), values))
        };
        let (d8, d9) = (document(8), document(9));
        page.write()
            .set_order(NodeOrder::full(vec![d9.clone(), d8.clone()], Some("Document")));
        pages.rebalance_sort_keys(&page, &facade).unwrap();

        assert_eq!(sort_value(&j2, "sortkey_page"), 1.0);
        assert_eq!(sort_value(&j1, "sortkey_page"), 2.0);
        assert_eq!(d8.state(), NodeState::Clean);
    }

    #[test]
    fn test_unsortable_relation_is_config_error() {
        let documents = mapper("NMPageDocument");
        let facade = TestFacade::new();
        let junction_owner = {
            let mut values = BTreeMap::new();
            values.insert("fk_page_id".to_string(), Value::BigInt(3));
            values.insert("fk_document_id".to_string(), Value::BigInt(9));
            let oid = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(9)]);
            NodeRef::new(Node::loaded(oid, values))
        };
        let page = {
            let mut values = BTreeMap::new();
            values.insert("id".to_string(), Value::BigInt(3));
            NodeRef::new(Node::loaded(ObjectId::single("Page", 3), values))
        };
        junction_owner
            .write()
            .set_order(NodeOrder::full(vec![page], Some("Page")));
        let err = documents.rebalance_sort_keys(&junction_owner, &facade).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NotSortable));
    }
}
