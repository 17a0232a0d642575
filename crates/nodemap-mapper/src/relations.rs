//! Preparing nodes for storage: key assignment, sort key seeding and
//! relation maintenance.

use crate::facade::PersistenceFacade;
use crate::mapper::{RdbMapper, key_value};
use nodemap_core::error::IdentityErrorKind;
use nodemap_core::{
    AddedEdge, Criteria, DeletedEdge, Error, Node, NodeRef, ObjectId, RelationDescription,
    RelationKind, Result, Value,
};

/// 32-bit FNV-1a, used to seed sort keys of objects with non-numeric keys.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Default sort key value of an object: its numeric key, else a digest of its identity.
pub fn seed_value(oid: &ObjectId) -> f64 {
    if let [id] = oid.ids() {
        if let Some(n) = id.as_f64() {
            return n;
        }
    }
    f64::from(fnv1a(oid.to_string().as_bytes()))
}

impl RdbMapper {
    /// Run the write-path preparation of `node` in order: primary keys, sort
    /// key seeding, relation maintenance, sort key rebalancing.
    ///
    /// Objects touched on the way (related nodes, junction objects, sort key
    /// carriers) are changed in memory; the caller collects their storage
    /// operations afterwards.
    #[tracing::instrument(level = "debug", skip(self, node, facade), fields(type_name = %self.ty.name))]
    pub fn prepare_for_storage(&self, node: &NodeRef, facade: &dyn PersistenceFacade) -> Result<()> {
        let seeding_deferred = {
            let mut n = node.write();
            self.check_own(n.oid())?;
            self.assign_primary_keys(&mut n)?;
            n.is_new() && !self.seed_sort_keys(&mut n)
        };

        self.maintain_relations(node, facade)?;

        {
            let mut n = node.write();
            self.refresh_oid(&mut n);
            if seeding_deferred && !self.seed_sort_keys(&mut n) {
                tracing::warn!(oid = %n.oid(), "Identity still unassigned, sort keys not seeded");
            }
        }

        self.rebalance_sort_keys(node, facade)
    }

    /// Issue ids for dummy primary keys that are not foreign keys.
    ///
    /// Foreign key parts of the key are filled by relation maintenance.
    pub fn assign_primary_keys(&self, node: &mut Node) -> Result<()> {
        for pk in &self.ty.pk_names {
            if self.ty.is_foreign_key(pk) {
                continue;
            }
            if ObjectId::is_dummy_value(&node.value(pk)) {
                let id = self.ids.next_id(&self.ty.name)?;
                tracing::debug!(type_name = %self.ty.name, attribute = %pk, id = %id, "Assigned primary key");
                node.init_value(pk.clone(), id);
            }
        }
        self.refresh_oid(node);
        Ok(())
    }

    /// Give every unset sort field a value derived from the node's identity.
    ///
    /// Returns false, leaving the node untouched, while the identity is still a dummy.
    pub fn seed_sort_keys(&self, node: &mut Node) -> bool {
        if node.oid().is_dummy() {
            return false;
        }
        let seed = seed_value(node.oid());
        for def in &self.ty.sort_keys {
            if node.value(&def.sort_field).is_empty() {
                tracing::trace!(oid = %node.oid(), field = %def.sort_field, seed, "Seeded sort key");
                node.set_value(def.sort_field.clone(), Value::Double(seed));
            }
        }
        true
    }

    /// Apply the node's pending relation edits: removals first, then additions.
    pub fn maintain_relations(&self, node: &NodeRef, facade: &dyn PersistenceFacade) -> Result<()> {
        let (deleted, added) = {
            let n = node.read();
            (n.deleted_nodes().to_vec(), n.added_nodes().to_vec())
        };
        for edge in &deleted {
            let relation = self.ty.require_relation(&edge.role)?;
            self.remove_relation(node, relation, edge, facade)?;
        }
        for edge in &added {
            let relation = self.ty.require_relation(&edge.role)?;
            self.add_relation(node, relation, edge, facade)?;
        }
        Ok(())
    }

    fn remove_relation(
        &self,
        node: &NodeRef,
        relation: &RelationDescription,
        edge: &DeletedEdge,
        facade: &dyn PersistenceFacade,
    ) -> Result<()> {
        self.check_related(relation, &edge.oid)?;
        match &relation.kind {
            RelationKind::ManyToOne { fk_name, .. } => {
                node.set_value(fk_name.clone(), Value::Null);
            }
            RelationKind::OneToMany { id_name, fk_name } => {
                let own_id = node.value(id_name);
                match facade.load(&edge.oid)? {
                    Some(child) if child.value(fk_name).sql_eq(&own_id) => {
                        child.set_value(fk_name.clone(), Value::Null);
                    }
                    Some(_) => tracing::debug!(child = %edge.oid, "Child points elsewhere, left unchanged"),
                    None => tracing::debug!(child = %edge.oid, "Removed child does not exist"),
                }
            }
            RelationKind::ManyToMany { this_end, other_end } => {
                let other_id = match &other_end.kind {
                    RelationKind::ManyToOne { id_name, .. } => self.related_value(facade, &edge.oid, id_name)?,
                    _ => edge.oid.first_id().clone(),
                };
                let (junction, criteria) = self.junction_criteria(node, this_end, other_end, other_id)?;
                let matches = facade.load_objects(&junction, &criteria, true)?;
                match matches.len() {
                    0 => tracing::debug!(oid = %node.oid(), other = %edge.oid, "No junction object to remove"),
                    1 => {}
                    n => tracing::warn!(
                        oid = %node.oid(),
                        other = %edge.oid,
                        count = n,
                        "Duplicate junction objects, removing all"
                    ),
                }
                for junction_node in &matches {
                    facade.delete(junction_node)?;
                }
            }
        }
        Ok(())
    }

    fn add_relation(
        &self,
        node: &NodeRef,
        relation: &RelationDescription,
        edge: &AddedEdge,
        facade: &dyn PersistenceFacade,
    ) -> Result<()> {
        let other_oid = edge.node.oid();
        self.check_related(relation, &other_oid)?;
        match &relation.kind {
            RelationKind::ManyToOne { fk_name, id_name } => {
                let parent_id = required_value(&edge.node, id_name)?;
                node.set_value(fk_name.clone(), parent_id);
            }
            RelationKind::OneToMany { id_name, fk_name } => {
                let own_id = required_value(node, id_name)?;
                edge.node.set_value(fk_name.clone(), own_id);
            }
            RelationKind::ManyToMany { this_end, other_end } => {
                let other_id = match &other_end.kind {
                    RelationKind::ManyToOne { id_name, .. } => required_value(&edge.node, id_name)?,
                    _ => other_oid.first_id().clone(),
                };
                let (junction, criteria) = self.junction_criteria(node, this_end, other_end, other_id)?;
                if facade.load_objects(&junction, &criteria, true)?.is_empty() {
                    let created = facade.create(&junction)?;
                    {
                        let mut j = created.write();
                        for c in &criteria {
                            if let Some(value) = c.operand.values().first() {
                                j.set_value(c.attribute.clone(), value.clone());
                            }
                        }
                    }
                    tracing::debug!(oid = %node.oid(), other = %other_oid, junction = %junction, "Created junction object");
                } else {
                    tracing::debug!(oid = %node.oid(), other = %other_oid, "Junction object already exists");
                }
            }
        }
        Ok(())
    }

    /// Junction type and the criteria selecting the junction objects between
    /// `node` and the object with key `other_id`.
    pub(crate) fn junction_criteria(
        &self,
        node: &NodeRef,
        this_end: &RelationDescription,
        other_end: &RelationDescription,
        other_id: Value,
    ) -> Result<(String, Vec<Criteria>)> {
        let (
            RelationKind::OneToMany { id_name, fk_name: this_fk },
            RelationKind::ManyToOne { fk_name: other_fk, .. },
        ) = (&this_end.kind, &other_end.kind)
        else {
            return Err(self.unsupported(format!(
                "many-to-many relation of '{}' does not chain one-to-many and many-to-one",
                self.ty.name
            )));
        };
        let own_id = required_value(node, id_name)?;
        let junction = this_end.other_type.clone();
        let criteria = vec![
            Criteria::equal(junction.clone(), this_fk.clone(), own_id),
            Criteria::equal(junction.clone(), other_fk.clone(), other_id),
        ];
        Ok((junction, criteria))
    }

    /// The value of `attribute` on the object identified by `oid`.
    fn related_value(&self, facade: &dyn PersistenceFacade, oid: &ObjectId, attribute: &str) -> Result<Value> {
        let ty = self.schema.type_description(oid.type_name())?;
        if let Some(value) = key_value(ty, oid, attribute) {
            return Ok(value);
        }
        Ok(facade.load(oid)?.map_or(Value::Null, |n| n.value(attribute)))
    }

    fn check_related(&self, relation: &RelationDescription, oid: &ObjectId) -> Result<()> {
        if oid.type_name() == relation.other_type {
            Ok(())
        } else {
            Err(Error::identity(
                IdentityErrorKind::TypeMismatch,
                format!(
                    "'{oid}' related to '{}' under role '{}', expected type '{}'",
                    self.ty.name, relation.other_role, relation.other_type
                ),
            ))
        }
    }
}

/// An identifying value that must already be assigned.
fn required_value(node: &NodeRef, attribute: &str) -> Result<Value> {
    let value = node.value(attribute);
    if ObjectId::is_dummy_value(&value) {
        return Err(Error::identity(
            IdentityErrorKind::Dummy,
            format!("'{}' has no value for '{attribute}' yet", node.oid()),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::{TestFacade, mapper};
    use nodemap_core::NodeState;
    use std::collections::BTreeMap;

    fn loaded(type_name: &str, id: i64, extra: &[(&str, Value)]) -> NodeRef {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::BigInt(id));
        for (k, v) in extra {
            values.insert((*k).to_string(), v.clone());
        }
        NodeRef::new(Node::loaded(ObjectId::single(type_name, id), values))
    }

    #[test]
    fn test_seed_value() {
        assert_eq!(seed_value(&ObjectId::single("Chapter", 12)), 12.0);
        let composite = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(9)]);
        assert_eq!(seed_value(&composite), seed_value(&composite.clone()));
        assert!(seed_value(&composite) >= 0.0);
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
    }

    #[test]
    fn test_keys_are_assigned_before_seeding() {
        let chapters = mapper("Chapter");
        let facade = TestFacade::new();
        let node = NodeRef::new(chapters.create_node());
        chapters.prepare_for_storage(&node, &facade).unwrap();
        let n = node.read();
        assert_eq!(n.oid(), &ObjectId::single("Chapter", 1));
        assert_eq!(n.value("sortkey_book"), Value::Double(1.0));
    }

    #[test]
    fn test_explicit_sort_key_is_kept() {
        let chapters = mapper("Chapter");
        let facade = TestFacade::new();
        let node = NodeRef::new(chapters.create_node());
        node.set_value("sortkey_book", 42.5);
        chapters.prepare_for_storage(&node, &facade).unwrap();
        assert_eq!(node.value("sortkey_book"), Value::Double(42.5));
    }

    #[test]
    fn test_many_to_one_add_and_remove() {
        let chapters = mapper("Chapter");
        let facade = TestFacade::new();
        let book = loaded("Book", 7, &[]);
        let chapter = loaded("Chapter", 1, &[]);
        chapter.write().add_node("Book", &book);
        chapters.prepare_for_storage(&chapter, &facade).unwrap();
        assert_eq!(chapter.value("fk_book_id"), Value::BigInt(7));

        chapter.write().mark_clean();
        chapter.write().delete_node("Book", ObjectId::single("Book", 7));
        chapters.prepare_for_storage(&chapter, &facade).unwrap();
        assert_eq!(chapter.value("fk_book_id"), Value::Null);
        assert_eq!(chapter.state(), NodeState::Dirty);
    }

    #[test]
    fn test_many_to_one_last_parent_wins() {
        let chapters = mapper("Chapter");
        let facade = TestFacade::new();
        let chapter = loaded("Chapter", 1, &[]);
        chapter.write().add_node("Book", &loaded("Book", 7, &[]));
        chapter.write().add_node("Book", &loaded("Book", 8, &[]));
        chapters.prepare_for_storage(&chapter, &facade).unwrap();
        assert_eq!(chapter.value("fk_book_id"), Value::BigInt(8));
    }

    #[test]
    fn test_one_to_many_add_and_remove() {
        let books = mapper("Book");
        let child = loaded("Chapter", 1, &[("fk_book_id", Value::Null)]);
        let facade = TestFacade::new().with(child.clone());
        let book = loaded("Book", 7, &[]);
        book.write().add_node("Chapter", &child);
        books.prepare_for_storage(&book, &facade).unwrap();
        assert_eq!(child.value("fk_book_id"), Value::BigInt(7));

        book.write().mark_clean();
        book.write().delete_node("Chapter", ObjectId::single("Chapter", 1));
        books.prepare_for_storage(&book, &facade).unwrap();
        assert_eq!(child.value("fk_book_id"), Value::Null);
    }

    #[test]
    fn test_many_to_many_add_is_idempotent() {
        let pages = mapper("Page");
        let facade = TestFacade::new();
        let page = loaded("Page", 3, &[]);
        let document = loaded("Document", 9, &[]);
        page.write().add_node("Document", &document);
        pages.prepare_for_storage(&page, &facade).unwrap();
        pages.prepare_for_storage(&page, &facade).unwrap();

        let junctions = facade.objects_of("NMPageDocument");
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].value("fk_page_id"), Value::BigInt(3));
        assert_eq!(junctions[0].value("fk_document_id"), Value::BigInt(9));
    }

    #[test]
    fn test_many_to_many_remove_deletes_every_match() {
        let pages = mapper("Page");
        let duplicate = || {
            let mut values = BTreeMap::new();
            values.insert("fk_page_id".to_string(), Value::BigInt(3));
            values.insert("fk_document_id".to_string(), Value::BigInt(9));
            let oid = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(9)]);
            NodeRef::new(Node::loaded(oid, values))
        };
        let facade = TestFacade::new().with(duplicate()).with(duplicate());
        let page = loaded("Page", 3, &[]);
        page.write().delete_node("Document", ObjectId::single("Document", 9));
        pages.prepare_for_storage(&page, &facade).unwrap();
        assert!(
            facade
                .objects_of("NMPageDocument")
                .iter()
                .all(|j| j.state() == NodeState::Deleted)
        );

        // Nothing left to remove: a no-op.
        pages.prepare_for_storage(&page, &facade).unwrap();
    }

    #[test]
    fn test_wrong_related_type_is_rejected() {
        let chapters = mapper("Chapter");
        let facade = TestFacade::new();
        let chapter = loaded("Chapter", 1, &[]);
        chapter.write().add_node("Book", &loaded("Page", 7, &[]));
        let err = chapters.prepare_for_storage(&chapter, &facade).unwrap_err();
        assert_eq!(err.identity_kind(), Some(IdentityErrorKind::TypeMismatch));

        let chapter = loaded("Chapter", 2, &[]);
        chapter.write().add_node("Shelf", &loaded("Book", 7, &[]));
        assert!(chapters.prepare_for_storage(&chapter, &facade).unwrap_err().is_config_error());
    }
}
