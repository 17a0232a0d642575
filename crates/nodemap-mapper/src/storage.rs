//! Write path: insert, update and delete operations.

use crate::mapper::RdbMapper;
use nodemap_core::error::IdentityErrorKind;
use nodemap_core::{AttributeDescription, Error, Node, NodeState, ObjectId, Result, Value};
use nodemap_query::{ColumnValues, StorageOperation};

impl RdbMapper {
    /// INSERT of every column-backed attribute.
    pub fn get_insert_sql(&self, node: &Node) -> Result<StorageOperation> {
        self.check_own(node.oid())?;
        self.require_persistent(node.oid())?;
        let values = self
            .ty
            .column_attributes()
            .map(|attr| Ok((attr.column.clone(), storage_value(attr, &node.value(&attr.name))?)))
            .collect::<Result<ColumnValues>>()?;
        Ok(StorageOperation::Insert {
            table: self.ty.table.clone(),
            values,
        })
    }

    /// UPDATE keyed by primary key.
    ///
    /// Writes the attributes changed since the node was loaded, or every
    /// non-key column when no changes are tracked.
    pub fn get_update_sql(&self, node: &Node) -> Result<StorageOperation> {
        self.check_own(node.oid())?;
        let changed = node.changed_attributes();
        let values = self
            .ty
            .column_attributes()
            .filter(|attr| !self.ty.is_primary_key(&attr.name))
            .filter(|attr| changed.is_empty() || changed.contains(&attr.name))
            .map(|attr| Ok((attr.column.clone(), storage_value(attr, &node.value(&attr.name))?)))
            .collect::<Result<ColumnValues>>()?;
        Ok(StorageOperation::Update {
            table: self.ty.table.clone(),
            values,
            keys: self.key_columns(node.oid())?,
        })
    }

    /// DELETE keyed by primary key.
    pub fn get_delete_sql(&self, oid: &ObjectId) -> Result<StorageOperation> {
        self.check_own(oid)?;
        Ok(StorageOperation::Delete {
            table: self.ty.table.clone(),
            keys: self.key_columns(oid)?,
        })
    }

    /// The operations that persist `node` in its current state.
    ///
    /// Clean nodes and dirty nodes without changed columns need nothing. A
    /// deleted node that never reached the database needs nothing either.
    pub fn get_storage_operations(&self, node: &Node) -> Result<Vec<StorageOperation>> {
        let operations = match node.state() {
            NodeState::New => vec![self.get_insert_sql(node)?],
            NodeState::Dirty if !node.changed_attributes().is_empty() => vec![self.get_update_sql(node)?],
            NodeState::Deleted if !node.oid().is_dummy() => vec![self.get_delete_sql(node.oid())?],
            NodeState::Dirty | NodeState::Deleted | NodeState::Clean => Vec::new(),
        };
        Ok(operations)
    }

    fn key_columns(&self, oid: &ObjectId) -> Result<ColumnValues> {
        self.schema.validate_oid(oid)?;
        self.require_persistent(oid)?;
        Ok(self
            .ty
            .pk_names
            .iter()
            .zip(oid.ids())
            .map(|(pk, id)| (self.ty.column_of(pk).to_string(), id.clone()))
            .collect())
    }

    fn require_persistent(&self, oid: &ObjectId) -> Result<()> {
        if oid.is_dummy() {
            return Err(Error::identity(
                IdentityErrorKind::Dummy,
                format!("'{oid}' has no assigned primary key"),
            ));
        }
        Ok(())
    }
}

fn storage_value(attr: &AttributeDescription, value: &Value) -> Result<Value> {
    attr.data_type.convert_for_storage(value).map_err(|e| match e {
        Error::Type(mut err) => {
            err.attribute = Some(attr.name.clone());
            Error::Type(err)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::mapper;
    use std::collections::BTreeMap;

    fn chapter(id: i64) -> Node {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::BigInt(id));
        values.insert("name".to_string(), Value::from("Intro"));
        values.insert("fk_book_id".to_string(), Value::BigInt(7));
        values.insert("sortkey_book".to_string(), Value::Double(1.0));
        Node::loaded(ObjectId::single("Chapter", id), values)
    }

    #[test]
    fn test_insert_projects_columns_only() {
        let chapters = mapper("Chapter");
        let mut node = chapters.create_node();
        node.set_value("id", 1);
        node.set_value("name", "Intro");
        node.set_value("fk_book_id", "");
        node.set_value("book_title", "not stored");
        node.set_value("draft", true);
        chapters.refresh_oid(&mut node);

        let StorageOperation::Insert { table, values } = chapters.get_insert_sql(&node).unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(table, "chapter");
        let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, vec!["id", "name", "fk_book_id", "sortkey_book"]);
        assert_eq!(values[2].1, Value::Null);
    }

    #[test]
    fn test_insert_requires_assigned_key() {
        let chapters = mapper("Chapter");
        let err = chapters.get_insert_sql(&chapters.create_node()).unwrap_err();
        assert_eq!(err.identity_kind(), Some(IdentityErrorKind::Dummy));
    }

    #[test]
    fn test_integer_coercion_names_attribute() {
        let chapters = mapper("Chapter");
        let mut node = chapter(1);
        node.set_value("fk_book_id", "seven");
        let err = chapters.get_update_sql(&node).unwrap_err();
        let Error::Type(err) = err else {
            panic!("expected type error");
        };
        assert_eq!(err.attribute.as_deref(), Some("fk_book_id"));

        node.set_value("fk_book_id", "8");
        let op = chapters.get_update_sql(&node).unwrap();
        assert_eq!(op.params().get("v_fk_book_id"), Some(&Value::BigInt(8)));
    }

    #[test]
    fn test_update_writes_changed_columns() {
        let chapters = mapper("Chapter");
        let mut node = chapter(1);
        node.set_value("fk_book_id", Value::Null);
        let op = chapters.get_update_sql(&node).unwrap();
        assert_eq!(
            op,
            StorageOperation::Update {
                table: "chapter".into(),
                values: vec![("fk_book_id".into(), Value::Null)],
                keys: vec![("id".into(), Value::BigInt(1))],
            }
        );
    }

    #[test]
    fn test_storage_operations_follow_state() {
        let chapters = mapper("Chapter");
        let mut node = chapter(1);
        assert!(chapters.get_storage_operations(&node).unwrap().is_empty());
        node.set_value("name", "Outro");
        assert_eq!(chapters.get_storage_operations(&node).unwrap()[0].kind(), "UPDATE");
        node.set_state(NodeState::Deleted);
        assert_eq!(chapters.get_storage_operations(&node).unwrap()[0].kind(), "DELETE");

        let mut fresh = chapters.create_node();
        fresh.set_state(NodeState::Deleted);
        assert!(chapters.get_storage_operations(&fresh).unwrap().is_empty());
    }

    #[test]
    fn test_delete_keys_composite_identity() {
        let junctions = mapper("NMPageDocument");
        let oid = ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(9)]);
        assert_eq!(
            junctions.get_delete_sql(&oid).unwrap(),
            StorageOperation::Delete {
                table: "nm_page_document".into(),
                keys: vec![
                    ("fk_page_id".into(), Value::BigInt(3)),
                    ("fk_document_id".into(), Value::BigInt(9)),
                ],
            }
        );
        let err = junctions.get_delete_sql(&ObjectId::single("Page", 3)).unwrap_err();
        assert_eq!(err.identity_kind(), Some(IdentityErrorKind::TypeMismatch));
        let err = junctions
            .get_delete_sql(&ObjectId::new("NMPageDocument", vec![Value::BigInt(3)]))
            .unwrap_err();
        assert_eq!(err.identity_kind(), Some(IdentityErrorKind::KeyCount));
    }
}
