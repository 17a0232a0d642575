//! The per-type mapper.

use nodemap_core::error::{ConfigErrorKind, IdentityErrorKind};
use nodemap_core::{
    Error, IdGenerator, Node, ObjectId, ObjectProxy, Result, Schema, TypeDescription, Value,
};
use nodemap_query::StatementCache;
use std::fmt;
use std::sync::Arc;

/// Prefix of the bookkeeping columns carrying the junction object's key in
/// many-to-many selects: `_relation_id_0`, `_relation_id_1`, one per key column.
pub const RELATION_ID_COLUMN: &str = "_relation_id";

/// Bookkeeping column carrying the originating related id in many-to-many selects.
pub const RELATION_ORIGIN_COLUMN: &str = "_relation_origin";

/// Name of the bookkeeping column carrying key column `index` of the junction object.
pub fn relation_id_column(index: usize) -> String {
    format!("{RELATION_ID_COLUMN}_{index}")
}

/// Is `name` a bookkeeping column of a relation select rather than an attribute?
pub(crate) fn is_bookkeeping_column(name: &str) -> bool {
    name == RELATION_ORIGIN_COLUMN || name.starts_with(RELATION_ID_COLUMN)
}

/// Maps one entity type onto its table.
///
/// A mapper holds no domain data. It turns nodes into storage operations,
/// builds the selects that load them and maintains relations and sort keys
/// on their behalf. The statement cache and the id generator are injected and
/// usually shared between the mappers of one session.
#[derive(Clone)]
pub struct RdbMapper {
    pub(crate) schema: Arc<Schema>,
    pub(crate) ty: Arc<TypeDescription>,
    pub(crate) cache: Arc<StatementCache>,
    pub(crate) ids: Arc<dyn IdGenerator>,
}

impl RdbMapper {
    /// Create the mapper for `type_name`.
    pub fn new(
        schema: Arc<Schema>,
        type_name: &str,
        cache: Arc<StatementCache>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let ty = Arc::clone(schema.type_description(type_name)?);
        Ok(Self {
            schema,
            ty,
            cache,
            ids,
        })
    }

    /// A mapper for another type sharing this mapper's cache and id generator.
    pub fn sibling(&self, type_name: &str) -> Result<Self> {
        Self::new(
            Arc::clone(&self.schema),
            type_name,
            Arc::clone(&self.cache),
            Arc::clone(&self.ids),
        )
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_description(&self) -> &TypeDescription {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }

    pub fn table(&self) -> &str {
        &self.ty.table
    }

    pub fn cache(&self) -> &Arc<StatementCache> {
        &self.cache
    }

    /// Create a new node with a dummy identity and default values applied.
    pub fn create_node(&self) -> Node {
        let oid = ObjectId::dummy(self.ty.name.clone(), self.ty.pk_names.len());
        let mut node = Node::new(oid.clone());
        for (pk, id) in self.ty.pk_names.iter().zip(oid.ids()) {
            node.init_value(pk.clone(), id.clone());
        }
        for attr in &self.ty.attributes {
            if let Some(default) = &attr.default_value {
                node.init_value(attr.name.clone(), default.clone());
            }
        }
        node
    }

    /// Rebuild a node's identity from its primary key values.
    pub fn refresh_oid(&self, node: &mut Node) {
        let oid = self.ty.oid_from(|name| node.get_value(name));
        if &oid != node.oid() {
            tracing::trace!(from = %node.oid(), to = %oid, "Identity changed");
            node.set_oid(oid);
        }
    }

    /// Fail unless `oid` belongs to this mapper's type.
    pub(crate) fn check_own(&self, oid: &ObjectId) -> Result<()> {
        if oid.type_name() == self.ty.name {
            Ok(())
        } else {
            Err(Error::identity(
                IdentityErrorKind::TypeMismatch,
                format!("'{oid}' passed to the mapper of '{}'", self.ty.name),
            ))
        }
    }

    pub(crate) fn unsupported(&self, message: String) -> Error {
        Error::config(ConfigErrorKind::Unsupported, message)
    }
}

impl fmt::Debug for RdbMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdbMapper")
            .field("type_name", &self.ty.name)
            .field("table", &self.ty.table)
            .field("cache_capacity", &self.cache.capacity())
            .finish_non_exhaustive()
    }
}

/// The value of `attribute` on the object behind `oid`, if it is part of the key.
pub(crate) fn key_value(ty: &TypeDescription, oid: &ObjectId, attribute: &str) -> Option<Value> {
    ty.pk_names
        .iter()
        .position(|pk| pk == attribute)
        .and_then(|i| oid.ids().get(i).cloned())
}

/// The value of `attribute` on a proxied object: a key position or a cached value.
pub(crate) fn proxy_value(ty: &TypeDescription, proxy: &ObjectProxy, attribute: &str) -> Option<Value> {
    key_value(ty, proxy.oid(), attribute)
        .or_else(|| proxy.value(attribute).cloned())
        .filter(|v| !v.is_null())
}
