//! Turning result rows back into nodes.

use crate::mapper::{RELATION_ORIGIN_COLUMN, RdbMapper, is_bookkeeping_column, proxy_value, relation_id_column};
use crate::select::SelectOptions;
use nodemap_core::error::IdentityErrorKind;
use nodemap_core::{
    Criteria, Error, Node, ObjectId, ObjectProxy, RelationKind, Result, Row, TypeDescription, Value,
};
use nodemap_query::Driver;
use std::collections::BTreeMap;

/// One object loaded through a relation.
#[derive(Debug, Clone)]
pub struct Relative {
    /// Identity of the proxy the object was loaded for.
    pub origin: ObjectId,
    pub node: Node,
    /// The junction object linking the two, for many-to-many relations.
    pub junction: Option<ObjectId>,
}

impl RdbMapper {
    /// Build a clean node from a result row.
    ///
    /// Bookkeeping columns of relation selects are not attribute values and are skipped.
    pub fn object_from_row(&self, row: &Row) -> Result<Node> {
        let values: BTreeMap<String, Value> = row
            .iter()
            .filter(|(name, _)| !is_bookkeeping_column(name))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let oid = self.ty.oid_from(|name| values.get(name));
        if oid.is_dummy() {
            return Err(Error::identity(
                IdentityErrorKind::Malformed,
                format!("row of '{}' carries no primary key value", self.ty.name),
            ));
        }
        Ok(Node::loaded(oid, values))
    }

    /// Load all objects matching `criteria`.
    pub fn load_objects(&self, driver: &dyn Driver, criteria: &[Criteria], options: &SelectOptions) -> Result<Vec<Node>> {
        let select = self.get_select_sql(criteria, options)?;
        let rows = driver.select(&select)?;
        tracing::debug!(type_name = %self.ty.name, rows = rows.len(), "Loaded objects");
        rows.iter().map(|row| self.object_from_row(row)).collect()
    }

    /// Load the objects related to `proxies` under `other_role`.
    ///
    /// Each node is paired with the identity of the proxy it was loaded for
    /// and, over a junction, with the junction object's identity. A node
    /// related to several proxies appears once per proxy.
    pub fn load_relatives(
        &self,
        driver: &dyn Driver,
        proxies: &[ObjectProxy],
        other_role: &str,
        criteria: &[Criteria],
        options: &SelectOptions,
    ) -> Result<Vec<Relative>> {
        let relation = self.ty.require_relation(other_role)?;
        let other = self.schema.type_description(&relation.other_type)?;
        let select = self.get_relation_select_sql(proxies, other_role, criteria, options)?;
        let rows = driver.select(&select)?;

        let junction_type = match relation.junction_type() {
            Some(name) => Some(self.schema.type_description(name)?),
            None => None,
        };

        let mut related = Vec::with_capacity(rows.len());
        for row in &rows {
            let node = self.object_from_row(row)?;
            let junction = junction_type.map(|ty| junction_oid(ty, row)).transpose()?;
            // The value on this side and the attribute of the proxies it must equal.
            let (link, proxy_attribute) = match &relation.kind {
                RelationKind::ManyToOne { fk_name, id_name } => (node.value(fk_name), id_name.as_str()),
                RelationKind::OneToMany { id_name, fk_name } => (node.value(id_name), fk_name.as_str()),
                RelationKind::ManyToMany { other_end, .. } => {
                    let id_name = match &other_end.kind {
                        RelationKind::ManyToOne { id_name, .. } => id_name.as_str(),
                        _ => other.pk_names[0].as_str(),
                    };
                    let origin = row.get_by_name(RELATION_ORIGIN_COLUMN).cloned().unwrap_or(Value::Null);
                    (origin, id_name)
                }
            };
            for proxy in proxies {
                if proxy_value(other, proxy, proxy_attribute).is_some_and(|v| v.sql_eq(&link)) {
                    related.push(Relative {
                        origin: proxy.oid().clone(),
                        node: node.clone(),
                        junction: junction.clone(),
                    });
                }
            }
        }
        tracing::debug!(
            type_name = %self.ty.name,
            role = other_role,
            rows = rows.len(),
            pairs = related.len(),
            "Loaded relatives"
        );
        Ok(related)
    }
}

/// The junction identity carried by the bookkeeping columns of `row`.
fn junction_oid(junction: &TypeDescription, row: &Row) -> Result<ObjectId> {
    let ids: Vec<Value> = (0..junction.pk_names.len())
        .map(|i| row.get_by_name(&relation_id_column(i)).cloned().unwrap_or(Value::Null))
        .collect();
    let oid = ObjectId::new(junction.name.clone(), ids);
    if oid.is_dummy() {
        return Err(Error::identity(
            IdentityErrorKind::Malformed,
            format!("relation row carries no key of junction '{}'", junction.name),
        ));
    }
    Ok(oid)
}
