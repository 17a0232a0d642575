//! Type descriptions and the schema registry.
//!
//! A [`Schema`] is loaded once (usually from JSON) and validated up front, so
//! the mapper can treat any lookup failure afterwards as a programming
//! defect and report it as a configuration error.

use crate::attribute::{AttributeDescription, AttributeKind};
use crate::criteria::{OrderBy, SortDirection};
use crate::error::{ConfigErrorKind, Error, IdentityErrorKind, Result};
use crate::oid::ObjectId;
use crate::relation::{RelationDescription, RelationKind};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sort field used to persist explicit ordering.
///
/// `role` is the role of the container as seen from the sorted type; `None`
/// is the type's own default order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKeyDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub sort_field: String,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl SortKeyDefinition {
    pub fn new(role: Option<&str>, sort_field: impl Into<String>, sort_direction: SortDirection) -> Self {
        Self {
            role: role.map(str::to_string),
            sort_field: sort_field.into(),
            sort_direction,
        }
    }
}

/// Static metadata of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: String,
    pub table: String,
    /// Primary key attribute names, in key order.
    pub pk_names: Vec<String>,
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub relations: Vec<RelationDescription>,
    #[serde(default)]
    pub sort_keys: Vec<SortKeyDefinition>,
    #[serde(default)]
    pub default_order: Vec<OrderBy>,
}

impl TypeDescription {
    /// Create a type with a single `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            pk_names: vec!["id".to_string()],
            attributes: Vec::new(),
            relations: Vec::new(),
            sort_keys: Vec::new(),
            default_order: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary_keys(mut self, names: &[&str]) -> Self {
        self.pk_names = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDescription) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn sort_key(mut self, definition: SortKeyDefinition) -> Self {
        self.sort_keys.push(definition);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.default_order.push(order);
        self
    }

    /// Look up an attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Look up an attribute, failing with a configuration error.
    pub fn require_attribute(&self, name: &str) -> Result<&AttributeDescription> {
        self.get_attribute(name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownAttribute,
                format!("type '{}' has no attribute '{name}'", self.name),
            )
        })
    }

    /// Look up a column-backed attribute, failing with a configuration error.
    pub fn require_column_attribute(&self, name: &str) -> Result<&AttributeDescription> {
        let attr = self.require_attribute(name)?;
        if attr.is_column() {
            Ok(attr)
        } else {
            Err(Error::config(
                ConfigErrorKind::UnknownAttribute,
                format!("attribute '{}.{name}' is not backed by a column", self.name),
            ))
        }
    }

    /// Column-backed attributes in declaration order.
    pub fn column_attributes(&self) -> impl Iterator<Item = &AttributeDescription> {
        self.attributes.iter().filter(|a| a.is_column())
    }

    /// Reference attributes in declaration order.
    pub fn reference_attributes(&self) -> impl Iterator<Item = &AttributeDescription> {
        self.attributes.iter().filter(|a| a.is_reference())
    }

    /// The relation whose other end has the given role.
    pub fn get_relation(&self, role: &str) -> Option<&RelationDescription> {
        self.relations.iter().find(|r| r.other_role == role)
    }

    /// The relation whose other end has the given role, failing with a configuration error.
    pub fn require_relation(&self, role: &str) -> Result<&RelationDescription> {
        self.get_relation(role).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownRole,
                format!("type '{}' has no relation with role '{role}'", self.name),
            )
        })
    }

    /// Is the attribute the foreign key column of one of this type's many-to-one relations?
    pub fn is_foreign_key(&self, name: &str) -> bool {
        self.relations.iter().any(|r| match &r.kind {
            RelationKind::ManyToOne { fk_name, .. } => fk_name == name,
            _ => false,
        })
    }

    /// Is the attribute part of the primary key?
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.pk_names.iter().any(|pk| pk == name)
    }

    /// Column name of an attribute (the attribute name if unknown).
    pub fn column_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.get_attribute(name)
            .filter(|a| !a.column.is_empty())
            .map_or(name, |a| a.column.as_str())
    }

    /// The sort key this type declares for `role` (`None`: default order).
    pub fn own_sort_key(&self, role: Option<&str>) -> Option<&SortKeyDefinition> {
        self.sort_keys.iter().find(|d| d.role.as_deref() == role)
    }

    /// Build the identity of an object from its primary key values.
    pub fn oid_from<'a>(&self, mut value_of: impl FnMut(&str) -> Option<&'a Value>) -> ObjectId {
        let ids = self
            .pk_names
            .iter()
            .map(|pk| value_of(pk).cloned().unwrap_or(Value::Null))
            .collect();
        ObjectId::new(self.name.clone(), ids)
    }

    fn normalize(&mut self) {
        for attr in &mut self.attributes {
            if attr.is_column() && attr.column.is_empty() {
                attr.column.clone_from(&attr.name);
            }
        }
        for rel in &mut self.relations {
            if rel.this_type.is_empty() {
                rel.this_type.clone_from(&self.name);
            }
            if let RelationKind::ManyToMany { this_end, .. } = &mut rel.kind {
                if this_end.this_type.is_empty() {
                    this_end.this_type.clone_from(&self.name);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    types: Vec<TypeDescription>,
}

/// Registry of all type descriptions.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, Arc<TypeDescription>>,
}

impl Schema {
    /// Build and validate a schema.
    pub fn new(types: Vec<TypeDescription>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for mut ty in types {
            ty.normalize();
            let name = ty.name.clone();
            if map.insert(name.clone(), Arc::new(ty)).is_some() {
                return Err(invalid(format!("type '{name}' is declared twice")));
            }
        }
        let schema = Self { types: map };
        schema.validate()?;
        tracing::debug!(types = schema.types.len(), "Schema loaded");
        Ok(schema)
    }

    /// Load a schema from its JSON document form: `{"types": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_json::from_str(json)?;
        Self::new(doc.types)
    }

    /// Iterate over all type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Look up a type description.
    pub fn type_description(&self, type_name: &str) -> Result<&Arc<TypeDescription>> {
        self.types.get(type_name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownType,
                format!("unknown type '{type_name}'"),
            )
        })
    }

    /// The relation of `type_name` with the given other role.
    pub fn relation(&self, type_name: &str, role: &str) -> Result<&RelationDescription> {
        self.type_description(type_name)?.require_relation(role)
    }

    /// Resolve the sort key for objects of `type_name` ordered within the
    /// container reached through `role` (`None`: the type's default order).
    ///
    /// Returns the type that carries the sort field with its definition. For
    /// a many-to-many role the carrier is the junction type.
    pub fn sort_key(&self, type_name: &str, role: Option<&str>) -> Result<Option<(String, SortKeyDefinition)>> {
        let ty = self.type_description(type_name)?;
        let Some(role) = role else {
            return Ok(ty.own_sort_key(None).map(|d| (ty.name.clone(), d.clone())));
        };
        let relation = ty.require_relation(role)?;
        match relation.junction_type() {
            Some(junction) => {
                let junction_ty = self.type_description(junction)?;
                Ok(junction_ty
                    .own_sort_key(Some(role))
                    .map(|d| (junction_ty.name.clone(), d.clone())))
            }
            None => Ok(ty.own_sort_key(Some(role)).map(|d| (ty.name.clone(), d.clone()))),
        }
    }

    /// The relation a reference attribute rides on.
    ///
    /// When the type has several relations to the referenced type, the
    /// attribute's declared role picks one; without it the reference is ambiguous.
    pub fn reference_relation<'a>(
        &'a self,
        ty: &'a TypeDescription,
        attribute: &AttributeDescription,
    ) -> Result<&'a RelationDescription> {
        let AttributeKind::Reference {
            reference_type,
            role,
            ..
        } = &attribute.kind
        else {
            return Err(Error::config(
                ConfigErrorKind::UnknownAttribute,
                format!("attribute '{}.{}' is not a reference", ty.name, attribute.name),
            ));
        };
        let candidates: Vec<&RelationDescription> = ty
            .relations
            .iter()
            .filter(|r| &r.other_type == reference_type)
            .filter(|r| role.as_ref().is_none_or(|role| &r.other_role == role))
            .collect();
        match candidates.as_slice() {
            [relation] => Ok(relation),
            [] => Err(Error::config(
                ConfigErrorKind::UnknownRole,
                format!(
                    "reference '{}.{}' has no relation to type '{reference_type}'",
                    ty.name, attribute.name
                ),
            )),
            _ => Err(Error::config(
                ConfigErrorKind::AmbiguousReference,
                format!(
                    "reference '{}.{}' matches {} relations to '{reference_type}', declare a role",
                    ty.name,
                    attribute.name,
                    candidates.len()
                ),
            )),
        }
    }

    /// Check an identity against the schema: known type, right key count.
    pub fn validate_oid(&self, oid: &ObjectId) -> Result<()> {
        let ty = self.type_description(oid.type_name()).map_err(|_| {
            Error::identity(
                IdentityErrorKind::TypeMismatch,
                format!("'{oid}' names an unknown type"),
            )
        })?;
        oid.check(&ty.name, ty.pk_names.len())
    }

    /// Parse an identity string and validate it.
    pub fn parse_oid(&self, s: &str) -> Result<ObjectId> {
        let oid = ObjectId::parse(s)?;
        self.validate_oid(&oid)?;
        Ok(oid)
    }

    fn validate(&self) -> Result<()> {
        for ty in self.types.values() {
            if !ObjectId::is_valid_type_name(&ty.name) {
                return Err(invalid(format!("'{}' is not a valid type name", ty.name)));
            }
            if ty.pk_names.is_empty() {
                return Err(invalid(format!("type '{}' declares no primary key", ty.name)));
            }
            for pk in &ty.pk_names {
                if !ty.get_attribute(pk).is_some_and(AttributeDescription::is_column) {
                    return Err(invalid(format!(
                        "primary key '{pk}' of type '{}' is not a column attribute",
                        ty.name
                    )));
                }
            }
            for rel in &ty.relations {
                self.validate_relation(ty, rel)?;
            }
            for def in &ty.sort_keys {
                let numeric = ty
                    .require_column_attribute(&def.sort_field)
                    .is_ok_and(|a| a.data_type.is_numeric());
                if !numeric {
                    return Err(invalid(format!(
                        "sort field '{}' of type '{}' is not a numeric column attribute",
                        def.sort_field, ty.name
                    )));
                }
            }
            for order in &ty.default_order {
                ty.require_attribute(&order.attribute)?;
            }
            for attr in ty.reference_attributes() {
                let relation = self.reference_relation(ty, attr)?;
                if let AttributeKind::Reference {
                    reference_type,
                    reference_attribute,
                    ..
                } = &attr.kind
                {
                    self.type_description(reference_type)?
                        .require_column_attribute(reference_attribute)?;
                }
                if relation.is_many_to_many() {
                    return Err(Error::config(
                        ConfigErrorKind::Unsupported,
                        format!(
                            "reference '{}.{}' rides on many-to-many role '{}'",
                            ty.name, attr.name, relation.other_role
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_relation(&self, ty: &TypeDescription, rel: &RelationDescription) -> Result<()> {
        if rel.this_type != ty.name {
            return Err(invalid(format!(
                "relation '{}' of type '{}' declares this_type '{}'",
                rel.other_role, ty.name, rel.this_type
            )));
        }
        let other = self.type_description(&rel.other_type)?;
        match &rel.kind {
            RelationKind::ManyToOne { fk_name, id_name } => {
                ty.require_column_attribute(fk_name)?;
                other.require_column_attribute(id_name)?;
            }
            RelationKind::OneToMany { id_name, fk_name } => {
                ty.require_column_attribute(id_name)?;
                other.require_column_attribute(fk_name)?;
            }
            RelationKind::ManyToMany { this_end, other_end } => {
                if !this_end.is_one_to_many() || !other_end.is_many_to_one() {
                    return Err(invalid(format!(
                        "many-to-many relation '{}.{}' must chain a one-to-many and a many-to-one",
                        ty.name, rel.other_role
                    )));
                }
                if this_end.other_type != other_end.this_type {
                    return Err(invalid(format!(
                        "many-to-many relation '{}.{}' ends do not meet at one junction type",
                        ty.name, rel.other_role
                    )));
                }
                self.validate_relation(ty, this_end)?;
                let junction = self.type_description(&other_end.this_type)?;
                self.validate_relation(junction, other_end)?;
                if other_end.other_type != other.name {
                    return Err(invalid(format!(
                        "many-to-many relation '{}.{}' ends at '{}'",
                        ty.name, rel.other_role, other_end.other_type
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> Error {
    Error::config(ConfigErrorKind::InvalidSchema, message)
}
