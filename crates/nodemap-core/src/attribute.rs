//! Attribute metadata.

use crate::types::DataType;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// How an attribute is backed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Stored in a column of the type's own table.
    #[default]
    Column,
    /// Read-only value joined in from a related table through an existing relation.
    Reference {
        /// Type that owns the referenced attribute.
        reference_type: String,
        /// Attribute on `reference_type` whose value is pulled in.
        reference_attribute: String,
        /// Role of the relation to ride on, when the type has several relations
        /// to `reference_type`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    /// Not backed by any column, never part of SQL.
    Transient,
}

/// Metadata about one attribute of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    /// Attribute name used by application code and as the result column alias.
    pub name: String,
    /// Database column name (empty for transient attributes).
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub is_editable: bool,
    /// Input control hint for editors (e.g. "text", "textarea").
    #[serde(default = "default_input_format")]
    pub input_format: String,
    /// Value given to newly created objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub kind: AttributeKind,
}

fn default_true() -> bool {
    true
}

fn default_input_format() -> String {
    "text".to_string()
}

impl AttributeDescription {
    /// Create a column-backed attribute whose column has the attribute's name.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            data_type,
            is_editable: true,
            input_format: default_input_format(),
            default_value: None,
            kind: AttributeKind::Column,
        }
    }

    /// Create a reference attribute pulled in from `reference_type.reference_attribute`.
    pub fn reference(
        name: impl Into<String>,
        reference_type: impl Into<String>,
        reference_attribute: impl Into<String>,
    ) -> Self {
        Self {
            column: String::new(),
            is_editable: false,
            kind: AttributeKind::Reference {
                reference_type: reference_type.into(),
                reference_attribute: reference_attribute.into(),
                role: None,
            },
            ..Self::new(name, DataType::String)
        }
    }

    /// Create a transient attribute.
    pub fn transient(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            column: String::new(),
            kind: AttributeKind::Transient,
            ..Self::new(name, data_type)
        }
    }

    /// Set the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Mark the attribute read-only in editors.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.is_editable = false;
        self
    }

    #[must_use]
    pub fn input_format(mut self, format: impl Into<String>) -> Self {
        self.input_format = format.into();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Restrict a reference attribute to the relation with the given role.
    #[must_use]
    pub fn via_role(mut self, role: impl Into<String>) -> Self {
        if let AttributeKind::Reference { role: r, .. } = &mut self.kind {
            *r = Some(role.into());
        }
        self
    }

    /// Stored in a column of the type's own table.
    pub fn is_column(&self) -> bool {
        matches!(self.kind, AttributeKind::Column)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, AttributeKind::Reference { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, AttributeKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_kind() {
        let title = AttributeDescription::new("title", DataType::String).column("c_title");
        assert!(title.is_column());
        assert_eq!(title.column, "c_title");

        let author = AttributeDescription::reference("author_name", "Author", "name").via_role("Author");
        assert!(author.is_reference());
        assert!(!author.is_editable);
        assert_eq!(
            author.kind,
            AttributeKind::Reference {
                reference_type: "Author".into(),
                reference_attribute: "name".into(),
                role: Some("Author".into()),
            }
        );

        let score = AttributeDescription::transient("score", DataType::Float);
        assert!(score.is_transient());
        assert!(score.column.is_empty());
    }

    #[test]
    fn json_defaults() {
        let attr: AttributeDescription =
            serde_json::from_str(r#"{"name": "title", "column": "title"}"#).unwrap();
        assert!(attr.is_column());
        assert!(attr.is_editable);
        assert_eq!(attr.input_format, "text");
        assert_eq!(attr.data_type, DataType::String);

        let reference: AttributeDescription = serde_json::from_str(
            r#"{"name": "book_title", "kind": {"reference":
                {"reference_type": "Book", "reference_attribute": "title"}}}"#,
        )
        .unwrap();
        assert!(reference.is_reference());

        let transient: AttributeDescription =
            serde_json::from_str(r#"{"name": "score", "kind": "transient"}"#).unwrap();
        assert!(transient.is_transient());
    }
}
