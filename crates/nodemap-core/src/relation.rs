//! Relation metadata between entity types.
//!
//! A relation is always described from one type's point of view
//! (`this_type`). The other end is addressed by `other_role`, which is the
//! name application code uses when it navigates from `this_type` to the
//! related objects (e.g. a `Chapter` reaches its `Book` through the role
//! `"Book"`).

use serde::{Deserialize, Serialize};

/// Aggregation kind of a relation end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    #[default]
    None,
    Shared,
    /// Owner end: deleting the owner cascades to the owned objects.
    Composite,
}

/// The closed set of relation shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// `this_type` holds `fk_name`, referencing `other_type.id_name`.
    ManyToOne { fk_name: String, id_name: String },
    /// `other_type` holds `fk_name`, referencing `this_type.id_name`.
    OneToMany { id_name: String, fk_name: String },
    /// Two chained relations through a junction type.
    ///
    /// `this_end` is a one-to-many from `this_type` to the junction,
    /// `other_end` a many-to-one from the junction to `other_type`.
    ManyToMany {
        this_end: Box<RelationDescription>,
        other_end: Box<RelationDescription>,
    },
}

/// Metadata about one relation of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescription {
    /// Filled in from the owning type when omitted.
    #[serde(default)]
    pub this_type: String,
    /// Role of `this_type` as seen from `other_type`.
    pub this_role: String,
    pub other_type: String,
    /// Role of `other_type` as seen from `this_type`.
    pub other_role: String,
    #[serde(default)]
    pub this_aggregation: AggregationKind,
    #[serde(default)]
    pub other_aggregation: AggregationKind,
    #[serde(default = "default_navigable")]
    pub other_navigable: bool,
    #[serde(flatten)]
    pub kind: RelationKind,
}

fn default_navigable() -> bool {
    true
}

impl RelationDescription {
    fn with_kind(
        this_type: impl Into<String>,
        this_role: impl Into<String>,
        other_type: impl Into<String>,
        other_role: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self {
            this_type: this_type.into(),
            this_role: this_role.into(),
            other_type: other_type.into(),
            other_role: other_role.into(),
            this_aggregation: AggregationKind::None,
            other_aggregation: AggregationKind::None,
            other_navigable: true,
            kind,
        }
    }

    /// Create a many-to-one relation: `this_type.fk_name` references `other_type.id_name`.
    pub fn many_to_one(
        this_type: impl Into<String>,
        this_role: impl Into<String>,
        other_type: impl Into<String>,
        other_role: impl Into<String>,
        fk_name: impl Into<String>,
        id_name: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            this_type,
            this_role,
            other_type,
            other_role,
            RelationKind::ManyToOne {
                fk_name: fk_name.into(),
                id_name: id_name.into(),
            },
        )
    }

    /// Create a one-to-many relation: `other_type.fk_name` references `this_type.id_name`.
    pub fn one_to_many(
        this_type: impl Into<String>,
        this_role: impl Into<String>,
        other_type: impl Into<String>,
        other_role: impl Into<String>,
        id_name: impl Into<String>,
        fk_name: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            this_type,
            this_role,
            other_type,
            other_role,
            RelationKind::OneToMany {
                id_name: id_name.into(),
                fk_name: fk_name.into(),
            },
        )
    }

    /// Create a many-to-many relation from its two chained ends.
    pub fn many_to_many(
        this_role: impl Into<String>,
        other_role: impl Into<String>,
        this_end: RelationDescription,
        other_end: RelationDescription,
    ) -> Self {
        let this_type = this_end.this_type.clone();
        let other_type = other_end.other_type.clone();
        Self::with_kind(
            this_type,
            this_role,
            other_type,
            other_role,
            RelationKind::ManyToMany {
                this_end: Box::new(this_end),
                other_end: Box::new(other_end),
            },
        )
    }

    /// Set the aggregation kind of this end.
    #[must_use]
    pub fn this_aggregation(mut self, kind: AggregationKind) -> Self {
        self.this_aggregation = kind;
        self
    }

    /// Set the aggregation kind of the other end.
    #[must_use]
    pub fn other_aggregation(mut self, kind: AggregationKind) -> Self {
        self.other_aggregation = kind;
        self
    }

    #[must_use]
    pub fn navigable(mut self, value: bool) -> Self {
        self.other_navigable = value;
        self
    }

    pub fn is_many_to_one(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToOne { .. })
    }

    pub fn is_one_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::OneToMany { .. })
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToMany { .. })
    }

    /// Does `this_type` own the objects at the other end?
    pub fn is_composite_owner(&self) -> bool {
        self.this_aggregation == AggregationKind::Composite
    }

    /// The junction type of a many-to-many relation.
    pub fn junction_type(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::ManyToMany { this_end, .. } => Some(&this_end.other_type),
            _ => None,
        }
    }

    /// The foreign key column name this relation writes, and the type holding it.
    ///
    /// For many-to-many relations this is the junction's key pointing at `this_type`.
    pub fn foreign_key(&self) -> (&str, &str) {
        match &self.kind {
            RelationKind::ManyToOne { fk_name, .. } => (&self.this_type, fk_name),
            RelationKind::OneToMany { fk_name, .. } => (&self.other_type, fk_name),
            RelationKind::ManyToMany { this_end, .. } => this_end.foreign_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_documents() -> RelationDescription {
        RelationDescription::many_to_many(
            "Page",
            "Document",
            RelationDescription::one_to_many(
                "Page",
                "Page",
                "NMPageDocument",
                "NMPageDocument",
                "id",
                "fk_page_id",
            ),
            RelationDescription::many_to_one(
                "NMPageDocument",
                "NMPageDocument",
                "Document",
                "Document",
                "fk_document_id",
                "id",
            ),
        )
    }

    #[test]
    fn test_many_to_many_types_come_from_the_ends() {
        let rel = page_documents();
        assert_eq!(rel.this_type, "Page");
        assert_eq!(rel.other_type, "Document");
        assert_eq!(rel.junction_type(), Some("NMPageDocument"));
        assert_eq!(rel.foreign_key(), ("NMPageDocument", "fk_page_id"));
        assert!(rel.is_many_to_many());
    }

    #[test]
    fn test_foreign_key_side() {
        let chapter_book =
            RelationDescription::many_to_one("Chapter", "Chapter", "Book", "Book", "fk_book_id", "id");
        let book_chapters =
            RelationDescription::one_to_many("Book", "Book", "Chapter", "Chapter", "id", "fk_book_id")
                .this_aggregation(AggregationKind::Composite);
        assert_eq!(chapter_book.foreign_key(), ("Chapter", "fk_book_id"));
        assert_eq!(book_chapters.foreign_key(), ("Chapter", "fk_book_id"));
        assert!(book_chapters.is_composite_owner());
        assert!(!chapter_book.is_composite_owner());
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "this_type": "Chapter", "this_role": "Chapter",
            "other_type": "Book", "other_role": "Book",
            "kind": "many_to_one", "fk_name": "fk_book_id", "id_name": "id"
        }"#;
        let rel: RelationDescription = serde_json::from_str(json).unwrap();
        assert!(rel.is_many_to_one());
        assert!(rel.other_navigable);
        assert_eq!(rel.this_aggregation, AggregationKind::None);

        let nested = serde_json::to_string(&page_documents()).unwrap();
        let back: RelationDescription = serde_json::from_str(&nested).unwrap();
        assert_eq!(back, page_documents());
    }
}
