mod common;

use common::{FIRST_NEW_ID, library_json, seed_book, seed_page, session, writes};
use nodemap::prelude::*;
use nodemap::{ConfigErrorKind, DriverErrorKind, IdentityErrorKind};
use serde_json::json;

#[test]
fn driver_failure_rolls_back_the_whole_commit() {
    let session = session();
    // Occupies the key the new chapter will get
    session
        .driver()
        .insert_row("chapter", [("id", Value::BigInt(FIRST_NEW_ID))]);
    let book = session.create("Book").unwrap();
    book.set_value("title", "Rust");
    let chapter = session.create("Chapter").unwrap();
    book.write().add_node("Chapter", &chapter);

    let err = session.commit().unwrap_err();
    let Error::Driver(driver_error) = &err else {
        panic!("expected a driver error, got {err}");
    };
    assert_eq!(driver_error.kind, DriverErrorKind::Constraint);
    assert!(err.sql().is_some_and(|sql| sql.starts_with("INSERT INTO")));

    assert_eq!(session.driver().row_count("book"), 0);
    assert_eq!(session.driver().row_count("chapter"), 1);
    assert!(writes(&session).is_empty());
    assert!(!session.driver().in_transaction());
    assert_eq!(book.state(), NodeState::New);
    assert_eq!(session.pending_count(), 2);

    session.rollback();
    assert_eq!(session.pending_count(), 0);
    assert!(!session.contains(&book));
}

#[test]
fn unknown_role_is_a_config_error() {
    let session = session();
    let book = seed_book(&session, 1, "Rust");
    let chapter = session.create("Chapter").unwrap();
    book.write().add_node("Shelf", &chapter);

    let err = session.commit().unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRole));
    assert!(err.is_config_error());
    assert!(writes(&session).is_empty());

    let err = session.load_related(&book, "Shelf").unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRole));
}

#[test]
fn related_object_of_wrong_type_is_rejected() {
    let session = session();
    let book = seed_book(&session, 1, "Rust");
    let page = seed_page(&session, 3, "Home");
    book.write().add_node("Chapter", &page);

    let err = session.commit().unwrap_err();
    assert_eq!(err.identity_kind(), Some(IdentityErrorKind::TypeMismatch));
}

#[test]
fn unknown_type_and_malformed_identities() {
    let session = session();
    let err = session.create("Shelf").unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownType));

    let err = session
        .load(&ObjectId::new("NMPageDocument", vec![Value::BigInt(3)]))
        .unwrap_err();
    assert_eq!(err.identity_kind(), Some(IdentityErrorKind::KeyCount));

    let err = session.schema().parse_oid("Shelf:1").unwrap_err();
    assert_eq!(err.identity_kind(), Some(IdentityErrorKind::TypeMismatch));
    let oid = session.schema().parse_oid("NMPageDocument:3:9").unwrap();
    assert_eq!(oid.ids(), &[Value::BigInt(3), Value::BigInt(9)]);
}

#[test]
fn ambiguous_reference_needs_a_role() {
    let person = json!({
        "name": "Person", "table": "person", "pk_names": ["id"],
        "attributes": [{"name": "id", "data_type": "integer"}, {"name": "name"}]
    });
    let article = |role: Option<&str>| {
        let mut reference = json!({"reference_type": "Person", "reference_attribute": "name"});
        if let Some(role) = role {
            reference["role"] = json!(role);
        }
        json!({
            "name": "Article", "table": "article", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "fk_author_id", "data_type": "integer"},
                {"name": "fk_editor_id", "data_type": "integer"},
                {"name": "author_name", "kind": {"reference": reference}}
            ],
            "relations": [
                {"this_role": "Article", "other_type": "Person", "other_role": "Author",
                 "kind": "many_to_one", "fk_name": "fk_author_id", "id_name": "id"},
                {"this_role": "EditedArticle", "other_type": "Person", "other_role": "Editor",
                 "kind": "many_to_one", "fk_name": "fk_editor_id", "id_name": "id"}
            ]
        })
    };

    let ambiguous = json!({"types": [person.clone(), article(None)]});
    let err = nodemap::load_schema(&ambiguous.to_string()).unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::AmbiguousReference));

    let resolved = json!({"types": [person, article(Some("Author"))]});
    assert!(nodemap::load_schema(&resolved.to_string()).is_ok());
}

#[test]
fn invalid_schema_documents() {
    let mut broken = library_json();
    broken["types"][1]["sort_keys"] = json!([{"role": "Book", "sort_field": "name"}]);
    let err = nodemap::load_schema(&broken.to_string()).unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidSchema));

    let err = nodemap::load_schema("{\"types\": [").unwrap_err();
    assert!(matches!(err, Error::Serde(_)));
}
