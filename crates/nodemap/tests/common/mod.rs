//! Shared fixture: a small library schema over the in-memory driver.
#![allow(dead_code)]

use nodemap::prelude::*;
use nodemap::{SequenceIdGenerator, StorageOperation};
use serde_json::json;
use std::sync::Arc;

/// First key issued to new objects; seeded rows stay below it.
pub const FIRST_NEW_ID: i64 = 100;

pub fn library_json() -> serde_json::Value {
    json!({"types": [
        {
            "name": "Book", "table": "book", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "title"},
                {"name": "pages", "data_type": "integer"}
            ],
            "relations": [
                {"this_role": "Book", "other_type": "Chapter", "other_role": "Chapter",
                 "this_aggregation": "composite",
                 "kind": "one_to_many", "id_name": "id", "fk_name": "fk_book_id"}
            ]
        },
        {
            "name": "Chapter", "table": "chapter", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "name", "column": "c_name"},
                {"name": "fk_book_id", "data_type": "integer"},
                {"name": "sortkey_book", "data_type": "float"},
                {"name": "book_title",
                 "kind": {"reference": {"reference_type": "Book", "reference_attribute": "title"}}},
                {"name": "draft", "data_type": "boolean", "kind": "transient"}
            ],
            "relations": [
                {"this_role": "Chapter", "other_type": "Book", "other_role": "Book",
                 "kind": "many_to_one", "fk_name": "fk_book_id", "id_name": "id"}
            ],
            "sort_keys": [{"role": "Book", "sort_field": "sortkey_book"}]
        },
        {
            "name": "Page", "table": "page", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "name"}
            ],
            "relations": [
                {"this_role": "Page", "other_type": "Document", "other_role": "Document",
                 "kind": "many_to_many",
                 "this_end": {"this_type": "Page", "this_role": "Page",
                              "other_type": "NMPageDocument", "other_role": "NMPageDocument",
                              "kind": "one_to_many", "id_name": "id", "fk_name": "fk_page_id"},
                 "other_end": {"this_type": "NMPageDocument", "this_role": "NMPageDocument",
                               "other_type": "Document", "other_role": "Document",
                               "kind": "many_to_one", "fk_name": "fk_document_id", "id_name": "id"}}
            ]
        },
        {
            "name": "Document", "table": "document", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "title"}
            ],
            "relations": [
                {"this_role": "Document", "other_type": "Page", "other_role": "Page",
                 "kind": "many_to_many",
                 "this_end": {"this_type": "Document", "this_role": "Document",
                              "other_type": "NMPageDocument", "other_role": "NMPageDocument",
                              "kind": "one_to_many", "id_name": "id", "fk_name": "fk_document_id"},
                 "other_end": {"this_type": "NMPageDocument", "this_role": "NMPageDocument",
                               "other_type": "Page", "other_role": "Page",
                               "kind": "many_to_one", "fk_name": "fk_page_id", "id_name": "id"}}
            ]
        },
        {
            "name": "NMPageDocument", "table": "nm_page_document",
            "pk_names": ["fk_page_id", "fk_document_id"],
            "attributes": [
                {"name": "fk_page_id", "data_type": "integer"},
                {"name": "fk_document_id", "data_type": "integer"},
                {"name": "sortkey_page", "data_type": "float"}
            ],
            "relations": [
                {"this_role": "NMPageDocument", "other_type": "Page", "other_role": "Page",
                 "kind": "many_to_one", "fk_name": "fk_page_id", "id_name": "id"},
                {"this_role": "NMPageDocument", "other_type": "Document", "other_role": "Document",
                 "kind": "many_to_one", "fk_name": "fk_document_id", "id_name": "id"}
            ],
            "sort_keys": [{"role": "Page", "sort_field": "sortkey_page"}]
        }
    ]})
}

pub fn library() -> Arc<Schema> {
    nodemap::load_schema(&library_json().to_string()).unwrap()
}

fn ids() -> SequenceIdGenerator {
    ["Book", "Chapter", "Page", "Document"]
        .into_iter()
        .fold(SequenceIdGenerator::new(), |ids, ty| ids.starting_at(ty, FIRST_NEW_ID))
}

pub fn builder() -> SessionBuilder {
    SessionBuilder::new(library()).id_generator(Arc::new(ids()))
}

pub fn session() -> Session<MemoryDriver> {
    let schema = library();
    builder().build(MemoryDriver::new().with_primary_keys(&schema)).unwrap()
}

pub fn seed_book(session: &Session<MemoryDriver>, id: i64, title: &str) -> NodeRef {
    session.driver().insert_row(
        "book",
        [("id", Value::BigInt(id)), ("title", Value::from(title)), ("pages", Value::Null)],
    );
    load(session, "Book", id)
}

/// Store chapters of `book_id` with the given names and sort keys, ids counting from 1.
pub fn seed_chapters(session: &Session<MemoryDriver>, book_id: i64, chapters: &[(&str, f64)]) {
    for (i, (name, key)) in chapters.iter().enumerate() {
        session.driver().insert_row(
            "chapter",
            [
                ("id", Value::BigInt(i as i64 + 1)),
                ("c_name", Value::from(*name)),
                ("fk_book_id", Value::BigInt(book_id)),
                ("sortkey_book", Value::Double(*key)),
            ],
        );
    }
}

pub fn seed_page(session: &Session<MemoryDriver>, id: i64, name: &str) -> NodeRef {
    session
        .driver()
        .insert_row("page", [("id", Value::BigInt(id)), ("name", Value::from(name))]);
    load(session, "Page", id)
}

pub fn seed_document(session: &Session<MemoryDriver>, id: i64, title: &str) -> NodeRef {
    session
        .driver()
        .insert_row("document", [("id", Value::BigInt(id)), ("title", Value::from(title))]);
    load(session, "Document", id)
}

pub fn seed_junction(session: &Session<MemoryDriver>, page_id: i64, document_id: i64, key: f64) {
    session.driver().insert_row(
        "nm_page_document",
        [
            ("fk_page_id", Value::BigInt(page_id)),
            ("fk_document_id", Value::BigInt(document_id)),
            ("sortkey_page", Value::Double(key)),
        ],
    );
}

pub fn load(session: &Session<MemoryDriver>, type_name: &str, id: i64) -> NodeRef {
    session
        .load(&ObjectId::single(type_name, id))
        .unwrap()
        .unwrap_or_else(|| panic!("{type_name}:{id} not found"))
}

pub fn names(nodes: &[NodeRef]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| n.value("name").as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn sort_keys(nodes: &[NodeRef], field: &str) -> Vec<f64> {
    nodes.iter().map(|n| n.value(field).as_f64().unwrap()).collect()
}

/// Storage operations applied so far, as `(kind, table)` pairs.
pub fn writes(session: &Session<MemoryDriver>) -> Vec<(&'static str, String)> {
    session
        .driver()
        .operations()
        .iter()
        .map(|op: &StorageOperation| (op.kind(), op.table().to_string()))
        .collect()
}
