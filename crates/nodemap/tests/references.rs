use nodemap::prelude::*;
use serde_json::json;

/// Pages referencing the first document they link to, through a junction
/// keyed by both foreign keys.
fn catalog() -> Session<MemoryDriver> {
    let schema = json!({"types": [
        {
            "name": "Page", "table": "page", "pk_names": ["id"],
            "attributes": [
                {"name": "id", "data_type": "integer"},
                {"name": "name"},
                {"name": "first_document", "kind": {"reference": {
                    "reference_type": "NMPageDocument", "reference_attribute": "fk_document_id"}}}
            ],
            "relations": [
                {"this_role": "Page", "other_type": "NMPageDocument", "other_role": "NMPageDocument",
                 "kind": "one_to_many", "id_name": "id", "fk_name": "fk_page_id"}
            ]
        },
        {
            "name": "NMPageDocument", "table": "nm_page_document",
            "pk_names": ["fk_page_id", "fk_document_id"],
            "attributes": [
                {"name": "fk_page_id", "data_type": "integer"},
                {"name": "fk_document_id", "data_type": "integer"}
            ],
            "relations": [
                {"this_role": "NMPageDocument", "other_type": "Page", "other_role": "Page",
                 "kind": "many_to_one", "fk_name": "fk_page_id", "id_name": "id"}
            ]
        }
    ]});
    let schema = nodemap::load_schema(&schema.to_string()).unwrap();
    nodemap::memory_session(schema).unwrap()
}

fn seed(session: &Session<MemoryDriver>, pages: &[i64], links: &[(i64, i64)]) {
    for id in pages {
        session
            .driver()
            .insert_row("page", [("id", Value::BigInt(*id)), ("name", Value::from(format!("Page {id}")))]);
    }
    for (page, document) in links {
        session.driver().insert_row(
            "nm_page_document",
            [("fk_page_id", Value::BigInt(*page)), ("fk_document_id", Value::BigInt(*document))],
        );
    }
}

#[test]
fn one_to_many_reference_joins_a_single_row() {
    let session = catalog();
    seed(&session, &[3, 4, 5], &[(3, 9), (3, 8), (5, 7), (5, 12)]);

    let mapper = session.mapper("Page").unwrap();
    let mut rows: Vec<(Value, Value)> = mapper
        .load_objects(session.driver(), &[], &SelectOptions::new())
        .unwrap()
        .iter()
        .map(|node| (node.value("id"), node.value("first_document")))
        .collect();
    rows.sort_by(|a, b| a.0.sort_cmp(&b.0));

    assert_eq!(
        rows,
        vec![
            (Value::BigInt(3), Value::BigInt(8)),
            (Value::BigInt(4), Value::Null),
            (Value::BigInt(5), Value::BigInt(7)),
        ]
    );
}

#[test]
fn reference_follows_the_smallest_remaining_link() {
    let session = catalog();
    seed(&session, &[3], &[(3, 9), (3, 8)]);
    let page = session.load(&ObjectId::single("Page", 3)).unwrap().unwrap();
    assert_eq!(page.value("first_document"), Value::BigInt(8));

    let link = session
        .load(&ObjectId::new("NMPageDocument", vec![Value::BigInt(3), Value::BigInt(8)]))
        .unwrap()
        .unwrap();
    session.delete(&link).unwrap();
    session.commit().unwrap();

    let reloaded = session
        .mapper("Page")
        .unwrap()
        .load_objects(session.driver(), &[], &SelectOptions::new())
        .unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].value("first_document"), Value::BigInt(9));
}
