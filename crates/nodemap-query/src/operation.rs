//! INSERT, UPDATE and DELETE operations.

use crate::expr::{Dialect, Params};
use nodemap_core::Value;
use std::fmt;

/// Ordered `(column, value)` pairs.
pub type ColumnValues = Vec<(String, Value)>;

/// One write the transaction coordinator applies.
///
/// Update and delete are keyed by a conjunction of primary key equalities.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOperation {
    Insert {
        table: String,
        values: ColumnValues,
    },
    Update {
        table: String,
        values: ColumnValues,
        keys: ColumnValues,
    },
    Delete {
        table: String,
        keys: ColumnValues,
    },
}

impl StorageOperation {
    pub fn table(&self) -> &str {
        match self {
            StorageOperation::Insert { table, .. }
            | StorageOperation::Update { table, .. }
            | StorageOperation::Delete { table, .. } => table,
        }
    }

    /// Operation keyword, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            StorageOperation::Insert { .. } => "INSERT",
            StorageOperation::Update { .. } => "UPDATE",
            StorageOperation::Delete { .. } => "DELETE",
        }
    }

    /// Render SQL with `:v_<column>` and `:k_<column>` parameters.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            StorageOperation::Insert { table, values } => {
                let columns: Vec<String> =
                    values.iter().map(|(c, _)| dialect.quote_identifier(c)).collect();
                let params: Vec<String> = values.iter().map(|(c, _)| format!(":v_{c}")).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    dialect.quote_identifier(table),
                    columns.join(", "),
                    params.join(", ")
                )
            }
            StorageOperation::Update {
                table,
                values,
                keys,
            } => {
                let sets: Vec<String> = values
                    .iter()
                    .map(|(c, _)| format!("{} = :v_{c}", dialect.quote_identifier(c)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    dialect.quote_identifier(table),
                    sets.join(", "),
                    key_conditions(dialect, keys)
                )
            }
            StorageOperation::Delete { table, keys } => format!(
                "DELETE FROM {} WHERE {}",
                dialect.quote_identifier(table),
                key_conditions(dialect, keys)
            ),
        }
    }

    /// Parameter values for [`to_sql`](Self::to_sql).
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        let (values, keys): (&[(String, Value)], &[(String, Value)]) = match self {
            StorageOperation::Insert { values, .. } => (values, &[]),
            StorageOperation::Update { values, keys, .. } => (values, keys),
            StorageOperation::Delete { keys, .. } => (&[], keys),
        };
        for (c, v) in values {
            params.insert(format!("v_{c}"), v.clone());
        }
        for (c, v) in keys {
            params.insert(format!("k_{c}"), v.clone());
        }
        params
    }
}

fn key_conditions(dialect: Dialect, keys: &[(String, Value)]) -> String {
    keys.iter()
        .map(|(c, _)| format!("{} = :k_{c}", dialect.quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql(Dialect::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql() {
        let op = StorageOperation::Insert {
            table: "chapter".into(),
            values: vec![
                ("id".into(), Value::BigInt(1)),
                ("fk_book_id".into(), Value::BigInt(7)),
            ],
        };
        assert_eq!(
            op.to_sql(Dialect::Sqlite),
            "INSERT INTO \"chapter\" (\"id\", \"fk_book_id\") VALUES (:v_id, :v_fk_book_id)"
        );
        assert_eq!(op.params().get("v_fk_book_id"), Some(&Value::BigInt(7)));
        assert_eq!(op.kind(), "INSERT");
    }

    #[test]
    fn test_update_and_delete_are_keyed() {
        let keys = vec![("id".to_string(), Value::BigInt(1))];
        let update = StorageOperation::Update {
            table: "chapter".into(),
            values: vec![("fk_book_id".into(), Value::Null)],
            keys: keys.clone(),
        };
        assert_eq!(
            update.to_sql(Dialect::Postgres),
            "UPDATE \"chapter\" SET \"fk_book_id\" = :v_fk_book_id WHERE \"id\" = :k_id"
        );
        let delete = StorageOperation::Delete {
            table: "nm_page_document".into(),
            keys: vec![
                ("fk_page_id".into(), Value::BigInt(3)),
                ("fk_document_id".into(), Value::BigInt(9)),
            ],
        };
        assert_eq!(
            delete.to_sql(Dialect::Mysql),
            "DELETE FROM `nm_page_document` WHERE `fk_page_id` = :k_fk_page_id AND `fk_document_id` = :k_fk_document_id"
        );
        assert_eq!(delete.params().len(), 2);
        assert_eq!(update.params().get("k_id"), Some(&Value::BigInt(1)));
    }
}
