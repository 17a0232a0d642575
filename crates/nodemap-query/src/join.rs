//! JOIN clause types.

use crate::expr::{Dialect, Expr};

/// Types of SQL joins the mapper emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    /// Real table name
    pub table: String,
    /// Alias the rest of the statement refers to
    pub alias: String,
    /// ON condition
    pub on: Expr,
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, alias: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.into(),
            alias: alias.into(),
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, alias: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table: table.into(),
            alias: alias.into(),
            on,
        }
    }

    /// Generate SQL for this JOIN clause.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let table = dialect.quote_identifier(&self.table);
        if self.alias == self.table {
            format!(" {} {table} ON {}", self.join_type.as_str(), self.on.to_sql(dialect))
        } else {
            format!(
                " {} {table} AS {} ON {}",
                self.join_type.as_str(),
                dialect.quote_identifier(&self.alias),
                self.on.to_sql(dialect)
            )
        }
    }
}
