//! SELECT statement shapes and their bound executions.

use crate::expr::{Dialect, Expr, Params};
use crate::join::Join;
use nodemap_core::{SortDirection, Value};
use std::sync::Arc;

/// Name of the parameter the paging offset is bound to.
pub const OFFSET_PARAM: &str = "offset";

/// One projected column: `expr AS alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: Expr,
    /// Result column name; `None` renders the bare expression.
    pub alias: Option<String>,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// The shape of a SELECT: everything except parameter values and the offset.
///
/// Shapes are immutable once built and shared through the statement cache,
/// so one shape serves every execution with the same structure.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    id: String,
    table: String,
    alias: String,
    columns: Vec<SelectColumn>,
    joins: Vec<Join>,
    where_clause: Option<Expr>,
    order: Vec<OrderTerm>,
    page_size: Option<usize>,
}

impl SelectStatement {
    /// Start a statement over `table`, referred to as `alias`.
    pub fn new(id: impl Into<String>, table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table: table.into(),
            alias: alias.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            order: Vec::new(),
            page_size: None,
        }
    }

    /// Add a projected column.
    #[must_use]
    pub fn column(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.columns.push(SelectColumn {
            expr,
            alias: Some(alias.into()),
        });
        self
    }

    /// Add a projected expression without alias.
    #[must_use]
    pub fn expr(mut self, expr: Expr) -> Self {
        self.columns.push(SelectColumn { expr, alias: None });
        self
    }

    /// Add a join unless one with the same alias is already present.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        if !self.has_join(&join.alias) {
            self.joins.push(join);
        }
        self
    }

    /// AND a condition onto the WHERE clause.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, expr: Expr, direction: SortDirection) -> Self {
        self.order.push(OrderTerm { expr, direction });
        self
    }

    /// Limit the result to `page_size` rows starting at the bound offset.
    #[must_use]
    pub fn limit(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    /// The cache key this shape was built for.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn where_clause(&self) -> Option<&Expr> {
        self.where_clause.as_ref()
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Names of the parameters the statement needs, in render order.
    pub fn param_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_params(&mut names);
        names
    }

    pub(crate) fn collect_params<'a>(&'a self, names: &mut Vec<&'a str>) {
        for c in &self.columns {
            c.expr.collect_params(names);
        }
        for j in &self.joins {
            j.on.collect_params(names);
        }
        if let Some(w) = &self.where_clause {
            w.collect_params(names);
        }
        for o in &self.order {
            o.expr.collect_params(names);
        }
        if self.page_size.is_some() {
            names.push(OFFSET_PARAM);
        }
    }

    /// Render the SQL text with `:name` parameters.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| match &c.alias {
                    Some(alias) => {
                        format!("{} AS {}", c.expr.to_sql(dialect), dialect.quote_identifier(alias))
                    }
                    None => c.expr.to_sql(dialect),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {}", dialect.quote_identifier(&self.table));
        if self.alias != self.table {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(&self.alias));
        }
        for join in &self.joins {
            sql.push_str(&join.to_sql(dialect));
        }
        if let Some(w) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&w.to_sql(dialect));
        }
        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{} {}", o.expr.to_sql(dialect), o.direction.as_str()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(n) = self.page_size {
            sql.push_str(&format!(" LIMIT {n} OFFSET :{OFFSET_PARAM}"));
        }
        sql
    }
}

/// A statement shape together with the values of one execution.
#[derive(Debug, Clone)]
pub struct BoundSelect {
    statement: Arc<SelectStatement>,
    params: Params,
    offset: usize,
    cached: bool,
}

impl BoundSelect {
    pub fn new(statement: Arc<SelectStatement>, params: Params, offset: usize, cached: bool) -> Self {
        Self {
            statement,
            params,
            offset,
            cached,
        }
    }

    /// Was the shape reused from the statement cache rather than freshly built?
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn statement(&self) -> &Arc<SelectStatement> {
        &self.statement
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Parameter values excluding the offset.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Bind (or rebind) a parameter value.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    /// Rebind the paging offset.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// All parameter values including the offset of paged statements.
    pub fn all_params(&self) -> Params {
        let mut params = self.params.clone();
        if self.statement.page_size().is_some() {
            params.insert(
                OFFSET_PARAM.to_string(),
                Value::BigInt(i64::try_from(self.offset).unwrap_or(i64::MAX)),
            );
        }
        params
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.statement.to_sql(dialect)
    }
}
