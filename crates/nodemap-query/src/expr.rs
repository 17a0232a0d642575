//! SQL expressions with named parameters.

use crate::select::SelectStatement;
use nodemap_core::error::DriverErrorKind;
use nodemap_core::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named parameter values bound to a statement.
pub type Params = BTreeMap<String, Value>;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{escaped}\"")
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{escaped}`")
            }
        }
    }

    /// Rewrite `:name` parameters into positional placeholders.
    ///
    /// Returns the rewritten SQL and the values in placeholder order. Text
    /// inside single quotes and `::` casts are left alone. A parameter with
    /// no bound value is an execution error.
    pub fn bind_named(self, sql: &str, params: &Params) -> Result<(String, Vec<Value>)> {
        let mut out = String::with_capacity(sql.len());
        let mut values = Vec::new();
        let mut chars = sql.char_indices().peekable();
        let mut in_string = false;

        while let Some((_, c)) = chars.next() {
            if in_string {
                out.push(c);
                if c == '\'' {
                    in_string = false;
                }
                continue;
            }
            match c {
                '\'' => {
                    in_string = true;
                    out.push(c);
                }
                ':' if chars.peek().is_some_and(|(_, n)| *n == ':') => {
                    out.push_str("::");
                    chars.next();
                }
                ':' if chars
                    .peek()
                    .is_some_and(|(_, n)| n.is_ascii_alphabetic() || *n == '_') =>
                {
                    let mut name = String::new();
                    while let Some((_, n)) = chars.peek() {
                        if n.is_ascii_alphanumeric() || *n == '_' {
                            name.push(*n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let value = params.get(&name).ok_or_else(|| {
                        Error::driver(
                            DriverErrorKind::Execution,
                            format!("no value bound for parameter ':{name}'"),
                        )
                    })?;
                    values.push(value.clone());
                    out.push_str(&self.placeholder(values.len()));
                }
                _ => out.push(c),
            }
        }
        Ok((out, values))
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    And,
    Or,
}

impl BinaryOp {
    /// Get the SQL representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// A SQL expression used in projections, join conditions and WHERE clauses.
///
/// Expressions never carry values: every value is a named [`Expr::Param`]
/// bound separately, so the same expression tree serves every execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table alias
    Column { table: Option<String>, name: String },
    /// Named parameter, rendered as `:name`
    Param(String),
    /// Raw SQL fragment (escape hatch)
    Raw(String),
    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// IN list
    In { expr: Box<Expr>, values: Vec<Expr> },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Function call (e.g., MIN(id))
    Function { name: String, args: Vec<Expr> },
    /// Scalar subquery
    Subquery(Box<SelectStatement>),
    /// Parenthesized expression
    Paren(Box<Expr>),
}

impl Expr {
    /// Column qualified by a table alias.
    pub fn col(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Unqualified column.
    pub fn bare(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn subquery(select: SelectStatement) -> Self {
        Expr::Subquery(Box::new(select))
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    #[must_use]
    pub fn ne(self, other: Expr) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    #[must_use]
    pub fn lt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    #[must_use]
    pub fn le(self, other: Expr) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    #[must_use]
    pub fn gt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    #[must_use]
    pub fn ge(self, other: Expr) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    #[must_use]
    pub fn like(self, pattern: Expr) -> Self {
        self.binary(BinaryOp::Like, pattern)
    }

    #[must_use]
    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    #[must_use]
    pub fn in_list(self, values: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values,
        }
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    #[must_use]
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Wrap expression in parentheses.
    #[must_use]
    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    /// Names of all parameters referenced by this expression, in render order.
    pub fn param_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_params(&mut names);
        names
    }

    pub(crate) fn collect_params<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Param(name) => names.push(name),
            Expr::Column { .. } | Expr::Raw(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_params(names);
                right.collect_params(names);
            }
            Expr::In { expr, values } => {
                expr.collect_params(names);
                for v in values {
                    v.collect_params(names);
                }
            }
            Expr::IsNull { expr, .. } | Expr::Paren(expr) => expr.collect_params(names),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_params(names);
                }
            }
            Expr::Subquery(select) => select.collect_params(names),
        }
    }

    /// Render SQL with `:name` parameters.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    dialect.quote_identifier(t),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },
            Expr::Param(name) => format!(":{name}"),
            Expr::Raw(sql) => sql.clone(),
            Expr::Binary { left, op, right } => format!(
                "{} {} {}",
                left.to_sql(dialect),
                op.as_str(),
                right.to_sql(dialect)
            ),
            Expr::In { expr, values } => {
                let values: Vec<String> = values.iter().map(|v| v.to_sql(dialect)).collect();
                format!("{} IN ({})", expr.to_sql(dialect), values.join(", "))
            }
            Expr::IsNull { expr, negated } => {
                let not_str = if *negated { " NOT" } else { "" };
                format!("{} IS{not_str} NULL", expr.to_sql(dialect))
            }
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_sql(dialect)).collect();
                format!("{name}({})", args.join(", "))
            }
            Expr::Subquery(select) => format!("({})", select.to_sql(dialect)),
            Expr::Paren(expr) => format!("({})", expr.to_sql(dialect)),
        }
    }
}
