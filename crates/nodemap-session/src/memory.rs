//! In-process table store implementing [`Driver`].
//!
//! `MemoryDriver` executes the mapper's structured statements directly
//! instead of rendering SQL: selects with joins, correlated subqueries,
//! WHERE expressions, ordering and paging, plus keyed inserts, updates and
//! deletes. Transactions snapshot the whole store on `begin` and restore it
//! on `rollback`. All access goes through one mutex.

use nodemap_core::error::{DriverError, DriverErrorKind};
use nodemap_core::pattern::matches_like;
use nodemap_core::{Error, Result, Row, Schema, Value};
use nodemap_query::{BinaryOp, Dialect, Driver, Expr, JoinType, OFFSET_PARAM, Params, SelectStatement, StorageOperation};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One stored row: column name -> value.
pub type Record = BTreeMap<String, Value>;

type Tables = BTreeMap<String, Vec<Record>>;

/// Row bindings visible to an expression: table alias -> row (None when null-extended).
type Scope<'a> = Vec<(&'a str, Option<&'a Record>)>;

/// Inner state guarded by the driver's mutex.
#[derive(Debug, Default)]
struct MemoryInner {
    tables: Tables,
    /// Store and log length at `begin`, restored by `rollback`.
    snapshot: Option<(Tables, usize)>,
    /// Table -> column sets that must be unique.
    unique: BTreeMap<String, Vec<Vec<String>>>,
    /// Every write applied, in order.
    log: Vec<StorageOperation>,
    selects: u64,
}

/// A database held in memory.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    inner: Mutex<MemoryInner>,
    dialect: Dialect,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialect reported to callers that render statements for logging.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Reject inserts that duplicate `columns` of an existing row of `table`.
    #[must_use]
    pub fn unique(self, table: impl Into<String>, columns: &[&str]) -> Self {
        self.lock()
            .unique
            .entry(table.into())
            .or_default()
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Make the primary key of every type in `schema` unique.
    #[must_use]
    pub fn with_primary_keys(mut self, schema: &Schema) -> Self {
        for name in schema.type_names() {
            if let Ok(ty) = schema.type_description(name) {
                let columns: Vec<&str> = ty.pk_names.iter().map(|pk| ty.column_of(pk)).collect();
                self = self.unique(ty.table.clone(), &columns);
            }
        }
        self
    }

    /// Store a row directly, bypassing constraints and the operation log.
    pub fn insert_row<N: Into<String>>(&self, table: &str, pairs: impl IntoIterator<Item = (N, Value)>) {
        let record: Record = pairs.into_iter().map(|(n, v)| (n.into(), v)).collect();
        self.lock().tables.entry(table.to_string()).or_default().push(record);
    }

    /// Current rows of `table`, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, Vec::len)
    }

    /// Writes applied so far (rolled back writes are dropped from the log).
    pub fn operations(&self) -> Vec<StorageOperation> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Number of selects executed.
    pub fn select_count(&self) -> u64 {
        self.lock().selects
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn constraint_error(&self, op: &StorageOperation, columns: &[String]) -> Error {
        Error::Driver(DriverError {
            kind: DriverErrorKind::Constraint,
            sql: Some(op.to_sql(self.dialect)),
            message: format!("duplicate value for unique columns ({}) of '{}'", columns.join(", "), op.table()),
            source: None,
        })
    }
}

impl Driver for MemoryDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, statement: &SelectStatement, params: &Params) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        inner.selects += 1;
        let rows = Evaluator {
            tables: &inner.tables,
            params,
        }
        .select(statement, &Vec::new())?;
        tracing::trace!(table = statement.table(), rows = rows.len(), "Evaluated select");
        Ok(rows)
    }

    fn execute(&self, operation: &StorageOperation) -> Result<u64> {
        let mut inner = self.lock();
        let affected = match operation {
            StorageOperation::Insert { table, values } => {
                let record: Record = values.iter().cloned().collect();
                let existing = inner.tables.get(table.as_str()).map_or(&[][..], Vec::as_slice);
                if let Some(columns) = inner.unique.get(table.as_str()).and_then(|sets| {
                    sets.iter().find(|cols| existing.iter().any(|row| same_values(row, &record, cols)))
                }) {
                    return Err(self.constraint_error(operation, columns));
                }
                inner.tables.entry(table.clone()).or_default().push(record);
                1
            }
            StorageOperation::Update { table, values, keys } => {
                let mut affected = 0;
                for row in inner.tables.entry(table.clone()).or_default() {
                    if keys_match(row, keys) {
                        for (column, value) in values {
                            row.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                affected
            }
            StorageOperation::Delete { table, keys } => {
                let rows = inner.tables.entry(table.clone()).or_default();
                let before = rows.len();
                rows.retain(|row| !keys_match(row, keys));
                (before - rows.len()) as u64
            }
        };
        inner.log.push(operation.clone());
        tracing::trace!(kind = operation.kind(), table = operation.table(), affected, "Applied write");
        Ok(affected)
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.snapshot.is_some() {
            return Err(Error::driver(DriverErrorKind::Transaction, "Already in a transaction"));
        }
        let snapshot = (inner.tables.clone(), inner.log.len());
        inner.snapshot = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.snapshot.take().is_none() {
            return Err(Error::driver(DriverErrorKind::Transaction, "Not in a transaction"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some((tables, log_len)) = inner.snapshot.take() else {
            return Err(Error::driver(DriverErrorKind::Transaction, "Not in a transaction"));
        };
        inner.tables = tables;
        inner.log.truncate(log_len);
        Ok(())
    }
}

/// Do `a` and `b` agree on every column of `columns`? NULLs never conflict.
fn same_values(a: &Record, b: &Record, columns: &[String]) -> bool {
    columns.iter().all(|c| match (a.get(c), b.get(c)) {
        (Some(x), Some(y)) => x.sql_eq(y),
        _ => false,
    })
}

fn keys_match(row: &Record, keys: &[(String, Value)]) -> bool {
    keys.iter().all(|(column, value)| row.get(column).is_some_and(|v| v.sql_eq(value)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::BigInt(n) => *n != 0,
        Value::Double(f) => *f != 0.0,
        _ => false,
    }
}

fn unsupported(what: impl Into<String>) -> Error {
    Error::driver(DriverErrorKind::Execution, what)
}

/// Evaluates select statements against a borrowed store.
struct Evaluator<'a> {
    tables: &'a Tables,
    params: &'a Params,
}

impl<'a> Evaluator<'a> {
    fn rows_of(&self, table: &str) -> &'a [Record] {
        self.tables.get(table).map_or(&[][..], Vec::as_slice)
    }

    /// Run `statement`; `outer` holds the bindings of an enclosing query.
    fn select(&self, statement: &'a SelectStatement, outer: &Scope<'a>) -> Result<Vec<Row>> {
        let mut scopes: Vec<Scope<'a>> = self
            .rows_of(statement.table())
            .iter()
            .map(|row| vec![(statement.alias(), Some(row))])
            .collect();

        for join in statement.joins() {
            let candidates = self.rows_of(&join.table);
            let mut joined = Vec::new();
            for scope in scopes {
                let mut matched = false;
                for row in candidates {
                    let mut candidate = scope.clone();
                    candidate.push((join.alias.as_str(), Some(row)));
                    if truthy(&self.eval(&join.on, &candidate, outer)?) {
                        joined.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.join_type == JoinType::Left {
                    let mut extended = scope;
                    extended.push((join.alias.as_str(), None));
                    joined.push(extended);
                }
            }
            scopes = joined;
        }

        if let Some(condition) = statement.where_clause() {
            let mut kept = Vec::with_capacity(scopes.len());
            for scope in scopes {
                if truthy(&self.eval(condition, &scope, outer)?) {
                    kept.push(scope);
                }
            }
            scopes = kept;
        }

        if statement.columns().iter().any(|c| is_aggregate(&c.expr)) {
            return self.aggregate(statement, &scopes, outer).map(|row| vec![row]);
        }

        if !statement.order().is_empty() {
            let mut keyed = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let keys = statement
                    .order()
                    .iter()
                    .map(|term| self.eval(&term.expr, &scope, outer))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, scope));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                statement
                    .order()
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(term, (x, y))| {
                        let ord = x.sort_cmp(y);
                        if term.direction.is_desc() { ord.reverse() } else { ord }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            scopes = keyed.into_iter().map(|(_, scope)| scope).collect();
        }

        if let Some(page_size) = statement.page_size() {
            let offset = self
                .params
                .get(OFFSET_PARAM)
                .and_then(Value::as_i64)
                .map_or(0, |n| usize::try_from(n).unwrap_or(0));
            scopes = scopes.into_iter().skip(offset).take(page_size).collect();
        }

        scopes.iter().map(|scope| self.project(statement, scope, outer)).collect()
    }

    fn project(&self, statement: &'a SelectStatement, scope: &Scope<'a>, outer: &Scope<'a>) -> Result<Row> {
        if statement.columns().is_empty() {
            let (names, values): (Vec<String>, Vec<Value>) = scope
                .first()
                .and_then(|(_, row)| *row)
                .map(|row| row.iter().map(|(k, v)| (k.clone(), v.clone())).unzip())
                .unwrap_or_default();
            return Ok(Row::new(names, values));
        }
        let mut names = Vec::with_capacity(statement.columns().len());
        let mut values = Vec::with_capacity(statement.columns().len());
        for column in statement.columns() {
            names.push(column_name(column.alias.as_deref(), &column.expr));
            values.push(self.eval(&column.expr, scope, outer)?);
        }
        Ok(Row::new(names, values))
    }

    /// One row of MIN / MAX / COUNT over the filtered scopes.
    fn aggregate(&self, statement: &'a SelectStatement, scopes: &[Scope<'a>], outer: &Scope<'a>) -> Result<Row> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for column in statement.columns() {
            let Expr::Function { name, args } = &column.expr else {
                return Err(unsupported("aggregate selects project only aggregate functions"));
            };
            let arg = args.first();
            let mut seen = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let value = match arg {
                    Some(expr) => self.eval(expr, scope, outer)?,
                    None => Value::Bool(true),
                };
                if !value.is_null() {
                    seen.push(value);
                }
            }
            let value = match name.to_ascii_uppercase().as_str() {
                "MIN" => seen.into_iter().min_by(Value::sort_cmp).unwrap_or(Value::Null),
                "MAX" => seen.into_iter().max_by(Value::sort_cmp).unwrap_or(Value::Null),
                "COUNT" => Value::BigInt(seen.len() as i64),
                other => return Err(unsupported(format!("unsupported aggregate {other}"))),
            };
            names.push(column_name(column.alias.as_deref(), &column.expr));
            values.push(value);
        }
        Ok(Row::new(names, values))
    }

    fn eval(&self, expr: &'a Expr, scope: &Scope<'a>, outer: &Scope<'a>) -> Result<Value> {
        match expr {
            Expr::Column { table, name } => Ok(lookup(scope, table.as_deref(), name)
                .or_else(|| lookup(outer, table.as_deref(), name))
                .unwrap_or(Value::Null)),
            Expr::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| unsupported(format!("no value bound for parameter ':{name}'"))),
            Expr::Raw(sql) => raw_value(sql),
            Expr::Binary { left, op, right } => {
                let l = self.eval(left, scope, outer)?;
                match op {
                    BinaryOp::And => Ok(Value::Bool(truthy(&l) && truthy(&self.eval(right, scope, outer)?))),
                    BinaryOp::Or => Ok(Value::Bool(truthy(&l) || truthy(&self.eval(right, scope, outer)?))),
                    BinaryOp::Like => {
                        let r = self.eval(right, scope, outer)?;
                        if l.is_null() || r.is_null() {
                            return Ok(Value::Null);
                        }
                        Ok(Value::Bool(matches_like(&l.to_string(), &r.to_string())))
                    }
                    cmp => {
                        let r = self.eval(right, scope, outer)?;
                        let Some(ord) = l.compare(&r) else {
                            return Ok(Value::Null);
                        };
                        Ok(Value::Bool(match cmp {
                            BinaryOp::Eq => ord == Ordering::Equal,
                            BinaryOp::Ne => ord != Ordering::Equal,
                            BinaryOp::Lt => ord == Ordering::Less,
                            BinaryOp::Le => ord != Ordering::Greater,
                            BinaryOp::Gt => ord == Ordering::Greater,
                            BinaryOp::Ge => ord != Ordering::Less,
                            BinaryOp::And | BinaryOp::Or | BinaryOp::Like => false,
                        }))
                    }
                }
            }
            Expr::In { expr, values } => {
                let value = self.eval(expr, scope, outer)?;
                for candidate in values {
                    if value.sql_eq(&self.eval(candidate, scope, outer)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::IsNull { expr, negated } => {
                let value = self.eval(expr, scope, outer)?;
                Ok(Value::Bool(value.is_null() != *negated))
            }
            Expr::Function { name, .. } => Err(unsupported(format!("function {name} outside an aggregate select"))),
            Expr::Subquery(select) => {
                let mut enclosing = scope.clone();
                enclosing.extend(outer.iter().copied());
                let rows = self.select(select, &enclosing)?;
                Ok(rows.first().and_then(|row| row.get(0)).cloned().unwrap_or(Value::Null))
            }
            Expr::Paren(inner) => self.eval(inner, scope, outer),
        }
    }
}

fn is_aggregate(expr: &Expr) -> bool {
    matches!(expr, Expr::Function { name, .. }
        if matches!(name.to_ascii_uppercase().as_str(), "MIN" | "MAX" | "COUNT"))
}

fn column_name(alias: Option<&str>, expr: &Expr) -> String {
    match (alias, expr) {
        (Some(alias), _) => alias.to_string(),
        (None, Expr::Column { name, .. }) => name.clone(),
        (None, other) => other.to_sql(Dialect::default()),
    }
}

/// The value of `alias.name`, or of the first bound row carrying `name`.
///
/// `Some(Null)` for a null-extended alias, `None` when nothing binds the column.
fn lookup(scope: &Scope<'_>, alias: Option<&str>, name: &str) -> Option<Value> {
    match alias {
        Some(alias) => scope
            .iter()
            .find(|(a, _)| *a == alias)
            .map(|(_, row)| row.and_then(|r| r.get(name)).cloned().unwrap_or(Value::Null)),
        None => scope
            .iter()
            .find_map(|(_, row)| row.and_then(|r| r.get(name)).cloned()),
    }
}

/// The raw fragments the mapper emits.
fn raw_value(sql: &str) -> Result<Value> {
    let trimmed = sql.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "1 = 0" | "FALSE" => return Ok(Value::Bool(false)),
        "1 = 1" | "TRUE" => return Ok(Value::Bool(true)),
        "NULL" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Value::BigInt(n));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(Value::Double(f));
    }
    Err(unsupported(format!("raw SQL fragment '{trimmed}' is not supported in memory")))
}
