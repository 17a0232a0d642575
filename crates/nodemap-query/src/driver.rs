//! The database driver interface the mapper's statements are executed through.

use crate::expr::{Dialect, Params};
use crate::operation::StorageOperation;
use crate::select::{BoundSelect, SelectStatement};
use nodemap_core::{Result, Row};

/// A synchronous database driver.
///
/// Drivers receive structured statements; a SQL backend renders them with
/// [`SelectStatement::to_sql`] / [`StorageOperation::to_sql`] and binds the
/// named parameters through [`Dialect::bind_named`]. Every call is one
/// blocking round trip. Failures are returned as `Error::Driver` and are
/// never retried or compensated by the callers in this workspace.
pub trait Driver: Send + Sync {
    /// SQL dialect used to render statements.
    fn dialect(&self) -> Dialect;

    /// Execute a select and return its rows.
    fn query(&self, statement: &SelectStatement, params: &Params) -> Result<Vec<Row>>;

    /// Execute a write and return the number of affected rows.
    fn execute(&self, operation: &StorageOperation) -> Result<u64>;

    /// Start a transaction spanning the following calls.
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Execute a bound select, including its paging offset.
    fn select(&self, bound: &BoundSelect) -> Result<Vec<Row>> {
        tracing::trace!(sql = %bound.to_sql(self.dialect()), "Executing select");
        self.query(bound.statement(), &bound.all_params())
    }
}
