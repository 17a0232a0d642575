//! Statement construction layer for nodemap.
//!
//! `nodemap-query` turns mapper decisions into statement shapes:
//!
//! - **Expressions**: `Expr` trees with named parameters, rendered per `Dialect`.
//! - **Selects**: `SelectStatement` shapes plus `BoundSelect` executions that
//!   carry parameter values and the paging offset.
//! - **Writes**: `StorageOperation` inserts, updates and deletes keyed by primary key.
//! - **Caching**: `StatementCache` memoizes shapes so repeated selects only rebind values.
//!
//! Statements execute through the `Driver` trait.

pub mod cache;
pub mod driver;
pub mod expr;
pub mod join;
pub mod operation;
pub mod select;

pub use cache::{DEFAULT_CAPACITY, StatementCache};
pub use driver::Driver;
pub use expr::{BinaryOp, Dialect, Expr, Params};
pub use join::{Join, JoinType};
pub use operation::{ColumnValues, StorageOperation};
pub use select::{BoundSelect, OFFSET_PARAM, OrderTerm, SelectColumn, SelectStatement};
