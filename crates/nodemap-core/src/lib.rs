//! Core types and metadata for nodemap.
//!
//! This crate provides the foundations the mapper is built on:
//!
//! - `Value`, `DataType` and `Row` for dynamically typed column data
//! - `ObjectId` composite identities with their canonical string form
//! - `AttributeDescription`, `RelationDescription`, `TypeDescription` and the `Schema` registry
//! - `Criteria`, `OrderBy` and `PagingInfo` for read queries
//! - `Node`, `NodeRef` and `ObjectProxy` runtime instances

pub mod attribute;
pub mod criteria;
pub mod error;
pub mod ids;
pub mod node;
pub mod oid;
pub mod pattern;
pub mod proxy;
pub mod relation;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use attribute::{AttributeDescription, AttributeKind};
pub use criteria::{Combinator, Criteria, Operand, Operator, OrderBy, PagingInfo, SortDirection};
pub use error::{
    ConfigError, ConfigErrorKind, DriverError, DriverErrorKind, Error, IdentityError,
    IdentityErrorKind, Result, TypeError,
};
pub use ids::{IdGenerator, SequenceIdGenerator};
pub use node::{AddedEdge, DeletedEdge, Node, NodeOrder, NodeRef, NodeState};
pub use oid::ObjectId;
pub use proxy::ObjectProxy;
pub use relation::{AggregationKind, RelationDescription, RelationKind};
pub use row::{ColumnInfo, Row};
pub use schema::{Schema, SortKeyDefinition, TypeDescription};
pub use types::DataType;
pub use value::Value;
