//! nodemap - a relational object mapper for typed, identity-bearing content nodes.
//!
//! nodemap translates a graph of domain objects ("nodes") into rows across
//! relational tables and back:
//!
//! - Type, attribute and relation metadata loaded from JSON
//! - Select, insert, update and delete statements driven by that metadata
//! - Many-to-one, one-to-many and many-to-many (junction type) relations
//! - Explicit ordering through fractional sort keys
//! - Reference attributes joined in from related tables
//! - A statement cache so repeated selects only rebind values
//!
//! # Quick Start
//!
//! ```ignore
//! use nodemap::prelude::*;
//!
//! let schema = nodemap::load_schema(include_str!("library.json"))?;
//! let session = nodemap::memory_session(schema)?;
//!
//! let book = session.create("Book")?;
//! book.set_value("title", "The Rust Programming Language");
//! let chapter = session.create("Chapter")?;
//! chapter.set_value("name", "Ownership");
//! book.write().add_node("Chapter", &chapter);
//! session.commit()?;
//!
//! let chapters = session.load_related(&book, "Chapter")?;
//! ```
//!
//! # Crates
//!
//! - `nodemap-core`: values, identities, metadata, nodes and errors
//! - `nodemap-query`: statement shapes, the statement cache and the `Driver` trait
//! - `nodemap-mapper`: the per-type `RdbMapper`
//! - `nodemap-session`: the `Session` unit of work and the in-memory driver

use std::sync::Arc;

pub use nodemap_core::{
    AddedEdge,
    AggregationKind,
    // Metadata
    AttributeDescription,
    AttributeKind,
    ColumnInfo,
    Combinator,
    // Errors
    ConfigError,
    ConfigErrorKind,
    // Queries
    Criteria,
    DataType,
    DeletedEdge,
    DriverError,
    DriverErrorKind,
    Error,
    // Identity
    IdGenerator,
    IdentityError,
    IdentityErrorKind,
    // Runtime objects
    Node,
    NodeOrder,
    NodeRef,
    NodeState,
    ObjectId,
    ObjectProxy,
    Operand,
    Operator,
    OrderBy,
    PagingInfo,
    RelationDescription,
    RelationKind,
    Result,
    Row,
    Schema,
    SequenceIdGenerator,
    SortDirection,
    SortKeyDefinition,
    TypeDescription,
    TypeError,
    // Values
    Value,
};
pub use nodemap_mapper::{PersistenceFacade, RdbMapper, Relative, SelectOptions};
pub use nodemap_query::{
    BoundSelect, DEFAULT_CAPACITY, Dialect, Driver, Expr, SelectStatement, StatementCache,
    StorageOperation,
};
pub use nodemap_session::{FlushOrderer, FlushPlan, FlushResult, MemoryDriver, Session, SessionBuilder};

/// Load and validate a schema from its JSON document form.
pub fn load_schema(json: &str) -> Result<Arc<Schema>> {
    Schema::from_json(json).map(Arc::new)
}

/// A session over a fresh [`MemoryDriver`] enforcing every type's primary key.
pub fn memory_session(schema: Arc<Schema>) -> Result<Session<MemoryDriver>> {
    let driver = MemoryDriver::new().with_primary_keys(&schema);
    tracing::debug!(types = schema.type_names().count(), "Opening in-memory session");
    SessionBuilder::new(schema).build(driver)
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use nodemap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Metadata
        AttributeDescription,
        Criteria,
        DataType,
        Driver,
        Error,
        MemoryDriver,
        NodeOrder,
        NodeRef,
        NodeState,
        ObjectId,
        OrderBy,
        PagingInfo,
        // Session
        PersistenceFacade,
        RelationDescription,
        Result,
        Schema,
        SelectOptions,
        Session,
        SessionBuilder,
        SortDirection,
        TypeDescription,
        Value,
    };
}
