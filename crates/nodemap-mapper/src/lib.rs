//! Relational mapping for nodemap.
//!
//! An [`RdbMapper`] maps one entity type onto its table:
//!
//! - **Read path**: `get_select_sql` / `get_relation_select_sql` build cached
//!   statement shapes with reference joins; `load_objects` / `load_relatives`
//!   turn the rows back into nodes.
//! - **Write path**: `prepare_for_storage` assigns primary keys, seeds sort
//!   keys, maintains foreign keys and junction objects and rebalances sort
//!   keys; `get_storage_operations` emits the inserts, updates and deletes.
//!
//! The mapper never begins or commits transactions. Objects it needs beyond
//! the node at hand come from the [`PersistenceFacade`].

pub mod facade;
pub mod load;
pub mod mapper;
pub mod relations;
pub mod select;
pub mod sortkey;
pub mod storage;

pub use facade::PersistenceFacade;
pub use load::Relative;
pub use mapper::{RELATION_ID_COLUMN, RELATION_ORIGIN_COLUMN, RdbMapper, relation_id_column};
pub use relations::seed_value;
pub use select::SelectOptions;
