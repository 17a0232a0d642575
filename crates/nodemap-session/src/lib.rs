//! Session and unit of work for nodemap.
//!
//! `nodemap-session` is the layer that owns object identity and the running
//! transaction. It implements the [`PersistenceFacade`] the mappers call back
//! into and turns a commit into one ordered batch of driver calls.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one in-memory node per object identity.
//! - **Transaction**: nodes created or deleted since the last commit.
//! - **Flush ordering**: inserts parents-first, deletes children-first.
//! - **MemoryDriver**: an in-process table store executing the mapper's statements.
//!
//! # Example
//!
//! ```ignore
//! let session = SessionBuilder::new(schema).build(MemoryDriver::new());
//!
//! let book = session.create("Book")?;
//! let chapter = session.create("Chapter")?;
//! book.write().add_node("Chapter", &chapter);
//!
//! session.commit()?;
//! ```
//!
//! [`PersistenceFacade`]: nodemap_mapper::PersistenceFacade

pub mod flush;
pub mod identity_map;
pub mod memory;
pub mod session;
pub mod transaction;

pub use flush::{FlushOrderer, FlushPlan, FlushResult};
pub use identity_map::IdentityMap;
pub use memory::MemoryDriver;
pub use session::{Session, SessionBuilder};
pub use transaction::Transaction;
