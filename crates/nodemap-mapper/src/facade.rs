//! The persistence facade the mapper calls back into.

use nodemap_core::{Criteria, NodeRef, ObjectId, Result};

/// Object-level services the mapper needs while preparing a node.
///
/// Relation maintenance has to load related objects, look up junction
/// objects, create new ones and delete stale ones. Those operations belong to
/// whoever owns object identity and the running transaction, so the mapper
/// receives them through this trait instead of talking to the driver.
///
/// Implementations are re-entered while the mapper works on a node; the
/// mapper never holds a node lock across a call.
pub trait PersistenceFacade {
    /// Create a new, unsaved object of `type_name` inside the running transaction.
    fn create(&self, type_name: &str) -> Result<NodeRef>;

    /// Load one object by identity.
    fn load(&self, oid: &ObjectId) -> Result<Option<NodeRef>>;

    /// Load all objects of `type_name` matching `criteria`.
    ///
    /// With `also_in_transaction`, objects created or changed in the running
    /// transaction are matched against their in-memory values as well, so
    /// rows that are not written yet are found too.
    fn load_objects(
        &self,
        type_name: &str,
        criteria: &[Criteria],
        also_in_transaction: bool,
    ) -> Result<Vec<NodeRef>>;

    /// Schedule an object for deletion.
    fn delete(&self, node: &NodeRef) -> Result<()>;
}
