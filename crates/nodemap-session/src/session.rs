//! The session: identity, in-flight state and commit.

use crate::flush::{FlushOrderer, FlushPlan, FlushResult};
use crate::identity_map::IdentityMap;
use crate::transaction::Transaction;
use nodemap_core::error::ConfigErrorKind;
use nodemap_core::{
    Criteria, Error, IdGenerator, NodeRef, NodeState, ObjectId, ObjectProxy, RelationKind, Result,
    Schema, SequenceIdGenerator,
};
use nodemap_mapper::{PersistenceFacade, RdbMapper, SelectOptions};
use nodemap_query::{DEFAULT_CAPACITY, Driver, StatementCache};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Runtime knobs of a [`Session`].
pub struct SessionBuilder {
    schema: Arc<Schema>,
    cache: Option<Arc<StatementCache>>,
    cache_capacity: usize,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SessionBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            cache: None,
            cache_capacity: DEFAULT_CAPACITY,
            ids: None,
        }
    }

    /// Maximum number of statement shapes kept by the session's cache.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Share an existing statement cache instead of creating one.
    #[must_use]
    pub fn statement_cache(mut self, cache: Arc<StatementCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build every statement afresh.
    #[must_use]
    pub fn without_statement_cache(self) -> Self {
        self.statement_cache(Arc::new(StatementCache::disabled()))
    }

    /// Primary key source; per-type sequences starting at 1 by default.
    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Create the session, with one mapper per schema type.
    pub fn build<D: Driver>(self, driver: D) -> Result<Session<D>> {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(StatementCache::new(self.cache_capacity)));
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(SequenceIdGenerator::new()),
        };
        let mut mappers = HashMap::new();
        for name in self.schema.type_names() {
            let mapper = RdbMapper::new(Arc::clone(&self.schema), name, Arc::clone(&cache), Arc::clone(&ids))?;
            mappers.insert(name.to_string(), mapper);
        }
        let orderer = FlushOrderer::from_schema(&self.schema)?;
        tracing::debug!(types = mappers.len(), cache_capacity = cache.capacity(), "Session created");
        Ok(Session {
            schema: self.schema,
            driver,
            cache,
            mappers,
            orderer,
            identity_map: RwLock::new(IdentityMap::new()),
            transaction: RwLock::new(Transaction::new()),
        })
    }
}

/// The unit of work over one driver.
///
/// Loaded objects live in the identity map, created and deleted objects in
/// the transaction until [`Session::commit`] writes everything in one
/// database transaction. The session is the [`PersistenceFacade`] its
/// mappers call back into while preparing nodes.
///
/// Internal locks are never held while mapper code runs, so the mappers can
/// re-enter the session freely.
pub struct Session<D: Driver> {
    schema: Arc<Schema>,
    driver: D,
    cache: Arc<StatementCache>,
    mappers: HashMap<String, RdbMapper>,
    orderer: FlushOrderer,
    identity_map: RwLock<IdentityMap>,
    transaction: RwLock<Transaction>,
}

impl<D: Driver> Session<D> {
    /// A session with default settings.
    pub fn new(schema: Arc<Schema>, driver: D) -> Result<Self> {
        SessionBuilder::new(schema).build(driver)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The statement cache shared by all mappers of this session.
    pub fn cache(&self) -> &Arc<StatementCache> {
        &self.cache
    }

    /// The mapper of `type_name`.
    pub fn mapper(&self, type_name: &str) -> Result<&RdbMapper> {
        self.mappers
            .get(type_name)
            .ok_or_else(|| Error::config(ConfigErrorKind::UnknownType, format!("unknown type '{type_name}'")))
    }

    /// Load objects with explicit select options (order, paging, projection).
    ///
    /// Objects already known to the session are returned as they are in memory.
    pub fn query(&self, type_name: &str, criteria: &[Criteria], options: &SelectOptions) -> Result<Vec<NodeRef>> {
        self.fetch(type_name, criteria, options, false)
    }

    /// Load the objects related to `node` under `role`, in relation order.
    #[tracing::instrument(level = "debug", skip(self, node))]
    pub fn load_related(&self, node: &NodeRef, role: &str) -> Result<Vec<NodeRef>> {
        let (proxy, type_name) = {
            let n = node.read();
            (ObjectProxy::from_node(&n), n.type_name().to_string())
        };
        let relation = self.schema.relation(&type_name, role)?;
        let mapper = self.mapper(&relation.other_type)?;
        let related =
            mapper.load_relatives(&self.driver, &[proxy], &relation.this_role, &[], &SelectOptions::new())?;
        let nodes: Vec<NodeRef> = {
            let mut map = self.identity_write();
            related.into_iter().map(|r| map.get_or_insert(r.node)).collect()
        };
        Ok(nodes.into_iter().filter(|n| !n.read().is_deleted()).collect())
    }

    /// Is `node` known to this session?
    pub fn contains(&self, node: &NodeRef) -> bool {
        self.transaction_read().contains(node) || self.identity_read().nodes().any(|n| n.ptr_eq(node))
    }

    /// Number of objects with unsaved changes.
    pub fn pending_count(&self) -> usize {
        self.pending_nodes().len()
    }

    /// Persist every pending change in one database transaction.
    ///
    /// New objects get their primary keys, relation edits and re-order
    /// instructions are applied, and the resulting storage operations are
    /// written inserts first, then updates, then deletes. A driver failure
    /// rolls the database transaction back and is returned unchanged; the
    /// in-memory state is left pending in that case.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<FlushResult> {
        let touched = self.prepare_pending()?;

        let mut operations = Vec::new();
        for node in &touched {
            let n = node.read();
            operations.extend(self.mapper(n.type_name())?.get_storage_operations(&n)?);
        }
        let plan = self.orderer.order(operations);
        let result = if plan.is_empty() {
            FlushResult::new()
        } else {
            self.flush(&plan)?
        };

        self.finish(&touched);
        tracing::debug!(
            objects = touched.len(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Commit complete"
        );
        Ok(result)
    }

    /// Discard in-flight state: created objects, pending deletions and
    /// unsaved changes of loaded objects.
    ///
    /// Changed objects are dropped from the identity map, so the next load
    /// reads them from the database again.
    pub fn rollback(&self) {
        let created = {
            let mut tx = self.transaction_write();
            let n = tx.len();
            tx.clear();
            n
        };
        let changed = {
            let mut map = self.identity_write();
            let pending = map.pending();
            for node in &pending {
                map.forget(node);
            }
            pending.len()
        };
        tracing::debug!(created, changed, "Rolled back in-flight state");
    }

    /// Transaction nodes plus changed nodes of the identity map.
    fn pending_nodes(&self) -> Vec<NodeRef> {
        let mut nodes: Vec<NodeRef> = self.transaction_read().nodes().to_vec();
        for node in self.identity_read().pending() {
            if !nodes.iter().any(|n| n.ptr_eq(&node)) {
                nodes.push(node);
            }
        }
        nodes
    }

    /// Prepare pending nodes until preparing uncovers no further ones.
    ///
    /// Each round first assigns primary keys to every new node, so that
    /// relation maintenance can copy them into foreign keys, then prepares
    /// each live node.
    fn prepare_pending(&self) -> Result<Vec<NodeRef>> {
        let mut prepared: Vec<NodeRef> = Vec::new();
        loop {
            let fresh: Vec<NodeRef> = self
                .pending_nodes()
                .into_iter()
                .filter(|n| !prepared.iter().any(|p| p.ptr_eq(n)))
                .collect();
            if fresh.is_empty() {
                return Ok(prepared);
            }
            tracing::debug!(count = fresh.len(), "Preparing objects");

            for node in &fresh {
                let mut n = node.write();
                if n.is_new() {
                    self.mapper(n.type_name())?.assign_primary_keys(&mut n)?;
                }
            }
            for node in &fresh {
                let live_type = {
                    let n = node.read();
                    (!n.is_deleted()).then(|| n.type_name().to_string())
                };
                if let Some(type_name) = live_type {
                    self.mapper(&type_name)?.prepare_for_storage(node, self)?;
                }
            }
            prepared.extend(fresh);
        }
    }

    fn flush(&self, plan: &FlushPlan) -> Result<FlushResult> {
        self.driver.begin()?;
        let outcome = plan
            .execute(&self.driver)
            .and_then(|result| self.driver.commit().map(|()| result));
        outcome.map_err(|e| {
            tracing::debug!(error = %e, "Flush failed, rolling back");
            if let Err(rollback) = self.driver.rollback() {
                tracing::warn!(error = %rollback, "Rollback after failed flush failed");
            }
            e
        })
    }

    /// Settle the in-memory state after a successful commit.
    fn finish(&self, touched: &[NodeRef]) {
        {
            let mut map = self.identity_write();
            for node in touched {
                map.forget(node);
                let deleted = node.read().is_deleted();
                if !deleted {
                    node.write().mark_clean();
                    map.insert(node.clone());
                }
            }
        }
        self.transaction_write().clear();
    }

    /// Load through the identity map; with `also_in_transaction`, add the
    /// matching objects that exist only in memory so far.
    fn fetch(
        &self,
        type_name: &str,
        criteria: &[Criteria],
        options: &SelectOptions,
        also_in_transaction: bool,
    ) -> Result<Vec<NodeRef>> {
        let mapper = self.mapper(type_name)?;
        let loaded = mapper.load_objects(&self.driver, criteria, options)?;
        let mut result: Vec<NodeRef> = {
            let mut map = self.identity_write();
            loaded.into_iter().map(|n| map.get_or_insert(n)).collect()
        };
        // In-memory values win over what the database returned
        result.retain(|node| {
            let n = node.read();
            !n.is_deleted()
                && (n.state() == NodeState::Clean || Criteria::matches_all(criteria, |c| n.get_value(&c.attribute)))
        });

        if also_in_transaction {
            let mut in_flight = self.transaction_read().find(type_name, criteria);
            in_flight.extend(self.identity_read().nodes_of(type_name).filter(|node| {
                let n = node.read();
                n.needs_storage() && !n.is_deleted() && Criteria::matches_all(criteria, |c| n.get_value(&c.attribute))
            }).cloned());
            for node in in_flight {
                if !result.iter().any(|r| r.ptr_eq(&node)) {
                    result.push(node);
                }
            }
        }
        tracing::trace!(type_name, count = result.len(), also_in_transaction, "Fetched objects");
        Ok(result)
    }

    fn identity_read(&self) -> RwLockReadGuard<'_, IdentityMap> {
        self.identity_map.read().unwrap_or_else(|e| e.into_inner())
    }

    fn identity_write(&self) -> RwLockWriteGuard<'_, IdentityMap> {
        self.identity_map.write().unwrap_or_else(|e| e.into_inner())
    }

    fn transaction_read(&self) -> RwLockReadGuard<'_, Transaction> {
        self.transaction.read().unwrap_or_else(|e| e.into_inner())
    }

    fn transaction_write(&self) -> RwLockWriteGuard<'_, Transaction> {
        self.transaction.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: Driver> PersistenceFacade for Session<D> {
    fn create(&self, type_name: &str) -> Result<NodeRef> {
        let node = NodeRef::new(self.mapper(type_name)?.create_node());
        self.transaction_write().register(&node);
        tracing::trace!(type_name, "Created object");
        Ok(node)
    }

    fn load(&self, oid: &ObjectId) -> Result<Option<NodeRef>> {
        self.schema.validate_oid(oid)?;
        if let Some(node) = self.identity_read().get(oid) {
            let deleted = node.read().is_deleted();
            return Ok((!deleted).then_some(node));
        }
        if let Some(node) = self.transaction_read().get(oid) {
            return Ok(Some(node));
        }
        if oid.is_dummy() {
            return Ok(None);
        }

        let mapper = self.mapper(oid.type_name())?;
        let ty = mapper.type_description();
        let criteria: Vec<Criteria> = ty
            .pk_names
            .iter()
            .zip(oid.ids())
            .map(|(pk, id)| Criteria::equal(ty.name.clone(), pk.clone(), id.clone()))
            .collect();
        let loaded = mapper.load_objects(&self.driver, &criteria, &SelectOptions::new())?;
        Ok(loaded.into_iter().next().map(|n| self.identity_write().get_or_insert(n)))
    }

    fn load_objects(&self, type_name: &str, criteria: &[Criteria], also_in_transaction: bool) -> Result<Vec<NodeRef>> {
        self.fetch(type_name, criteria, &SelectOptions::new(), also_in_transaction)
    }

    /// Schedule `node` for deletion, together with its composite children
    /// and the junction objects of its many-to-many relations.
    fn delete(&self, node: &NodeRef) -> Result<()> {
        let type_name = {
            let mut n = node.write();
            if n.is_deleted() {
                return Ok(());
            }
            n.set_state(NodeState::Deleted);
            tracing::debug!(oid = %n.oid(), "Scheduled deletion");
            n.type_name().to_string()
        };
        self.transaction_write().register(node);

        let ty = Arc::clone(self.schema.type_description(&type_name)?);
        for relation in &ty.relations {
            let dependent = match &relation.kind {
                RelationKind::OneToMany { id_name, fk_name } if relation.is_composite_owner() => {
                    Some((relation.other_type.as_str(), id_name, fk_name))
                }
                RelationKind::ManyToMany { this_end, .. } => match &this_end.kind {
                    RelationKind::OneToMany { id_name, fk_name } => Some((this_end.other_type.as_str(), id_name, fk_name)),
                    _ => None,
                },
                _ => None,
            };
            let Some((dependent_type, id_name, fk_name)) = dependent else {
                continue;
            };
            let own_id = node.value(id_name);
            if own_id.is_null() || ObjectId::is_dummy_value(&own_id) {
                continue;
            }
            let criteria = [Criteria::equal(dependent_type, fk_name.clone(), own_id)];
            for dependent_node in self.load_objects(dependent_type, &criteria, true)? {
                self.delete(&dependent_node)?;
            }
        }
        Ok(())
    }
}

impl<D: Driver> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("types", &self.mappers.len())
            .field("identity_map", &self.identity_read().len())
            .field("in_flight", &self.transaction_read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use nodemap_core::error::DriverErrorKind;
    use nodemap_core::{AggregationKind, AttributeDescription, DataType, RelationDescription, TypeDescription, Value};

    fn schema() -> Arc<Schema> {
        let book = TypeDescription::new("Book", "book")
            .attribute(AttributeDescription::new("id", DataType::Integer))
            .attribute(AttributeDescription::new("title", DataType::String))
            .relation(
                RelationDescription::one_to_many("Book", "Book", "Chapter", "Chapter", "id", "fk_book_id")
                    .this_aggregation(AggregationKind::Composite),
            );
        let chapter = TypeDescription::new("Chapter", "chapter")
            .attribute(AttributeDescription::new("id", DataType::Integer))
            .attribute(AttributeDescription::new("name", DataType::String))
            .attribute(AttributeDescription::new("fk_book_id", DataType::Integer))
            .relation(RelationDescription::many_to_one(
                "Chapter", "Chapter", "Book", "Book", "fk_book_id", "id",
            ));
        Arc::new(Schema::new(vec![book, chapter]).unwrap())
    }

    fn session() -> Session<MemoryDriver> {
        let schema = schema();
        let driver = MemoryDriver::new().with_primary_keys(&schema);
        SessionBuilder::new(schema).build(driver).unwrap()
    }

    #[test]
    fn test_commit_inserts_parent_first() {
        let session = session();
        let chapter = session.create("Chapter").unwrap();
        chapter.set_value("name", "Intro");
        let book = session.create("Book").unwrap();
        book.set_value("title", "Rust");
        book.write().add_node("Chapter", &chapter);

        let result = session.commit().unwrap();
        assert_eq!(result.inserted, 2);
        let tables: Vec<String> = session.driver().operations().iter().map(|op| op.table().to_string()).collect();
        assert_eq!(tables, vec!["book", "chapter"]);
        assert_eq!(chapter.value("fk_book_id"), Value::BigInt(1));
        assert_eq!(chapter.state(), NodeState::Clean);
        assert_eq!(session.pending_count(), 0);
        assert!(!session.driver().in_transaction());
    }

    #[test]
    fn test_load_returns_identity_mapped_node() {
        let session = session();
        let book = session.create("Book").unwrap();
        book.set_value("title", "Rust");
        session.commit().unwrap();

        let loaded = session.load(&ObjectId::single("Book", 1)).unwrap().unwrap();
        assert!(loaded.ptr_eq(&book));
        let all = session.load_objects("Book", &[], false).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].ptr_eq(&book));
        assert!(session.load(&ObjectId::single("Book", 2)).unwrap().is_none());
    }

    #[test]
    fn test_in_flight_objects_found_only_when_asked() {
        let session = session();
        let chapter = session.create("Chapter").unwrap();
        chapter.set_value("name", "Draft");
        let criteria = [Criteria::equal("Chapter", "name", "Draft")];
        assert!(session.load_objects("Chapter", &criteria, false).unwrap().is_empty());
        let found = session.load_objects("Chapter", &criteria, true).unwrap();
        assert!(found[0].ptr_eq(&chapter));
    }

    #[test]
    fn test_delete_cascades_to_composite_children() {
        let session = session();
        let book = session.create("Book").unwrap();
        let chapter = session.create("Chapter").unwrap();
        book.write().add_node("Chapter", &chapter);
        session.commit().unwrap();

        session.delete(&book).unwrap();
        assert_eq!(chapter.state(), NodeState::Deleted);
        let result = session.commit().unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(session.driver().row_count("book"), 0);
        assert_eq!(session.driver().row_count("chapter"), 0);
        let deletes: Vec<String> = session
            .driver()
            .operations()
            .iter()
            .filter(|op| op.kind() == "DELETE")
            .map(|op| op.table().to_string())
            .collect();
        assert_eq!(deletes, vec!["chapter", "book"]);
    }

    #[test]
    fn test_driver_failure_rolls_back() {
        let session = session();
        session.driver().insert_row("chapter", [("id", Value::BigInt(1))]);
        session.create("Book").unwrap();
        session.create("Chapter").unwrap();

        let err = session.commit().unwrap_err();
        let Error::Driver(err) = err else {
            panic!("expected driver error");
        };
        assert_eq!(err.kind, DriverErrorKind::Constraint);
        assert_eq!(session.driver().row_count("book"), 0);
        assert!(!session.driver().in_transaction());
        assert_eq!(session.pending_count(), 2);

        session.rollback();
        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn test_rollback_forgets_changes() {
        let session = session();
        let book = session.create("Book").unwrap();
        book.set_value("title", "Rust");
        session.commit().unwrap();

        book.set_value("title", "Go");
        session.rollback();
        let reloaded = session.load(&ObjectId::single("Book", 1)).unwrap().unwrap();
        assert!(!reloaded.ptr_eq(&book));
        assert_eq!(reloaded.value("title"), Value::from("Rust"));
    }

    #[test]
    fn test_unknown_type() {
        let err = session().create("Shelf").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownType));
    }
}
