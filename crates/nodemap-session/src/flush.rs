//! Flush operation ordering for the session.
//!
//! A commit writes its storage operations in three groups:
//! - INSERT parent-first (to respect FK constraints)
//! - UPDATE in collection order
//! - DELETE child-first (to respect FK constraints)
//!
//! Updates run before deletes so that foreign keys cleared by relation
//! maintenance no longer point at rows deleted in the same commit.

use nodemap_core::{Result, Schema};
use nodemap_query::{Driver, StorageOperation};
use std::collections::HashMap;

/// Orders storage operations by the foreign key dependencies between tables.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Table -> tables it references.
    dependencies: HashMap<String, Vec<String>>,
}

impl FlushOrderer {
    /// Create a new flush orderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the dependencies of every type in `schema`.
    ///
    /// A table depends on the tables its many-to-one relations point to.
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        let mut orderer = Self::new();
        for name in schema.type_names() {
            let ty = schema.type_description(name)?;
            let mut depends_on = Vec::new();
            for relation in ty.relations.iter().filter(|r| r.is_many_to_one()) {
                let other = &schema.type_description(&relation.other_type)?.table;
                if other != &ty.table && !depends_on.contains(other) {
                    depends_on.push(other.clone());
                }
            }
            orderer.register_table(ty.table.clone(), depends_on);
        }
        Ok(orderer)
    }

    /// Register a table's dependencies directly.
    pub fn register_table(&mut self, table: impl Into<String>, depends_on: Vec<String>) {
        self.dependencies.insert(table.into(), depends_on);
    }

    /// Length of the longest dependency chain starting at `table`.
    ///
    /// Cycles are cut at the first repeated table.
    fn dependency_depth(&self, table: &str) -> usize {
        fn walk<'a>(deps: &'a HashMap<String, Vec<String>>, table: &'a str, seen: &mut Vec<&'a str>) -> usize {
            if seen.contains(&table) {
                return 0;
            }
            seen.push(table);
            let depth = deps
                .get(table)
                .map_or(0, |d| d.iter().map(|t| 1 + walk(deps, t, seen)).max().unwrap_or(0));
            seen.pop();
            depth
        }
        walk(&self.dependencies, table, &mut Vec::new())
    }

    /// Order operations into a flush plan.
    ///
    /// Sorting is stable, so operations on one table keep their collection order.
    pub fn order(&self, ops: Vec<StorageOperation>) -> FlushPlan {
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        let mut updates = Vec::new();

        for op in ops {
            match op {
                StorageOperation::Delete { .. } => deletes.push(op),
                StorageOperation::Insert { .. } => inserts.push(op),
                StorageOperation::Update { .. } => updates.push(op),
            }
        }

        // Children first: deeper tables are deleted before their parents
        deletes.sort_by_key(|op| std::cmp::Reverse(self.dependency_depth(op.table())));

        // Parents first
        inserts.sort_by_key(|op| self.dependency_depth(op.table()));

        FlushPlan {
            inserts,
            updates,
            deletes,
        }
    }
}

/// A plan for executing flush operations.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Insert operations (ordered parent-first).
    pub inserts: Vec<StorageOperation>,
    /// Update operations (collection order).
    pub updates: Vec<StorageOperation>,
    /// Delete operations (ordered child-first).
    pub deletes: Vec<StorageOperation>,
}

impl FlushPlan {
    /// Create an empty flush plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    /// All operations in execution order.
    pub fn operations(&self) -> impl Iterator<Item = &StorageOperation> {
        self.inserts.iter().chain(&self.updates).chain(&self.deletes)
    }

    /// Execute the plan through `driver`, stopping at the first failure.
    ///
    /// Transaction boundaries are the caller's concern.
    #[tracing::instrument(level = "debug", skip(self, driver))]
    pub fn execute(&self, driver: &dyn Driver) -> Result<FlushResult> {
        tracing::debug!(
            inserts = self.inserts.len(),
            updates = self.updates.len(),
            deletes = self.deletes.len(),
            "Executing flush plan"
        );

        let mut result = FlushResult::default();
        for op in &self.inserts {
            tracing::trace!(sql = %op.to_sql(driver.dialect()), "Executing INSERT");
            result.inserted += driver.execute(op)?;
        }
        for op in &self.updates {
            tracing::trace!(sql = %op.to_sql(driver.dialect()), "Executing UPDATE");
            result.updated += driver.execute(op)?;
        }
        for op in &self.deletes {
            tracing::trace!(sql = %op.to_sql(driver.dialect()), "Executing DELETE");
            result.deleted += driver.execute(op)?;
        }
        Ok(result)
    }
}

/// Rows affected by a flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl FlushResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows affected.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}
