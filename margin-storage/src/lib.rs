//! margin Storage - Storage Traits and Mock Implementation
//!
//! Defines the narrow storage contract the checklisting engine consumes:
//! resolving an entity to a writable row-set, reading committed rows, and
//! writing inside an explicit [`UnitOfWork`]. A transactional in-memory
//! implementation lives in [`mock`].

pub mod mock;
mod unit_of_work;

pub use mock::{FailurePoint, MockStore};
pub use unit_of_work::{StagedOp, StagedWrite, UnitOfWork};

use margin_core::{identity_key, MarginResult, Row, RowSet, Value};
use std::collections::HashSet;

// ============================================================================
// METAMODEL
// ============================================================================

/// Storage-level description of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Entity alias
    pub entity: String,
    /// Column holding each row's native identity
    pub identity_column: String,
    /// Known columns. Empty means any column is accepted.
    pub columns: Vec<String>,
    /// Assign a fresh UUIDv7 identity to inserted rows that lack one
    pub generate_identity: bool,
}

impl EntitySchema {
    pub fn new(entity: impl Into<String>, identity_column: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            identity_column: identity_column.into(),
            columns: Vec::new(),
            generate_identity: false,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_generated_identity(mut self) -> Self {
        self.generate_identity = true;
        self
    }

    /// Whether a column may be written. The identity column is always accepted.
    pub fn accepts_column(&self, column: &str) -> bool {
        self.columns.is_empty()
            || column == self.identity_column
            || self.columns.iter().any(|c| c == column)
    }
}

/// Resolves entity references to their schema and to empty writable row-sets.
pub trait EntityCatalog: Send + Sync {
    /// Schema of an entity, or `StorageError::EntityNotFound`.
    fn schema(&self, entity: &str) -> MarginResult<EntitySchema>;

    /// Empty row-set for an entity, keyed by its identity column.
    fn row_set(&self, entity: &str) -> MarginResult<RowSet> {
        let schema = self.schema(entity)?;
        Ok(RowSet::new(schema.entity, schema.identity_column))
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Row filter understood by every store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row
    All,
    /// Rows whose `column` equals any of `values`
    ColumnIn { column: String, values: Vec<Value> },
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn column_in(column: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Filter::ColumnIn {
            column: column.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Whether a row passes the filter. Values compare by identity key.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::ColumnIn { column, values } => match row.get(column) {
                Some(v) if !v.is_null() => {
                    let key = identity_key(v);
                    values.iter().any(|candidate| identity_key(candidate) == key)
                }
                _ => false,
            },
        }
    }

    /// Filter with the value list deduplicated, for logging and store backends.
    pub fn normalized(&self) -> Filter {
        match self {
            Filter::All => Filter::All,
            Filter::ColumnIn { column, values } => {
                let mut seen = HashSet::new();
                Filter::ColumnIn {
                    column: column.clone(),
                    values: values
                        .iter()
                        .filter(|v| seen.insert(identity_key(v)))
                        .cloned()
                        .collect(),
                }
            }
        }
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait consumed by the mutation pipeline and the checklisting engine.
///
/// Reads see committed state only. Writes go through a [`UnitOfWork`] and
/// become visible on [`DataStore::commit`].
pub trait DataStore: EntityCatalog {
    /// Start a new unit of work.
    fn begin(&self) -> MarginResult<UnitOfWork>;

    /// Read committed rows of an entity.
    fn read(&self, entity: &str, filter: &Filter) -> MarginResult<RowSet>;

    /// Insert rows. Returns the rows as stored, identities assigned.
    fn insert(&self, uow: &mut UnitOfWork, rows: &RowSet) -> MarginResult<RowSet>;

    /// Update rows matched by identity, merging the given columns.
    /// Returns the number of rows updated.
    fn update(&self, uow: &mut UnitOfWork, rows: &RowSet) -> MarginResult<usize>;

    /// Delete every row of `entity` passing `filter`. Returns the number deleted.
    fn delete(&self, uow: &mut UnitOfWork, entity: &str, filter: &Filter) -> MarginResult<usize>;

    /// Make the unit of work's writes visible.
    fn commit(&self, uow: UnitOfWork) -> MarginResult<()>;

    /// Discard the unit of work's writes.
    fn rollback(&self, uow: UnitOfWork) -> MarginResult<()>;

    /// Read committed rows by identity.
    fn read_by_identities(&self, entity: &str, identities: &[Value]) -> MarginResult<RowSet> {
        let schema = self.schema(entity)?;
        self.read(
            entity,
            &Filter::column_in(schema.identity_column, identities.iter().cloned()),
        )
    }
}

/// Run `work` inside a fresh unit of work.
///
/// Commits when `work` succeeds. Rolls back and returns the original error
/// when it fails; a failing rollback is logged, not returned.
pub fn with_unit_of_work<T, F>(store: &dyn DataStore, work: F) -> MarginResult<T>
where
    F: FnOnce(&mut UnitOfWork) -> MarginResult<T>,
{
    let mut uow = store.begin()?;
    match work(&mut uow) {
        Ok(value) => {
            store.commit(uow)?;
            Ok(value)
        }
        Err(e) => {
            let transaction = uow.id();
            if let Err(rollback_err) = store.rollback(uow) {
                tracing::error!(%transaction, error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}
