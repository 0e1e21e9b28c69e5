//! In-memory transactional store for testing.
//!
//! Tables are kept behind `RwLock`s. Writes stage copy-on-write snapshots in
//! the [`UnitOfWork`]; commit swaps the snapshots in. Failures can be
//! injected per operation to exercise error paths.

use crate::{DataStore, EntityCatalog, EntitySchema, Filter, StagedOp, UnitOfWork};
use margin_core::{
    identity_key, new_record_id, MarginError, MarginResult, RowSet, StorageError, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Operation at which an injected failure fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePoint {
    Insert(String),
    Update(String),
    Delete(String),
    Commit,
}

/// In-memory store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MockStore {
    schemas: Arc<RwLock<HashMap<String, EntitySchema>>>,
    tables: Arc<RwLock<HashMap<String, RowSet>>>,
    failures: Arc<RwLock<Vec<FailurePoint>>>,
}

fn read_guard<T>(lock: &RwLock<T>) -> MarginResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))
}

fn write_guard<T>(lock: &RwLock<T>) -> MarginResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))
}

impl MockStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Re-registering keeps existing rows.
    pub fn register(&self, schema: EntitySchema) -> MarginResult<()> {
        let entity = schema.entity.clone();
        let identity_column = schema.identity_column.clone();
        write_guard(&self.schemas)?.insert(entity.clone(), schema);
        write_guard(&self.tables)?
            .entry(entity.clone())
            .or_insert_with(|| RowSet::new(entity, identity_column));
        Ok(())
    }

    /// Write rows directly into committed state, bypassing any unit of work.
    pub fn seed(&self, rows: &RowSet) -> MarginResult<RowSet> {
        let mut uow = self.begin()?;
        let stored = self.insert(&mut uow, rows)?;
        self.commit(uow)?;
        Ok(stored)
    }

    /// Snapshot of an entity's committed rows.
    pub fn table(&self, entity: &str) -> MarginResult<RowSet> {
        self.read(entity, &Filter::All)
    }

    /// Number of committed rows in an entity.
    pub fn count(&self, entity: &str) -> MarginResult<usize> {
        Ok(self.table(entity)?.len())
    }

    /// Make the next operation matching `point` fail once.
    pub fn fail_next(&self, point: FailurePoint) -> MarginResult<()> {
        write_guard(&self.failures)?.push(point);
        Ok(())
    }

    fn take_failure(&self, point: &FailurePoint) -> MarginResult<bool> {
        let mut failures = write_guard(&self.failures)?;
        match failures.iter().position(|f| f == point) {
            Some(pos) => {
                failures.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_failure(&self, point: FailurePoint, entity: &str) -> MarginResult<()> {
        if self.take_failure(&point)? {
            return Err(MarginError::Storage(StorageError::WriteFailed {
                entity: entity.to_string(),
                reason: format!("injected failure at {:?}", point),
            }));
        }
        Ok(())
    }

    fn committed(&self, entity: &str) -> MarginResult<RowSet> {
        read_guard(&self.tables)?
            .get(entity)
            .cloned()
            .ok_or_else(|| {
                MarginError::Storage(StorageError::EntityNotFound {
                    entity: entity.to_string(),
                })
            })
    }
}

impl EntityCatalog for MockStore {
    fn schema(&self, entity: &str) -> MarginResult<EntitySchema> {
        read_guard(&self.schemas)?
            .get(entity)
            .cloned()
            .ok_or_else(|| {
                MarginError::Storage(StorageError::EntityNotFound {
                    entity: entity.to_string(),
                })
            })
    }
}

impl DataStore for MockStore {
    fn begin(&self) -> MarginResult<UnitOfWork> {
        Ok(UnitOfWork::new())
    }

    fn read(&self, entity: &str, filter: &Filter) -> MarginResult<RowSet> {
        let table = self.committed(entity)?;
        Ok(table.filter(|row| filter.matches(row)))
    }

    fn insert(&self, uow: &mut UnitOfWork, rows: &RowSet) -> MarginResult<RowSet> {
        let entity = rows.entity();
        let schema = self.schema(entity)?;
        self.check_failure(FailurePoint::Insert(entity.to_string()), entity)?;

        let mut stored = RowSet::new(entity, schema.identity_column.clone());
        for row in rows {
            if let Some(column) = row.columns().find(|c| !schema.accepts_column(c)) {
                return Err(MarginError::Storage(StorageError::ColumnNotFound {
                    entity: entity.to_string(),
                    column: column.to_string(),
                }));
            }
            let mut row = row.clone();
            let has_identity = row
                .get(&schema.identity_column)
                .is_some_and(|v| !v.is_null());
            if !has_identity {
                if !schema.generate_identity {
                    return Err(MarginError::Storage(StorageError::WriteFailed {
                        entity: entity.to_string(),
                        reason: format!("row has no {}", schema.identity_column),
                    }));
                }
                row.set(
                    schema.identity_column.clone(),
                    Value::String(new_record_id().to_string()),
                );
            }
            stored.push(row);
        }

        let table = uow.stage_with(entity, || self.committed(entity))?;
        let mut existing: HashSet<String> = table.index_by_identity().into_keys().collect();
        for row in &stored {
            if let Some(id) = stored.identity_of(row) {
                let key = identity_key(id);
                if !existing.insert(key.clone()) {
                    return Err(MarginError::Storage(StorageError::DuplicateIdentity {
                        entity: entity.to_string(),
                        identity: key,
                    }));
                }
            }
        }
        table.add_rows(stored.rows().iter().cloned());
        uow.record(StagedOp::Insert, entity, stored.len());

        tracing::debug!(entity, rows = stored.len(), "staged insert");
        Ok(stored)
    }

    fn update(&self, uow: &mut UnitOfWork, rows: &RowSet) -> MarginResult<usize> {
        let entity = rows.entity();
        let schema = self.schema(entity)?;
        self.check_failure(FailurePoint::Update(entity.to_string()), entity)?;

        let table = uow.stage_with(entity, || self.committed(entity))?;
        let positions = table.index_by_identity();
        let mut updated = 0;
        for row in rows {
            if let Some(column) = row.columns().find(|c| !schema.accepts_column(c)) {
                return Err(MarginError::Storage(StorageError::ColumnNotFound {
                    entity: entity.to_string(),
                    column: column.to_string(),
                }));
            }
            let key = rows.identity_of(row).map(identity_key).ok_or_else(|| {
                MarginError::Storage(StorageError::WriteFailed {
                    entity: entity.to_string(),
                    reason: format!("update row has no {}", schema.identity_column),
                })
            })?;
            let position = positions.get(&key).copied().ok_or_else(|| {
                MarginError::Storage(StorageError::RowNotFound {
                    entity: entity.to_string(),
                    identity: key.clone(),
                })
            })?;
            table.rows_mut()[position].merge(row);
            updated += 1;
        }
        uow.record(StagedOp::Update, entity, updated);

        tracing::debug!(entity, rows = updated, "staged update");
        Ok(updated)
    }

    fn delete(&self, uow: &mut UnitOfWork, entity: &str, filter: &Filter) -> MarginResult<usize> {
        self.schema(entity)?;
        self.check_failure(FailurePoint::Delete(entity.to_string()), entity)?;

        let table = uow.stage_with(entity, || self.committed(entity))?;
        let doomed: Vec<usize> = table
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(row))
            .map(|(i, _)| i)
            .collect();
        let deleted = table.remove_rows(doomed).len();
        uow.record(StagedOp::Delete, entity, deleted);

        tracing::debug!(entity, rows = deleted, "staged delete");
        Ok(deleted)
    }

    fn commit(&self, uow: UnitOfWork) -> MarginResult<()> {
        if self.take_failure(&FailurePoint::Commit)? {
            return Err(MarginError::Storage(StorageError::TransactionFailed {
                reason: format!("injected commit failure for {}", uow.id()),
            }));
        }
        let id = uow.id();
        let writes = uow.writes().len();
        let open_ms = (chrono::Utc::now() - uow.started_at()).num_milliseconds();
        let mut tables = write_guard(&self.tables)?;
        for (entity, snapshot) in uow.into_staged() {
            tables.insert(entity, snapshot);
        }
        tracing::debug!(transaction = %id, writes, open_ms, "committed");
        Ok(())
    }

    fn rollback(&self, uow: UnitOfWork) -> MarginResult<()> {
        tracing::debug!(transaction = %uow.id(), writes = uow.writes().len(), "rolled back");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
