//! Mutation pipeline: applies create/update/delete batches to a store and
//! fires the lifecycle events around them.
//!
//! ```text
//! before_* ──▶ store write (own unit of work) ──▶ commit ──▶ after_*
//!                      │
//!                      └─ error ──▶ rollback ──▶ mutation_failed
//! ```
//!
//! A listener error in `before_*` or `after_*` also closes the batch with
//! `mutation_failed`, so listeners holding per-batch state can drop it.

use crate::{DataEvent, EventRegistry};
use margin_core::{MarginError, MarginResult, MutationKind, RowSet};
use margin_storage::{with_unit_of_work, DataStore, Filter};
use std::sync::Arc;

/// Drives mutations of source entities through the store and the registry.
#[derive(Clone)]
pub struct MutationPipeline {
    store: Arc<dyn DataStore>,
    registry: Arc<EventRegistry>,
}

impl MutationPipeline {
    pub fn new(store: Arc<dyn DataStore>, registry: Arc<EventRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Insert a batch. Returns the rows as stored.
    pub fn create(&self, rows: RowSet) -> MarginResult<RowSet> {
        self.notify(
            MutationKind::Create,
            &rows,
            DataEvent::before(MutationKind::Create, rows.clone()),
        )?;

        let store = self.store.as_ref();
        let stored = self.apply(MutationKind::Create, &rows, |uow| store.insert(uow, &rows))?;

        self.notify(
            MutationKind::Create,
            &rows,
            DataEvent::after(MutationKind::Create, stored.clone()),
        )?;
        Ok(stored)
    }

    /// Update a batch by identity. Returns the full rows as stored after commit.
    pub fn update(&self, rows: RowSet) -> MarginResult<RowSet> {
        self.notify(
            MutationKind::Update,
            &rows,
            DataEvent::before(MutationKind::Update, rows.clone()),
        )?;

        let store = self.store.as_ref();
        self.apply(MutationKind::Update, &rows, |uow| store.update(uow, &rows))?;

        let stored = match self.store.read_by_identities(rows.entity(), &rows.identities()) {
            Ok(stored) => stored,
            Err(e) => {
                self.fail(MutationKind::Update, &rows, &e);
                return Err(e);
            }
        };
        self.notify(
            MutationKind::Update,
            &rows,
            DataEvent::after(MutationKind::Update, stored.clone()),
        )?;
        Ok(stored)
    }

    /// Delete a batch by identity. Returns the number of rows deleted.
    pub fn delete(&self, rows: RowSet) -> MarginResult<usize> {
        self.notify(
            MutationKind::Delete,
            &rows,
            DataEvent::before(MutationKind::Delete, rows.clone()),
        )?;

        let store = self.store.as_ref();
        let filter = Filter::column_in(rows.identity_column(), rows.identities());
        let deleted = self.apply(MutationKind::Delete, &rows, |uow| {
            store.delete(uow, rows.entity(), &filter)
        })?;

        self.notify(
            MutationKind::Delete,
            &rows,
            DataEvent::after(MutationKind::Delete, rows.clone()),
        )?;
        Ok(deleted)
    }

    fn apply<T, F>(&self, kind: MutationKind, rows: &RowSet, work: F) -> MarginResult<T>
    where
        F: FnOnce(&mut margin_storage::UnitOfWork) -> MarginResult<T>,
    {
        with_unit_of_work(self.store.as_ref(), work).map_err(|e| {
            self.fail(kind, rows, &e);
            e
        })
    }

    /// Dispatch a lifecycle event. A listener error closes the batch with
    /// `mutation_failed` before it is returned.
    fn notify(&self, kind: MutationKind, rows: &RowSet, event: DataEvent) -> MarginResult<()> {
        self.registry.dispatch(&event).map(|_| ()).map_err(|e| {
            self.fail(kind, rows, &e);
            e
        })
    }

    fn fail(&self, kind: MutationKind, rows: &RowSet, error: &MarginError) {
        tracing::warn!(entity = rows.entity(), %kind, error = %error, "mutation failed");
        if let Err(listener_err) = self.registry.dispatch(&DataEvent::failed(kind, rows.clone())) {
            tracing::error!(error = %listener_err, "mutation_failed listener failed");
        }
    }
}
