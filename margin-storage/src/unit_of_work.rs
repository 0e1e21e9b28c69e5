//! Explicit unit of work.
//!
//! A unit of work is obtained from [`crate::DataStore::begin`], passed by
//! `&mut` into every write of one cycle, and consumed by `commit` or
//! `rollback`. Consuming it makes reuse across cycles impossible.

use margin_core::{new_record_id, MarginResult, RecordId, RowSet, Timestamp};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Kind of write staged in a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedOp {
    Insert,
    Update,
    Delete,
}

/// One staged write, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrite {
    pub op: StagedOp,
    pub entity: String,
    pub rows: usize,
}

/// Pending writes of one transaction.
///
/// Stores stage their changes as copy-on-write snapshots of every entity
/// touched: the first write to an entity clones its committed rows, later
/// writes in the same unit of work see earlier ones.
#[derive(Debug)]
pub struct UnitOfWork {
    id: RecordId,
    started_at: Timestamp,
    staged: BTreeMap<String, RowSet>,
    writes: Vec<StagedWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            id: new_record_id(),
            started_at: chrono::Utc::now(),
            staged: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Staged snapshot of an entity, if this unit of work has touched it.
    pub fn staged(&self, entity: &str) -> Option<&RowSet> {
        self.staged.get(entity)
    }

    /// Staged snapshot of an entity, created from `load` on first touch.
    pub fn stage_with<F>(&mut self, entity: &str, load: F) -> MarginResult<&mut RowSet>
    where
        F: FnOnce() -> MarginResult<RowSet>,
    {
        match self.staged.entry(entity.to_string()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(load()?)),
        }
    }

    /// Record a write for reporting.
    pub fn record(&mut self, op: StagedOp, entity: &str, rows: usize) {
        self.writes.push(StagedWrite {
            op,
            entity: entity.to_string(),
            rows,
        });
    }

    pub fn writes(&self) -> &[StagedWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Hand the staged snapshots to the store on commit.
    pub fn into_staged(self) -> BTreeMap<String, RowSet> {
        self.staged
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}
