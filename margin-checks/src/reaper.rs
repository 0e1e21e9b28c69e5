//! Stale-entry reaper
//!
//! Deletes previously materialized rows tied to a set of source identities.
//! The delete filters on the affected-identity column only, never on the
//! target entity's own identity column, so every earlier finding for a
//! source row is removed no matter which check produced it.

use crate::check::ReapTarget;
use margin_core::{MarginResult, Value};
use margin_storage::{DataStore, Filter, UnitOfWork};

#[derive(Debug, Clone, Copy, Default)]
pub struct StaleEntryReaper;

impl StaleEntryReaper {
    /// Delete the rows of `target` whose affected-identity column holds any of
    /// `identities`, inside the caller's unit of work. Returns the number of
    /// rows deleted.
    pub fn reap(
        store: &dyn DataStore,
        uow: &mut UnitOfWork,
        target: &ReapTarget,
        identities: &[Value],
    ) -> MarginResult<usize> {
        if identities.is_empty() {
            tracing::debug!(target_entity = %target.target_entity, "no source identities, nothing to reap");
            return Ok(0);
        }

        let filter = Filter::column_in(&target.affected_identity_column, identities.iter().cloned())
            .normalized();
        let deleted = store.delete(uow, &target.target_entity, &filter)?;

        tracing::debug!(
            target_entity = %target.target_entity,
            column = %target.affected_identity_column,
            identities = identities.len(),
            deleted,
            "reaped stale entries"
        );
        Ok(deleted)
    }

    /// Reap every target. Returns the deleted count per target, in order.
    pub fn reap_all(
        store: &dyn DataStore,
        uow: &mut UnitOfWork,
        targets: &[ReapTarget],
        identities: &[Value],
    ) -> MarginResult<Vec<(ReapTarget, usize)>> {
        let mut counts = Vec::with_capacity(targets.len());
        for target in targets {
            let deleted = Self::reap(store, uow, target, identities)?;
            counts.push((target.clone(), deleted));
        }
        Ok(counts)
    }
}
