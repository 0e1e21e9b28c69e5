//! Output materializer
//!
//! Renders the row templates of every matched output check and groups the
//! rendered rows by target entity. Rows of checks sharing a target are
//! appended to one row-set in encounter order.

use crate::engine::MatchResult;
use crate::template;
use margin_core::{identity_key, MarginResult, RowSet};
use margin_storage::EntityCatalog;

/// Rendered output, one row-set per target entity in first-encounter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBatch {
    sets: Vec<RowSet>,
}

impl OutputBatch {
    /// Row-set for a target entity.
    pub fn get(&self, entity: &str) -> Option<&RowSet> {
        self.sets.iter().find(|s| s.entity() == entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowSet> {
        self.sets.iter()
    }

    /// Number of target entities.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Rendered rows across all targets.
    pub fn total_rows(&self) -> usize {
        self.sets.iter().map(RowSet::len).sum()
    }

    pub fn into_row_sets(self) -> Vec<RowSet> {
        self.sets
    }

    fn slot<C>(&mut self, entity: &str, catalog: &C) -> MarginResult<&mut RowSet>
    where
        C: EntityCatalog + ?Sized,
    {
        let position = match self.sets.iter().position(|s| s.entity() == entity) {
            Some(position) => position,
            None => {
                self.sets.push(catalog.row_set(entity)?);
                self.sets.len() - 1
            }
        };
        Ok(&mut self.sets[position])
    }
}

/// Turns match results into target-entity row-sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMaterializer;

impl OutputMaterializer {
    /// Render every matched output check.
    ///
    /// Validating checks are skipped. A rendered row that lacks the check's
    /// affected-identity column gets the source identity there. The first
    /// templating error aborts the whole batch.
    pub fn materialize<C>(result: &MatchResult<'_>, catalog: &C) -> MarginResult<OutputBatch>
    where
        C: EntityCatalog + ?Sized,
    {
        let mut batch = OutputBatch::default();
        for check_match in result.matches() {
            let check = check_match.check;
            let Some(output) = check.output() else {
                continue;
            };
            let target = batch.slot(&output.target_entity, catalog)?;

            for matched in &check_match.rows {
                let key = identity_key(&matched.identity);
                let scope = matched.scope(result.entity(), check.context, &key);
                for row_template in &output.rows {
                    let mut row = template::render_row(row_template, &scope)?;
                    if !row.contains(&output.affected_identity_column) {
                        row.set(output.affected_identity_column.clone(), matched.identity.clone());
                    }
                    target.push(row);
                }
            }
        }

        tracing::debug!(
            entity = result.entity(),
            targets = batch.len(),
            rows = batch.total_rows(),
            "output materialized"
        );
        Ok(batch)
    }
}
