//! Validation engine
//!
//! Evaluates the checks of one or more event contexts against every row of a
//! source row-set. Pre-mutation rows are paired with post-mutation rows by
//! identity. Any evaluation error fails the whole batch.

use crate::check::{Check, CheckList};
use crate::predicate::{self, RowScope};
use margin_core::{
    identity_key, ConfigError, EventContext, MarginResult, MutationKind, Row, RowSet, Value,
};

/// A source row that satisfied a check.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow {
    /// Identity value of the source row
    pub identity: Value,
    /// Row after the mutation
    pub new: Row,
    /// Row before the mutation, when one was captured
    pub old: Option<Row>,
}

impl MatchedRow {
    /// Resolution scope for this row under a given check.
    pub fn scope<'a>(&'a self, entity: &'a str, context: EventContext, identity: &'a str) -> RowScope<'a> {
        RowScope {
            entity,
            context,
            identity,
            new: &self.new,
            old: self.old.as_ref(),
        }
    }
}

/// A check together with the rows it matched, in row order.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckMatch<'a> {
    pub check: &'a Check,
    pub rows: Vec<MatchedRow>,
}

/// Outcome of evaluating a row-set. Only checks with at least one matched
/// row are recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<'a> {
    entity: String,
    matches: Vec<CheckMatch<'a>>,
}

impl<'a> MatchResult<'a> {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            matches: Vec::new(),
        }
    }

    /// Source entity the rows belong to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn matches(&self) -> &[CheckMatch<'a>] {
        &self.matches
    }

    /// Number of checks that matched at least one row.
    pub fn matched_checks(&self) -> usize {
        self.matches.len()
    }

    /// Number of (check, row) matches.
    pub fn matched_rows(&self) -> usize {
        self.matches.iter().map(|m| m.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    fn extend(&mut self, other: MatchResult<'a>) {
        self.matches.extend(other.matches);
    }
}

/// Stateless evaluator of check lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    /// Evaluate the checks registered under `context`.
    ///
    /// `old` holds the pre-mutation rows, if captured. Rows are paired by the
    /// identity column of `new`.
    pub fn evaluate<'a>(
        checks: &'a CheckList,
        context: EventContext,
        new: &RowSet,
        old: Option<&RowSet>,
    ) -> MarginResult<MatchResult<'a>> {
        let mut result = MatchResult::new(new.entity());
        for check in checks.checks_for(context) {
            check.ensure_context(context)?;

            let mut rows = Vec::new();
            for (position, row) in new.rows().iter().enumerate() {
                let identity = new.identity_of(row).ok_or_else(|| ConfigError::MissingIdentity {
                    entity: new.entity().to_string(),
                    column: new.identity_column().to_string(),
                    row: position,
                })?;
                let key = identity_key(identity);
                let previous = old.and_then(|o| o.find_by_identity(identity));
                let scope = RowScope {
                    entity: new.entity(),
                    context,
                    identity: &key,
                    new: row,
                    old: previous,
                };
                if predicate::evaluate(&check.predicate, &scope)? {
                    rows.push(MatchedRow {
                        identity: identity.clone(),
                        new: row.clone(),
                        old: previous.cloned(),
                    });
                }
            }

            tracing::trace!(check = %check.name, %context, matched = rows.len(), "check evaluated");
            if !rows.is_empty() {
                result.matches.push(CheckMatch { check, rows });
            }
        }
        Ok(result)
    }

    /// Evaluate every context that applies to a mutation kind.
    ///
    /// Creates run `on_create` then `on_any`; updates run `on_update` then
    /// `on_any`; deletes run nothing.
    pub fn evaluate_mutation<'a>(
        checks: &'a CheckList,
        kind: MutationKind,
        new: &RowSet,
        old: Option<&RowSet>,
    ) -> MarginResult<MatchResult<'a>> {
        let mut result = MatchResult::new(new.entity());
        for context in EventContext::for_mutation(kind) {
            result.extend(Self::evaluate(checks, *context, new, old)?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::{Comparator, Condition, ConditionGroup, MarginError};
    use serde_json::json;

    fn below(limit: i64) -> ConditionGroup {
        ConditionGroup::and().with_condition(Condition::new(
            "LIFECYCLE_STATE",
            Comparator::LessThan,
            limit,
        ))
    }

    fn source(rows: &[(i64, i64)]) -> RowSet {
        RowSet::new("ORDER_POS", "ID").with_rows(
            rows.iter()
                .map(|(id, state)| Row::new().with("ID", *id).with("LIFECYCLE_STATE", *state)),
        )
    }

    fn list() -> CheckList {
        CheckList::new()
            .with_check(Check::validating("create", EventContext::OnCreate, below(50)))
            .with_check(Check::validating("update", EventContext::OnUpdate, below(50)))
            .with_check(Check::validating("any", EventContext::OnAny, below(100)))
    }

    #[test]
    fn test_matches_per_check_in_row_order() {
        let checks = list();
        let result =
            ValidationEngine::evaluate(&checks, EventContext::OnCreate, &source(&[(1, 10), (2, 70), (3, 20)]), None)
                .unwrap();

        assert_eq!(result.matched_checks(), 1);
        let ids: Vec<_> = result.matches()[0].rows.iter().map(|r| r.identity.clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_context_isolation() {
        let checks = list();
        let rows = source(&[(1, 10)]);

        let created = ValidationEngine::evaluate_mutation(&checks, MutationKind::Create, &rows, None).unwrap();
        let names: Vec<_> = created.matches().iter().map(|m| m.check.name.as_str()).collect();
        assert_eq!(names, vec!["create", "any"]);

        let updated = ValidationEngine::evaluate_mutation(&checks, MutationKind::Update, &rows, Some(&rows)).unwrap();
        let names: Vec<_> = updated.matches().iter().map(|m| m.check.name.as_str()).collect();
        assert_eq!(names, vec!["update", "any"]);

        let deleted = ValidationEngine::evaluate_mutation(&checks, MutationKind::Delete, &rows, None).unwrap();
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_no_match_is_not_an_error() {
        let checks = list();
        let result =
            ValidationEngine::evaluate(&checks, EventContext::OnCreate, &source(&[(1, 90)]), None).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.matched_rows(), 0);
    }

    #[test]
    fn test_old_rows_paired_by_identity() {
        let dropped = ConditionGroup::and()
            .with_condition(Condition::new("old:LIFECYCLE_STATE", Comparator::GreaterThanOrEquals, 50))
            .with_condition(Condition::new("LIFECYCLE_STATE", Comparator::LessThan, 50));
        let checks = CheckList::new().with_check(Check::validating("dropped", EventContext::OnUpdate, dropped));
        let new = source(&[(1, 10), (2, 10)]);
        let old = RowSet::new("ORDER_POS", "ID").with_rows(vec![
            Row::new().with("ID", "2").with("LIFECYCLE_STATE", 80),
            Row::new().with("ID", 1).with("LIFECYCLE_STATE", 20),
        ]);

        let result = ValidationEngine::evaluate(&checks, EventContext::OnUpdate, &new, Some(&old)).unwrap();
        assert_eq!(result.matched_rows(), 1);
        let matched = &result.matches()[0].rows[0];
        assert_eq!(matched.identity, json!(2));
        assert_eq!(matched.old.as_ref().map(|r| r["LIFECYCLE_STATE"].clone()), Some(json!(80)));
    }

    #[test]
    fn test_old_reference_outside_update_fails_even_without_rows() {
        let checks = CheckList::new().with_check(Check::validating(
            "bad",
            EventContext::OnCreate,
            ConditionGroup::and().with_condition(Condition::new("old:X", Comparator::Equals, 1)),
        ));
        let err = ValidationEngine::evaluate(&checks, EventContext::OnCreate, &source(&[]), None)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_row_without_identity_fails() {
        let checks = list();
        let rows = RowSet::new("ORDER_POS", "ID")
            .with_rows(vec![
                Row::new().with("ID", 1).with("LIFECYCLE_STATE", 5),
                Row::new().with("LIFECYCLE_STATE", 5),
            ]);
        let err = ValidationEngine::evaluate(&checks, EventContext::OnAny, &rows, None).unwrap_err();
        assert_eq!(
            err,
            MarginError::Config(ConfigError::MissingIdentity {
                entity: "ORDER_POS".into(),
                column: "ID".into(),
                row: 1,
            })
        );
    }
}
