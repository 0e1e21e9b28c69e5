//! Predicate evaluation
//!
//! Evaluates a [`ConditionGroup`] against one source row. Column references
//! resolve through a [`RowScope`], which exposes the post-mutation row and,
//! for `on_update` checks, the pre-mutation row with the same identity.

use margin_core::{
    identity_key, Comparator, Condition, ConditionGroup, ConfigError, EventContext, FieldRef,
    LogicalOperator, MarginResult, Row, Value, ValueVersion,
};
use std::cmp::Ordering;

// ============================================================================
// RESOLUTION
// ============================================================================

/// Values visible while evaluating one source row.
#[derive(Debug, Clone, Copy)]
pub struct RowScope<'a> {
    /// Source entity alias
    pub entity: &'a str,
    /// Context of the check being evaluated
    pub context: EventContext,
    /// Identity key of the source row
    pub identity: &'a str,
    /// Row after the mutation
    pub new: &'a Row,
    /// Row immediately before the mutation, when captured
    pub old: Option<&'a Row>,
}

impl<'a> RowScope<'a> {
    /// Look up a reference.
    ///
    /// Returns `Ok(None)` when the row has no such column. Reading `old:` in a
    /// context other than `on_update`, or without a captured row, is a
    /// configuration error.
    pub fn lookup(&self, field: &FieldRef) -> MarginResult<Option<&'a Value>> {
        match field.version {
            ValueVersion::New => Ok(self.new.get(&field.column)),
            ValueVersion::Old => {
                if !self.context.allows_pre_mutation() {
                    return Err(ConfigError::PreMutationOutsideUpdate {
                        context: self.context,
                        column: field.column.clone(),
                    }
                    .into());
                }
                let old = self.old.ok_or_else(|| ConfigError::MissingPreMutationValue {
                    column: field.column.clone(),
                    identity: self.identity.to_string(),
                })?;
                Ok(old.get(&field.column))
            }
        }
    }

    /// Look up a reference that must exist.
    pub fn resolve(&self, field: &FieldRef) -> MarginResult<&'a Value> {
        self.lookup(field)?.ok_or_else(|| {
            ConfigError::UnknownColumn {
                entity: self.entity.to_string(),
                column: field.to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Evaluate a predicate for one row. An empty group always holds.
///
/// Every member is evaluated, so configuration errors surface even when an
/// earlier member already decided the result.
pub fn evaluate(group: &ConditionGroup, scope: &RowScope<'_>) -> MarginResult<bool> {
    if group.is_empty() {
        return Ok(true);
    }

    let mut results = Vec::with_capacity(group.conditions.len() + group.groups.len());
    for condition in &group.conditions {
        results.push(evaluate_condition(condition, scope)?);
    }
    for nested in &group.groups {
        if !nested.is_empty() {
            results.push(evaluate(nested, scope)?);
        }
    }

    Ok(match group.operator {
        LogicalOperator::And => results.iter().all(|r| *r),
        LogicalOperator::Or => results.iter().any(|r| *r),
    })
}

/// Evaluate a single condition.
pub fn evaluate_condition(condition: &Condition, scope: &RowScope<'_>) -> MarginResult<bool> {
    let left = scope.resolve(&condition.field_ref())?;
    compare(condition.comparator, left, &condition.value)
}

/// Apply a comparator to a row value (left) and a configured literal (right).
pub fn compare(comparator: Comparator, left: &Value, right: &Value) -> MarginResult<bool> {
    match comparator {
        Comparator::Equals => Ok(strict_eq(left, right)),
        Comparator::NotEquals => Ok(!strict_eq(left, right)),
        Comparator::Is => Ok(loose_is(left, right)),
        Comparator::IsNot => Ok(!loose_is(left, right)),
        Comparator::In => Ok(list_of(right).iter().any(|item| strict_eq(left, item))),
        Comparator::NotIn => Ok(!list_of(right).iter().any(|item| strict_eq(left, item))),
        Comparator::LessThan
        | Comparator::LessThanOrEquals
        | Comparator::GreaterThan
        | Comparator::GreaterThanOrEquals => {
            // Nothing is ordered against an empty value.
            if left.is_null() || right.is_null() {
                return Ok(false);
            }
            let ordering = order(left, right).ok_or_else(|| ConfigError::IncomparableValues {
                comparator: comparator.symbol().to_string(),
                left: left.to_string(),
                right: right.to_string(),
            })?;
            Ok(match comparator {
                Comparator::LessThan => ordering == Ordering::Less,
                Comparator::LessThanOrEquals => ordering != Ordering::Greater,
                Comparator::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

/// Numeric view of a value. Numeric strings count as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return left.is_null() && right.is_null();
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => identity_key(left) == identity_key(right),
    }
}

fn loose_is(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l == r;
    }
    let needle = identity_key(right).to_lowercase();
    let haystack = identity_key(left).to_lowercase();
    if needle.is_empty() {
        return haystack.is_empty();
    }
    haystack.contains(&needle)
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => match (left, right) {
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            _ => None,
        },
    }
}

/// List operand of `[` and `![`: an array, or a comma-separated string.
fn list_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(|item| Value::String(item.trim().to_string()))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_negated_comparators_are_complements(a in -1000i64..1000, b in -1000i64..1000) {
            let (l, r) = (json!(a), json!(b));
            prop_assert_eq!(
                compare(Comparator::Equals, &l, &r).unwrap(),
                !compare(Comparator::NotEquals, &l, &r).unwrap()
            );
            prop_assert_eq!(
                compare(Comparator::Is, &l, &r).unwrap(),
                !compare(Comparator::IsNot, &l, &r).unwrap()
            );
            prop_assert_eq!(
                compare(Comparator::LessThan, &l, &r).unwrap(),
                !compare(Comparator::GreaterThanOrEquals, &l, &r).unwrap()
            );
        }

        #[test]
        fn prop_numbers_and_numeric_strings_agree(a in -1000i64..1000, b in -1000i64..1000) {
            for cmp in [Comparator::Equals, Comparator::LessThan, Comparator::GreaterThanOrEquals] {
                prop_assert_eq!(
                    compare(cmp, &json!(a), &json!(b)).unwrap(),
                    compare(cmp, &json!(a.to_string()), &json!(b)).unwrap()
                );
            }
        }

        #[test]
        fn prop_in_matches_membership(a in 0i64..20, list in prop::collection::vec(0i64..20, 0..8)) {
            let expected = list.contains(&a);
            prop_assert_eq!(compare(Comparator::In, &json!(a), &json!(list)).unwrap(), expected);
            prop_assert_eq!(compare(Comparator::NotIn, &json!(a), &json!(list)).unwrap(), !expected);
        }
    }
}
