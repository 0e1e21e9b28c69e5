//! Checks and check lists
//!
//! A [`Check`] is one configured rule. Checks that produce output carry an
//! [`OutputSpec`]; plain validating checks only match. A [`CheckList`] holds
//! the ordered checks of every event context and knows which
//! `(target entity, affected-identity column)` pairs must be reaped.

use crate::template;
use margin_core::{
    BehaviorConfig, CheckDefinition, ConditionGroup, ConfigError, EventContext, FieldRef,
    MarginResult, Value, ValueVersion,
};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// CHECK
// ============================================================================

/// Where a check's findings go and what they look like.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    /// Column of the target entity that links back to the source row
    pub affected_identity_column: String,
    /// Entity the rendered rows are written to
    pub target_entity: String,
    /// Row templates: target column -> literal or placeholder
    pub rows: Vec<BTreeMap<String, Value>>,
}

impl OutputSpec {
    pub fn reap_target(&self) -> ReapTarget {
        ReapTarget::new(&self.target_entity, &self.affected_identity_column)
    }
}

/// Capability of a check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    /// Matches rows without producing output
    Validating,
    /// Renders output rows for every matched row
    WithOutput(OutputSpec),
}

/// One configured rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: String,
    pub context: EventContext,
    pub predicate: ConditionGroup,
    pub kind: CheckKind,
}

impl Check {
    /// Plain validating check.
    pub fn validating(
        name: impl Into<String>,
        context: EventContext,
        predicate: ConditionGroup,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            predicate,
            kind: CheckKind::Validating,
        }
    }

    /// Output-producing check built from its configuration.
    ///
    /// `index` is the position within the context and names unnamed checks.
    pub fn from_definition(
        context: EventContext,
        index: usize,
        definition: &CheckDefinition,
    ) -> MarginResult<Self> {
        let path = format!("{}[{}]", context, index);
        let affected = definition.affected_identity_column.trim();
        if affected.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: format!("{}.affected_identity_column", path),
            }
            .into());
        }
        let target = definition.output.target_entity.trim();
        if target.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: format!("{}.output.target_entity", path),
            }
            .into());
        }

        Ok(Self {
            name: definition.name.clone().unwrap_or(path),
            context,
            predicate: definition.predicate.clone(),
            kind: CheckKind::WithOutput(OutputSpec {
                affected_identity_column: affected.to_string(),
                target_entity: target.to_string(),
                rows: definition.output.rows.clone(),
            }),
        })
    }

    pub fn produces_output(&self) -> bool {
        matches!(self.kind, CheckKind::WithOutput(_))
    }

    pub fn output(&self) -> Option<&OutputSpec> {
        match &self.kind {
            CheckKind::WithOutput(spec) => Some(spec),
            CheckKind::Validating => None,
        }
    }

    /// Every column reference in the predicate and the output templates.
    pub fn field_refs(&self) -> Vec<FieldRef> {
        let mut refs = self.predicate.field_refs();
        if let Some(output) = self.output() {
            for row in &output.rows {
                refs.extend(row.values().flat_map(template::field_refs));
            }
        }
        refs
    }

    /// Whether the predicate or an output template reads a pre-mutation value.
    pub fn references_old_values(&self) -> bool {
        self.predicate.references_old_values()
            || self.output().is_some_and(|output| {
                output
                    .rows
                    .iter()
                    .flat_map(|row| row.values())
                    .flat_map(template::field_refs)
                    .any(|r| r.version == ValueVersion::Old)
            })
    }

    /// Reject `old:` references when the check runs in a context without a
    /// pre-mutation row.
    pub fn ensure_context(&self, context: EventContext) -> MarginResult<()> {
        if context.allows_pre_mutation() {
            return Ok(());
        }
        match self
            .field_refs()
            .into_iter()
            .find(|r| r.version == ValueVersion::Old)
        {
            Some(reference) => Err(ConfigError::PreMutationOutsideUpdate {
                context,
                column: reference.column,
            }
            .into()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// REAP TARGETS
// ============================================================================

/// A target entity and the column in it that holds source identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReapTarget {
    pub target_entity: String,
    pub affected_identity_column: String,
}

impl ReapTarget {
    pub fn new(target_entity: impl Into<String>, affected_identity_column: impl Into<String>) -> Self {
        Self {
            target_entity: target_entity.into(),
            affected_identity_column: affected_identity_column.into(),
        }
    }
}

// ============================================================================
// CHECK LIST
// ============================================================================

/// Ordered checks per event context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckList {
    checks: BTreeMap<EventContext, Vec<Check>>,
}

impl CheckList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the check list of a behavior configuration.
    pub fn from_config(config: &BehaviorConfig) -> MarginResult<Self> {
        let mut list = Self::new();
        for context in EventContext::ALL {
            for (index, definition) in config.checks_for(context).iter().enumerate() {
                list.push(Check::from_definition(context, index, definition)?);
            }
        }
        Ok(list)
    }

    /// Append a check under its own context.
    pub fn push(&mut self, check: Check) {
        self.checks.entry(check.context).or_default().push(check);
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.push(check);
        self
    }

    /// Checks registered under one context, in configuration order.
    pub fn checks_for(&self, context: EventContext) -> &[Check] {
        self.checks.get(&context).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any check of `context` reads pre-mutation values.
    pub fn needs_pre_mutation(&self, context: EventContext) -> bool {
        self.checks_for(context).iter().any(Check::references_old_values)
    }

    /// All checks, contexts in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.checks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct reap targets across every context, in encounter order.
    ///
    /// Validating checks contribute nothing. An output check with an empty
    /// target entity or affected-identity column is a configuration error.
    pub fn reap_targets(&self) -> MarginResult<Vec<ReapTarget>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for check in self.iter() {
            let Some(output) = check.output() else {
                continue;
            };
            if output.target_entity.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: format!("{}.output.target_entity", check.name),
                }
                .into());
            }
            if output.affected_identity_column.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: format!("{}.affected_identity_column", check.name),
                }
                .into());
            }
            let target = output.reap_target();
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::{Comparator, Condition, MarginError, OutputDefinition};
    use serde_json::json;

    fn definition(target: &str, affected: &str, row: Value) -> CheckDefinition {
        CheckDefinition {
            name: None,
            affected_identity_column: affected.to_string(),
            output: OutputDefinition {
                target_entity: target.to_string(),
                rows: vec![serde_json::from_value(row).unwrap()],
            },
            predicate: ConditionGroup::and().with_condition(Condition::new(
                "LIFECYCLE_STATE",
                Comparator::LessThan,
                50,
            )),
        }
    }

    #[test]
    fn test_from_config_keeps_context_order() {
        let config = BehaviorConfig::new("ORDER_POS")
            .with_check(
                EventContext::OnAny,
                definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "any"})),
            )
            .with_check(
                EventContext::OnCreate,
                definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "create"})),
            );
        let list = CheckList::from_config(&config).unwrap();

        assert_eq!(list.len(), 2);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["on_create[0]", "on_any[0]"]);
        assert!(list.checks_for(EventContext::OnUpdate).is_empty());
    }

    #[test]
    fn test_reap_targets_are_distinct_pairs() {
        let config = BehaviorConfig::new("ORDER_POS")
            .with_check(
                EventContext::OnCreate,
                definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "a"})),
            )
            .with_check(
                EventContext::OnUpdate,
                definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "b"})),
            )
            .with_check(
                EventContext::OnAny,
                definition("CHECKLIST", "SOURCE_ID", json!({"LABEL": "c"})),
            )
            .with_check(
                EventContext::OnAny,
                definition("HINTS", "AFFECTED_UID", json!({"LABEL": "d"})),
            );
        let mut list = CheckList::from_config(&config).unwrap();
        list.push(Check::validating("plain", EventContext::OnAny, ConditionGroup::and()));

        assert_eq!(
            list.reap_targets().unwrap(),
            vec![
                ReapTarget::new("CHECKLIST", "AFFECTED_UID"),
                ReapTarget::new("CHECKLIST", "SOURCE_ID"),
                ReapTarget::new("HINTS", "AFFECTED_UID"),
            ]
        );
    }

    #[test]
    fn test_missing_required_fields() {
        let err = Check::from_definition(
            EventContext::OnUpdate,
            2,
            &definition("CHECKLIST", " ", json!({"LABEL": "x"})),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MarginError::Config(ConfigError::MissingRequired {
                field: "on_update[2].affected_identity_column".into()
            })
        );

        let err = Check::from_definition(
            EventContext::OnCreate,
            0,
            &definition("", "AFFECTED_UID", json!({"LABEL": "x"})),
        )
        .unwrap_err();
        assert!(matches!(err, MarginError::Config(ConfigError::MissingRequired { .. })));
    }

    #[test]
    fn test_ad_hoc_check_with_empty_target_fails_reap() {
        let list = CheckList::new().with_check(Check {
            name: "ad-hoc".into(),
            context: EventContext::OnAny,
            predicate: ConditionGroup::and(),
            kind: CheckKind::WithOutput(OutputSpec {
                affected_identity_column: "AFFECTED_UID".into(),
                target_entity: String::new(),
                rows: Vec::new(),
            }),
        });
        assert!(list.reap_targets().is_err());
    }

    #[test]
    fn test_ensure_context_finds_old_refs_in_templates() {
        let check = Check::from_definition(
            EventContext::OnAny,
            0,
            &definition(
                "CHECKLIST",
                "AFFECTED_UID",
                json!({"MESSAGE": "was [#~old:LIFECYCLE_STATE#]"}),
            ),
        )
        .unwrap();

        assert!(check.ensure_context(EventContext::OnUpdate).is_ok());
        assert_eq!(
            check.ensure_context(EventContext::OnAny).unwrap_err(),
            MarginError::Config(ConfigError::PreMutationOutsideUpdate {
                context: EventContext::OnAny,
                column: "LIFECYCLE_STATE".into(),
            })
        );
        assert!(check.produces_output());
        assert!(!Check::validating("v", EventContext::OnAny, ConditionGroup::and()).produces_output());
    }

    #[test]
    fn test_needs_pre_mutation_sees_predicate_and_templates() {
        let plain = definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "new:ID"}));
        let in_template = definition("CHECKLIST", "AFFECTED_UID", json!({"LABEL": "was old:LIFECYCLE_STATE"}));
        let mut embedded = plain.clone();
        embedded.output.rows[0].insert("MESSAGE".into(), json!("[#~old:QTY#] left"));
        let mut in_predicate = plain.clone();
        in_predicate.predicate = ConditionGroup::or().with_group(
            ConditionGroup::and().with_condition(Condition::new("old:QTY", Comparator::GreaterThan, 0)),
        );

        let list = |d: &CheckDefinition| {
            CheckList::from_config(&BehaviorConfig::new("ORDER_POS").with_check(EventContext::OnUpdate, d.clone()))
                .unwrap()
        };
        assert!(!list(&plain).needs_pre_mutation(EventContext::OnUpdate));
        // Text that merely contains "old:" is a literal, not a reference.
        assert!(!list(&in_template).needs_pre_mutation(EventContext::OnUpdate));
        assert!(list(&embedded).needs_pre_mutation(EventContext::OnUpdate));
        assert!(list(&in_predicate).needs_pre_mutation(EventContext::OnUpdate));
        assert!(!list(&in_predicate).needs_pre_mutation(EventContext::OnCreate));
    }
}
