//! Predicate definitions
//!
//! A predicate is a tree of condition groups. Each group combines its
//! conditions and nested groups with AND or OR. Evaluation lives in
//! `margin-checks`; this module only describes the shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparator for a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// Strictly equal
    #[serde(rename = "==")]
    Equals,
    /// Strictly not equal
    #[serde(rename = "!==")]
    NotEquals,
    /// Less than
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal
    #[serde(rename = "<=")]
    LessThanOrEquals,
    /// Greater than
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
    /// Case-insensitive "is": equal numbers, or substring for text
    #[serde(rename = "=")]
    Is,
    /// Negation of `Is`
    #[serde(rename = "!=")]
    IsNot,
    /// Value is one of a list
    #[serde(rename = "[")]
    In,
    /// Value is none of a list
    #[serde(rename = "![")]
    NotIn,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Equals => "==",
            Comparator::NotEquals => "!==",
            Comparator::LessThan => "<",
            Comparator::LessThanOrEquals => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterThanOrEquals => ">=",
            Comparator::Is => "=",
            Comparator::IsNot => "!=",
            Comparator::In => "[",
            Comparator::NotIn => "![",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Logical operator joining the members of a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// Which version of a column a reference reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueVersion {
    /// Value after the mutation was applied
    New,
    /// Value immediately before the mutation was applied
    Old,
}

/// Parsed column reference: `COLUMN`, `new:COLUMN` or `old:COLUMN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub column: String,
    pub version: ValueVersion,
}

impl FieldRef {
    /// Parse a reference. A bare column name reads the post-mutation value.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        if let Some(column) = reference.strip_prefix("old:") {
            return Self {
                column: column.to_string(),
                version: ValueVersion::Old,
            };
        }
        let column = reference.strip_prefix("new:").unwrap_or(reference);
        Self {
            column: column.to_string(),
            version: ValueVersion::New,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            ValueVersion::New => write!(f, "new:{}", self.column),
            ValueVersion::Old => write!(f, "old:{}", self.column),
        }
    }
}

/// One comparison of a column against a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column reference, see [`FieldRef`]
    #[serde(alias = "expression")]
    pub field: String,
    pub comparator: Comparator,
    /// Literal to compare against (JSON value for flexibility)
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            comparator,
            value: value.into(),
        }
    }

    pub fn field_ref(&self) -> FieldRef {
        FieldRef::parse(&self.field)
    }
}

/// Boolean combination of conditions and nested groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ConditionGroup>,
}

impl ConditionGroup {
    pub fn and() -> Self {
        Self::default()
    }

    pub fn or() -> Self {
        Self {
            operator: LogicalOperator::Or,
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.iter().all(ConditionGroup::is_empty)
    }

    /// Every column reference in this group and its nested groups.
    pub fn field_refs(&self) -> Vec<FieldRef> {
        let mut refs: Vec<FieldRef> = self.conditions.iter().map(Condition::field_ref).collect();
        for group in &self.groups {
            refs.extend(group.field_refs());
        }
        refs
    }

    /// Whether any condition reads a pre-mutation value.
    pub fn references_old_values(&self) -> bool {
        self.field_refs()
            .iter()
            .any(|r| r.version == ValueVersion::Old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_ref_parse() {
        assert_eq!(
            FieldRef::parse("STATE"),
            FieldRef { column: "STATE".into(), version: ValueVersion::New }
        );
        assert_eq!(FieldRef::parse("new:STATE").version, ValueVersion::New);
        let old = FieldRef::parse(" old:STATE ");
        assert_eq!(old.version, ValueVersion::Old);
        assert_eq!(old.column, "STATE");
        assert_eq!(old.to_string(), "old:STATE");
    }

    #[test]
    fn test_condition_group_deserializes_symbols() {
        let group: ConditionGroup = serde_json::from_value(json!({
            "operator": "OR",
            "conditions": [
                {"field": "LIFECYCLE_STATE", "comparator": "<", "value": 50},
                {"expression": "old:LABEL", "comparator": "![", "value": ["a", "b"]}
            ]
        }))
        .expect("valid predicate");

        assert_eq!(group.operator, LogicalOperator::Or);
        assert_eq!(group.conditions[0].comparator, Comparator::LessThan);
        assert_eq!(group.conditions[1].comparator, Comparator::NotIn);
        assert!(group.references_old_values());
    }

    #[test]
    fn test_nested_groups_collect_refs() {
        let group = ConditionGroup::and()
            .with_condition(Condition::new("A", Comparator::Equals, 1))
            .with_group(ConditionGroup::or().with_condition(Condition::new(
                "old:B",
                Comparator::Is,
                "x",
            )));
        let refs = group.field_refs();
        assert_eq!(refs.len(), 2);
        assert!(group.references_old_values());
        assert!(!group.is_empty());
        assert!(ConditionGroup::and().is_empty());
    }
}
