//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output template of a check: where findings go and what they look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
    /// Entity the rendered rows are written to
    #[serde(alias = "object_alias")]
    pub target_entity: String,
    /// Row templates: target column -> literal or placeholder
    pub rows: Vec<BTreeMap<String, Value>>,
}

/// One configured check.
///
/// The predicate is either nested under `predicate` or given flat, with
/// `operator`, `conditions` and `groups` next to the output definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCheckDefinition")]
pub struct CheckDefinition {
    /// Optional label used in logs and reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Column of the target entity that holds the source row's identity
    pub affected_identity_column: String,
    pub output: OutputDefinition,
    pub predicate: ConditionGroup,
}

#[derive(Deserialize)]
struct RawCheckDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(alias = "affected_uid_alias")]
    affected_identity_column: String,
    #[serde(alias = "output_data_sheet")]
    output: OutputDefinition,
    #[serde(default)]
    predicate: Option<ConditionGroup>,
    #[serde(default)]
    operator: Option<LogicalOperator>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    groups: Vec<ConditionGroup>,
}

impl From<RawCheckDefinition> for CheckDefinition {
    fn from(raw: RawCheckDefinition) -> Self {
        // A nested predicate wins over flat members.
        let predicate = raw.predicate.unwrap_or(ConditionGroup {
            operator: raw.operator.unwrap_or_default(),
            conditions: raw.conditions,
            groups: raw.groups,
        });
        Self {
            name: raw.name,
            affected_identity_column: raw.affected_identity_column,
            output: raw.output,
            predicate,
        }
    }
}

/// Configuration of one checklisting behavior.
///
/// Required: `entity`. Each context holds an ordered list of checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Source entity whose mutations trigger the checks
    pub entity: String,
    /// Listener priority; higher runs first
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, alias = "check_on_create")]
    pub on_create: Vec<CheckDefinition>,
    #[serde(default, alias = "check_on_update")]
    pub on_update: Vec<CheckDefinition>,
    #[serde(default, alias = "check_always")]
    pub on_any: Vec<CheckDefinition>,
}

impl BehaviorConfig {
    /// Empty configuration for an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            priority: 0,
            disabled: false,
            on_create: Vec::new(),
            on_update: Vec::new(),
            on_any: Vec::new(),
        }
    }

    /// Add a check under a context.
    pub fn with_check(mut self, context: EventContext, check: CheckDefinition) -> Self {
        match context {
            EventContext::OnCreate => self.on_create.push(check),
            EventContext::OnUpdate => self.on_update.push(check),
            EventContext::OnAny => self.on_any.push(check),
        }
        self
    }

    /// Checks configured for one context.
    pub fn checks_for(&self, context: EventContext) -> &[CheckDefinition] {
        match context {
            EventContext::OnCreate => &self.on_create,
            EventContext::OnUpdate => &self.on_update,
            EventContext::OnAny => &self.on_any,
        }
    }

    pub fn from_json_str(source: &str) -> MarginResult<Self> {
        serde_json::from_str(source).map_err(|e| parse_error("json", e))
    }

    pub fn from_toml_str(source: &str) -> MarginResult<Self> {
        toml::from_str(source).map_err(|e| parse_error("toml", e))
    }

    pub fn from_yaml_str(source: &str) -> MarginResult<Self> {
        serde_yaml::from_str(source).map_err(|e| parse_error("yaml", e))
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(MarginError::Config) if invalid.
    ///
    /// Validates:
    /// - entity is not empty
    /// - every check names its affected-identity column and target entity
    /// - every check renders at least one row
    pub fn validate(&self) -> MarginResult<()> {
        if self.entity.trim().is_empty() {
            return Err(MarginError::Config(ConfigError::MissingRequired {
                field: "entity".to_string(),
            }));
        }

        for context in EventContext::ALL {
            for (i, check) in self.checks_for(context).iter().enumerate() {
                let path = format!("{}[{}]", context, i);
                if check.affected_identity_column.trim().is_empty() {
                    return Err(MarginError::Config(ConfigError::MissingRequired {
                        field: format!("{}.affected_identity_column", path),
                    }));
                }
                if check.output.target_entity.trim().is_empty() {
                    return Err(MarginError::Config(ConfigError::MissingRequired {
                        field: format!("{}.output.target_entity", path),
                    }));
                }
                if check.output.rows.is_empty() {
                    return Err(MarginError::Config(ConfigError::InvalidValue {
                        field: format!("{}.output.rows", path),
                        value: "[]".to_string(),
                        reason: "output must render at least one row".to_string(),
                    }));
                }
            }
        }

        Ok(())
    }
}

fn parse_error(format: &str, err: impl std::fmt::Display) -> MarginError {
    MarginError::Config(ConfigError::Parse {
        format: format.to_string(),
        reason: err.to_string(),
    })
}
