//! margin Test Utilities
//!
//! Centralized test infrastructure for the margin workspace:
//! - Proptest generators for rows, row-sets and predicates
//! - Fixtures for the order-position / checklist scenario
//! - Custom assertions for margin error kinds and checklist contents
//! - Test logging initialisation

// Re-export the in-memory store from its source crate
pub use margin_storage::{DataStore, EntityCatalog, EntitySchema, FailurePoint, Filter, MockStore};

// Re-export core types for convenience
pub use margin_core::{
    BehaviorConfig, CheckDefinition, Comparator, Condition, ConditionGroup, ConfigError,
    EventContext, MarginError, MarginResult, MutationKind, OutputDefinition, Row, RowSet,
    StorageError, TemplateError, Value,
};

pub use margin_events::{DataEvent, EventName, EventRegistry, MutationPipeline};

// ============================================================================
// LOGGING
// ============================================================================

/// Install a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating margin data.

    use super::*;
    use crate::fixtures::{order_rows, CHECKLIST_LIMIT};
    use proptest::prelude::*;

    /// Generate a source identity.
    pub fn arb_identity() -> impl Strategy<Value = i64> {
        1i64..10_000
    }

    /// Generate a lifecycle state on both sides of the checklist limit.
    pub fn arb_lifecycle_state() -> impl Strategy<Value = i64> {
        prop_oneof![0i64..CHECKLIST_LIMIT, CHECKLIST_LIMIT..100]
    }

    /// Generate an order-position row-set with distinct identities.
    pub fn arb_order_rows(max_rows: usize) -> impl Strategy<Value = RowSet> {
        prop::collection::btree_set(arb_identity(), 1..=max_rows.max(1))
            .prop_flat_map(|ids| {
                let n = ids.len();
                (Just(ids), prop::collection::vec(arb_lifecycle_state(), n))
            })
            .prop_map(|(ids, states)| {
                let pairs: Vec<(i64, i64)> = ids.into_iter().zip(states).collect();
                order_rows(&pairs)
            })
    }

    /// Generate a comparator.
    pub fn arb_comparator() -> impl Strategy<Value = Comparator> {
        prop_oneof![
            Just(Comparator::Equals),
            Just(Comparator::NotEquals),
            Just(Comparator::LessThan),
            Just(Comparator::LessThanOrEquals),
            Just(Comparator::GreaterThan),
            Just(Comparator::GreaterThanOrEquals),
            Just(Comparator::Is),
            Just(Comparator::IsNot),
        ]
    }

    /// Generate a numeric condition on the lifecycle state.
    pub fn arb_state_condition() -> impl Strategy<Value = Condition> {
        (arb_comparator(), 0i64..100)
            .prop_map(|(comparator, value)| Condition::new("LIFECYCLE_STATE", comparator, value))
    }

    /// Generate a mutation kind.
    pub fn arb_mutation_kind() -> impl Strategy<Value = MutationKind> {
        prop_oneof![
            Just(MutationKind::Create),
            Just(MutationKind::Update),
            Just(MutationKind::Delete),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common test scenarios.

    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Source entity.
    pub const ORDER_POS: &str = "ORDER_POS";
    /// Primary findings entity.
    pub const CHECKLIST: &str = "CHECKLIST";
    /// Secondary findings entity.
    pub const HINTS: &str = "HINTS";
    /// Column linking findings back to order positions.
    pub const AFFECTED_UID: &str = "AFFECTED_UID";
    /// Lifecycle states below this produce a checklist entry.
    pub const CHECKLIST_LIMIT: i64 = 50;

    /// Order-position rows from `(ID, LIFECYCLE_STATE)` pairs.
    pub fn order_rows(pairs: &[(i64, i64)]) -> RowSet {
        RowSet::new(ORDER_POS, "ID").with_rows(
            pairs
                .iter()
                .map(|(id, state)| Row::new().with("ID", *id).with("LIFECYCLE_STATE", *state)),
        )
    }

    /// Order-position rows carrying only their identity, as submitted to a delete.
    pub fn order_identities(ids: &[i64]) -> RowSet {
        RowSet::new(ORDER_POS, "ID").with_rows(ids.iter().map(|id| Row::new().with("ID", *id)))
    }

    /// Row template from a JSON object.
    pub fn template(value: Value) -> BTreeMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => panic!("template must be a JSON object, got {other}"),
        }
    }

    /// Check writing to `target` when `condition` holds.
    pub fn check(target: &str, condition: Condition, rows: Vec<Value>) -> CheckDefinition {
        CheckDefinition {
            name: None,
            affected_identity_column: AFFECTED_UID.to_string(),
            output: OutputDefinition {
                target_entity: target.to_string(),
                rows: rows.into_iter().map(template).collect(),
            },
            predicate: ConditionGroup::and().with_condition(condition),
        }
    }

    /// `LIFECYCLE_STATE < 50` writes `{LABEL: Error, AFFECTED_UID: new:ID}`.
    pub fn low_state_check() -> CheckDefinition {
        check(
            CHECKLIST,
            Condition::new("LIFECYCLE_STATE", Comparator::LessThan, CHECKLIST_LIMIT),
            vec![json!({"LABEL": "Error", "AFFECTED_UID": "new:ID"})],
        )
    }

    /// The low-state check registered under one context.
    pub fn scenario_config(context: EventContext) -> BehaviorConfig {
        BehaviorConfig::new(ORDER_POS).with_check(context, low_state_check())
    }

    /// Store with the order-position, checklist and hints entities.
    pub fn scenario_store() -> MockStore {
        let store = MockStore::new();
        let schemas = [
            EntitySchema::new(ORDER_POS, "ID").with_columns(["LIFECYCLE_STATE", "PRODUCT", "QTY"]),
            EntitySchema::new(CHECKLIST, "UID")
                .with_columns(["LABEL", "MESSAGE", AFFECTED_UID, "SOURCE_ID"])
                .with_generated_identity(),
            EntitySchema::new(HINTS, "UID")
                .with_columns(["LABEL", "MESSAGE", AFFECTED_UID])
                .with_generated_identity(),
        ];
        for schema in schemas {
            if let Err(e) = store.register(schema) {
                panic!("fixture schema registration failed: {e}");
            }
        }
        store
    }

    /// Committed rows of `entity` whose `column` holds `identity`.
    pub fn rows_referencing(store: &MockStore, entity: &str, column: &str, identity: Value) -> RowSet {
        match store.read(entity, &Filter::column_in(column, vec![identity])) {
            Ok(rows) => rows,
            Err(e) => panic!("reading {entity} failed: {e}"),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for margin-specific validation.

    use super::*;
    use crate::fixtures::rows_referencing;

    /// Assert that a MarginResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &MarginResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a MarginResult is a configuration error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &MarginResult<T>) {
        match result {
            Err(MarginError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a MarginResult is a templating error.
    #[track_caller]
    pub fn assert_template_error<T: std::fmt::Debug>(result: &MarginResult<T>) {
        match result {
            Err(MarginError::Template(_)) => {}
            other => panic!("Expected Template error, got: {:?}", other),
        }
    }

    /// Assert that a MarginResult is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &MarginResult<T>) {
        match result {
            Err(MarginError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert how many committed rows of `entity` reference a source identity
    /// through the affected-identity column.
    #[track_caller]
    pub fn assert_findings(store: &MockStore, entity: &str, identity: i64, expected: usize) {
        let rows = rows_referencing(store, entity, crate::fixtures::AFFECTED_UID, Value::from(identity));
        assert_eq!(
            rows.len(),
            expected,
            "Expected {} {} rows for source {}, found {:?}",
            expected,
            entity,
            identity,
            rows.rows()
        );
    }
}
