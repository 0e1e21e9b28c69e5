//! Checklisting behavior
//!
//! Binds a [`CheckList`] to one source entity and runs it on that entity's
//! mutation events:
//!
//! ```text
//! before_update ─▶ Capturing ─▶ Idle
//! after_create  ─┐
//! after_update  ─┴▶ Evaluating ─▶ Reaping ─▶ Writing ─▶ Idle
//! before_delete ───────────────▶ Reaping ─────────────▶ Idle
//! mutation_failed ─▶ captured state dropped
//! ```
//!
//! Reaping and writing share one unit of work, begun fresh for the cycle and
//! independent of the source mutation's. A failure anywhere in the cycle
//! rolls it back and reaches the mutating caller.

use crate::cache::OldStateCache;
use crate::check::{CheckList, ReapTarget};
use crate::engine::{MatchResult, ValidationEngine};
use crate::materialize::OutputMaterializer;
use crate::reaper::StaleEntryReaper;
use chrono::Utc;
use margin_core::{
    BehaviorConfig, ConfigError, EventContext, MarginError, MarginResult, MutationKind, RowSet,
    StorageError, Timestamp, Value,
};
use margin_events::{DataEvent, EventListener, EventName, EventPhase, EventRegistry, Subscription};
use margin_storage::{with_unit_of_work, DataStore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Events a behavior subscribes to on attach.
const LISTENS_TO: [EventName; 5] = [
    EventName::BeforeUpdate,
    EventName::AfterCreate,
    EventName::AfterUpdate,
    EventName::BeforeDelete,
    EventName::MutationFailed,
];

// ============================================================================
// STATE
// ============================================================================

/// Where a behavior instance is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BehaviorPhase {
    #[default]
    Idle,
    /// Reading the pre-update rows
    Capturing,
    /// Running the checks
    Evaluating,
    /// Deleting stale output
    Reaping,
    /// Writing fresh output
    Writing,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub kind: MutationKind,
    pub entity: String,
    /// Distinct identities of the source rows
    pub identities: Vec<Value>,
    /// Checks that matched at least one row
    pub matched_checks: usize,
    /// (check, row) matches
    pub matched_rows: usize,
    /// Rows deleted per target entity
    pub deleted: BTreeMap<String, usize>,
    /// Rows written per target entity
    pub written: BTreeMap<String, usize>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl CycleReport {
    pub fn total_deleted(&self) -> usize {
        self.deleted.values().sum()
    }

    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}

#[derive(Debug, Default)]
struct BehaviorState {
    phase: BehaviorPhase,
    cache: OldStateCache,
    last_report: Option<CycleReport>,
}

// ============================================================================
// BEHAVIOR
// ============================================================================

/// Behavior instance: one check list bound to one source entity.
pub struct ChecklistingBehavior {
    entity: String,
    priority: i32,
    disabled: bool,
    checks: CheckList,
    reap_targets: Vec<ReapTarget>,
    store: Arc<dyn DataStore>,
    state: Mutex<BehaviorState>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl fmt::Debug for ChecklistingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecklistingBehavior")
            .field("entity", &self.entity)
            .field("priority", &self.priority)
            .field("disabled", &self.disabled)
            .field("checks", &self.checks.len())
            .field("reap_targets", &self.reap_targets)
            .finish()
    }
}

impl ChecklistingBehavior {
    /// Bind a check list to a source entity.
    ///
    /// Reap targets are collected here, once per instance.
    pub fn new(
        entity: impl Into<String>,
        checks: CheckList,
        store: Arc<dyn DataStore>,
    ) -> MarginResult<Self> {
        let entity = entity.into();
        if entity.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "entity".to_string(),
            }
            .into());
        }
        let reap_targets = checks.reap_targets()?;

        Ok(Self {
            entity,
            priority: 0,
            disabled: false,
            checks,
            reap_targets,
            store,
            state: Mutex::new(BehaviorState::default()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Build a behavior from its configuration.
    pub fn from_config(config: &BehaviorConfig, store: Arc<dyn DataStore>) -> MarginResult<Self> {
        config.validate()?;
        let checks = CheckList::from_config(config)?;
        Ok(Self::new(config.entity.clone(), checks, store)?
            .with_priority(config.priority)
            .with_disabled(config.disabled))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn checks(&self) -> &CheckList {
        &self.checks
    }

    pub fn reap_targets(&self) -> &[ReapTarget] {
        &self.reap_targets
    }

    /// Current phase.
    pub fn phase(&self) -> MarginResult<BehaviorPhase> {
        Ok(self.lock_state()?.phase)
    }

    /// Report of the last completed cycle.
    pub fn last_report(&self) -> MarginResult<Option<CycleReport>> {
        Ok(self.lock_state()?.last_report.clone())
    }

    /// Whether pre-update rows are currently held.
    pub fn has_captured_state(&self) -> MarginResult<bool> {
        Ok(!self.lock_state()?.cache.is_empty())
    }

    // ------------------------------------------------------------------------
    // Subscription lifecycle
    // ------------------------------------------------------------------------

    /// Subscribe to the lifecycle events of `registry`. Attaching twice is a
    /// no-op.
    pub fn attach(self: &Arc<Self>, registry: &EventRegistry) -> MarginResult<()> {
        let mut subscriptions = self.lock_subscriptions()?;
        if !subscriptions.is_empty() {
            return Ok(());
        }
        for name in LISTENS_TO {
            let listener: Arc<dyn EventListener> = Arc::clone(self) as Arc<dyn EventListener>;
            subscriptions.push(registry.subscribe(name, self.priority, listener)?);
        }

        tracing::info!(entity = %self.entity, priority = self.priority, checks = self.checks.len(), "checklisting behavior attached");
        Ok(())
    }

    /// Remove every subscription from `registry`. Returns how many were removed.
    pub fn detach(&self, registry: &EventRegistry) -> MarginResult<usize> {
        let mut subscriptions = self.lock_subscriptions()?;
        let mut removed = 0;
        for subscription in subscriptions.drain(..) {
            if registry.unsubscribe(&subscription)? {
                removed += 1;
            }
        }

        tracing::info!(entity = %self.entity, removed, "checklisting behavior detached");
        Ok(removed)
    }

    pub fn is_attached(&self) -> MarginResult<bool> {
        Ok(!self.lock_subscriptions()?.is_empty())
    }

    // ------------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------------

    fn capture(&self, rows: &RowSet) -> MarginResult<()> {
        if !self.checks.needs_pre_mutation(EventContext::OnUpdate) {
            return Ok(());
        }
        if !self.enter(BehaviorPhase::Capturing)? {
            return Ok(());
        }

        let snapshot = self.store.read_by_identities(&self.entity, &rows.identities());

        let mut state = self.lock_state()?;
        state.phase = BehaviorPhase::Idle;
        let snapshot = snapshot?;
        tracing::debug!(entity = %self.entity, rows = snapshot.len(), "captured pre-update state");
        state.cache.capture(EventContext::OnUpdate, snapshot);
        Ok(())
    }

    fn discard_captured(&self) -> MarginResult<()> {
        let mut state = self.lock_state()?;
        if !state.cache.is_empty() {
            tracing::debug!(entity = %self.entity, "mutation failed, captured state dropped");
        }
        state.cache.clear();
        Ok(())
    }

    fn run_cycle(&self, kind: MutationKind, rows: &RowSet) -> MarginResult<()> {
        let first = match kind {
            MutationKind::Delete => BehaviorPhase::Reaping,
            _ => BehaviorPhase::Evaluating,
        };
        if !self.enter(first)? {
            return Ok(());
        }

        let captured = self.lock_state().map(|mut s| s.cache.take(EventContext::OnUpdate));
        let outcome = captured.and_then(|captured| {
            let old = match kind {
                MutationKind::Update => captured.as_ref(),
                _ => None,
            };
            self.execute(kind, rows, old)
        });

        let mut state = self.lock_state()?;
        state.phase = BehaviorPhase::Idle;
        state.cache.clear();
        match outcome {
            Ok(report) => {
                tracing::info!(
                    entity = %self.entity,
                    %kind,
                    rows = rows.len(),
                    matched = report.matched_rows,
                    deleted = report.total_deleted(),
                    written = report.total_written(),
                    "checklisting cycle completed"
                );
                state.last_report = Some(report);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(entity = %self.entity, %kind, error = %e, "checklisting cycle failed");
                Err(e)
            }
        }
    }

    fn execute(&self, kind: MutationKind, rows: &RowSet, old: Option<&RowSet>) -> MarginResult<CycleReport> {
        let started_at = Utc::now();
        let identities = rows.required_identities()?;
        let matched = match kind {
            MutationKind::Delete => MatchResult::new(rows.entity()),
            _ => ValidationEngine::evaluate_mutation(&self.checks, kind, rows, old)?,
        };

        let store = self.store.as_ref();
        let (deleted, written) = with_unit_of_work(store, |uow| {
            self.set_phase(BehaviorPhase::Reaping)?;
            let mut deleted: BTreeMap<String, usize> = BTreeMap::new();
            for (target, count) in StaleEntryReaper::reap_all(store, uow, &self.reap_targets, &identities)? {
                *deleted.entry(target.target_entity).or_default() += count;
            }

            let mut written: BTreeMap<String, usize> = BTreeMap::new();
            if !matched.is_empty() {
                self.set_phase(BehaviorPhase::Writing)?;
                let batch = OutputMaterializer::materialize(&matched, store)?;
                for output in batch.iter().filter(|set| !set.is_empty()) {
                    let stored = store.insert(uow, output)?;
                    *written.entry(output.entity().to_string()).or_default() += stored.len();
                }
            }
            Ok((deleted, written))
        })?;

        Ok(CycleReport {
            kind,
            entity: self.entity.clone(),
            identities,
            matched_checks: matched.matched_checks(),
            matched_rows: matched.matched_rows(),
            deleted,
            written,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Move from `Idle` to `phase`. Returns false, leaving the state alone,
    /// when a cycle is already in progress.
    fn enter(&self, phase: BehaviorPhase) -> MarginResult<bool> {
        let mut state = self.lock_state()?;
        if state.phase != BehaviorPhase::Idle {
            tracing::debug!(
                entity = %self.entity,
                current = ?state.phase,
                requested = ?phase,
                "cycle in progress, nested event ignored"
            );
            return Ok(false);
        }
        state.phase = phase;
        Ok(true)
    }

    fn set_phase(&self, phase: BehaviorPhase) -> MarginResult<()> {
        self.lock_state()?.phase = phase;
        Ok(())
    }

    fn lock_state(&self) -> MarginResult<MutexGuard<'_, BehaviorState>> {
        self.state
            .lock()
            .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))
    }

    fn lock_subscriptions(&self) -> MarginResult<MutexGuard<'_, Vec<Subscription>>> {
        self.subscriptions
            .lock()
            .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))
    }
}

impl EventListener for ChecklistingBehavior {
    fn handle(&self, event: &DataEvent) -> MarginResult<()> {
        if self.disabled {
            tracing::trace!(entity = %self.entity, event = %event.name(), "behavior disabled");
            return Ok(());
        }
        if event.entity() != self.entity {
            return Ok(());
        }

        match (event.phase, event.kind) {
            (EventPhase::Before, MutationKind::Update) => self.capture(&event.rows),
            (EventPhase::After, MutationKind::Create | MutationKind::Update) => {
                self.run_cycle(event.kind, &event.rows)
            }
            (EventPhase::Before, MutationKind::Delete) => self.run_cycle(MutationKind::Delete, &event.rows),
            (EventPhase::Failed, _) => self.discard_captured(),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::{CheckDefinition, Comparator, Condition, ConditionGroup, OutputDefinition, Row};
    use margin_storage::{EntitySchema, MockStore};
    use serde_json::json;

    fn store() -> MockStore {
        let store = MockStore::new();
        store.register(EntitySchema::new("ORDER_POS", "ID")).unwrap();
        store
            .register(EntitySchema::new("CHECKLIST", "UID").with_generated_identity())
            .unwrap();
        store
    }

    fn config() -> BehaviorConfig {
        BehaviorConfig::new("ORDER_POS").with_check(
            EventContext::OnAny,
            CheckDefinition {
                name: Some("low-state".into()),
                affected_identity_column: "AFFECTED_UID".into(),
                output: OutputDefinition {
                    target_entity: "CHECKLIST".into(),
                    rows: vec![serde_json::from_value(json!({"LABEL": "Error", "AFFECTED_UID": "new:ID"})).unwrap()],
                },
                predicate: ConditionGroup::and().with_condition(Condition::new(
                    "LIFECYCLE_STATE",
                    Comparator::LessThan,
                    50,
                )),
            },
        )
    }

    fn created(id: i64, state: i64) -> DataEvent {
        DataEvent::after(
            MutationKind::Create,
            RowSet::new("ORDER_POS", "ID")
                .with_rows(vec![Row::new().with("ID", id).with("LIFECYCLE_STATE", state)]),
        )
    }

    #[test]
    fn test_cycle_writes_and_reports() {
        let store = store();
        let behavior = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone())).unwrap();

        behavior.handle(&created(42, 30)).unwrap();

        assert_eq!(store.count("CHECKLIST").unwrap(), 1);
        let report = behavior.last_report().unwrap().unwrap();
        assert_eq!(report.kind, MutationKind::Create);
        assert_eq!(report.identities, vec![json!(42)]);
        assert_eq!(report.matched_checks, 1);
        assert_eq!(report.written.get("CHECKLIST"), Some(&1));
        assert_eq!(report.total_deleted(), 0);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(behavior.phase().unwrap(), BehaviorPhase::Idle);
    }

    #[test]
    fn test_nested_event_is_ignored_while_in_progress() {
        let store = store();
        let behavior = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone())).unwrap();
        behavior.set_phase(BehaviorPhase::Writing).unwrap();

        behavior.handle(&created(42, 30)).unwrap();

        assert_eq!(store.count("CHECKLIST").unwrap(), 0);
        assert_eq!(behavior.phase().unwrap(), BehaviorPhase::Writing);
        assert!(behavior.last_report().unwrap().is_none());
    }

    #[test]
    fn test_disabled_and_irrelevant_events_are_ignored() {
        let store = store();
        let disabled = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone()))
            .unwrap()
            .with_disabled(true);
        disabled.handle(&created(42, 30)).unwrap();
        assert_eq!(store.count("CHECKLIST").unwrap(), 0);

        let behavior = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone())).unwrap();
        let other = DataEvent::after(
            MutationKind::Create,
            RowSet::new("INVOICE", "ID").with_rows(vec![Row::new().with("ID", 1)]),
        );
        behavior.handle(&other).unwrap();
        assert!(behavior.last_report().unwrap().is_none());
    }

    #[test]
    fn test_failed_cycle_returns_to_idle() {
        let store = store();
        let behavior = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone())).unwrap();
        let missing_column = DataEvent::after(
            MutationKind::Create,
            RowSet::new("ORDER_POS", "ID").with_rows(vec![Row::new().with("ID", 1)]),
        );

        assert!(behavior.handle(&missing_column).unwrap_err().is_configuration());
        assert_eq!(behavior.phase().unwrap(), BehaviorPhase::Idle);
        assert!(behavior.last_report().unwrap().is_none());
    }

    #[test]
    fn test_delete_without_identity_is_rejected() {
        let store = store();
        let behavior = ChecklistingBehavior::from_config(&config(), Arc::new(store.clone())).unwrap();
        behavior.handle(&created(42, 30)).unwrap();
        let deleting = DataEvent::before(
            MutationKind::Delete,
            RowSet::new("ORDER_POS", "ID").with_rows(vec![Row::new().with("ID", 42), Row::new()]),
        );

        assert_eq!(
            behavior.handle(&deleting).unwrap_err(),
            MarginError::Config(ConfigError::MissingIdentity {
                entity: "ORDER_POS".into(),
                column: "ID".into(),
                row: 1,
            })
        );
        assert_eq!(store.count("CHECKLIST").unwrap(), 1);
        assert_eq!(behavior.phase().unwrap(), BehaviorPhase::Idle);
    }

    #[test]
    fn test_attach_detach() {
        let store = store();
        let registry = EventRegistry::new();
        let behavior = Arc::new(
            ChecklistingBehavior::from_config(&config(), Arc::new(store)).unwrap(),
        );

        behavior.attach(&registry).unwrap();
        behavior.attach(&registry).unwrap();
        assert!(behavior.is_attached().unwrap());
        assert_eq!(registry.listener_count(EventName::AfterCreate).unwrap(), 1);

        assert_eq!(behavior.detach(&registry).unwrap(), 5);
        assert!(!behavior.is_attached().unwrap());
        assert_eq!(registry.listener_count(EventName::AfterCreate).unwrap(), 0);
    }

    #[test]
    fn test_missing_entity_is_rejected() {
        let err = ChecklistingBehavior::new(" ", CheckList::new(), Arc::new(store())).unwrap_err();
        assert!(err.is_configuration());
    }
}
