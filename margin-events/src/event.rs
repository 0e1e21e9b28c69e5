//! Mutation lifecycle events.

use margin_core::{MutationKind, RowSet};
use std::fmt;

/// Point in a mutation's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    /// Before the store applies the mutation
    Before,
    /// After the mutation has committed
    After,
    /// The store rejected the mutation
    Failed,
}

/// Name a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    /// Any mutation kind failed
    MutationFailed,
}

impl EventName {
    pub fn of(phase: EventPhase, kind: MutationKind) -> Self {
        match (phase, kind) {
            (EventPhase::Before, MutationKind::Create) => EventName::BeforeCreate,
            (EventPhase::After, MutationKind::Create) => EventName::AfterCreate,
            (EventPhase::Before, MutationKind::Update) => EventName::BeforeUpdate,
            (EventPhase::After, MutationKind::Update) => EventName::AfterUpdate,
            (EventPhase::Before, MutationKind::Delete) => EventName::BeforeDelete,
            (EventPhase::After, MutationKind::Delete) => EventName::AfterDelete,
            (EventPhase::Failed, _) => EventName::MutationFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::BeforeCreate => "before_create",
            EventName::AfterCreate => "after_create",
            EventName::BeforeUpdate => "before_update",
            EventName::AfterUpdate => "after_update",
            EventName::BeforeDelete => "before_delete",
            EventName::AfterDelete => "after_delete",
            EventName::MutationFailed => "mutation_failed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event carrying the row-set of a mutation batch.
///
/// For `Before*` events the rows are the batch as submitted. For `After*`
/// events they are the rows as stored, with identities assigned and, for
/// updates, every column re-read after commit.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub phase: EventPhase,
    pub kind: MutationKind,
    pub rows: RowSet,
}

impl DataEvent {
    pub fn new(phase: EventPhase, kind: MutationKind, rows: RowSet) -> Self {
        Self { phase, kind, rows }
    }

    pub fn before(kind: MutationKind, rows: RowSet) -> Self {
        Self::new(EventPhase::Before, kind, rows)
    }

    pub fn after(kind: MutationKind, rows: RowSet) -> Self {
        Self::new(EventPhase::After, kind, rows)
    }

    pub fn failed(kind: MutationKind, rows: RowSet) -> Self {
        Self::new(EventPhase::Failed, kind, rows)
    }

    pub fn name(&self) -> EventName {
        EventName::of(self.phase, self.kind)
    }

    pub fn entity(&self) -> &str {
        self.rows.entity()
    }
}
