//! Event contexts and mutation kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation applied to a source row-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Event context a check is registered under.
///
/// Determines for which mutations a check runs and whether pre-mutation
/// values (`old:<column>`) may be referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventContext {
    OnCreate,
    OnUpdate,
    OnAny,
}

impl EventContext {
    /// All contexts in configuration order.
    pub const ALL: [EventContext; 3] = [
        EventContext::OnCreate,
        EventContext::OnUpdate,
        EventContext::OnAny,
    ];

    /// Contexts whose checks run for a given mutation.
    ///
    /// Deletes run no checks; they only clear previous output.
    pub fn for_mutation(kind: MutationKind) -> &'static [EventContext] {
        match kind {
            MutationKind::Create => &[EventContext::OnCreate, EventContext::OnAny],
            MutationKind::Update => &[EventContext::OnUpdate, EventContext::OnAny],
            MutationKind::Delete => &[],
        }
    }

    /// Whether checks in this context may see pre-mutation values.
    pub fn allows_pre_mutation(self) -> bool {
        matches!(self, EventContext::OnUpdate)
    }

    /// Configuration key for this context.
    pub fn as_str(self) -> &'static str {
        match self {
            EventContext::OnCreate => "on_create",
            EventContext::OnUpdate => "on_update",
            EventContext::OnAny => "on_any",
        }
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
