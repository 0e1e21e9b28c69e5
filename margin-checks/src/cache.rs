//! Old-state cache
//!
//! Holds the row-set captured right before an update is applied, keyed by
//! event context. One slot per context; a new capture replaces the previous
//! one.

use margin_core::{EventContext, RowSet};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct OldStateCache {
    slots: HashMap<EventContext, RowSet>,
}

impl OldStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, replacing any earlier one for the same context.
    pub fn capture(&mut self, context: EventContext, rows: RowSet) {
        self.slots.insert(context, rows);
    }

    /// Last snapshot captured for a context.
    pub fn retrieve(&self, context: EventContext) -> Option<&RowSet> {
        self.slots.get(&context)
    }

    /// Remove and return the snapshot for a context.
    pub fn take(&mut self, context: EventContext) -> Option<RowSet> {
        self.slots.remove(&context)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
