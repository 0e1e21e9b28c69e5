//! margin Core - Row, Predicate and Configuration Types
//!
//! Pure data structures shared by every other crate in the workspace.
//! This crate contains no storage, dispatch or evaluation logic.

mod config;
mod context;
mod error;
mod filter;
mod row;

pub use config::{BehaviorConfig, CheckDefinition, OutputDefinition};
pub use context::{EventContext, MutationKind};
pub use error::{ConfigError, MarginError, MarginResult, StorageError, TemplateError};
pub use filter::{Comparator, Condition, ConditionGroup, FieldRef, LogicalOperator, ValueVersion};
pub use row::{identity_key, Row, RowSet, Value};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a unit of work or subscription.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type RecordId = Uuid;

/// Generate a new UUIDv7 identifier (timestamp-sortable).
pub fn new_record_id() -> RecordId {
    Uuid::now_v7()
}
