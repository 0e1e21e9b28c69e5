//! margin Checks - Event-Driven Checklisting Engine
//!
//! Keeps a derived "findings" dataset consistent with a source entity. On
//! every create, update or delete of source rows the engine evaluates the
//! configured checks, deletes the findings previously written for those rows
//! and writes the fresh ones, all in one unit of work.
//!
//! # Architecture
//!
//! ```text
//! DataEvent ─▶ ChecklistingBehavior
//!                 │  before_update: OldStateCache::capture
//!                 ▼
//!              ValidationEngine ─▶ MatchResult
//!                 │
//!                 ▼
//!              StaleEntryReaper ─▶ OutputMaterializer ─▶ DataStore::insert
//!              └──────────── one UnitOfWork ─────────────┘
//! ```
//!
//! # Key Types
//!
//! - `Check` / `CheckList`: configured rules per event context
//! - `ValidationEngine`: predicate evaluation over a row-set
//! - `OutputMaterializer`: templated output rows grouped by target entity
//! - `StaleEntryReaper`: delete-by-affected-identity
//! - `ChecklistingBehavior`: the per-entity state machine and subscriptions

mod behavior;
mod cache;
mod check;
mod engine;
mod materialize;
pub mod predicate;
mod reaper;
pub mod template;

pub use behavior::{BehaviorPhase, ChecklistingBehavior, CycleReport};
pub use cache::OldStateCache;
pub use check::{Check, CheckKind, CheckList, OutputSpec, ReapTarget};
pub use engine::{CheckMatch, MatchResult, MatchedRow, ValidationEngine};
pub use materialize::{OutputBatch, OutputMaterializer};
pub use predicate::RowScope;
pub use reaper::StaleEntryReaper;
