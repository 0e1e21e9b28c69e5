//! margin Events - Mutation Lifecycle Dispatch
//!
//! This crate carries the events fired around every source-entity mutation
//! and the registry listeners attach to.
//!
//! # Architecture
//!
//! Mutations run through the [`MutationPipeline`], which brackets each store
//! write with `before_*` and `after_*` events:
//!
//! ```text
//! caller ──▶ before_update ──▶ store (unit of work) ──▶ after_update
//!               │                                          │
//!               ▼                                          ▼
//!         listeners (priority desc, then registration order)
//! ```
//!
//! # Key Types
//!
//! - `DataEvent`: phase, mutation kind and the affected row-set
//! - `EventName`: what a listener subscribes to
//! - `EventRegistry`: subscribe/unsubscribe/dispatch
//! - `Subscription`: handle owned by whoever attached a listener

mod event;
mod pipeline;
mod registry;

pub use event::{DataEvent, EventName, EventPhase};
pub use pipeline::MutationPipeline;
pub use registry::{EventListener, EventRegistry, Subscription};
