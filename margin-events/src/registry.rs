//! Process-wide dispatch registry with explicit subscriptions.
//!
//! Listeners are registered per [`EventName`] with a priority and receive a
//! [`Subscription`] handle that detaches them again. Dispatch runs listeners
//! synchronously, highest priority first, ties in registration order, and
//! stops at the first error.

use crate::{DataEvent, EventName};
use margin_core::{new_record_id, MarginError, MarginResult, RecordId, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Receiver of data events.
pub trait EventListener: Send + Sync {
    /// Handle an event. An error aborts dispatch and reaches the mutating caller.
    fn handle(&self, event: &DataEvent) -> MarginResult<()>;
}

impl<F> EventListener for F
where
    F: Fn(&DataEvent) -> MarginResult<()> + Send + Sync,
{
    fn handle(&self, event: &DataEvent) -> MarginResult<()> {
        self(event)
    }
}

/// Handle returned by [`EventRegistry::subscribe`]. Owned by whoever attached
/// the listener and passed back to [`EventRegistry::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: RecordId,
    name: EventName,
    priority: i32,
}

impl Subscription {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn name(&self) -> EventName {
        self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

struct Registration {
    id: RecordId,
    priority: i32,
    sequence: u64,
    listener: Arc<dyn EventListener>,
}

/// Registry of event listeners.
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<HashMap<EventName, Vec<Registration>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventName, usize> = self
            .listeners
            .read()
            .map(|l| l.iter().map(|(k, v)| (*k, v.len())).collect())
            .unwrap_or_default();
        f.debug_struct("EventRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event name.
    pub fn subscribe(
        &self,
        name: EventName,
        priority: i32,
        listener: Arc<dyn EventListener>,
    ) -> MarginResult<Subscription> {
        let id = new_record_id();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))?;
        let slot = listeners.entry(name).or_default();
        slot.push(Registration {
            id,
            priority,
            sequence,
            listener,
        });
        slot.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.sequence.cmp(&b.sequence))
        });

        tracing::debug!(event = %name, priority, subscription = %id, "listener attached");
        Ok(Subscription { id, name, priority })
    }

    /// Remove a listener. Returns false when it was already detached.
    pub fn unsubscribe(&self, subscription: &Subscription) -> MarginResult<bool> {
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))?;
        let Some(slot) = listeners.get_mut(&subscription.name) else {
            return Ok(false);
        };
        let before = slot.len();
        slot.retain(|r| r.id != subscription.id);
        let removed = slot.len() != before;
        if slot.is_empty() {
            listeners.remove(&subscription.name);
        }

        if removed {
            tracing::debug!(event = %subscription.name, subscription = %subscription.id, "listener detached");
        }
        Ok(removed)
    }

    /// Number of listeners registered for an event name.
    pub fn listener_count(&self, name: EventName) -> MarginResult<usize> {
        let listeners = self
            .listeners
            .read()
            .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))?;
        Ok(listeners.get(&name).map_or(0, Vec::len))
    }

    /// Deliver an event to its listeners. Returns how many ran.
    ///
    /// The listener list is snapshotted before delivery, so listeners may
    /// dispatch further events or (un)subscribe without deadlocking.
    pub fn dispatch(&self, event: &DataEvent) -> MarginResult<usize> {
        let name = event.name();
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let listeners = self
                .listeners
                .read()
                .map_err(|_| MarginError::Storage(StorageError::LockPoisoned))?;
            listeners
                .get(&name)
                .map(|slot| slot.iter().map(|r| Arc::clone(&r.listener)).collect())
                .unwrap_or_default()
        };

        for listener in &snapshot {
            listener.handle(event)?;
        }
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::{MutationKind, RowSet, TemplateError};
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn EventListener> {
        let log = Arc::clone(log);
        Arc::new(move |_: &DataEvent| -> MarginResult<()> {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    fn event() -> DataEvent {
        DataEvent::after(MutationKind::Create, RowSet::new("ORDER_POS", "ID"))
    }

    #[test]
    fn test_dispatch_orders_by_priority_then_registration() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe(EventName::AfterCreate, 0, recorder(&log, "low-1")).unwrap();
        registry.subscribe(EventName::AfterCreate, 10, recorder(&log, "high")).unwrap();
        registry.subscribe(EventName::AfterCreate, 0, recorder(&log, "low-2")).unwrap();
        registry.subscribe(EventName::AfterUpdate, 99, recorder(&log, "other")).unwrap();

        let ran = registry.dispatch(&event()).unwrap();

        assert_eq!(ran, 3);
        assert_eq!(*log.lock().unwrap(), vec!["high", "low-1", "low-2"]);
    }

    #[test]
    fn test_unsubscribe_detaches_listener() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = registry.subscribe(EventName::AfterCreate, 0, recorder(&log, "a")).unwrap();

        assert!(registry.unsubscribe(&sub).unwrap());
        assert!(!registry.unsubscribe(&sub).unwrap());
        assert_eq!(registry.listener_count(EventName::AfterCreate).unwrap(), 0);
        assert_eq!(registry.dispatch(&event()).unwrap(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_error_stops_dispatch() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn EventListener> = Arc::new(|_: &DataEvent| -> MarginResult<()> {
            Err(TemplateError::MalformedPlaceholder { template: "x".into() }.into())
        });
        registry.subscribe(EventName::AfterCreate, 5, failing).unwrap();
        registry.subscribe(EventName::AfterCreate, 0, recorder(&log, "never")).unwrap();

        assert!(registry.dispatch(&event()).is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
