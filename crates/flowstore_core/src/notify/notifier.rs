//! Listener registry and synchronous event dispatch.

use crate::query::Condition;
use log::{error, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
    /// Generic or bulk change where the exact action is unknown.
    Change,
}

/// One change of one entity type; exists only while being dispatched.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    entity: String,
    action: ChangeAction,
    conditions: Option<Vec<Condition>>,
}

impl ChangeEvent {
    pub fn new(entity: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            entity: entity.into(),
            action,
            conditions: None,
        }
    }

    /// Attaches the condition set describing the affected rows.
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn action(&self) -> ChangeAction {
        self.action
    }

    pub fn conditions(&self) -> Option<&[Condition]> {
        self.conditions.as_deref()
    }
}

pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event);
    }
}

/// Handle for one listener registered across several entity types
/// (a join-backed query). Dropping it does not unregister.
#[derive(Clone)]
pub struct Subscription {
    entities: Vec<String>,
    listener: Arc<dyn ChangeListener>,
}

impl Subscription {
    pub fn entities(&self) -> &[String] {
        &self.entities
    }
}

/// Per-entity-type listener registry.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Mutex<HashMap<String, Vec<Arc<dyn ChangeListener>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `entity`. Registering the same listener twice
    /// for one entity is a no-op.
    pub fn register(&self, entity: &str, listener: Arc<dyn ChangeListener>) {
        let mut listeners = self.lock();
        insert_listener(&mut listeners, entity, listener);
    }

    /// Registers one listener against every entity of a join.
    pub fn register_join(&self, entities: &[&str], listener: Arc<dyn ChangeListener>) -> Subscription {
        let mut listeners = self.lock();
        let mut registered: Vec<String> = Vec::with_capacity(entities.len());
        for entity in entities {
            if registered.iter().any(|name| name == entity) {
                continue;
            }
            insert_listener(&mut listeners, entity, Arc::clone(&listener));
            registered.push((*entity).to_string());
        }
        Subscription {
            entities: registered,
            listener,
        }
    }

    /// Removes `listener` from `entity`. Returns whether it was registered.
    pub fn unregister(&self, entity: &str, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self.lock();
        remove_listener(&mut listeners, entity, listener)
    }

    /// Tears down a join subscription across all of its entities at once.
    pub fn unregister_subscription(&self, subscription: &Subscription) {
        let mut listeners = self.lock();
        for entity in &subscription.entities {
            remove_listener(&mut listeners, entity, &subscription.listener);
        }
    }

    /// Removes `listener` from every entity. Returns the number of removals.
    pub fn unregister_all(&self, listener: &Arc<dyn ChangeListener>) -> usize {
        let mut listeners = self.lock();
        let mut removed = 0;
        for registered in listeners.values_mut() {
            let before = registered.len();
            registered.retain(|candidate| !same_listener(candidate, listener));
            removed += before - registered.len();
        }
        listeners.retain(|_, registered| !registered.is_empty());
        removed
    }

    pub fn listener_count(&self, entity: &str) -> usize {
        self.lock().get(entity).map_or(0, Vec::len)
    }

    /// Dispatches `event` to the listeners of its entity, in registration
    /// order. Must only be called after the mutation has committed.
    pub fn notify(&self, event: &ChangeEvent) {
        let targets: Vec<Arc<dyn ChangeListener>> = match self.lock().get(event.entity()) {
            Some(registered) => registered.clone(),
            None => return,
        };

        trace!(
            "event=notify module=notify entity={} action={:?} listeners={}",
            event.entity(),
            event.action(),
            targets.len()
        );
        for listener in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_change(event)));
            if outcome.is_err() {
                error!(
                    "event=notify module=notify status=error entity={} error_code=listener_panicked",
                    event.entity()
                );
            }
        }
    }

    /// Synthesized fan-out for a mutation spanning several entities: one
    /// event per distinct entity.
    pub fn notify_entities(
        &self,
        entities: &[&str],
        action: ChangeAction,
        conditions: Option<Vec<Condition>>,
    ) {
        let mut seen: Vec<&str> = Vec::with_capacity(entities.len());
        for entity in entities {
            if seen.contains(entity) {
                continue;
            }
            seen.push(entity);
            let mut event = ChangeEvent::new(*entity, action);
            if let Some(conditions) = &conditions {
                event = event.with_conditions(conditions.clone());
            }
            self.notify(&event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<dyn ChangeListener>>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn same_listener(left: &Arc<dyn ChangeListener>, right: &Arc<dyn ChangeListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

fn insert_listener(
    listeners: &mut HashMap<String, Vec<Arc<dyn ChangeListener>>>,
    entity: &str,
    listener: Arc<dyn ChangeListener>,
) {
    let registered = listeners.entry(entity.to_string()).or_default();
    if !registered
        .iter()
        .any(|candidate| same_listener(candidate, &listener))
    {
        registered.push(listener);
    }
}

fn remove_listener(
    listeners: &mut HashMap<String, Vec<Arc<dyn ChangeListener>>>,
    entity: &str,
    listener: &Arc<dyn ChangeListener>,
) -> bool {
    let Some(registered) = listeners.get_mut(entity) else {
        return false;
    };
    let before = registered.len();
    registered.retain(|candidate| !same_listener(candidate, listener));
    let removed = registered.len() != before;
    if registered.is_empty() {
        listeners.remove(entity);
    }
    removed
}
