//! Change notification for committed mutations.
//!
//! # Responsibility
//! - Keep a per-entity-type registry of change listeners.
//! - Fan out change events after the store has committed a mutation.
//!
//! # Invariants
//! - Dispatch is synchronous and in registration order.
//! - Listeners of unrelated entity types never observe an event.
//! - A join subscription is registered and torn down across all of its
//!   entity types under one lock acquisition.

mod notifier;

pub use notifier::{ChangeAction, ChangeEvent, ChangeListener, ChangeNotifier, Subscription};
