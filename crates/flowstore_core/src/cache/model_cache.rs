//! Thread-safe LRU keyed by (entity type, primary-key signature).

use crate::db::StoredValue;
use log::debug;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Hashable form of one primary-key column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Integer(i64),
    /// IEEE-754 bits; `-0.0` and `0.0` are distinct keys.
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&StoredValue> for KeyPart {
    fn from(value: &StoredValue) -> Self {
        match value {
            StoredValue::Null => Self::Null,
            StoredValue::Integer(number) => Self::Integer(*number),
            StoredValue::Real(number) => Self::Real(number.to_bits()),
            StoredValue::Text(text) => Self::Text(text.clone()),
            StoredValue::Blob(bytes) => Self::Blob(bytes.clone()),
        }
    }
}

/// Ordered tuple of primary-key column values in storable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkSignature(Vec<KeyPart>);

impl PkSignature {
    pub fn new<'a>(values: impl IntoIterator<Item = &'a StoredValue>) -> Self {
        Self(values.into_iter().map(KeyPart::from).collect())
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity: String,
    pub signature: PkSignature,
}

impl CacheKey {
    pub fn new(entity: impl Into<String>, signature: PkSignature) -> Self {
        Self {
            entity: entity.into(),
            signature,
        }
    }
}

type CachedEntity = Arc<dyn Any + Send + Sync>;

struct Slot {
    entity: CachedEntity,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<CacheKey, Slot>,
    /// Access tick -> key; the first entry is the least recently used.
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Bounded LRU cache of materialized entities.
///
/// Mutated by queue workers in post-execution hooks; readable from any thread.
pub struct ModelCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl ModelCache {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached entity of type `E` and marks it most recently used.
    pub fn get<E: Any + Send + Sync>(&self, entity: &str, signature: &PkSignature) -> Option<Arc<E>> {
        let key = CacheKey::new(entity, signature.clone());
        let mut state = self.lock();
        let cached = state.entries.get(&key).map(|slot| Arc::clone(&slot.entity))?;
        state.touch(&key);
        drop(state);
        cached.downcast::<E>().ok()
    }

    pub fn contains(&self, entity: &str, signature: &PkSignature) -> bool {
        let key = CacheKey::new(entity, signature.clone());
        self.lock().entries.contains_key(&key)
    }

    /// Inserts or overwrites the entry, evicting the least recently used
    /// entry when over capacity.
    pub fn put<E: Any + Send + Sync>(&self, entity: &str, signature: PkSignature, value: Arc<E>) {
        let key = CacheKey::new(entity, signature);
        let mut state = self.lock();
        state.remove(&key);

        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.clone());
        state.entries.insert(key, Slot { entity: value, tick });

        while state.entries.len() > self.capacity {
            if let Some(evicted) = state.evict_oldest() {
                debug!(
                    "event=cache_evict module=cache entity={} capacity={}",
                    evicted.entity, self.capacity
                );
            }
        }
    }

    /// Removes the entry if present; absent keys are a no-op.
    pub fn invalidate(&self, entity: &str, signature: &PkSignature) -> bool {
        let key = CacheKey::new(entity, signature.clone());
        self.lock().remove(&key).is_some()
    }

    /// Removes every entry of one entity type (bulk mutations).
    pub fn invalidate_entity(&self, entity: &str) -> usize {
        let mut state = self.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.entity == entity)
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
    }

    fn lock(&self) -> MutexGuard<'_, LruState> {
        // Every mutation leaves both maps consistent before it can panic.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
