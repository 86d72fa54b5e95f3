//! Coordinator configuration.

use crate::model::entity::is_identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_CACHE_CAPACITY: usize = 25;
pub const DEFAULT_SHARED_QUEUE_NAME: &str = "flowstore-shared";

/// Settings read at `Coordinator` construction. Every field has a default,
/// so `{}` is a valid configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub cache_capacity: usize,
    pub shared_queue_name: String,
    /// Entity tables given their own queue at construction.
    pub dedicated_entities: Vec<String>,
    pub run_mutations_in_transaction: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            shared_queue_name: DEFAULT_SHARED_QUEUE_NAME.to_string(),
            dedicated_entities: Vec::new(),
            run_mutations_in_transaction: true,
        }
    }
}

impl CoordinatorConfig {
    /// # Errors
    /// - `ZeroCacheCapacity` when `cache_capacity` is 0.
    /// - `EmptyQueueName` when `shared_queue_name` is blank.
    /// - `InvalidEntityName` / `DuplicateDedicatedEntity` for bad
    ///   `dedicated_entities` entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.shared_queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }
        let mut seen = HashSet::new();
        for entity in &self.dedicated_entities {
            if !is_identifier(entity) {
                return Err(ConfigError::InvalidEntityName(entity.clone()));
            }
            if !seen.insert(entity.as_str()) {
                return Err(ConfigError::DuplicateDedicatedEntity(entity.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCacheCapacity,
    EmptyQueueName,
    InvalidEntityName(String),
    DuplicateDedicatedEntity(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroCacheCapacity => write!(f, "cache_capacity must be at least 1"),
            Self::EmptyQueueName => write!(f, "shared_queue_name cannot be empty"),
            Self::InvalidEntityName(name) => {
                write!(f, "dedicated entity `{name}` is not a plain SQL identifier")
            }
            Self::DuplicateDedicatedEntity(name) => {
                write!(f, "dedicated entity `{name}` is listed twice")
            }
        }
    }
}

impl Error for ConfigError {}
