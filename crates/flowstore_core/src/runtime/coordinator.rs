//! `Coordinator` operations and the post-commit effects they schedule.

use super::config::{ConfigError, CoordinatorConfig};
use super::pending::PendingOperation;
use super::CoordinatorError;
use crate::cache::ModelCache;
use crate::convert::{TypeConverterRegistry, Value};
use crate::db::{SharedStore, Store};
use crate::logging::{sanitize_message, MAX_EVENT_TEXT_CHARS};
use crate::model::entity::is_identifier;
use crate::model::{Entity, EntityDescriptor, EntityError};
use crate::notify::{ChangeAction, ChangeEvent, ChangeNotifier};
use crate::query::{BindMode, Condition, ConditionBuilder, QueryError, Rendered};
use crate::transaction::{
    CompletionContext, ExecutionError, StepResult, TransactionHandle, TransactionInfo,
    TransactionQueue, TransactionSpec,
};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of a save: the entity as written and whether it was inserted or
/// updated.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved<E> {
    pub entity: E,
    pub action: ChangeAction,
}

struct PreparedSave<E> {
    entity: E,
    exists: Rendered,
    insert: Rendered,
    update: Rendered,
    key_conditions: Vec<Condition>,
}

impl<E: Entity> PreparedSave<E> {
    fn new(entity: E, converters: &TypeConverterRegistry) -> Result<Self, CoordinatorError> {
        let descriptor = E::descriptor();
        Ok(Self {
            exists: descriptor.exists_statement(&entity, converters)?,
            insert: descriptor.insert_statement(&entity, converters)?,
            update: descriptor.update_statement(&entity, converters)?,
            key_conditions: descriptor.primary_conditions(&entity)?.conditions().to_vec(),
            entity,
        })
    }

    fn run(self, store: &mut dyn Store) -> Result<Saved<E>, ExecutionError> {
        let exists = store.execute(&self.exists.sql, &self.exists.values)?.row_count() > 0;
        let action = if exists {
            store.execute(&self.update.sql, &self.update.values)?;
            ChangeAction::Update
        } else {
            store.execute(&self.insert.sql, &self.insert.values)?;
            ChangeAction::Insert
        };
        Ok(Saved {
            entity: self.entity,
            action,
        })
    }
}

/// Post-commit bookkeeping shared by every mutation hook.
#[derive(Clone)]
struct Effects {
    cache: Arc<ModelCache>,
    notifier: Arc<ChangeNotifier>,
    converters: Arc<TypeConverterRegistry>,
}

impl Effects {
    fn remember<E: Entity>(&self, entity: &E) {
        let descriptor = E::descriptor();
        if !descriptor.is_cacheable() {
            return;
        }
        match descriptor.primary_key_signature(entity, &self.converters) {
            Ok(signature) => self
                .cache
                .put(descriptor.table(), signature, Arc::new(entity.clone())),
            Err(err) => warn!(
                "event=cache_put module=coordinator status=error entity={} error={}",
                descriptor.table(),
                sanitize_message(&err.to_string(), MAX_EVENT_TEXT_CHARS)
            ),
        }
    }

    fn forget<E: Entity>(&self, entity: &E) {
        let descriptor = E::descriptor();
        if let Ok(signature) = descriptor.primary_key_signature(entity, &self.converters) {
            self.cache.invalidate(descriptor.table(), &signature);
        }
    }

    fn announce(&self, entity: &str, action: ChangeAction, conditions: Vec<Condition>) {
        self.notifier
            .notify(&ChangeEvent::new(entity, action).with_conditions(conditions));
    }
}

/// Facade owning the shared queue, dedicated per-entity queues, the model
/// cache and the change notifier.
///
/// Every operation returns a [`PendingOperation`]; nothing touches the store
/// until it is submitted. Cache updates and change events for a unit run on
/// its worker after commit and before the next unit on that queue starts.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: SharedStore,
    context: Arc<dyn CompletionContext>,
    effects: Effects,
    shared_queue: Arc<TransactionQueue>,
    dedicated: Mutex<HashMap<String, Arc<TransactionQueue>>>,
}

impl Coordinator {
    /// Starts the shared queue and one queue per `config.dedicated_entities`.
    ///
    /// # Errors
    /// - `CoordinatorError::Config` when `config` fails validation.
    /// - `CoordinatorError::Queue` when a worker thread cannot be spawned.
    pub fn new(
        store: SharedStore,
        context: Arc<dyn CompletionContext>,
        converters: TypeConverterRegistry,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let shared_queue = Arc::new(TransactionQueue::start(
            config.shared_queue_name.clone(),
            Arc::clone(&store),
            Arc::clone(&context),
        )?);

        let coordinator = Self {
            effects: Effects {
                cache: Arc::new(ModelCache::new(config.cache_capacity)),
                notifier: Arc::new(ChangeNotifier::new()),
                converters: Arc::new(converters),
            },
            store,
            context,
            shared_queue,
            dedicated: Mutex::new(HashMap::new()),
            config,
        };
        for entity in &coordinator.config.dedicated_entities {
            coordinator.isolate(entity)?;
        }

        info!(
            "event=coordinator_start module=coordinator status=ok shared_queue={} dedicated={} cache_capacity={}",
            sanitize_message(&coordinator.config.shared_queue_name, MAX_EVENT_TEXT_CHARS),
            coordinator.config.dedicated_entities.len(),
            coordinator.config.cache_capacity
        );
        Ok(coordinator)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &ModelCache {
        &self.effects.cache
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.effects.notifier
    }

    pub fn converters(&self) -> &TypeConverterRegistry {
        &self.effects.converters
    }

    /// Gives `entity` its own queue on the coordinator's store. Returns
    /// `false` when it already has one.
    pub fn isolate(&self, entity: &str) -> Result<bool, CoordinatorError> {
        self.isolate_with_store(entity, Arc::clone(&self.store))
    }

    /// Gives `entity` its own queue driving `store`, typically a second
    /// connection to the same database file.
    pub fn isolate_with_store(
        &self,
        entity: &str,
        store: SharedStore,
    ) -> Result<bool, CoordinatorError> {
        if !is_identifier(entity) {
            return Err(ConfigError::InvalidEntityName(entity.to_string()).into());
        }
        let mut dedicated = self.lock_dedicated();
        if dedicated.contains_key(entity) {
            return Ok(false);
        }
        if !self.shared_queue.is_accepting() {
            return Err(CoordinatorError::ShutDown);
        }

        let queue = TransactionQueue::start(
            format!("flowstore-{entity}"),
            store,
            Arc::clone(&self.context),
        )?;
        dedicated.insert(entity.to_string(), Arc::new(queue));
        info!(
            "event=queue_isolate module=coordinator status=ok entity={}",
            entity
        );
        Ok(true)
    }

    pub fn is_isolated(&self, entity: &str) -> bool {
        self.lock_dedicated().contains_key(entity)
    }

    /// Loads the first row matching `conditions`, or `None`.
    pub fn fetch_one<E: Entity>(
        &self,
        conditions: &ConditionBuilder,
    ) -> Result<PendingOperation<Option<E>>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let filter = self.render_filter(conditions)?;
        let sql = descriptor.select_sql(&filter.sql, Some(1));
        let converters = Arc::clone(&self.effects.converters);

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            let rows = store.execute(&sql, &filter.values)?.into_rows()?;
            let entity = rows
                .first()
                .map(|row| descriptor.load(row, &converters))
                .transpose()?;
            Ok(Some(entity))
        })
        .info(TransactionInfo::fetch());

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |loaded: Option<&Option<E>>| {
            if let Some(Some(entity)) = loaded {
                effects.remember(entity);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Loads every row matching `conditions`; an empty set loads the table.
    pub fn fetch_list<E: Entity>(
        &self,
        conditions: &ConditionBuilder,
    ) -> Result<PendingOperation<Vec<E>>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let filter = self.render_filter(conditions)?;
        let sql = descriptor.select_sql(&filter.sql, None);
        let converters = Arc::clone(&self.effects.converters);

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            let rows = store.execute(&sql, &filter.values)?.into_rows()?;
            let entities = rows
                .iter()
                .map(|row| descriptor.load(row, &converters))
                .collect::<Result<Vec<E>, EntityError>>()?;
            Ok(Some(entities))
        })
        .info(TransactionInfo::fetch());

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |loaded: Option<&Vec<E>>| {
            for entity in loaded.into_iter().flatten() {
                effects.remember(entity);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Looks `key` up in the cache on the worker and falls through to the
    /// store on a miss. `key` holds primary-key values in column order.
    pub fn fetch_by_id<E: Entity>(
        &self,
        key: Vec<Value>,
    ) -> Result<PendingOperation<Option<E>>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let converters = Arc::clone(&self.effects.converters);
        let signature = descriptor.signature_of(&key, &converters)?;
        let filter = descriptor
            .conditions_for_key(key)?
            .render_bound(&converters)?;
        let sql = descriptor.select_sql(&filter.sql, Some(1));
        let cache = Arc::clone(&self.effects.cache);

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            if descriptor.is_cacheable() {
                if let Some(hit) = cache.get::<E>(descriptor.table(), &signature) {
                    return Ok(Some(Some(E::clone(&hit))));
                }
            }
            let rows = store.execute(&sql, &filter.values)?.into_rows()?;
            let entity = rows
                .first()
                .map(|row| descriptor.load(row, &converters))
                .transpose()?;
            Ok(Some(entity))
        })
        .info(TransactionInfo::fetch());

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |loaded: Option<&Option<E>>| {
            if let Some(Some(entity)) = loaded {
                effects.remember(entity);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Inserts `entity`, or updates it when its primary key already exists.
    pub fn save<E: Entity>(
        &self,
        entity: E,
    ) -> Result<PendingOperation<Saved<E>>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let prepared = PreparedSave::new(entity, &self.effects.converters)?;
        let key_conditions = prepared.key_conditions.clone();

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            Ok(Some(prepared.run(store)?))
        })
        .info(TransactionInfo::save())
        .in_store_transaction(self.config.run_mutations_in_transaction);

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |saved: Option<&Saved<E>>| {
            if let Some(saved) = saved {
                effects.remember(&saved.entity);
                effects.announce(descriptor.table(), saved.action, key_conditions);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Saves every entity in one unit; one change event per entity.
    pub fn save_all<E: Entity>(
        &self,
        entities: Vec<E>,
    ) -> Result<PendingOperation<Vec<Saved<E>>>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let prepared = entities
            .into_iter()
            .map(|entity| PreparedSave::new(entity, &self.effects.converters))
            .collect::<Result<Vec<PreparedSave<E>>, _>>()?;
        let per_entity: Vec<Vec<Condition>> = prepared
            .iter()
            .map(|unit| unit.key_conditions.clone())
            .collect();

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            let mut saved = Vec::with_capacity(prepared.len());
            for unit in prepared {
                saved.push(unit.run(store)?);
            }
            Ok(Some(saved))
        })
        .info(TransactionInfo::save())
        .in_store_transaction(self.config.run_mutations_in_transaction);

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |saved: Option<&Vec<Saved<E>>>| {
            let Some(saved) = saved else {
                return;
            };
            for (entry, key_conditions) in saved.iter().zip(per_entity) {
                effects.remember(&entry.entity);
                effects.announce(descriptor.table(), entry.action, key_conditions);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Updates the row with `entity`'s primary key. A missing row fails the
    /// unit with `EntityError::RowNotFound`.
    pub fn update<E: Entity>(&self, entity: E) -> Result<PendingOperation<E>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let statement = descriptor.update_statement(&entity, &self.effects.converters)?;
        let key_conditions = descriptor.primary_conditions(&entity)?.conditions().to_vec();

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            let affected = store
                .execute(&statement.sql, &statement.values)?
                .row_count();
            if affected == 0 {
                return Err(EntityError::RowNotFound {
                    table: descriptor.table(),
                }
                .into());
            }
            Ok(Some(entity))
        })
        .info(TransactionInfo::save())
        .in_store_transaction(self.config.run_mutations_in_transaction);

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |updated: Option<&E>| {
            if let Some(entity) = updated {
                effects.remember(entity);
                effects.announce(descriptor.table(), ChangeAction::Update, key_conditions);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Deletes `entity`'s row. Delivers whether a row was removed; the cache
    /// entry is dropped either way, the change event only when a row went.
    pub fn delete<E: Entity>(&self, entity: E) -> Result<PendingOperation<bool>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let statement = descriptor.delete_statement(&entity, &self.effects.converters)?;
        let key_conditions = descriptor.primary_conditions(&entity)?.conditions().to_vec();

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            let affected = store
                .execute(&statement.sql, &statement.values)?
                .row_count();
            Ok(Some(affected > 0))
        })
        .info(TransactionInfo::save())
        .in_store_transaction(self.config.run_mutations_in_transaction);

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |removed: Option<&bool>| {
            effects.forget(&entity);
            if removed == Some(&true) {
                effects.announce(descriptor.table(), ChangeAction::Delete, key_conditions);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Deletes every row matching `conditions` and delivers the count. All
    /// cached entries of the type are dropped; one DELETE event carrying the
    /// condition set fires when any row went.
    pub fn delete_where<E: Entity>(
        &self,
        conditions: &ConditionBuilder,
    ) -> Result<PendingOperation<usize>, CoordinatorError> {
        let descriptor = checked_descriptor::<E>()?;
        let filter = self.render_filter(conditions)?;
        let mut sql = format!("DELETE FROM {}", descriptor.table());
        if !filter.sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
        }
        let event_conditions = conditions.conditions().to_vec();

        let builder = TransactionSpec::builder(move |store: &mut dyn Store| {
            Ok(Some(store.execute(&sql, &filter.values)?.row_count()))
        })
        .info(TransactionInfo::save())
        .in_store_transaction(self.config.run_mutations_in_transaction);

        let effects = self.effects.clone();
        let builder = builder.after_commit(move |removed: Option<&usize>| {
            effects.cache.invalidate_entity(descriptor.table());
            if removed.is_some_and(|count| *count > 0) {
                effects.announce(descriptor.table(), ChangeAction::Delete, event_conditions);
            }
        });
        Ok(self.pending(descriptor.table(), builder))
    }

    /// Runs a caller-written step (for example a join-backed mutation) and
    /// afterwards drops cached entries of `tables` and fans one `action`
    /// event out to each of them.
    ///
    /// Single-table units go to that table's dedicated queue when it has
    /// one; anything else runs on the shared queue.
    pub fn execute<T, F>(
        &self,
        tables: &[&str],
        action: ChangeAction,
        step: F,
    ) -> Result<PendingOperation<T>, CoordinatorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Store) -> StepResult<T> + Send + 'static,
    {
        if let Some(invalid) = tables.iter().find(|table| !is_identifier(table)) {
            return Err(ConfigError::InvalidEntityName((*invalid).to_string()).into());
        }
        let targets: Vec<String> = tables.iter().map(|table| (*table).to_string()).collect();
        let route = match tables {
            [single] => Some(*single),
            _ => None,
        };

        let effects = self.effects.clone();
        let builder = TransactionSpec::builder(step)
            .info(TransactionInfo::save())
            .in_store_transaction(self.config.run_mutations_in_transaction)
            .after_commit(move |_result: Option<&T>| {
                let names: Vec<&str> = targets.iter().map(String::as_str).collect();
                for table in &names {
                    effects.cache.invalidate_entity(table);
                }
                effects.notifier.notify_entities(&names, action, None);
            });

        let queue = match route {
            Some(table) => self.queue_for(table),
            None => Arc::clone(&self.shared_queue),
        };
        Ok(PendingOperation::new(queue, builder))
    }

    /// Synchronous fan-out of one `action` event to every table of a join.
    /// Only call once the underlying mutation has committed.
    pub fn notify_join(&self, tables: &[&str], action: ChangeAction) {
        self.effects.notifier.notify_entities(tables, action, None);
    }

    /// Removes `spec` from whichever queue holds it. Running work is not
    /// interrupted.
    pub fn cancel(&self, spec: &TransactionHandle) -> bool {
        if self.shared_queue.cancel(spec) {
            return true;
        }
        self.dedicated_queues()
            .iter()
            .any(|queue| queue.cancel(spec))
    }

    /// Removes pending specs tagged `tag` from every queue.
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let mut removed = self.shared_queue.cancel_by_tag(tag);
        for queue in self.dedicated_queues() {
            removed += queue.cancel_by_tag(tag);
        }
        removed
    }

    /// Blocks until every queue is idle or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queues = vec![Arc::clone(&self.shared_queue)];
        queues.extend(self.dedicated_queues());
        queues.iter().all(|queue| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            queue.wait_idle(remaining)
        })
    }

    /// Shuts every queue down; pending work is discarded, running work
    /// completes. Idempotent.
    pub fn shutdown(&self) {
        self.shared_queue.shutdown();
        for queue in self.dedicated_queues() {
            queue.shutdown();
        }
        info!("event=coordinator_shutdown module=coordinator status=ok");
    }

    fn render_filter(&self, conditions: &ConditionBuilder) -> Result<Rendered, CoordinatorError> {
        if conditions.mode() == Some(BindMode::Placeholder) {
            return Err(QueryError::UnboundPlaceholders {
                count: conditions.len(),
            }
            .into());
        }
        Ok(conditions.render_bound(&self.effects.converters)?)
    }

    fn pending<T: Send + 'static>(
        &self,
        entity: &str,
        builder: crate::transaction::TransactionBuilder<T>,
    ) -> PendingOperation<T> {
        PendingOperation::new(self.queue_for(entity), builder)
    }

    fn queue_for(&self, entity: &str) -> Arc<TransactionQueue> {
        self.lock_dedicated()
            .get(entity)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.shared_queue))
    }

    fn dedicated_queues(&self) -> Vec<Arc<TransactionQueue>> {
        self.lock_dedicated().values().map(Arc::clone).collect()
    }

    fn lock_dedicated(&self) -> MutexGuard<'_, HashMap<String, Arc<TransactionQueue>>> {
        self.dedicated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn checked_descriptor<E: Entity>() -> Result<&'static EntityDescriptor<E>, CoordinatorError> {
    let descriptor = E::descriptor();
    descriptor.validate()?;
    Ok(descriptor)
}
