//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire a process-wide default `Coordinator` over an in-memory store.
//! - Run one save/fetch/delete cycle and print deterministic output.

use flowstore_core::{
    core_version, init_logging, open_store_in_memory, share, ChangeEvent, ColumnAccessor,
    Coordinator, CoordinatorConfig, Entity, EntityDescriptor, LogicalType, PollingContext,
    SharedStore, TypeConverterRegistry, Value,
};
use log::error;
use once_cell::sync::{Lazy, OnceCell};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE tasks (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    done INTEGER NOT NULL DEFAULT 0
);";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
struct Task {
    id: i64,
    title: String,
    done: bool,
}

static TASKS: Lazy<EntityDescriptor<Task>> = Lazy::new(|| {
    EntityDescriptor::new(
        "tasks",
        vec![
            ColumnAccessor::<Task>::new(
                "id",
                LogicalType::Integer,
                |task| Value::Integer(task.id),
                |task, value| {
                    task.id = value.as_integer()?;
                    Ok(())
                },
            )
            .primary_key(),
            ColumnAccessor::<Task>::new(
                "title",
                LogicalType::Text,
                |task| Value::from(task.title.as_str()),
                |task, value| {
                    task.title = value.into_text()?;
                    Ok(())
                },
            ),
            ColumnAccessor::<Task>::new(
                "done",
                LogicalType::Bool,
                |task| Value::Bool(task.done),
                |task, value| {
                    task.done = value.as_bool()?;
                    Ok(())
                },
            ),
        ],
    )
});

impl Entity for Task {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &TASKS
    }
}

/// Main-loop stand-in: deliveries wait here until `main` drains them.
static MAIN_LOOP: Lazy<Arc<PollingContext>> = Lazy::new(|| Arc::new(PollingContext::new()));
static DEFAULT_COORDINATOR: OnceCell<Coordinator> = OnceCell::new();

fn default_coordinator() -> Result<&'static Coordinator, String> {
    DEFAULT_COORDINATOR.get_or_try_init(|| {
        let store = open_store_in_memory().map_err(|err| err.to_string())?;
        let store: SharedStore = share(store);
        store
            .lock()
            .map_err(|_| "store lock poisoned".to_string())?
            .execute_batch(SCHEMA)
            .map_err(|err| err.to_string())?;

        let context = Arc::clone(&*MAIN_LOOP);
        Coordinator::new(
            store,
            context,
            TypeConverterRegistry::new(),
            CoordinatorConfig::default(),
        )
        .map_err(|err| err.to_string())
    })
}

fn drain_one() -> Result<(), String> {
    if MAIN_LOOP.wait_and_run(DELIVERY_TIMEOUT) == 0 {
        return Err("timed out waiting for a delivery".to_string());
    }
    Ok(())
}

fn run() -> Result<(), String> {
    if let Ok(log_dir) = std::env::var("FLOWSTORE_LOG_DIR") {
        init_logging(flowstore_core::default_log_level(), &log_dir).map_err(|err| err.to_string())?;
    }
    let coordinator = default_coordinator()?;

    coordinator.notifier().register(
        Task::table(),
        Arc::new(|event: &ChangeEvent| {
            println!("change entity={} action={:?}", event.entity(), event.action());
        }),
    );

    let task = Task {
        id: 1,
        title: "write the release notes".to_string(),
        done: false,
    };
    coordinator
        .save(task.clone())
        .map_err(|err| err.to_string())?
        .on_result(|result| match result {
            Ok(saved) => println!("saved id={} action={:?}", saved.entity.id, saved.action),
            Err(err) => println!("save failed: {err}"),
        })
        .submit()
        .map_err(|err| err.to_string())?;
    drain_one()?;

    coordinator
        .fetch_by_id::<Task>(vec![Value::Integer(task.id)])
        .map_err(|err| err.to_string())?
        .on_success(|found| match found {
            Some(task) => println!("fetched id={} title={} done={}", task.id, task.title, task.done),
            None => println!("fetched nothing"),
        })
        .submit()
        .map_err(|err| err.to_string())?;
    drain_one()?;

    coordinator
        .delete(task)
        .map_err(|err| err.to_string())?
        .on_success(|removed| println!("deleted={removed}"))
        .submit()
        .map_err(|err| err.to_string())?;
    drain_one()?;

    println!("cached_entries={}", coordinator.cache().len());
    println!("flowstore_core version={}", core_version());
    coordinator.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("flowstore: {err}");
            ExitCode::FAILURE
        }
    }
}
