use flowstore_core::db::{open_store, share, Store, StoreOutput, StoredValue};
use flowstore_core::{
    Coordinator, CoordinatorConfig, InlineContext, TypeConverterRegistry, Value,
};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn file_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flowstore.sqlite3");

    {
        let mut store = open_store(&path).unwrap();
        store
            .execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);")
            .unwrap();
        let inserted = store
            .execute(
                "INSERT INTO notes (id, body) VALUES (?, ?)",
                &[StoredValue::Integer(1), StoredValue::Text("kept".to_string())],
            )
            .unwrap();
        assert_eq!(inserted, StoreOutput::RowCount(1));
    }

    let mut reopened = open_store(&path).unwrap();
    let rows = reopened
        .execute("SELECT body FROM notes WHERE id = ?", &[StoredValue::Integer(1)])
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("BODY"),
        Some(&StoredValue::Text("kept".to_string()))
    );
}

#[test]
fn foreign_keys_are_enforced() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(dir.path().join("fk.sqlite3")).unwrap();
    store
        .execute_batch(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));",
        )
        .unwrap();

    let result = store.execute(
        "INSERT INTO child (id, parent_id) VALUES (?, ?)",
        &[StoredValue::Integer(1), StoredValue::Integer(99)],
    );
    assert!(result.is_err());
}

#[test]
fn dedicated_queue_can_drive_a_second_connection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.sqlite3");
    let mut bootstrap = open_store(&path).unwrap();
    bootstrap
        .execute_batch("CREATE TABLE audit (id INTEGER PRIMARY KEY, line TEXT NOT NULL);")
        .unwrap();

    let coordinator = Coordinator::new(
        share(bootstrap),
        Arc::new(InlineContext),
        TypeConverterRegistry::new(),
        CoordinatorConfig::default(),
    )
    .unwrap();
    assert!(coordinator
        .isolate_with_store("audit", share(open_store(&path).unwrap()))
        .unwrap());

    let (tx, rx) = mpsc::channel();
    let line = Value::from("second connection");
    let operation = coordinator
        .execute(
            &["audit"],
            flowstore_core::ChangeAction::Insert,
            move |store: &mut dyn Store| {
                let stored = match line {
                    Value::Text(text) => StoredValue::Text(text),
                    _ => StoredValue::Null,
                };
                let output =
                    store.execute("INSERT INTO audit (id, line) VALUES (1, ?)", &[stored])?;
                Ok(Some(output.row_count()))
            },
        )
        .unwrap();
    assert_eq!(operation.queue_name(), "flowstore-audit");
    operation
        .on_success(move |count| tx.send(count).unwrap())
        .submit()
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);

    let mut check = open_store(&path).unwrap();
    let rows = check
        .execute("SELECT line FROM audit", &[])
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
}
