//! `Store` implementation over a single `rusqlite::Connection`.

use super::{Store, StoreOutput, StoreResult, StoredRow, StoredValue};
use rusqlite::{params_from_iter, Connection};
use std::sync::Arc;

/// SQLite-backed store. Owns one connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wraps an already configured connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

impl Store for SqliteStore {
    fn execute(&mut self, sql: &str, bound: &[StoredValue]) -> StoreResult<StoreOutput> {
        let mut stmt = self.conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let changed = stmt.execute(params_from_iter(bound.iter()))?;
            return Ok(StoreOutput::RowCount(changed));
        }

        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(bound.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(row.get::<_, StoredValue>(index)?);
            }
            collected.push(StoredRow::new(Arc::clone(&columns), values));
        }

        Ok(StoreOutput::Rows(collected))
    }

    fn execute_batch(&mut self, sql: &str) -> StoreResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn begin(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("BEGIN;")?;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::db::{Store, StoreOutput, StoredValue};
    use rusqlite::Connection;

    fn store_with_table() -> SqliteStore {
        let mut store = SqliteStore::new(Connection::open_in_memory().expect("in-memory db"));
        store
            .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);")
            .expect("schema should apply");
        store
    }

    #[test]
    fn execute_reports_row_count_for_writes_and_rows_for_reads() {
        let mut store = store_with_table();
        let inserted = store
            .execute(
                "INSERT INTO items (id, name) VALUES (?, ?)",
                &[StoredValue::Integer(1), StoredValue::Text("one".to_string())],
            )
            .expect("insert should succeed");
        assert_eq!(inserted, StoreOutput::RowCount(1));

        let rows = store
            .execute("SELECT id, name FROM items", &[])
            .expect("select should succeed")
            .into_rows()
            .expect("select yields rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("NAME"), Some(&StoredValue::Text("one".to_string())));
    }

    #[test]
    fn rollback_discards_uncommitted_writes() {
        let mut store = store_with_table();
        store.begin().expect("begin");
        store
            .execute("INSERT INTO items (id, name) VALUES (1, 'x')", &[])
            .expect("insert");
        store.rollback().expect("rollback");

        let rows = store
            .execute("SELECT id FROM items", &[])
            .expect("select")
            .into_rows()
            .expect("rows");
        assert!(rows.is_empty());
    }

    #[test]
    fn rollback_without_open_transaction_is_noop() {
        let mut store = store_with_table();
        store.rollback().expect("rollback outside a transaction is allowed");
    }
}
