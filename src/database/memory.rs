//! In-process storage backend with transactional sessions.
//!
//! A [`MemoryStore`] holds one row vector per table in insertion order.
//! Each [`MemorySession`] stages its writes against a private copy of the
//! tables and records them in a journal; `commit` replays the journal onto
//! the live tables under the write lock, re-checking unique columns, so
//! concurrent sessions never overwrite each other's committed rows.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::database::manager::DatabaseError;
use crate::database::session::{Row, Session};
use crate::entity::Registry;
use crate::filter::filter_where::values_equal;
use crate::filter::Filter;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    unique: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn position(&self, primary_key: &str, key: &Value) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(primary_key).map_or(false, |v| values_equal(v, key)))
    }

    /// Reject `candidate` if a unique column collides with any other row
    fn check_unique(&self, table: &str, candidate: &Row, skip: Option<usize>) -> Result<(), DatabaseError> {
        for column in &self.unique {
            let Some(value) = candidate.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self
                .rows
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, row)| row.get(column).map_or(false, |existing| values_equal(existing, value)));
            if taken {
                return Err(DatabaseError::UniqueViolation {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

type MemoryTables = HashMap<String, MemoryTable>;

fn table_mut<'t>(tables: &'t mut MemoryTables, table: &str) -> Result<&'t mut MemoryTable, DatabaseError> {
    tables
        .get_mut(table)
        .ok_or_else(|| DatabaseError::QueryError(format!("relation \"{}\" does not exist", table)))
}

#[derive(Debug, Clone)]
enum Change {
    Insert { table: String, row: Row },
    Update { table: String, primary_key: String, key: Value, fields: Row },
    Delete { table: String, primary_key: String, key: Value },
}

impl Change {
    /// Replay onto `tables`; a row the unit of work saw that is now gone fails the replay
    fn apply(&self, tables: &mut MemoryTables) -> Result<(), DatabaseError> {
        match self {
            Change::Insert { table, row } => insert_row(tables, table, row.clone()).map(|_| ()),
            Change::Update { table, primary_key, key, fields } => {
                match update_row(tables, table, primary_key, key, fields.clone())? {
                    Some(_) => Ok(()),
                    None => Err(stale_row(table, key)),
                }
            }
            Change::Delete { table, primary_key, key } => {
                if delete_row(tables, table, primary_key, key)? {
                    Ok(())
                } else {
                    Err(stale_row(table, key))
                }
            }
        }
    }
}

fn stale_row(table: &str, key: &Value) -> DatabaseError {
    DatabaseError::StaleRow {
        table: table.to_string(),
        key: key.as_str().map_or_else(|| key.to_string(), str::to_string),
    }
}

fn insert_row(tables: &mut MemoryTables, table: &str, row: Row) -> Result<Row, DatabaseError> {
    let target = table_mut(tables, table)?;
    target.check_unique(table, &row, None)?;
    target.rows.push(row.clone());
    Ok(row)
}

fn update_row(
    tables: &mut MemoryTables,
    table: &str,
    primary_key: &str,
    key: &Value,
    fields: Row,
) -> Result<Option<Row>, DatabaseError> {
    let target = table_mut(tables, table)?;
    let Some(index) = target.position(primary_key, key) else {
        return Ok(None);
    };

    let mut updated = target.rows[index].clone();
    updated.extend(fields);
    target.check_unique(table, &updated, Some(index))?;
    target.rows[index] = updated.clone();
    Ok(Some(updated))
}

fn delete_row(tables: &mut MemoryTables, table: &str, primary_key: &str, key: &Value) -> Result<bool, DatabaseError> {
    let target = table_mut(tables, table)?;
    match target.position(primary_key, key) {
        Some(index) => {
            target.rows.remove(index);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Shared in-memory tables; clone freely, all clones see the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One empty table per registered entity, with its unique columns
    pub fn from_registry(registry: &Registry) -> Self {
        let tables = registry
            .iter()
            .map(|descriptor| {
                let table = MemoryTable {
                    unique: descriptor.unique_columns(),
                    rows: vec![],
                };
                (descriptor.table().to_string(), table)
            })
            .collect();
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    pub async fn create_table(&self, table: impl Into<String>, unique: Vec<String>) {
        let mut tables = self.tables.write().await;
        tables.entry(table.into()).or_insert_with(|| MemoryTable { unique, rows: vec![] });
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            unit: None,
        }
    }

    /// Committed row count for `table` (0 when the table is unknown)
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, |t| t.rows.len())
    }
}

struct UnitOfWork {
    view: MemoryTables,
    journal: Vec<Change>,
}

/// A session over a [`MemoryStore`]; every statement needs an open unit of work
pub struct MemorySession {
    store: MemoryStore,
    unit: Option<UnitOfWork>,
}

impl MemorySession {
    fn unit(&mut self) -> Result<&mut UnitOfWork, DatabaseError> {
        self.unit.as_mut().ok_or(DatabaseError::NoTransaction)
    }

    pub fn in_transaction(&self) -> bool {
        self.unit.is_some()
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        if self.unit.is_some() {
            warn!("Discarding abandoned unit of work before begin");
        }
        let view = self.store.tables.read().await.clone();
        self.unit = Some(UnitOfWork { view, journal: vec![] });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        let unit = self.unit.take().ok_or(DatabaseError::NoTransaction)?;
        if unit.journal.is_empty() {
            return Ok(());
        }

        let mut live = self.store.tables.write().await;
        let mut next = live.clone();
        for change in &unit.journal {
            change.apply(&mut next)?;
        }
        *live = next;
        debug!("Committed {} staged change(s)", unit.journal.len());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.unit.take().ok_or(DatabaseError::NoTransaction)?;
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<Row, DatabaseError> {
        let unit = self.unit()?;
        let stored = insert_row(&mut unit.view, table, row)?;
        unit.journal.push(Change::Insert {
            table: table.to_string(),
            row: stored.clone(),
        });
        Ok(stored)
    }

    async fn fetch(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError> {
        let unit = self.unit()?;
        let target = table_mut(&mut unit.view, filter.table_name())?;
        Ok(filter.evaluate(&target.rows))
    }

    async fn update(
        &mut self,
        table: &str,
        primary_key: &str,
        key: &Value,
        fields: Row,
    ) -> Result<Option<Row>, DatabaseError> {
        let unit = self.unit()?;
        let updated = update_row(&mut unit.view, table, primary_key, key, fields.clone())?;
        if updated.is_some() {
            unit.journal.push(Change::Update {
                table: table.to_string(),
                primary_key: primary_key.to_string(),
                key: key.clone(),
                fields,
            });
        }
        Ok(updated)
    }

    async fn delete(&mut self, table: &str, primary_key: &str, key: &Value) -> Result<bool, DatabaseError> {
        let unit = self.unit()?;
        let removed = delete_row(&mut unit.view, table, primary_key, key)?;
        if removed {
            unit.journal.push(Change::Delete {
                table: table.to_string(),
                primary_key: primary_key.to_string(),
                key: key.clone(),
            });
        }
        Ok(removed)
    }

    async fn count(&mut self, filter: &Filter) -> Result<u64, DatabaseError> {
        let unit = self.unit()?;
        let target = table_mut(&mut unit.view, filter.table_name())?;
        Ok(target.rows.iter().filter(|row| filter.matches(row)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("role", vec!["role_id".into(), "role_name".into()]).await;
        store
    }

    #[tokio::test]
    async fn statements_require_a_unit_of_work() {
        let mut session = store().await.session();
        let result = session.insert("role", row(json!({ "role_id": "a" }))).await;
        assert!(matches!(result, Err(DatabaseError::NoTransaction)));
    }

    #[tokio::test]
    async fn rollback_discards_staged_rows() {
        let store = store().await;
        let mut session = store.session();

        session.begin().await.unwrap();
        session.insert("role", row(json!({ "role_id": "a", "role_name": "admin" }))).await.unwrap();
        assert_eq!(session.count(&Filter::new("role").unwrap()).await.unwrap(), 1);
        session.rollback().await.unwrap();

        assert_eq!(store.row_count("role").await, 0);
    }

    #[tokio::test]
    async fn unique_columns_are_enforced() {
        let store = store().await;
        let mut session = store.session();

        session.begin().await.unwrap();
        session.insert("role", row(json!({ "role_id": "a", "role_name": "admin" }))).await.unwrap();
        let err = session
            .insert("role", row(json!({ "role_id": "b", "role_name": "admin" })))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueViolation { ref column, .. } if column == "role_name"));
        session.commit().await.unwrap();
        assert_eq!(store.row_count("role").await, 1);
    }

    #[tokio::test]
    async fn commit_replays_onto_concurrent_changes() {
        let store = store().await;
        let mut first = store.session();
        let mut second = store.session();

        first.begin().await.unwrap();
        second.begin().await.unwrap();
        first.insert("role", row(json!({ "role_id": "a", "role_name": "one" }))).await.unwrap();
        second.insert("role", row(json!({ "role_id": "b", "role_name": "two" }))).await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(store.row_count("role").await, 2);

        // conflicting commit leaves live data untouched
        let mut third = store.session();
        let mut fourth = store.session();
        third.begin().await.unwrap();
        fourth.begin().await.unwrap();
        third.insert("role", row(json!({ "role_id": "c", "role_name": "dup" }))).await.unwrap();
        fourth.insert("role", row(json!({ "role_id": "d", "role_name": "dup" }))).await.unwrap();
        third.commit().await.unwrap();
        assert!(matches!(fourth.commit().await, Err(DatabaseError::UniqueViolation { .. })));
        assert_eq!(store.row_count("role").await, 3);
    }

    #[tokio::test]
    async fn commit_fails_when_a_staged_row_was_removed() {
        let store = store().await;
        let mut setup = store.session();
        setup.begin().await.unwrap();
        setup.insert("role", row(json!({ "role_id": "a", "role_name": "admin" }))).await.unwrap();
        setup.insert("role", row(json!({ "role_id": "b", "role_name": "staff" }))).await.unwrap();
        setup.commit().await.unwrap();

        let mut writer = store.session();
        let mut remover = store.session();
        writer.begin().await.unwrap();
        remover.begin().await.unwrap();

        let staged = writer
            .update("role", "role_id", &json!("a"), row(json!({ "role_name": "root" })))
            .await
            .unwrap();
        assert!(staged.is_some());
        assert!(remover.delete("role", "role_id", &json!("a")).await.unwrap());
        remover.commit().await.unwrap();

        let err = writer.commit().await.unwrap_err();
        assert!(matches!(err, DatabaseError::StaleRow { ref key, .. } if key == "a"));
        assert!(!writer.in_transaction());
        assert_eq!(store.row_count("role").await, 1);

        // a delete replayed onto a row already removed fails the same way
        writer.begin().await.unwrap();
        remover.begin().await.unwrap();
        assert!(writer.delete("role", "role_id", &json!("b")).await.unwrap());
        assert!(remover.delete("role", "role_id", &json!("b")).await.unwrap());
        remover.commit().await.unwrap();
        assert!(matches!(writer.commit().await, Err(DatabaseError::StaleRow { .. })));
        assert_eq!(store.row_count("role").await, 0);
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() {
        let store = store().await;
        let mut session = store.session();
        session.begin().await.unwrap();

        let missing = session
            .update("role", "role_id", &json!("zz"), row(json!({ "role_name": "x" })))
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(!session.delete("role", "role_id", &json!("zz")).await.unwrap());

        let unknown = session.fetch(&Filter::new("nope").unwrap()).await;
        assert!(matches!(unknown, Err(DatabaseError::QueryError(_))));
    }
}
