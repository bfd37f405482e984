use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::database::manager::DatabaseError;
use crate::filter::Filter;

/// A stored row: column name -> JSON value
pub type Row = Map<String, Value>;

/// One caller-owned persistence session.
///
/// Every statement issued between `begin` and `commit`/`rollback` belongs to
/// a single unit of work. Sessions are never shared between tasks; each
/// method takes `&mut self`.
#[async_trait]
pub trait Session: Send {
    async fn begin(&mut self) -> Result<(), DatabaseError>;

    async fn commit(&mut self) -> Result<(), DatabaseError>;

    async fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// Insert a row and return it as stored
    async fn insert(&mut self, table: &str, row: Row) -> Result<Row, DatabaseError>;

    /// Rows matching the filter, in filter order (storage order for ties)
    async fn fetch(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError>;

    /// Apply `fields` to the row with `primary_key = key`; `None` when absent
    async fn update(
        &mut self,
        table: &str,
        primary_key: &str,
        key: &Value,
        fields: Row,
    ) -> Result<Option<Row>, DatabaseError>;

    /// Remove the row with `primary_key = key`; `false` when absent
    async fn delete(&mut self, table: &str, primary_key: &str, key: &Value) -> Result<bool, DatabaseError>;

    async fn count(&mut self, filter: &Filter) -> Result<u64, DatabaseError>;
}
