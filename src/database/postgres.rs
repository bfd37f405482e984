use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgDatabaseError, PgRow, PgTypeInfo};
use sqlx::{Column, PgConnection, PgPool, Postgres, Row as _, Transaction, TypeInfo};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::database::manager::DatabaseError;
use crate::database::session::{Row, Session};
use crate::entity::Registry;
use crate::filter::{ColumnCasts, Filter};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Session over a Postgres pool; each unit of work is one sqlx transaction.
///
/// Dropping the session with an open transaction rolls it back.
pub struct PgSession {
    pool: PgPool,
    registry: Arc<Registry>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    pub fn new(pool: PgPool, registry: Arc<Registry>) -> Self {
        Self { pool, registry, tx: None }
    }

    fn conn(&mut self) -> Result<&mut PgConnection, DatabaseError> {
        let tx = self.tx.as_mut().ok_or(DatabaseError::NoTransaction)?;
        Ok(&mut **tx)
    }

    fn casts(&self, table: &str) -> ColumnCasts {
        self.registry.column_casts(table)
    }

    fn placeholder(casts: &ColumnCasts, column: &str, index: usize) -> String {
        match casts.get(column) {
            Some(cast) => format!("${}::{}", index, cast),
            None => format!("${}", index),
        }
    }

    fn log_query(query: &str) {
        if CONFIG.database.enable_query_logging {
            debug!("SQL: {}", query);
        }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        if self.tx.take().is_some() {
            warn!("Discarding abandoned transaction before begin");
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        let tx = self.tx.take().ok_or(DatabaseError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        let tx = self.tx.take().ok_or(DatabaseError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<Row, DatabaseError> {
        let casts = self.casts(table);
        let columns: Vec<String> = row.keys().map(|c| format!("\"{}\"", c)).collect();
        let placeholders: Vec<String> = row
            .keys()
            .enumerate()
            .map(|(i, column)| Self::placeholder(&casts, column, i + 1))
            .collect();
        let query = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        Self::log_query(&query);

        let mut q = sqlx::query(&query);
        for value in row.values() {
            q = bind_param(q, value);
        }
        let stored = q.fetch_one(self.conn()?).await.map_err(|e| classify(table, e))?;
        row_to_json(&stored)
    }

    async fn fetch(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError> {
        let sql = filter.to_sql(&self.casts(filter.table_name()));
        Self::log_query(&sql.query);

        let mut q = sqlx::query(&sql.query);
        for value in sql.params.iter() {
            q = bind_param(q, value);
        }
        let rows = q
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| classify(filter.table_name(), e))?;
        rows.iter().map(row_to_json).collect()
    }

    async fn update(
        &mut self,
        table: &str,
        primary_key: &str,
        key: &Value,
        fields: Row,
    ) -> Result<Option<Row>, DatabaseError> {
        let casts = self.casts(table);
        let assignments: Vec<String> = fields
            .keys()
            .enumerate()
            .map(|(i, column)| format!("\"{}\" = {}", column, Self::placeholder(&casts, column, i + 1)))
            .collect();
        let query = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = {} RETURNING *",
            table,
            assignments.join(", "),
            primary_key,
            Self::placeholder(&casts, primary_key, fields.len() + 1)
        );
        Self::log_query(&query);

        let mut q = sqlx::query(&query);
        for value in fields.values() {
            q = bind_param(q, value);
        }
        q = bind_param(q, key);
        let updated = q.fetch_optional(self.conn()?).await.map_err(|e| classify(table, e))?;
        updated.as_ref().map(row_to_json).transpose()
    }

    async fn delete(&mut self, table: &str, primary_key: &str, key: &Value) -> Result<bool, DatabaseError> {
        let casts = self.casts(table);
        let query = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = {}",
            table,
            primary_key,
            Self::placeholder(&casts, primary_key, 1)
        );
        Self::log_query(&query);

        let result = bind_param(sqlx::query(&query), key)
            .execute(self.conn()?)
            .await
            .map_err(|e| classify(table, e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&mut self, filter: &Filter) -> Result<u64, DatabaseError> {
        let sql = filter.to_count_sql(&self.casts(filter.table_name()));
        Self::log_query(&sql.query);

        let mut q = sqlx::query(&sql.query);
        for value in sql.params.iter() {
            q = bind_param(q, value);
        }
        let row = q
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| classify(filter.table_name(), e))?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }
}

/// Create one table per registered entity if it does not exist yet
pub async fn ensure_tables(pool: &PgPool, registry: &Registry) -> Result<(), DatabaseError> {
    for descriptor in registry.iter() {
        let pk = descriptor.primary_key();
        let mut columns = vec![format!("\"{}\" uuid PRIMARY KEY", pk)];
        for field in descriptor.schema().fields().iter().filter(|f| f.name != pk) {
            let mut column = format!("\"{}\" {}", field.name, field.field_type.pg_type());
            if field.required {
                column.push_str(" NOT NULL");
            }
            if field.unique {
                column.push_str(" UNIQUE");
            }
            columns.push(column);
        }

        let query = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            descriptor.table(),
            columns.join(", ")
        );
        PgSession::log_query(&query);
        sqlx::query(&query).execute(pool).await?;
        info!("Ensured table {} for entity {}", descriptor.table(), descriptor.name());
    }
    Ok(())
}

/// Map `23505` to a unique violation; everything else passes through
fn classify(table: &str, err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let column = db_err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .and_then(key_column)
                .or_else(|| db_err.constraint().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            error!("Unique violation on {}.{}", table, column);
            return DatabaseError::UniqueViolation {
                table: table.to_string(),
                column,
            };
        }
    }
    DatabaseError::Sqlx(err)
}

/// Column list from a detail like `Key (unique_name)=(abc) already exists.`
fn key_column(detail: &str) -> Option<String> {
    let rest = detail.strip_prefix("Key (")?;
    let end = rest.find(")=")?;
    Some(rest[..end].to_string())
}

fn row_to_json(row: &PgRow) -> Result<Row, DatabaseError> {
    let mut data = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = extract_column_value(row, i, column.type_info())?;
        data.insert(column.name().to_string(), value);
    }
    Ok(data)
}

fn extract_column_value(row: &PgRow, index: usize, type_info: &PgTypeInfo) -> Result<Value, DatabaseError> {
    let type_name = type_info.name();
    let value = match type_name {
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string())),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index)?.map(Value::String),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|f| Value::from(f as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "JSONB" | "JSON" => row.try_get::<Option<Value>, _>(index)?,
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|t| Value::String(t.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|t| Value::String(t.and_utc().to_rfc3339())),
        _ => {
            warn!("Unhandled PostgreSQL type: {}, falling back to string", type_name);
            Some(Value::String(format!("<unsupported type: {}>", type_name)))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn bind_param<'q>(q: PgQuery<'q>, v: &'q Value) -> PgQuery<'q> {
    match v {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
