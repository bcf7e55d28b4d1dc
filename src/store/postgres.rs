//! PostgreSQL document store: one JSONB table per resource table, plans compiled by `sql::PlanWriter`.

use super::{key_text, Document, DocumentStore, InsertResult, TableSchema, WriteResult};
use crate::error::StoreError;
use crate::query::plan::{RowQuery, Selection, StreamQuery, TableRef};
use crate::sql::{self, bind_all, Catalog, PlanWriter, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use tokio::sync::{OnceCell, RwLock};

pub struct PgDocumentStore {
    pool: PgPool,
    /// Schema for tables without an explicit one, and home of the comparison function.
    schema: String,
    catalog: RwLock<Catalog>,
    helpers: OnceCell<()>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgDocumentStore {
            pool,
            schema: schema.into(),
            catalog: RwLock::new(Catalog::new()),
            helpers: OnceCell::new(),
        }
    }

    /// Connects to `database_url`, creating the database first when it does not exist yet.
    pub async fn connect(
        database_url: &str,
        schema: impl Into<String>,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(database_url)?;
        create_database_if_missing(&options).await?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_helpers(&self) -> Result<(), StoreError> {
        self.helpers
            .get_or_try_init(|| async {
                sqlx::query(&sql::create_schema(&self.schema))
                    .execute(&self.pool)
                    .await?;
                for ddl in sql::helper_functions(&self.schema) {
                    sqlx::query(&ddl).execute(&self.pool).await?;
                }
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Builds a query under the catalog read lock; the lock is released before any await on the database.
    async fn build<F>(&self, f: F) -> Result<QueryBuf, StoreError>
    where
        F: FnOnce(&PlanWriter<'_>) -> Result<QueryBuf, StoreError>,
    {
        let catalog = self.catalog.read().await;
        let writer = PlanWriter::new(&self.schema, &catalog);
        f(&writer)
    }
}

fn log_query(q: &QueryBuf) {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), StoreError> {
        self.ensure_helpers().await?;
        let qualified = sql::qualified_table(&self.schema, table);
        if let Some(ns) = &table.schema {
            sqlx::query(&sql::create_schema(ns)).execute(&self.pool).await?;
        }
        sqlx::query(&sql::create_table(&qualified)).execute(&self.pool).await?;
        for index in &schema.indexes {
            let ddl = sql::create_index(&qualified, schema, index);
            tracing::debug!(sql = %ddl, "index");
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        self.catalog.write().await.insert(table.clone(), schema.clone());
        tracing::info!(table = %table, "table ready");
        Ok(())
    }

    async fn fetch_row(&self, query: &RowQuery) -> Result<Option<Value>, StoreError> {
        let q = self.build(|w| w.select_row(query)).await?;
        log_query(&q);
        let row: Option<Value> = sqlx::query_scalar_with(&q.sql, bind_all(&q.params)?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn fetch_stream(&self, query: &StreamQuery) -> Result<Vec<Value>, StoreError> {
        let q = self.build(|w| w.select_stream(query)).await?;
        log_query(&q);
        let rows: Vec<Value> = sqlx::query_scalar_with(&q.sql, bind_all(&q.params)?)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count(&self, query: &StreamQuery) -> Result<u64, StoreError> {
        let q = self.build(|w| w.count(query)).await?;
        log_query(&q);
        let n: i64 = sqlx::query_scalar_with(&q.sql, bind_all(&q.params)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&self, table: &TableRef, docs: Vec<Document>) -> Result<InsertResult, StoreError> {
        let pk = self
            .catalog
            .read()
            .await
            .get(table)
            .map(|s| s.primary_key.clone())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let mut result = InsertResult::default();
        let mut tx = self.pool.begin().await?;
        for mut doc in docs {
            let id = match doc.get(&pk) {
                Some(key) if !key.is_null() => key_text(key),
                _ => {
                    let generated = uuid::Uuid::new_v4().to_string();
                    doc.insert(pk.clone(), Value::String(generated.clone()));
                    result.generated_keys.push(Value::String(generated.clone()));
                    generated
                }
            };
            let q = self.build(|w| Ok(w.insert(table, id.clone(), Value::Object(doc)))).await?;
            log_query(&q);
            let done = sqlx::query_with(&q.sql, bind_all(&q.params)?)
                .execute(&mut *tx)
                .await?;
            if done.rows_affected() == 0 {
                result.errors += 1;
                result
                    .first_error
                    .get_or_insert_with(|| format!("Duplicate primary key `{}`: {}", pk, id));
            } else {
                result.inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn update(&self, table: &TableRef, key: &Value, patch: Document) -> Result<WriteResult, StoreError> {
        let patch = Value::Object(patch);
        let mut result = WriteResult::default();
        let mut tx = self.pool.begin().await?;
        let check = self.build(|w| Ok(w.contains_patch(table, key, patch.clone()))).await?;
        log_query(&check);
        let contained: Option<bool> = sqlx::query_scalar_with(&check.sql, bind_all(&check.params)?)
            .fetch_optional(&mut *tx)
            .await?;
        match contained {
            None => result.skipped = 1,
            Some(true) => result.unchanged = 1,
            Some(false) => {
                let q = self.build(|w| Ok(w.update(table, key, patch))).await?;
                log_query(&q);
                sqlx::query_with(&q.sql, bind_all(&q.params)?)
                    .execute(&mut *tx)
                    .await?;
                result.replaced = 1;
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn delete(&self, selection: &Selection) -> Result<WriteResult, StoreError> {
        let q = self.build(|w| w.delete(selection)).await?;
        log_query(&q);
        let done = sqlx::query_with(&q.sql, bind_all(&q.params)?)
            .execute(&self.pool)
            .await?;
        let mut result = WriteResult {
            deleted: done.rows_affected(),
            ..Default::default()
        };
        if result.deleted == 0 {
            result.skipped = 1;
        }
        Ok(result)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Options for the maintenance database plus the name of the target database,
/// or `None` when the target is the maintenance database itself.
fn maintenance_options(options: &PgConnectOptions) -> Option<(PgConnectOptions, String)> {
    let name = options.get_database().filter(|name| !name.is_empty() && *name != "postgres")?;
    Some((options.clone().database("postgres"), name.to_string()))
}

async fn create_database_if_missing(options: &PgConnectOptions) -> Result<(), StoreError> {
    let Some((maintenance, name)) = maintenance_options(options) else {
        return Ok(());
    };
    let mut conn = maintenance.connect().await?;
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&name)
        .fetch_optional(&mut conn)
        .await?;
    if found.is_none() {
        tracing::info!(database = %name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}
