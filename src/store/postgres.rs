//! Postgres + pgvector realization of the vector-store interface. One physical table
//! per collection (`rag_collection_<name>`), since pgvector's column type is fixed to
//! a single dimension at table-creation time and the invariant "dimension is fixed
//! for the lifetime of a collection" is then enforced by the schema itself rather
//! than by application bookkeeping.

use super::{Distance, Filter, Payload, Point, ScoredPoint, VectorStore};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;

pub struct PostgresVectorStore {
    pool: PgPool,
}

fn table_name(collection: &str) -> CoreResult<String> {
    if collection.is_empty()
        || !collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || collection.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
    {
        return Err(CoreError::validation(format!("invalid collection name: {collection}")));
    }
    Ok(format!("rag_collection_{collection}"))
}

/// Builds a `WHERE` clause over JSONB payload-equality, with placeholders starting
/// at `$start_idx` (callers that bind an extra parameter before the filter, such as
/// `search`'s query vector at `$1`, pass `start_idx = 2`).
fn build_where(filter: Option<&Filter>, start_idx: usize) -> (String, Vec<Value>) {
    let clauses = match filter {
        Some(f) if !f.0.is_empty() => &f.0,
        _ => return (String::new(), Vec::new()),
    };
    let parts: Vec<String> = clauses
        .iter()
        .enumerate()
        .map(|(i, (key, _))| format!("payload->>'{key}' = ${}", start_idx + i))
        .collect();
    let values = clauses.iter().map(|(_, v)| v.clone()).collect();
    (format!("WHERE {}", parts.join(" AND ")), values)
}

impl PostgresVectorStore {
    pub async fn connect(url: &str, pool_max_size: u32, pool_timeout_seconds: u64) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_max_size)
            .acquire_timeout(Duration::from_secs(pool_timeout_seconds))
            .connect(url)
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorStore for PostgresVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize, _distance: Distance) -> CoreResult<()> {
        let table = table_name(collection)?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector").execute(&self.pool).await?;

        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                vector vector({dimension}) NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        let idx = format!(
            "CREATE INDEX IF NOT EXISTS {table}_vector_idx ON {table} USING hnsw (vector vector_cosine_ops)"
        );
        // HNSW indexing is an optimization; a fresh pgvector install without the
        // extension version that ships hnsw should not fail collection creation.
        let _ = sqlx::query(&idx).execute(&self.pool).await;

        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> CoreResult<()> {
        let table = table_name(collection)?;
        let mut tx = self.pool.begin().await?;

        for point in points {
            let id = uuid::Uuid::parse_str(&point.id)
                .map_err(|e| CoreError::validation(format!("invalid point id {}: {e}", point.id)))?;
            let payload = serde_json::to_value(&point.payload)
                .map_err(|e| CoreError::validation(format!("invalid payload: {e}")))?;
            let vector = Vector::from(point.vector);

            let sql = format!(
                r#"INSERT INTO {table} (id, vector, payload) VALUES ($1, $2, $3)
                   ON CONFLICT (id) DO UPDATE SET vector = EXCLUDED.vector, payload = EXCLUDED.payload"#
            );
            sqlx::query(&sql).bind(id).bind(vector).bind(payload).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> CoreResult<Vec<ScoredPoint>> {
        let table = table_name(collection)?;
        let (where_clause, clauses) = build_where(filter, 2);
        let sql = format!(
            r#"SELECT id, payload, 1 - (vector <=> $1) AS score FROM {table} {where_clause}
               ORDER BY vector <=> $1 LIMIT {k}"#
        );

        let mut query = sqlx::query(&sql).bind(Vector::from(query_vector.to_vec()));
        for value in &clauses {
            query = query.bind(value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()));
        }

        let rows = match query.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.into_iter()
            .map(|row| {
                let id: uuid::Uuid = row.try_get("id")?;
                let payload_json: serde_json::Value = row.try_get("payload")?;
                let score: f64 = row.try_get("score")?;
                let payload: Payload = serde_json::from_value(payload_json)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(ScoredPoint { id: id.to_string(), score: score as f32, payload })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(CoreError::from)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<usize>,
    ) -> CoreResult<Vec<(String, Payload)>> {
        let table = table_name(collection)?;
        let (where_clause, clauses) = build_where(Some(filter), 1);
        let offset = offset.unwrap_or(0);
        let sql = format!(
            r#"SELECT id, payload FROM {table} {where_clause}
               ORDER BY payload->>'timestamp' ASC LIMIT {limit} OFFSET {offset}"#
        );

        let mut query = sqlx::query(&sql);
        for value in &clauses {
            query = query.bind(value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()));
        }

        let rows = match query.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.into_iter()
            .map(|row| {
                let id: uuid::Uuid = row.try_get("id")?;
                let payload_json: serde_json::Value = row.try_get("payload")?;
                let payload: Payload = serde_json::from_value(payload_json)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok((id.to_string(), payload))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(CoreError::from)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> CoreResult<u64> {
        let table = table_name(collection)?;
        let (where_clause, clauses) = build_where(Some(filter), 1);
        let sql = format!("DELETE FROM {table} {where_clause}");

        let mut query = sqlx::query(&sql);
        for value in &clauses {
            query = query.bind(value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()));
        }

        match query.execute(&self.pool).await {
            Ok(result) => Ok(result.rows_affected()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> CoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = table_name(collection)?;
        let uuids = ids
            .iter()
            .map(|id| uuid::Uuid::parse_str(id).map_err(|e| CoreError::validation(format!("invalid point id {id}: {e}"))))
            .collect::<CoreResult<Vec<_>>>()?;

        let sql = format!("DELETE FROM {table} WHERE id = ANY($1)");
        match sqlx::query(&sql).bind(&uuids[..]).execute(&self.pool).await {
            Ok(result) => Ok(result.rows_affected()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_collection(&self, collection: &str) -> CoreResult<()> {
        let table = table_name(collection)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> CoreResult<u64> {
        let table = table_name(collection)?;
        let (where_clause, clauses) = build_where(filter, 1);
        let sql = format!("SELECT COUNT(*) AS n FROM {table} {where_clause}");

        let mut query = sqlx::query(&sql);
        for value in &clauses {
            query = query.bind(value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()));
        }

        match query.fetch_one(&self.pool).await {
            Ok(row) => {
                let n: i64 = row.try_get("n")?;
                Ok(n as u64)
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
