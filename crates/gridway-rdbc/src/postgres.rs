//! PostgreSQL backend for gridway-rdbc
//!
//! Implements [`Connection`] and [`ConnectionFactory`] over tokio-postgres.
//! The broker builds SQL with `?` placeholders; this backend rewrites them
//! to PostgreSQL's `$n` ordinals before dispatch.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, error};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
};
use crate::error::{Error, Result};
use crate::types::{Row, SqlValue};

/// Rewrite `?` placeholders to `$1..$n`, skipping quoted regions.
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut in_single = false;
    let mut in_double = false;
    for c in sql.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '?' if !in_single && !in_double => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn to_sql_param(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Int64(n) => Box::new(*n),
        SqlValue::Float64(n) => Box::new(*n),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::String(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Json(j) => Box::new(j.clone()),
        SqlValue::Array(items) => {
            let json = serde_json::to_value(items.iter().map(SqlValue::to_json).collect::<Vec<_>>())
                .unwrap_or_default();
            Box::new(json)
        }
    }
}

fn cell_to_value(row: &tokio_postgres::Row, index: usize) -> SqlValue {
    let ty = row.columns()[index].type_();
    match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, |n| SqlValue::Int64(i64::from(n))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, |n| SqlValue::Int64(i64::from(n))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Int64),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, |n| SqlValue::Float64(f64::from(n))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Float64),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Decimal),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Bytes),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Date),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, |dt| SqlValue::DateTime(dt.naive_utc())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Uuid),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::Json),
        _ => row
            .try_get::<_, Option<String>>(index)
            .ok()
            .flatten()
            .map_or(SqlValue::Null, SqlValue::String),
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values: Vec<SqlValue> = (0..pg_row.len()).map(|i| cell_to_value(pg_row, i)).collect();
    Row::new(columns, values)
}

/// A PostgreSQL connection.
pub struct PgConnection {
    client: tokio_postgres::Client,
}

impl PgConnection {
    fn params_refs(params: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
        params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = numbered_placeholders(sql);
        debug!(%sql, "pg query");
        let boxed: Vec<_> = params.iter().map(to_sql_param).collect();
        let rows = self
            .client
            .query(&sql, &Self::params_refs(&boxed))
            .await
            .map_err(|e| Error::Query {
                message: e.to_string(),
                sql: Some(sql),
                source: Some(Box::new(e)),
            })?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = numbered_placeholders(sql);
        debug!(%sql, "pg execute");
        let boxed: Vec<_> = params.iter().map(to_sql_param).collect();
        self.client
            .execute(&sql, &Self::params_refs(&boxed))
            .await
            .map_err(|e| Error::Query {
                message: e.to_string(),
                sql: Some(sql),
                source: Some(Box::new(e)),
            })
    }

    async fn insert(
        &self,
        sql: &str,
        params: &[SqlValue],
        returning: Option<&str>,
    ) -> Result<InsertOutcome> {
        match returning {
            Some(column) => {
                crate::security::validate_sql_identifier(column)?;
                let sql = format!("{sql} RETURNING \"{column}\"");
                let rows = self.query(&sql, params).await?;
                let generated_key = rows
                    .first()
                    .and_then(|row| row.values().first())
                    .cloned();
                Ok(InsertOutcome {
                    affected: rows.len() as u64,
                    generated_key,
                })
            }
            None => {
                let affected = self.execute(sql, params).await?;
                Ok(InsertOutcome {
                    affected,
                    generated_key: None,
                })
            }
        }
    }

    async fn begin(&self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction(e.to_string()))
    }

    async fn commit(&self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::transaction(e.to_string()))
    }

    async fn rollback(&self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::transaction(e.to_string()))
    }

    async fn is_valid(&self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        // Dropping the client terminates the connection task.
        Ok(())
    }
}

/// Factory creating [`PgConnection`]s.
#[derive(Debug, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let connect = tokio_postgres::connect(&config.url, NoTls);
        let (client, connection) =
            tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connect)
                .await
                .map_err(|_| Error::timeout("connect timed out"))?
                .map_err(|e| Error::connection_with_source("connect failed", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection task ended");
            }
        });

        Ok(Box::new(PgConnection { client }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(
            numbered_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
        // `?` inside literals and quoted identifiers is untouched
        assert_eq!(
            numbered_placeholders("SELECT '?' , \"c?\" FROM t WHERE a = ?"),
            "SELECT '?' , \"c?\" FROM t WHERE a = $1"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }
}
