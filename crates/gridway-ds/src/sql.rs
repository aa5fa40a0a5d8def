//! SQL data-source engine
//!
//! Serves `serverType: "sql"` descriptors over a pooled connection. Field
//! names are aliased back onto every selected column so result rows decode
//! by field name regardless of `nativeName` mappings. All user values are
//! bound as parameters; identifiers are validated before they are embedded.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use gridway_protocol::{is_advanced_criteria, DsResponse, TextMatchStyle};
use gridway_rdbc::dialect::{dialect_for, GenericDialect, SqlDialect};
use gridway_rdbc::pool::PooledConnection;
use gridway_rdbc::security::{escape_like_pattern, validate_sql_identifier, LIKE_ESCAPE_CHAR};
use gridway_rdbc::SqlValue;

use crate::context::DsContext;
use crate::criteria::{CriteriaCompiler, SqlFragment};
use crate::datasource::DataSource;
use crate::descriptor::DataSourceDescriptor;
use crate::error::{Error, Result};
use crate::request::DsRequest;

/// SQL engine over one descriptor.
pub struct SqlDataSource {
    descriptor: Arc<DataSourceDescriptor>,
    ctx: Arc<DsContext>,
    request: Option<DsRequest>,
    conn: Option<PooledConnection>,
    dialect: Box<dyn SqlDialect>,
}

impl SqlDataSource {
    /// Create an engine; the dialect is resolved from the database's
    /// configured type when a request is bound.
    pub fn new(descriptor: Arc<DataSourceDescriptor>, ctx: Arc<DsContext>) -> Self {
        Self {
            descriptor,
            ctx,
            request: None,
            conn: None,
            dialect: Box::new(GenericDialect),
        }
    }

    fn db_name(&self) -> Option<&str> {
        self.descriptor.db_name.as_deref()
    }

    fn conn(&self) -> Result<&PooledConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::invalid_request("no connection bound; init was not run"))
    }

    fn bound_request(&self) -> Result<DsRequest> {
        self.request
            .clone()
            .ok_or_else(|| Error::invalid_request("no request bound; init was not run"))
    }

    fn table(&self) -> Result<&str> {
        let table = self.descriptor.table_name();
        validate_sql_identifier(table)?;
        Ok(table)
    }

    /// `column AS fieldName` projection so result sets decode by field name.
    fn select_columns(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.descriptor.fields.len());
        for field in &self.descriptor.fields {
            validate_sql_identifier(&field.name)?;
            validate_sql_identifier(field.column())?;
            if field.column() == field.name {
                parts.push(field.name.clone());
            } else {
                parts.push(format!("{} AS {}", field.column(), field.name));
            }
        }
        Ok(parts.join(", "))
    }

    /// Resolve a request field to its validated column.
    fn column_for(&self, field_name: &str) -> Result<String> {
        if let Some(field) = self.descriptor.field(field_name) {
            validate_sql_identifier(field.column())?;
            return Ok(field.column().to_string());
        }
        warn!(data_source = %self.descriptor.id, field = field_name,
              "request references a field outside the descriptor");
        validate_sql_identifier(field_name)?;
        Ok(field_name.to_string())
    }

    /// Simple key/value criteria: one predicate per field, AND-joined.
    fn simple_criteria(
        &self,
        criteria: &Map<String, Value>,
        style: TextMatchStyle,
    ) -> Result<SqlFragment> {
        let mut fragments = Vec::new();
        for (field_name, value) in criteria {
            if field_name.starts_with('_') {
                continue; // wire bookkeeping, not a field predicate
            }
            let column = match self.column_for(field_name) {
                Ok(column) => column,
                Err(_) => {
                    warn!(data_source = %self.descriptor.id, field = field_name,
                          "simple criteria field skipped");
                    continue;
                }
            };
            fragments.push(match value {
                Value::Null => SqlFragment::constant(&format!("{column} IS NULL")),
                Value::Array(items) => {
                    let alternatives: Vec<SqlFragment> = items
                        .iter()
                        .map(|item| self.field_predicate(&column, item, style))
                        .collect();
                    join_or(alternatives)
                }
                other => self.field_predicate(&column, other, style),
            });
        }

        if fragments.is_empty() {
            return Ok(SqlFragment::empty());
        }
        let mut params = Vec::new();
        let sql = fragments
            .into_iter()
            .map(|f| {
                params.extend(f.params);
                f.sql
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        Ok(SqlFragment { sql, params })
    }

    fn field_predicate(&self, column: &str, value: &Value, style: TextMatchStyle) -> SqlFragment {
        if value.is_null() {
            return SqlFragment::constant(&format!("{column} IS NULL"));
        }
        match style {
            TextMatchStyle::Exact | TextMatchStyle::ExactCase => SqlFragment {
                sql: format!("{column} = ?"),
                params: vec![SqlValue::from_json(value)],
            },
            TextMatchStyle::Substring => like_predicate(column, value, true),
            TextMatchStyle::StartsWith => like_predicate(column, value, false),
        }
    }

    /// WHERE fragment addressing a row by its full primary key.
    fn pk_where(&self, pk: &Map<String, Value>) -> Result<SqlFragment> {
        let mut clauses = Vec::with_capacity(pk.len());
        let mut params = Vec::with_capacity(pk.len());
        for field in self.descriptor.pk_fields() {
            let value = pk
                .get(&field.name)
                .ok_or_else(|| Error::missing_pk(&field.name))?;
            validate_sql_identifier(field.column())?;
            clauses.push(format!("{} = ?", field.column()));
            params.push(SqlValue::from_json(value));
        }
        Ok(SqlFragment {
            sql: clauses.join(" AND "),
            params,
        })
    }

    async fn select_by_pk(&self, pk: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
        let where_frag = self.pk_where(pk)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_columns()?,
            self.table()?,
            where_frag.sql
        );
        let rows = self.conn()?.query(&sql, &where_frag.params).await?;
        Ok(rows.iter().map(|row| row.to_json_object()).collect())
    }

    fn where_criteria(&self, request: &DsRequest) -> Result<SqlFragment> {
        if is_advanced_criteria(&request.criteria) {
            let compiler =
                CriteriaCompiler::new(&self.descriptor, self.ctx.strict_sql_filtering);
            Ok(compiler.compile(&request.criteria))
        } else if let Some(map) = request.criteria_object() {
            self.simple_criteria(map, request.text_match_style)
        } else {
            Ok(SqlFragment::empty())
        }
    }
}

fn like_predicate(column: &str, value: &Value, substring: bool) -> SqlFragment {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let body = escape_like_pattern(&raw);
    let pattern = if substring {
        format!("%{body}%")
    } else {
        format!("{body}%")
    };
    SqlFragment {
        sql: format!("upper('' || {column}) like upper(?) escape ?"),
        params: vec![
            SqlValue::String(pattern),
            SqlValue::String(LIKE_ESCAPE_CHAR.to_string()),
        ],
    }
}

fn join_or(fragments: Vec<SqlFragment>) -> SqlFragment {
    let mut params = Vec::new();
    let sql = fragments
        .into_iter()
        .map(|f| {
            params.extend(f.params);
            format!("({})", f.sql)
        })
        .collect::<Vec<_>>()
        .join(" OR ");
    SqlFragment {
        sql: format!("({sql})"),
        params,
    }
}

#[async_trait]
impl DataSource for SqlDataSource {
    fn descriptor(&self) -> &Arc<DataSourceDescriptor> {
        &self.descriptor
    }

    fn request(&self) -> Option<&DsRequest> {
        self.request.as_ref()
    }

    async fn init(&mut self, request: DsRequest) -> Result<()> {
        let db_type = self
            .ctx
            .connection_pools
            .db_type(self.descriptor.db_name.as_deref())
            .map_err(|e| Error::resource(e.to_string()))?;
        self.dialect = dialect_for(&db_type);

        let conn = self
            .ctx
            .connection_pools
            .acquire(self.descriptor.db_name.as_deref())
            .await
            .map_err(|e| Error::resource(e.to_string()))?;
        self.conn = Some(conn);
        self.request = Some(request);
        Ok(())
    }

    async fn start_transaction(&mut self) -> Result<()> {
        self.conn()?.begin().await?;
        Ok(())
    }

    async fn execute_fetch(&mut self) -> Result<DsResponse> {
        let request = self.bound_request()?;

        let mut sql = format!("SELECT {} FROM {}", self.select_columns()?, self.table()?);
        let where_frag = self.where_criteria(&request)?;
        let params = if where_frag.is_empty() {
            Vec::new()
        } else {
            sql.push_str(&format!(" WHERE ({})", where_frag.sql));
            where_frag.params
        };

        if !request.sort_by.is_empty() {
            let mut parts = Vec::with_capacity(request.sort_by.len());
            for sort in &request.sort_by {
                let column = self.column_for(&sort.field)?;
                parts.push(format!(
                    "{column} {}",
                    if sort.descending { "DESC" } else { "ASC" }
                ));
            }
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }

        sql.push_str(
            &self
                .dialect
                .limit_offset_sql(request.window_limit(), request.start_row),
        );

        debug!(data_source = %self.descriptor.id, %sql, "fetch");
        let rows = self.conn()?.query(&sql, &params).await?;

        let start_row = request.start_row.unwrap_or(0);
        let total = rows.len() as u64;
        let data = Value::Array(
            rows.iter()
                .map(|row| Value::Object(row.to_json_object()))
                .collect(),
        );
        Ok(DsResponse::fetch(data, start_row, start_row + total, total))
    }

    async fn execute_add(&mut self) -> Result<DsResponse> {
        let request = self.bound_request()?;
        let mut values = request
            .values_object()
            .cloned()
            .ok_or_else(|| Error::invalid_request("add requires record values"))?;

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for field in &self.descriptor.fields {
            match values.get(&field.name) {
                Some(value) if !(value.is_null() && field.is_sequence()) => {
                    validate_sql_identifier(field.column())?;
                    columns.push(field.column().to_string());
                    params.push(SqlValue::from_json(value));
                }
                _ => {}
            }
        }
        if columns.is_empty() {
            return Err(Error::invalid_request("add carries no known field values"));
        }

        // a sequence PK not supplied by the client is generated by the back end
        let sequence_field = self
            .descriptor
            .fields
            .iter()
            .find(|f| f.is_sequence() && values.get(&f.name).map_or(true, Value::is_null))
            .cloned();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table()?,
            columns.join(", "),
            vec!["?"; params.len()].join(", ")
        );
        debug!(data_source = %self.descriptor.id, %sql, "add");
        let outcome = self
            .conn()?
            .insert(&sql, &params, sequence_field.as_ref().map(|f| f.column()))
            .await?;

        if let (Some(field), Some(key)) = (&sequence_field, &outcome.generated_key) {
            values.insert(field.name.clone(), key.to_json());
        }

        let pk = self.descriptor.pk_value(&values)?;
        let refreshed = self.select_by_pk(&pk).await?;

        let mut response = DsResponse::success(Value::Array(
            refreshed.into_iter().map(Value::Object).collect(),
        ));
        response.affected_rows = Some(outcome.affected);
        Ok(response)
    }

    async fn execute_update(&mut self) -> Result<DsResponse> {
        let request = self.bound_request()?;
        let criteria = request
            .criteria_object()
            .ok_or_else(|| Error::invalid_request("update requires primary-key criteria"))?;
        let pk = self.descriptor.pk_value(criteria)?;

        let values = request
            .values_object()
            .ok_or_else(|| Error::invalid_request("update requires record values"))?;
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for field in self.descriptor.non_pk_fields() {
            if let Some(value) = values.get(&field.name) {
                validate_sql_identifier(field.column())?;
                assignments.push(format!("{} = ?", field.column()));
                params.push(SqlValue::from_json(value));
            }
        }
        if assignments.is_empty() {
            return Err(Error::invalid_request("update carries no field values"));
        }

        let where_frag = self.pk_where(&pk)?;
        params.extend(where_frag.params.clone());
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table()?,
            assignments.join(", "),
            where_frag.sql
        );
        debug!(data_source = %self.descriptor.id, %sql, "update");
        let affected = self.conn()?.execute(&sql, &params).await?;
        if affected < 1 {
            return Err(Error::RowNotFound);
        }

        let refreshed = self.select_by_pk(&pk).await?;
        let mut response = DsResponse::success(Value::Array(
            refreshed.into_iter().map(Value::Object).collect(),
        ));
        response.affected_rows = Some(affected);
        Ok(response)
    }

    async fn execute_remove(&mut self) -> Result<DsResponse> {
        let request = self.bound_request()?;
        let criteria = request
            .criteria_object()
            .ok_or_else(|| Error::invalid_request("remove requires primary-key criteria"))?;
        let pk = self.descriptor.pk_value(criteria)?;

        let where_frag = self.pk_where(&pk)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table()?, where_frag.sql);
        debug!(data_source = %self.descriptor.id, %sql, "remove");
        let affected = self.conn()?.execute(&sql, &where_frag.params).await?;
        if affected < 1 {
            return Err(Error::RowNotFound);
        }

        let mut response = DsResponse::success(Value::Object(pk));
        response.affected_rows = Some(affected);
        Ok(response)
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn()?.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn()?.rollback().await?;
        Ok(())
    }

    async fn free_resources(&mut self) {
        self.request = None;
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self
                .ctx
                .connection_pools
                .release(self.db_name(), conn)
                .await
            {
                warn!(data_source = %self.descriptor.id, error = %e,
                      "connection release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataSourceSection;
    use gridway_rdbc::connection::ConnectionConfig;
    use gridway_rdbc::drivers::DriverRegistry;
    use gridway_rdbc::pool::PoolConfig;
    use gridway_rdbc::registry::{ConnectionPools, DbConfig, DbSection};
    use gridway_rdbc::testing::MockConnectionFactory;
    use gridway_rdbc::types::Row;
    use serde_json::json;
    use std::collections::HashMap;

    fn context(factory: Arc<MockConnectionFactory>) -> Arc<DsContext> {
        let mut drivers = DriverRegistry::new();
        drivers.register("mock", factory);
        let mut databases = HashMap::new();
        databases.insert(
            "main".to_string(),
            DbConfig {
                db_type: "postgresql".to_string(),
                factory: "mock".to_string(),
                connection: ConnectionConfig::new("mock://main"),
                pool: PoolConfig::default(),
            },
        );
        let pools = ConnectionPools::new(
            DbSection {
                default_database: Some("main".to_string()),
                databases,
            },
            drivers,
        );
        DsContext::new(&DataSourceSection::default(), Arc::new(pools))
    }

    fn descriptor() -> Arc<DataSourceDescriptor> {
        Arc::new(
            DataSourceDescriptor::from_json(
                "country",
                &json!({
                    "ID": "country",
                    "serverType": "sql",
                    "fields": [
                        {"name": "id", "type": "sequence", "primaryKey": true},
                        {"name": "name", "type": "text"},
                        {"name": "continent", "type": "text"}
                    ]
                }),
            )
            .unwrap(),
        )
    }

    fn request(raw: Value) -> DsRequest {
        DsRequest::from_envelope(&serde_json::from_value(raw).unwrap()).unwrap()
    }

    fn country_row(id: i64, name: &str, continent: &str) -> Row {
        Row::from_pairs(vec![
            ("id".to_string(), SqlValue::Int64(id)),
            ("name".to_string(), SqlValue::String(name.to_string())),
            (
                "continent".to_string(),
                SqlValue::String(continent.to_string()),
            ),
        ])
    }

    #[tokio::test]
    async fn test_fetch_window() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();
        script.push_query_result(vec![
            country_row(1, "Malta", "Europe"),
            country_row(2, "Spain", "Europe"),
        ]);

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_fetch",
                "criteria": {"continent": "Europe"},
                "startRow": 0,
                "endRow": 2
            })))
            .await
            .unwrap();
        engine.start_transaction().await.unwrap();
        let response = engine.execute().await.unwrap();
        engine.commit().await.unwrap();
        engine.free_resources().await;

        assert_eq!(response.status.code(), 0);
        assert_eq!(response.start_row, Some(0));
        assert_eq!(response.end_row, Some(2));
        assert_eq!(response.total_rows, Some(2));
        assert_eq!(response.data[0]["name"], json!("Malta"));

        let statements = script.statements();
        assert_eq!(statements[0].0, "BEGIN");
        let (sql, params) = &statements[1];
        assert_eq!(
            sql,
            "SELECT id, name, continent FROM country \
             WHERE (upper('' || continent) like upper(?) escape ?) LIMIT 2 OFFSET 0"
        );
        assert_eq!(
            params,
            &vec![
                SqlValue::String("%Europe%".into()),
                SqlValue::String("~".into())
            ]
        );
        assert_eq!(statements[2].0, "COMMIT");
    }

    #[tokio::test]
    async fn test_fetch_sort_and_advanced_criteria() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_fetch",
                "criteria": {
                    "_constructor": "AdvancedCriteria",
                    "operator": "not",
                    "criteria": [{"operator": "equals", "fieldName": "id", "value": 42}]
                },
                "sortBy": "-name"
            })))
            .await
            .unwrap();
        engine.execute().await.unwrap();
        engine.free_resources().await;

        let (sql, params) = &script.statements()[0];
        assert_eq!(
            sql,
            "SELECT id, name, continent FROM country \
             WHERE (NOT ((id = ? AND id IS NOT NULL))) ORDER BY name DESC"
        );
        assert_eq!(params, &vec![SqlValue::Int64(42)]);
    }

    #[tokio::test]
    async fn test_add_captures_generated_key() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();
        script.push_generated_key(SqlValue::Int64(7));
        script.push_query_result(vec![country_row(7, "Malta", "Europe")]);

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_add",
                "values": {"name": "Malta", "continent": "Europe"}
            })))
            .await
            .unwrap();
        let response = engine.execute().await.unwrap();
        engine.free_resources().await;

        assert_eq!(response.data[0]["id"], json!(7));
        assert_eq!(response.affected_rows, Some(1));

        let statements = script.statements();
        assert_eq!(
            statements[0].0,
            "INSERT INTO country (name, continent) VALUES (?, ?)"
        );
        assert_eq!(
            statements[1].0,
            "SELECT id, name, continent FROM country WHERE id = ?"
        );
        assert_eq!(statements[1].1, vec![SqlValue::Int64(7)]);
    }

    #[tokio::test]
    async fn test_add_without_generated_key_is_missing_pk() {
        let factory = Arc::new(MockConnectionFactory::new());

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_add",
                "values": {"name": "Malta"}
            })))
            .await
            .unwrap();
        let err = engine.execute().await.unwrap_err();
        engine.free_resources().await;
        assert!(matches!(err, Error::MissingPrimaryKey { .. }));
    }

    #[tokio::test]
    async fn test_update_by_pk() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();
        script.push_query_result(vec![country_row(3, "Malta", "Europe")]);

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_update",
                "criteria": {"id": 3},
                "values": {"name": "Malta"}
            })))
            .await
            .unwrap();
        let response = engine.execute().await.unwrap();
        engine.free_resources().await;

        assert_eq!(response.affected_rows, Some(1));
        let statements = script.statements();
        assert_eq!(statements[0].0, "UPDATE country SET name = ? WHERE id = ?");
        assert_eq!(
            statements[0].1,
            vec![SqlValue::String("Malta".into()), SqlValue::Int64(3)]
        );
    }

    #[tokio::test]
    async fn test_update_missing_pk_issues_no_sql() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_update",
                "criteria": {},
                "values": {"name": "Malta"}
            })))
            .await
            .unwrap();
        let err = engine.execute().await.unwrap_err();
        engine.free_resources().await;

        assert!(matches!(err, Error::MissingPrimaryKey { .. }));
        assert!(script.statements().is_empty(), "no SQL may be issued");
    }

    #[tokio::test]
    async fn test_update_row_not_found() {
        let factory = Arc::new(MockConnectionFactory::new());
        factory.script().push_execute_result(0);

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_update",
                "criteria": {"id": 999},
                "values": {"name": "Atlantis"}
            })))
            .await
            .unwrap();
        let err = engine.execute().await.unwrap_err();
        engine.free_resources().await;
        assert!(matches!(err, Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_remove_returns_pk_tuple() {
        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();

        let mut engine = SqlDataSource::new(descriptor(), context(factory));
        engine
            .init(request(json!({
                "appID": "app",
                "operation": "country_remove",
                "criteria": {"id": 3}
            })))
            .await
            .unwrap();
        let response = engine.execute().await.unwrap();
        engine.free_resources().await;

        assert_eq!(response.data, json!({"id": 3}));
        assert_eq!(
            script.statements()[0].0,
            "DELETE FROM country WHERE id = ?"
        );
    }

    #[tokio::test]
    async fn test_free_resources_returns_connection() {
        let factory = Arc::new(MockConnectionFactory::new());
        let ctx = context(factory);

        let mut engine = SqlDataSource::new(descriptor(), ctx.clone());
        engine
            .init(request(json!({"appID": "app", "operation": "country_fetch"})))
            .await
            .unwrap();
        engine.free_resources().await;

        // the pooled connection is back: a second borrow does not create one
        let conn = ctx.connection_pools.acquire(None).await.unwrap();
        ctx.connection_pools.release(None, conn).await.unwrap();
    }
}
