//! Testing utilities for gridway-rdbc
//!
//! A scriptable in-memory [`Connection`] and factory so pools, data-source
//! engines and coordinators can be exercised without a live database.
//!
//! # Example
//!
//! ```rust,ignore
//! let factory = Arc::new(MockConnectionFactory::new());
//! factory.script().push_query_result(vec![row]);
//!
//! let conn = factory.create(&ConnectionConfig::default()).await?;
//! let rows = conn.query("SELECT 1", &[]).await?;
//! assert_eq!(factory.script().statements().len(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
};
use crate::error::{Error, Result};
use crate::types::{Row, SqlValue};

/// Shared script driving every connection a [`MockConnectionFactory`]
/// produces: queued results, failure switches and a statement log.
#[derive(Default)]
pub struct MockScript {
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    query_results: Mutex<VecDeque<Vec<Row>>>,
    execute_results: Mutex<VecDeque<u64>>,
    generated_keys: Mutex<VecDeque<SqlValue>>,
    fail_next: Mutex<Option<String>>,
    fail_commit: AtomicBool,
    valid: AtomicBool,
}

impl MockScript {
    /// Create a script with no queued results (queries return no rows,
    /// statements report one affected row).
    pub fn new() -> Self {
        let script = Self::default();
        script.valid.store(true, Ordering::Relaxed);
        script
    }

    /// Queue a result set for the next `query` call.
    pub fn push_query_result(&self, rows: Vec<Row>) {
        self.query_results.lock().push_back(rows);
    }

    /// Queue an affected-row count for the next `execute`/`insert` call.
    pub fn push_execute_result(&self, affected: u64) {
        self.execute_results.lock().push_back(affected);
    }

    /// Queue a generated key for the next `insert` call.
    pub fn push_generated_key(&self, key: SqlValue) {
        self.generated_keys.lock().push_back(key);
    }

    /// Fail the next statement of any kind with the given message.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    /// Make every commit fail.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::Relaxed);
    }

    /// Control what `is_valid` reports.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Relaxed);
    }

    /// Every statement issued so far, with its bound parameters.
    /// Transaction control is logged as `BEGIN` / `COMMIT` / `ROLLBACK`.
    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.statements.lock().clone()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.statements.lock().push((sql.to_string(), params.to_vec()));
    }

    fn take_failure(&self) -> Option<String> {
        self.fail_next.lock().take()
    }
}

/// A connection whose behaviour is driven by a shared [`MockScript`].
pub struct MockConnection {
    script: Arc<MockScript>,
}

impl MockConnection {
    /// Create a connection over an existing script.
    pub fn new(script: Arc<MockScript>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.script.record(sql, params);
        if let Some(message) = self.script.take_failure() {
            return Err(Error::query_with_sql(message, sql));
        }
        Ok(self
            .script
            .query_results
            .lock()
            .pop_front()
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.script.record(sql, params);
        if let Some(message) = self.script.take_failure() {
            return Err(Error::query_with_sql(message, sql));
        }
        Ok(self.script.execute_results.lock().pop_front().unwrap_or(1))
    }

    async fn insert(
        &self,
        sql: &str,
        params: &[SqlValue],
        _returning: Option<&str>,
    ) -> Result<InsertOutcome> {
        self.script.record(sql, params);
        if let Some(message) = self.script.take_failure() {
            return Err(Error::query_with_sql(message, sql));
        }
        Ok(InsertOutcome {
            affected: self.script.execute_results.lock().pop_front().unwrap_or(1),
            generated_key: self.script.generated_keys.lock().pop_front(),
        })
    }

    async fn begin(&self) -> Result<()> {
        self.script.record("BEGIN", &[]);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.script.record("COMMIT", &[]);
        if self.script.fail_commit.load(Ordering::Relaxed) {
            return Err(Error::transaction("scripted commit failure"));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.script.record("ROLLBACK", &[]);
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        self.script.valid.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s that all share one script.
pub struct MockConnectionFactory {
    script: Arc<MockScript>,
    fail_create: AtomicBool,
}

impl Default for MockConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnectionFactory {
    /// Create a factory with a fresh script.
    pub fn new() -> Self {
        Self {
            script: Arc::new(MockScript::new()),
            fail_create: AtomicBool::new(false),
        }
    }

    /// The script shared by every connection this factory creates.
    pub fn script(&self) -> Arc<MockScript> {
        self.script.clone()
    }

    /// Make subsequent `create` calls fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(Error::connection(format!(
                "scripted connect failure for {}",
                config.url
            )));
        }
        Ok(Box::new(MockConnection::new(self.script.clone())))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}
