//! Connection pool for gridway-rdbc
//!
//! Semaphore-bounded pooling with:
//! - Configurable pool sizes and timeouts
//! - Validation on borrow and optional validation on return
//! - Expired-connection recycling
//! - Metrics and graceful shutdown
//!
//! One `ConnectionPool` serves one configured database; the named registry
//! in [`crate::registry`] owns one pool per `db.*` section.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections retained when trimming the pool
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection, in milliseconds
    pub acquire_timeout_ms: u64,
    /// Maximum connection lifetime before recycling, in milliseconds
    pub max_lifetime_ms: u64,
    /// Idle timeout (connections idle longer are closed), in milliseconds
    pub idle_timeout_ms: u64,
    /// Whether to validate connections on borrow
    pub test_on_borrow: bool,
    /// Whether to validate connections on return
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout_ms: 30_000,
            max_lifetime_ms: 1_800_000, // 30 minutes
            idle_timeout_ms: 600_000,   // 10 minutes
            test_on_borrow: true,
            test_on_return: false,
        }
    }
}

impl PoolConfig {
    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable/disable validation on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Enable/disable validation on return
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    /// Acquire timeout as a [`Duration`]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Maximum lifetime as a [`Duration`]
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Idle timeout as a [`Duration`]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool acquisition timed out
    pub exhausted_count: u64,
    /// Total wait time for connections (in milliseconds)
    pub total_wait_time_ms: u64,
    /// Number of borrow/return validation failures
    pub validation_failures: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub validation_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self, wait_time_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validation failure
    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Internal pool entry with metadata
struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// A connection borrowed from a pool.
///
/// Return it with [`ConnectionPool::release`]; a guard dropped without an
/// explicit release hands its connection back to the pool in the background.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<ConnectionPool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_ref()
            .expect("connection already released")
            .as_ref()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .finish()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection + 'static;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(pool = %self.pool.name, "pooled connection dropped without release");
            let pool = self.pool.clone();
            let created_at = self.created_at;
            tokio::spawn(async move {
                pool.return_raw(conn, created_at).await;
            });
        }
    }
}

/// A bounded pool of validated connections for one database.
pub struct ConnectionPool {
    name: String,
    config: PoolConfig,
    conn_config: ConnectionConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO for better cache locality)
    idle: Mutex<Vec<PoolEntry>>,
    semaphore: Arc<Semaphore>,
    total_connections: AtomicUsize,
    stats: Arc<AtomicPoolStats>,
    shutdown: AtomicBool,
}

impl ConnectionPool {
    /// Create a new pool. Connections are created lazily on first borrow.
    pub fn new(
        name: impl Into<String>,
        conn_config: ConnectionConfig,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            conn_config,
            factory,
            total_connections: AtomicUsize::new(0),
            stats: Arc::new(AtomicPoolStats::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Borrow a connection, creating one if no valid idle connection exists.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: format!("pool '{}' is shut down", self.name),
            });
        }

        let start = Instant::now();

        let permit = tokio::time::timeout(
            self.config.acquire_timeout(),
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            self.stats.record_exhausted();
            Error::PoolExhausted {
                message: format!(
                    "timeout waiting for connection to '{}' ({}ms)",
                    self.name, self.config.acquire_timeout_ms
                ),
            }
        })?
        .map_err(|_| Error::PoolExhausted {
            message: format!("pool '{}' semaphore closed", self.name),
        })?;

        // Try to reuse an idle connection, recycling expired ones
        let reused = loop {
            let entry = {
                let mut idle = self.idle.lock().await;
                idle.pop()
            };
            match entry {
                Some(entry) => {
                    if self.is_expired(&entry) {
                        self.destroy(entry.conn).await;
                        continue;
                    }
                    if self.config.test_on_borrow && !self.factory.validate(&*entry.conn).await {
                        self.stats.record_validation_failure();
                        self.destroy(entry.conn).await;
                        continue;
                    }
                    break Some(entry);
                }
                None => break None,
            }
        };

        let (conn, created_at) = match reused {
            Some(entry) => (entry.conn, entry.created_at),
            None => {
                let conn = self.factory.create(&self.conn_config).await?;
                self.total_connections.fetch_add(1, Ordering::Release);
                self.stats.record_created();
                (conn, Instant::now())
            }
        };

        self.stats
            .record_acquisition(start.elapsed().as_millis() as u64);

        Ok(PooledConnection {
            conn: Some(conn),
            created_at,
            pool: self.clone(),
            _permit: Some(permit),
        })
    }

    /// Return a borrowed connection to the pool.
    pub async fn release(&self, mut pooled: PooledConnection) {
        if let Some(conn) = pooled.conn.take() {
            self.return_raw(conn, pooled.created_at).await;
        }
        // dropping `pooled` releases the semaphore permit
    }

    /// Shared return path for explicit release and guard drops.
    async fn return_raw(&self, conn: Box<dyn Connection>, created_at: Instant) {
        if self.shutdown.load(Ordering::Acquire) {
            self.destroy(conn).await;
            return;
        }

        if self.config.test_on_return && !self.factory.validate(&*conn).await {
            self.stats.record_validation_failure();
            self.destroy(conn).await;
            return;
        }

        let mut idle = self.idle.lock().await;
        idle.push(PoolEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
    }

    async fn destroy(&self, conn: Box<dyn Connection>) {
        self.factory.destroy(conn).await;
        self.total_connections.fetch_sub(1, Ordering::Release);
        self.stats.record_closed();
    }

    fn is_expired(&self, entry: &PoolEntry) -> bool {
        if entry.created_at.elapsed() > self.config.max_lifetime() {
            return true;
        }
        // idle recycling stops at the min_size floor
        entry.last_used.elapsed() > self.config.idle_timeout() && self.size() > self.config.min_size
    }

    /// Pool name (the configured database name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current total connection count
    pub fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    /// Pool statistics snapshot
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Close all idle connections and refuse further borrows.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);

        let entries: Vec<PoolEntry> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        for entry in entries {
            self.destroy(entry.conn).await;
        }
        if self.size() > 0 {
            warn!(
                pool = %self.name,
                outstanding = self.size(),
                "pool closed with connections still borrowed"
            );
        }
    }
}
