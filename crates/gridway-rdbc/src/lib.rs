//! # gridway-rdbc
//!
//! Relational database connectivity for the Gridway data broker.
//!
//! This crate provides the layer between the broker's data-source engines
//! and actual database drivers:
//!
//! - **Value model**: [`SqlValue`] and [`types::Row`] carry scalars between
//!   wire JSON and bound query parameters
//! - **Connection contract**: [`connection::Connection`] with
//!   connection-scoped transactions and generated-key capture
//! - **Driver registry**: named [`connection::ConnectionFactory`]
//!   implementations registered at program start
//! - **Pooling**: per-database semaphore-bounded pools behind a named
//!   registry keyed by the `db.*` configuration section
//! - **Dialects**: identifier quoting and paging clauses per database type
//! - **Security**: identifier validation and LIKE/literal escaping
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod pool;
pub mod registry;
pub mod security;
pub mod testing;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
    };
    pub use crate::dialect::{dialect_for, GenericDialect, MySqlDialect, PostgresDialect, SqlDialect};
    pub use crate::drivers::DriverRegistry;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::pool::{AtomicPoolStats, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
    pub use crate::registry::{ConnectionPools, DbConfig, DbSection};
    pub use crate::types::{Row, SqlValue};
}

pub use error::{Error, Result};
pub use types::{Row, SqlValue};
