//! # gridway-ds
//!
//! Descriptor-driven data-source engines for the Gridway data broker.
//!
//! A *data source* is a logical record set described by an immutable
//! descriptor (fields, primary key, engine kind, back-end attributes).
//! Engines implement the operation lifecycle the broker drives:
//!
//! ```text
//! init → start_transaction → execute → commit | rollback → free_resources
//! ```
//!
//! Three engines ship in this crate:
//! - [`sql::SqlDataSource`] — parameterised SQL over a pooled connection,
//!   including the advanced-criteria compiler in [`criteria`]
//! - [`json::JsonFileDataSource`] — a JSON file per record set
//! - [`datasource::GenericDataSource`] — projection only, for descriptors
//!   driven by custom server logic
//!
//! Custom engines register by constructor name in
//! [`pool::DataSourcePools`], which also owns the process-wide descriptor
//! cache and instance pooling.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod context;
pub mod criteria;
pub mod datasource;
pub mod descriptor;
pub mod error;
pub mod json;
pub mod pool;
pub mod request;
pub mod sql;

pub use context::{DataSourceSection, DsContext};
pub use criteria::{CriteriaCompiler, SqlFragment};
pub use datasource::{DataSource, GenericDataSource};
pub use descriptor::{DataSourceDescriptor, FieldDescriptor, FieldType, ServerType};
pub use error::{Error, Result};
pub use json::JsonFileDataSource;
pub use pool::{DataSourcePools, EngineFactory};
pub use request::{DsRequest, SortSpecifier};
pub use sql::SqlDataSource;
