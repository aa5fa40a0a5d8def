//! # gridway-server
//!
//! Transaction coordinator and HTTP front-ends for the Gridway data broker.
//!
//! A request travels:
//!
//! ```text
//! envelope parser (IDA or REST)
//!   → transaction coordinator (init / execute / free phases)
//!     → per-operation lifecycle against pooled data sources or RPC targets
//!   → response formatter (framed JSON/XML, REST wrappers, trampolines)
//! ```
//!
//! All process-wide state — configuration, connection pools, data-source
//! pools, the server-object registry — lives in [`context::ServerContext`],
//! created once at startup and threaded through the handlers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod format;
pub mod http;
pub mod operation;
pub mod registry;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use coordinator::TransactionCoordinator;
pub use envelope::{DataFormat, ParsedOperation, ParsedRequest, RequestInput};
pub use error::{Result, ServerError};
pub use format::{FormattedResponse, JsonAffixes, Transport};
pub use http::{build_router, serve};
pub use registry::{ServerObject, ServerObjectFactory, ServerObjectRegistry};
