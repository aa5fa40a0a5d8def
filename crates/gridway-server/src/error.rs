//! Server-level errors
//!
//! Errors above the operation boundary: envelope parsing, configuration and
//! init-phase failures. Everything below the operation boundary becomes a
//! failure *response* in its slot and never surfaces here. `Resubmit` is a
//! soft signal, not a failure: the response formatter answers it with the
//! browser retry trampoline.

use thiserror::Error;

/// Result type for server-level operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that fail a whole request rather than one operation.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Envelope unparsable as both JSON and XML
    #[error("transaction envelope parse error: {0}")]
    Parse(String),

    /// Empty `_transaction` on an IDA call; the client must resubmit
    #[error("transaction must be resubmitted")]
    Resubmit,

    /// Configuration missing or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// The init phase failed; no per-operation responses exist
    #[error("transaction init failed: {0}")]
    Init(String),
}

impl ServerError {
    /// Whether this is the resubmit soft signal.
    pub fn is_resubmit(&self) -> bool {
        matches!(self, Self::Resubmit)
    }
}
