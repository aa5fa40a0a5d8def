//! Error types for gridway-ds
//!
//! Splits into descriptor-loading failures (surface before an operation
//! runs), per-operation failures (become failure responses in their slot)
//! and back-end errors carried through from gridway-rdbc.

use thiserror::Error;

/// Result type for gridway-ds operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gridway-ds
#[derive(Error, Debug)]
pub enum Error {
    /// No descriptor file found for the requested data source id
    #[error("no descriptor found for data source '{id}' under {path}")]
    DescriptorNotFound {
        /// Requested data source id
        id: String,
        /// Directory that was searched
        path: String,
    },

    /// Descriptor file exists but cannot be parsed
    #[error("descriptor for '{id}' failed to parse: {message}")]
    DescriptorParse {
        /// Requested data source id
        id: String,
        /// Parser diagnostic
        message: String,
    },

    /// Descriptor id differs from the requested id
    #[error("descriptor id mismatch: requested '{requested}', file declares '{found}'")]
    TypeMismatch {
        /// Id the caller asked for
        requested: String,
        /// Id found in the descriptor file
        found: String,
    },

    /// Descriptor names a server type or constructor no engine is registered for
    #[error("unknown server type '{server_type}' for data source '{id}'")]
    UnknownServerType {
        /// Data source id
        id: String,
        /// The unrecognised serverType / serverConstructor value
        server_type: String,
    },

    /// A primary-key field required by the operation is absent or null
    #[error("primary key field '{field}' is missing")]
    MissingPrimaryKey {
        /// The missing field name
        field: String,
    },

    /// Update/remove matched no rows
    #[error("Row does not exists")]
    RowNotFound,

    /// The engine does not implement the requested operation type
    #[error("operation '{operation}' is not implemented by this data source")]
    Unimplemented {
        /// The unsupported operation
        operation: String,
    },

    /// Pool or connection acquisition failed during init
    #[error("resource acquisition failed: {message}")]
    ResourceAcquisition {
        /// What could not be acquired
        message: String,
    },

    /// Request shape is invalid for the operation
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was malformed
        message: String,
    },

    /// Back-end driver or query failure
    #[error(transparent)]
    Backend(#[from] gridway_rdbc::Error),

    /// Descriptor file I/O failure
    #[error("descriptor read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an unimplemented-operation error
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented {
            operation: operation.into(),
        }
    }

    /// Create a resource-acquisition error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::ResourceAcquisition {
            message: message.into(),
        }
    }

    /// Create an invalid-request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a missing-primary-key error
    pub fn missing_pk(field: impl Into<String>) -> Self {
        Self::MissingPrimaryKey {
            field: field.into(),
        }
    }

    /// Whether this failure belongs to the init phase (fails the whole
    /// transaction) rather than a single operation's execute phase.
    pub fn fails_init(&self) -> bool {
        matches!(
            self,
            Self::DescriptorNotFound { .. }
                | Self::DescriptorParse { .. }
                | Self::TypeMismatch { .. }
                | Self::UnknownServerType { .. }
                | Self::ResourceAcquisition { .. }
                | Self::Io(_)
        )
    }
}
