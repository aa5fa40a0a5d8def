//! Operation kinds and match styles
//!
//! The envelope addresses a data-source operation either with the combined
//! `"<dsName>_<opType>"` string or an explicit operation config; both forms
//! normalise into [`OperationType`] here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel operation element meaning "RPC with a null payload".
pub const NULL_SENTINEL: &str = "__ISC_NULL__";
/// Sentinel operation element meaning "RPC with an empty-string payload".
pub const EMPTY_STRING_SENTINEL: &str = "__ISC_EMPTY_STRING__";

/// The kind of a data-source operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// Read a window of records
    #[default]
    Fetch,
    /// Insert a record
    Add,
    /// Update a record addressed by primary key
    Update,
    /// Delete a record addressed by primary key
    Remove,
    /// Engine-specific operation
    Custom,
}

impl OperationType {
    /// Wire name of this operation type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Custom => "custom",
        }
    }

    /// Default text-match style for this operation type: `update`/`remove`
    /// match exactly, `fetch` matches substrings.
    pub fn default_text_match_style(&self) -> TextMatchStyle {
        match self {
            Self::Update | Self::Remove => TextMatchStyle::Exact,
            _ => TextMatchStyle::Substring,
        }
    }
}

impl FromStr for OperationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "remove" => Ok(Self::Remove),
            "custom" => Ok(Self::Custom),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How simple criteria values are matched against text columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextMatchStyle {
    /// Case-insensitive equality
    Exact,
    /// Case-sensitive equality
    ExactCase,
    /// Case-insensitive substring match
    Substring,
    /// Case-insensitive prefix match
    StartsWith,
}

/// Split a combined `"<dsName>_<opType>"` operation id.
///
/// Data-source ids may themselves contain underscores, so the split point is
/// the last underscore whose suffix parses as an operation type; an id with
/// no such suffix is a bare data-source name with the default `fetch`.
pub fn split_operation_id(op: &str) -> (String, OperationType) {
    if let Some((ds, suffix)) = op.rsplit_once('_') {
        if let Ok(op_type) = suffix.parse::<OperationType>() {
            return (ds.to_string(), op_type);
        }
    }
    (op.to_string(), OperationType::Fetch)
}
