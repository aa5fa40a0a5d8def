//! Normalised data-source requests
//!
//! The wire envelope is permissive: criteria may be absent, values may ride
//! in `data`, sort specifiers may be a string or a list. Engines work from
//! this normalised form instead.

use serde_json::{Map, Value};

use gridway_protocol::{DsRequestEnvelope, OperationType, TextMatchStyle};

use crate::error::{Error, Result};

/// One field of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpecifier {
    /// Field to sort by
    pub field: String,
    /// Whether the sort is descending (`-` prefix on the wire)
    pub descending: bool,
}

impl SortSpecifier {
    /// Parse a wire specifier, stripping the `-` prefix.
    pub fn parse(raw: &str) -> SortSpecifier {
        match raw.strip_prefix('-') {
            Some(field) => SortSpecifier {
                field: field.to_string(),
                descending: true,
            },
            None => SortSpecifier {
                field: raw.to_string(),
                descending: false,
            },
        }
    }
}

/// A data-source request after normalisation, bound to an engine for the
/// duration of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DsRequest {
    /// Target data-source id
    pub data_source: String,
    /// Operation kind
    pub operation_type: OperationType,
    /// Effective match style for simple criteria
    pub text_match_style: TextMatchStyle,
    /// Simple map or advanced tree; `Null` when the request carried none
    pub criteria: Value,
    /// New field values; `Null` when the request carried none
    pub values: Value,
    /// Previous field values as the client saw them
    pub old_values: Value,
    /// Sort order for fetches
    pub sort_by: Vec<SortSpecifier>,
    /// First row of the requested window (inclusive)
    pub start_row: Option<u64>,
    /// End of the requested window (exclusive)
    pub end_row: Option<u64>,
}

impl DsRequest {
    /// Normalise a wire envelope.
    ///
    /// - `values` falls back to `data` for add/update
    /// - `criteria` falls back to `data` for update/remove, so clients that
    ///   send only the record still address a row by its primary key
    /// - `sortBy` accepts a string or a list of strings
    pub fn from_envelope(envelope: &DsRequestEnvelope) -> Result<DsRequest> {
        let data_source = envelope
            .data_source_name()
            .ok_or_else(|| Error::invalid_request("operation names no data source"))?;
        let operation_type = envelope.operation_type();

        let data = envelope.data.clone().unwrap_or(Value::Null);

        let values = match &envelope.values {
            Some(values) => values.clone(),
            None if matches!(operation_type, OperationType::Add | OperationType::Update) => {
                data.clone()
            }
            None => Value::Null,
        };

        let criteria = match &envelope.criteria {
            Some(criteria) => criteria.clone(),
            None if matches!(operation_type, OperationType::Update | OperationType::Remove) => {
                data.clone()
            }
            None if operation_type == OperationType::Fetch => data.clone(),
            None => Value::Null,
        };

        Ok(DsRequest {
            data_source,
            operation_type,
            text_match_style: envelope.text_match_style(),
            criteria,
            values,
            old_values: envelope.old_values.clone().unwrap_or(Value::Null),
            sort_by: parse_sort_by(envelope.sort_by.as_ref()),
            start_row: envelope.start_row,
            end_row: envelope.end_row,
        })
    }

    /// Criteria as an object map, when it is a simple map.
    pub fn criteria_object(&self) -> Option<&Map<String, Value>> {
        self.criteria.as_object()
    }

    /// Values as an object map.
    pub fn values_object(&self) -> Option<&Map<String, Value>> {
        self.values.as_object()
    }

    /// Window size implied by `startRow`/`endRow` (`endRow` is exclusive).
    pub fn window_limit(&self) -> Option<u64> {
        let end = self.end_row?;
        Some(end.saturating_sub(self.start_row.unwrap_or(0)))
    }
}

fn parse_sort_by(raw: Option<&Value>) -> Vec<SortSpecifier> {
    match raw {
        Some(Value::String(s)) if !s.is_empty() => vec![SortSpecifier::parse(s)],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(SortSpecifier::parse)
            .collect(),
        _ => Vec::new(),
    }
}
