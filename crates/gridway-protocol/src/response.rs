//! Response model
//!
//! Per-operation responses are either data-source responses (row windows,
//! affected counts, per-field validation errors) or RPC responses. Status is
//! an enumerated code serialised as its integer wire value.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Operation status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    /// Operation succeeded
    #[default]
    Success,
    /// Generic failure
    Failure,
    /// Validation failure with a per-field error map
    ValidationError,
    /// Commit failed after apparent success; a rollback was attempted
    TransactionFailed,
}

impl StatusCode {
    /// Integer wire value.
    pub const fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::Failure => -1,
            Self::ValidationError => -4,
            Self::TransactionFailed => -10,
        }
    }

    /// Decode a wire value; unknown negatives degrade to `Failure`.
    pub fn from_code(code: i64) -> StatusCode {
        match code {
            0 => Self::Success,
            -4 => Self::ValidationError,
            -10 => Self::TransactionFailed,
            _ => Self::Failure,
        }
    }

    /// Whether this status reports success.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        if code > 0 {
            return Err(D::Error::custom(format!("invalid status code {code}")));
        }
        Ok(StatusCode::from_code(code))
    }
}

/// Response to a data-source operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DsResponse {
    /// Operation status
    pub status: StatusCode,
    /// Marks the payload as a DS response for the client library
    #[serde(rename = "isDSResponse")]
    pub is_ds_response: bool,
    /// Whether the client should drop cached data for this data source
    pub invalidate_cache: bool,
    /// Row list (fetch/add/update), PK tuple (remove) or error text
    pub data: Value,
    /// First row of the returned window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_row: Option<u64>,
    /// End of the returned window (exclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_row: Option<u64>,
    /// Total rows in the window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    /// Rows changed by add/update/remove
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    /// Per-field validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Map<String, Value>>,
    /// Position of this response within a queued transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_status: Option<i64>,
}

impl Default for DsResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::Success,
            is_ds_response: true,
            invalidate_cache: false,
            data: Value::Null,
            start_row: None,
            end_row: None,
            total_rows: None,
            affected_rows: None,
            errors: None,
            queue_status: None,
        }
    }
}

impl DsResponse {
    /// Successful response carrying data.
    pub fn success(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Successful fetch response with its row window.
    pub fn fetch(data: Value, start_row: u64, end_row: u64, total_rows: u64) -> Self {
        Self {
            data,
            start_row: Some(start_row),
            end_row: Some(end_row),
            total_rows: Some(total_rows),
            ..Default::default()
        }
    }

    /// Generic failure carrying an error message as data.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Failure,
            data: Value::String(message.into()),
            ..Default::default()
        }
    }

    /// Validation failure with a per-field error map.
    pub fn validation_failure(errors: serde_json::Map<String, Value>) -> Self {
        Self {
            status: StatusCode::ValidationError,
            errors: Some(errors),
            ..Default::default()
        }
    }

    /// Commit failure downgrade: the operation appeared to succeed but its
    /// commit failed and a rollback was attempted.
    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TransactionFailed,
            data: Value::String(message.into()),
            ..Default::default()
        }
    }
}

/// Response to a procedure call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcResponse {
    /// Operation status
    pub status: StatusCode,
    /// Result payload
    pub data: Value,
    /// Server-side stack trace, only when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl RpcResponse {
    /// Successful response carrying data.
    pub fn success(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Generic failure carrying an error message as data.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Failure,
            data: Value::String(message.into()),
            ..Default::default()
        }
    }

    /// Commit failure downgrade.
    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TransactionFailed,
            data: Value::String(message.into()),
            ..Default::default()
        }
    }
}

/// One slot of the ordered response batch.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    /// Data-source response
    Ds(DsResponse),
    /// Procedure-call response
    Rpc(RpcResponse),
}

impl OperationResponse {
    /// Status of the slot.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ds(r) => r.status,
            Self::Rpc(r) => r.status,
        }
    }

    /// Render the slot as wire JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Ds(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            Self::Rpc(r) => serde_json::to_value(r).unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::Success.code(), 0);
        assert_eq!(StatusCode::Failure.code(), -1);
        assert_eq!(StatusCode::ValidationError.code(), -4);
        assert_eq!(StatusCode::TransactionFailed.code(), -10);
        assert_eq!(StatusCode::from_code(-10), StatusCode::TransactionFailed);
        assert_eq!(StatusCode::from_code(-99), StatusCode::Failure);
    }

    #[test]
    fn test_status_serializes_as_integer() {
        let response = DsResponse::failure("nope");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], json!(-1));
        assert_eq!(json["data"], json!("nope"));
        assert_eq!(json["isDSResponse"], json!(true));
    }

    #[test]
    fn test_fetch_response_window() {
        let response = DsResponse::fetch(json!([{"id": 1}]), 0, 1, 1);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["startRow"], json!(0));
        assert_eq!(json["endRow"], json!(1));
        assert_eq!(json["totalRows"], json!(1));
        assert!(json.get("affectedRows").is_none());
    }

    #[test]
    fn test_rpc_response() {
        let ok = RpcResponse::success(Value::Null);
        assert_eq!(ok.status, StatusCode::Success);

        let slot = OperationResponse::Rpc(RpcResponse::failure("boom"));
        assert_eq!(slot.status(), StatusCode::Failure);
        assert_eq!(slot.to_json()["status"], json!(-1));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            StatusCode::Success,
            StatusCode::Failure,
            StatusCode::ValidationError,
            StatusCode::TransactionFailed,
        ] {
            let encoded = serde_json::to_string(&status.code()).unwrap();
            let decoded: StatusCode = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, status);
        }
    }
}
