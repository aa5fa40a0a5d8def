//! # gridway-protocol
//!
//! Wire envelope and response types for the Gridway data broker.
//!
//! The broker accepts *transactions*: ordered batches of operations, each
//! either a data-source request (fetch/add/update/remove/custom against a
//! named record set) or a procedure call on a named server object. This
//! crate models that envelope, the advanced-criteria tree used to filter
//! fetches, and the ordered response batch — independent of transport and
//! serialisation format (the server front-ends normalise XML to the same
//! JSON shapes before classification).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod criteria;
pub mod envelope;
pub mod operation;
pub mod response;

pub use criteria::{
    is_advanced_criteria, BaseOperator, Criterion, CriterionOperator, FieldOperatorTraits,
};
pub use envelope::{
    DsRequestEnvelope, OperationConfig, OperationEnvelope, RpcRequestEnvelope, TransactionEnvelope,
};
pub use operation::{
    split_operation_id, OperationType, TextMatchStyle, EMPTY_STRING_SENTINEL, NULL_SENTINEL,
};
pub use response::{DsResponse, OperationResponse, RpcResponse, StatusCode};
