//! Shared protocol definitions, domain types and errors.
//!
//! - [`error`] - the unified [`Error`] type and [`Result`] alias.
//! - [`types`] - task requests, replies and events exchanged with the
//!   orchestrator, plus shared defaults.
//! - [`proto`] - generated Protobuf messages and gRPC stubs.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// gRPC service and message definitions generated from
/// `proto/taskwire.proto`.
///
/// ## Service
///
/// - `ListenTask` - server-streaming subscription for task executions.
/// - `SubmitResult` - unary call reporting one execution's outcome.
/// - `EmitEvent` - unary call publishing an event.
///
/// All payload fields carry JSON text. The `execution_id` of a [`TaskData`]
/// is the correlation id echoed back in the matching
/// [`SubmitResultRequest`].
///
/// [`TaskData`]: proto::TaskData
/// [`SubmitResultRequest`]: proto::SubmitResultRequest
#[allow(clippy::all, clippy::pedantic)]
pub mod proto {
    tonic::include_proto!("taskwire");
}
