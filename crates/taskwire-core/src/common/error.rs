//! Error types for the taskwire runtime.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the worker runtime, from configuration through the
//! task stream to reply delivery.
//!
//! ## Error Cases
//! - `EndpointNotSet` / `TokenNotSet` / `InvalidConfig`: fatal configuration
//!   errors raised before any connection attempt.
//! - `Connection`: dialing the orchestrator failed.
//! - `AlreadyListening`: a second listen call was rejected.
//! - `ServiceShutdown`: the runtime is shutting down or already closed.
//! - `NoHandlers` / `DuplicateHandler`: handler validation failed.
//! - `UnknownTask`: a received task names no registered handler.
//! - `InvalidInput` / `Serialization`: JSON payload decoding or encoding
//!   failed.
//! - `Rpc` / `Timeout`: a gRPC call failed or exceeded its deadline.
//! - `StreamEnded`: the orchestrator closed the task stream.
//! - `Cancelled`: the task stream was cancelled by shutdown.
//! - `ConnectionClosed`: a call was attempted after the connection was
//!   released.

use core::time::Duration;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the taskwire runtime.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No orchestrator endpoint was configured.
    #[error("endpoint is not set")]
    EndpointNotSet,

    /// No authentication token was configured.
    #[error("token is not set")]
    TokenNotSet,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Dialing the orchestrator failed.
    #[error("Connection error: {context}")]
    Connection { context: String },

    /// The runtime is already listening for tasks.
    #[error("already listening for tasks")]
    AlreadyListening,

    /// The runtime is shutting down or has been closed.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Listening was requested without any task handler.
    #[error("at least one task handler is required")]
    NoHandlers,

    /// Two handlers were registered under the same task key.
    #[error("task {key:?} is already registered")]
    DuplicateHandler { key: String },

    /// A task execution named a task with no registered handler.
    #[error("task {key:?} does not exist")]
    UnknownTask { key: String },

    /// The task input could not be decoded.
    #[error("Invalid task input: {context}")]
    InvalidInput { context: String },

    /// An output or event payload could not be encoded.
    #[error("Serialization error: {context}")]
    Serialization { context: String },

    /// The orchestrator answered a call with a non-OK status.
    #[error("RPC error: {0}")]
    Rpc(#[from] Status),

    /// A unary call did not complete within the per-call timeout.
    #[error("Call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The orchestrator closed the task stream.
    #[error("task stream ended")]
    StreamEnded,

    /// The task stream was cancelled locally.
    #[error("task stream cancelled")]
    Cancelled,

    /// The connection has already been released.
    #[error("connection is closed")]
    ConnectionClosed,
}

impl Error {
    /// Returns `true` for the failures that only mean the stream was torn down
    /// on purpose.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
