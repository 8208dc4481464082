//! # Task and Event Types
//!
//! Plain Rust views of the messages exchanged with the orchestrator, decoupled
//! from the generated Protobuf structs so the runtime can be driven by any
//! transport.
//!
//! - [`TaskRequest`] - one task execution received on the task stream.
//! - [`TaskReply`] - the outcome reported back for a [`TaskRequest`].
//! - [`Event`] - a worker-emitted event.
//!
//! Payloads are JSON text. The runtime never interprets a task's input; it is
//! handed to the matching handler as-is.

use crate::proto;
use core::time::Duration;

/// Default timeout applied to dialing and to every unary call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP/2 and TCP keep-alive interval. Must stay above the server's
/// minimum ping interval or the connection is closed with `too_many_pings`.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Environment variable holding the orchestrator endpoint.
pub const ENDPOINT_ENV: &str = "TASKWIRE_ENDPOINT";

/// Environment variable holding the worker token.
pub const TOKEN_ENV: &str = "TASKWIRE_TOKEN";

/// A task execution request received from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Correlation id echoed back in the reply.
    pub execution_id: String,
    /// Name of the handler to run.
    pub task_key: String,
    /// JSON-encoded input.
    pub input: String,
}

impl TaskRequest {
    pub fn new(
        execution_id: impl Into<String>,
        task_key: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_key: task_key.into(),
            input: input.into(),
        }
    }
}

impl From<proto::TaskData> for TaskRequest {
    fn from(data: proto::TaskData) -> Self {
        Self {
            execution_id: data.execution_id,
            task_key: data.task_key,
            input: data.input_data,
        }
    }
}

/// The serialized outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// The handler succeeded and produced JSON `data` under `key`.
    Output { key: String, data: String },
    /// The handler failed with the given message.
    Error(String),
}

/// A reply for a single [`TaskRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReply {
    pub execution_id: String,
    pub result: TaskResult,
}

impl TaskReply {
    /// Builds the `SubmitResult` request carrying this reply.
    pub fn into_request(self, token: &str) -> proto::SubmitResultRequest {
        use proto::submit_result_request::Result as Outcome;

        let result = match self.result {
            TaskResult::Output { key, data } => Outcome::Output(proto::TaskOutput {
                output_key: key,
                output_data: data,
            }),
            TaskResult::Error(message) => Outcome::Error(message),
        };

        proto::SubmitResultRequest {
            token: token.to_string(),
            execution_id: self.execution_id,
            result: Some(result),
        }
    }
}

/// An event emitted by the worker. `data` is JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: String,
    pub data: String,
}

impl Event {
    /// Builds the `EmitEvent` request carrying this event.
    pub fn into_request(self, token: &str) -> proto::EmitEventRequest {
        proto::EmitEventRequest {
            token: token.to_string(),
            event_key: self.key,
            event_data: self.data,
        }
    }
}
