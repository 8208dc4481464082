//! The handler-facing view of a single task execution.
//!
//! A handler receives an [`Execution`] describing the request it was picked
//! for, and answers with either an [`Output`] or a [`TaskFailure`]. Turning
//! that answer into a reply and delivering it is the runtime's job.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use taskwire_core::{Error, Result, TaskRequest};

/// Failure returned by a handler. Its `Display` form becomes the error message
/// reported to the orchestrator.
pub type TaskFailure = Box<dyn std::error::Error + Send + Sync>;

/// One received task request, as seen by its handler.
#[derive(Debug, Clone)]
pub struct Execution {
    request: TaskRequest,
}

impl Execution {
    pub const fn new(request: TaskRequest) -> Self {
        Self { request }
    }

    /// Correlation id of this execution.
    pub fn id(&self) -> &str {
        &self.request.execution_id
    }

    pub fn task_key(&self) -> &str {
        &self.request.task_key
    }

    /// The raw JSON input.
    pub fn raw_input(&self) -> &str {
        &self.request.input
    }

    /// Decodes the JSON input into `T`.
    ///
    /// No schema is checked before dispatch, so handlers should expect inputs
    /// that do not match what they were written for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the input is not valid JSON for `T`.
    pub fn decode_input<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.request.input).map_err(|e| Error::InvalidInput {
            context: format!("task {:?}: {e}", self.request.task_key),
        })
    }

    pub fn request(&self) -> &TaskRequest {
        &self.request
    }
}

/// A successful handler result: an output key and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    key: String,
    data: Value,
}

impl Output {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }

    /// Builds an output from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `data` cannot be represented as
    /// JSON.
    pub fn serialize<T: Serialize + ?Sized>(key: impl Into<String>, data: &T) -> Result<Self> {
        let data = serde_json::to_value(data).map_err(|e| Error::Serialization {
            context: e.to_string(),
        })?;
        Ok(Self::new(key, data))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Encodes the payload as JSON text for the wire.
    pub(crate) fn encode(&self) -> Result<String> {
        serde_json::to_string(&self.data).map_err(|e| Error::Serialization {
            context: format!("output {:?}: {e}", self.key),
        })
    }
}
