//! The boundary between the runtime and the orchestrator connection.
//!
//! The runtime only needs a streaming subscription for task requests and two
//! unary calls. [`Transport`] captures exactly that, so the listener and
//! dispatcher can be driven by the gRPC client in production and by an
//! in-memory double in tests.
//!
//! - [`grpc`] - [`GrpcTransport`], the tonic-based implementation.

pub mod grpc;

pub use grpc::GrpcTransport;

use core::{pin::Pin, time::Duration};
use taskwire_core::{Event, Result, TaskReply, TaskRequest};
use tokio_stream::Stream;

/// Stream of task requests. `Err` items are terminal for the subscription.
pub type TaskStream = Pin<Box<dyn Stream<Item = Result<TaskRequest>> + Send>>;

#[tonic::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the task subscription for `token`. Dropping the returned stream
    /// releases the subscription.
    async fn open_task_stream(&self, token: &str) -> Result<TaskStream>;

    /// Delivers one reply. `timeout` is the deadline the peer should apply.
    async fn send_reply(&self, token: &str, reply: TaskReply, timeout: Duration) -> Result<()>;

    /// Emits one event. `timeout` is the deadline the peer should apply.
    async fn emit_event(&self, token: &str, event: Event, timeout: Duration) -> Result<()>;

    /// Releases the connection. Calls made afterwards fail with
    /// [`Error::ConnectionClosed`](taskwire_core::Error::ConnectionClosed).
    async fn close(&self) -> Result<()>;
}
