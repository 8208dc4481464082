//! gRPC transport over a tonic [`Channel`].
//!
//! One HTTP/2 connection is shared by the task stream and every unary call.
//! The generated client is cheap to clone, so each call works on its own copy
//! and the shared handle is only touched to hand out clones and, once, to
//! release the connection.

use super::{TaskStream, Transport};
use crate::config::ServiceConfig;
use core::time::Duration;
use parking_lot::RwLock;
use taskwire_core::{
    Error, Event, Result, TaskReply, TaskRequest,
    proto::{ListenTaskRequest, task_service_client::TaskServiceClient},
};
use tokio_stream::StreamExt;
use tonic::{
    Request,
    transport::{Channel, Endpoint},
};

pub struct GrpcTransport {
    client: RwLock<Option<TaskServiceClient<Channel>>>,
}

impl GrpcTransport {
    /// Dials the orchestrator described by `config`.
    ///
    /// The configuration is validated before dialing, so a missing endpoint
    /// or token never results in a connection attempt. Dialing is bounded by
    /// the per-call timeout.
    ///
    /// # Errors
    ///
    /// - Configuration errors from [`ServiceConfig::validate`].
    /// - [`Error::Connection`] if the endpoint is malformed or unreachable.
    pub async fn connect(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = Endpoint::from_shared(config.endpoint_uri())
            .map_err(|e| Error::Connection {
                context: format!("invalid endpoint {:?}: {e}", config.endpoint),
            })?
            .connect_timeout(config.call_timeout)
            .tcp_keepalive(Some(config.keepalive_interval))
            .http2_keep_alive_interval(config.keepalive_interval)
            .keep_alive_while_idle(true);

        #[cfg(feature = "tracing")]
        tracing::debug!("Dialing orchestrator at {}", config.endpoint_uri());

        let channel = endpoint.connect().await.map_err(|e| Error::Connection {
            context: format!("failed to dial {:?}: {e:?}", config.endpoint),
        })?;

        Ok(Self::from_channel(channel))
    }

    /// Wraps an already established channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: RwLock::new(Some(TaskServiceClient::new(channel))),
        }
    }

    fn client(&self) -> Result<TaskServiceClient<Channel>> {
        self.client.read().clone().ok_or(Error::ConnectionClosed)
    }
}

#[tonic::async_trait]
impl Transport for GrpcTransport {
    async fn open_task_stream(&self, token: &str) -> Result<TaskStream> {
        let mut client = self.client()?;
        let stream = client
            .listen_task(ListenTaskRequest {
                token: token.to_string(),
            })
            .await?
            .into_inner();

        Ok(Box::pin(stream.map(|item| {
            item.map(TaskRequest::from).map_err(Error::from)
        })))
    }

    async fn send_reply(&self, token: &str, reply: TaskReply, timeout: Duration) -> Result<()> {
        let mut client = self.client()?;
        let mut request = Request::new(reply.into_request(token));
        request.set_timeout(timeout);
        client.submit_result(request).await?;
        Ok(())
    }

    async fn emit_event(&self, token: &str, event: Event, timeout: Duration) -> Result<()> {
        let mut client = self.client()?;
        let mut request = Request::new(event.into_request(token));
        request.set_timeout(timeout);
        client.emit_event(request).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last client clone tears the HTTP/2 connection down.
        if self.client.write().take().is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Released orchestrator connection");
        }
        Ok(())
    }
}
