use super::{Inner, dispatcher::dispatch};
use crate::{registry::HandlerRegistry, telemetry::increment_tasks_received, transport::TaskStream};
use std::sync::Arc;
use taskwire_core::{Error, Result};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Pumps the task stream into the dispatcher until it terminates.
///
/// Each iteration registers an in-flight slot *before* waiting on the stream
/// and hands that slot to the execution it receives. A request is therefore
/// accounted for from the moment it leaves the stream, and a concurrent
/// shutdown cannot observe an empty drain while a just-received request is
/// still on its way to the dispatcher.
///
/// Cancellation, the stream ending and a stream error all resolve through the
/// same `select!`, so exactly one outcome is reported:
///
/// - cancellation, or any failure once closing: `Ok(())`;
/// - any other failure: returned to the caller of `listen`.
pub(super) async fn receive_loop<T: crate::Transport>(
    inner: Arc<Inner<T>>,
    registry: Arc<HandlerRegistry>,
    mut stream: TaskStream,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let guard = inner.drain.enter();

        // Cancellation wins over buffered messages.
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            item = stream.next() => item.unwrap_or(Err(Error::StreamEnded)),
        };

        match received {
            Ok(_request) if cancel.is_cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Dropping task {:?} received during shutdown",
                    _request.execution_id
                );
                return Ok(());
            }
            Ok(request) => {
                increment_tasks_received();
                dispatch(&inner, &registry, request, guard);
            }
            Err(err) => {
                drop(guard);
                if err.is_cancelled() || inner.is_closing() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Task stream closed for shutdown");
                    return Ok(());
                }

                #[cfg(feature = "tracing")]
                tracing::error!("Task stream failed: {err}");
                return Err(err);
            }
        }
    }
}
