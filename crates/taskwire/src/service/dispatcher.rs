use super::{Inner, context::ExecutionContext};
use crate::{
    drain::InFlightGuard, registry::HandlerRegistry, telemetry::increment_unknown_tasks,
    transport::Transport,
};
use std::sync::Arc;
use taskwire_core::TaskRequest;

/// Resolves the handler for `request` and runs it on its own task.
///
/// Never waits for the execution: the spawned task owns the in-flight `guard`
/// and delivers its own reply. Executions run fully in parallel, in no
/// particular order.
///
/// A request naming an unregistered task is logged and dropped without a
/// reply; releasing `guard` here balances the slot taken by the listener.
pub(super) fn dispatch<T: Transport>(
    inner: &Arc<Inner<T>>,
    registry: &HandlerRegistry,
    request: TaskRequest,
    guard: InFlightGuard,
) {
    let Some(handler) = registry.get(&request.task_key).map(Arc::clone) else {
        increment_unknown_tasks();
        #[cfg(feature = "tracing")]
        tracing::warn!(
            execution_id = %request.execution_id,
            "{}",
            taskwire_core::Error::UnknownTask {
                key: request.task_key.clone()
            }
        );
        drop(guard);
        return;
    };

    #[cfg(feature = "tracing")]
    let span = tracing::info_span!(
        "execution",
        execution_id = %request.execution_id,
        task = %request.task_key,
    );

    let fut = ExecutionContext::new(Arc::clone(inner), request, guard).run(handler);

    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(span)
    };

    tokio::spawn(fut);
}
