use super::Inner;
use crate::{
    drain::InFlightGuard,
    execution::{Execution, Output, TaskFailure},
    registry::TaskHandler,
    telemetry::{
        decrement_executions_inflight, increment_execution_failures,
        increment_executions_inflight, increment_reply_errors, record_execution_duration,
    },
    transport::Transport,
};
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use std::{any::Any, sync::Arc, time::Instant};
use taskwire_core::{Result, TaskReply, TaskRequest, TaskResult};

/// Lifecycle of one dispatched request.
///
/// Holds the runtime it replies through, the request, and the in-flight slot
/// taken when the request was received. Both [`run`](Self::run) and
/// [`reply`](Self::reply) consume the context, so an execution is reported on
/// at most once, and the slot is released when the context is dropped on any
/// path out of the execution.
pub(super) struct ExecutionContext<T> {
    service: Arc<Inner<T>>,
    execution: Execution,
    _guard: InFlightGuard,
}

impl<T: Transport> ExecutionContext<T> {
    pub(super) fn new(
        service: Arc<Inner<T>>,
        request: TaskRequest,
        guard: InFlightGuard,
    ) -> Self {
        Self {
            service,
            execution: Execution::new(request),
            _guard: guard,
        }
    }

    /// Runs `handler`, then delivers its outcome. Failures are logged, never
    /// retried.
    pub(super) async fn run(self, handler: Arc<dyn TaskHandler>) {
        let start = Instant::now();
        increment_executions_inflight();

        let outcome = match AssertUnwindSafe(handler.execute(&self.execution))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        };

        if let Err(_e) = &outcome {
            increment_execution_failures();
            #[cfg(feature = "tracing")]
            tracing::warn!("Task {:?} failed: {_e}", self.execution.task_key());
        }

        if let Err(_e) = self.reply(outcome).await {
            increment_reply_errors();
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to deliver reply: {_e}");
        }

        decrement_executions_inflight();
        record_execution_duration(start.elapsed().as_secs_f64() * 1000.0);
    }

    /// Serializes `outcome` and sends it in a single unary call under the
    /// per-call timeout. The stream's cancellation does not apply here, so
    /// replies still go out while the service drains.
    async fn reply(self, outcome: core::result::Result<Output, TaskFailure>) -> Result<()> {
        let result = match outcome {
            Ok(output) => TaskResult::Output {
                data: output.encode()?,
                key: output.key().to_string(),
            },
            Err(failure) => TaskResult::Error(failure.to_string()),
        };

        let reply = TaskReply {
            execution_id: self.execution.id().to_string(),
            result,
        };

        let service = &self.service;
        service
            .call(
                service
                    .transport
                    .send_reply(&service.config.token, reply, service.config.call_timeout),
            )
            .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Reply delivered");
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("task panicked: {detail}")
}
