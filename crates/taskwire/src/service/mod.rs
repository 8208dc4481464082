//! The worker runtime.
//!
//! [`Service`] owns the orchestrator connection and drives the task lifecycle:
//! it opens the task stream, dispatches every received request to its handler
//! on an independent task, and on shutdown stops receiving, waits for
//! in-flight executions to finish and only then releases the connection.
//!
//! ## Structure
//!
//! - [`listener`] - receive loop over the task stream.
//! - [`dispatcher`] - handler resolution and concurrent spawning.
//! - [`context`] - per-execution lifecycle and the reply protocol.
//!
//! ## States
//!
//! `Idle -> Listening -> Draining -> Closed`. The listening flag only ever
//! goes from `false` to `true`; so does the closing flag. Shutdown invoked
//! before listening claims the listener slot so a later listen call is
//! refused.
//!
//! ## Locking
//!
//! The listening flag has its own short-lived lock. A separate async lock
//! guards the closing transition, the single invocation of the stream's
//! cancellation token and the release of the connection. Neither is held
//! while the other is acquired, and the drain counter is lock-free.

mod context;
mod dispatcher;
mod listener;
#[cfg(test)]
mod tests;

use crate::{
    config::ServiceConfig,
    drain::DrainTracker,
    registry::HandlerRegistry,
    transport::{GrpcTransport, Transport},
};
use core::future::Future;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use serde::Serialize;
use std::sync::Arc;
use taskwire_core::{Error, Event, Result};
use tokio_util::sync::CancellationToken;

/// Lifecycle state reported by [`Service::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Connected, not yet listening.
    Idle,
    /// Listener slot taken. Also reported after `listen` returned a terminal
    /// stream error: the slot is never released, so the service stays here
    /// until [`Service::shutdown`] is called.
    Listening,
    /// Shutdown requested; waiting for in-flight executions.
    Draining,
    /// Connection released.
    Closed,
}

/// Worker runtime bound to one orchestrator connection.
///
/// Cloning is cheap and every clone drives the same runtime, which is how the
/// blocking [`listen`](Self::listen) call and [`shutdown`](Self::shutdown) are
/// usually run from different tasks.
pub struct Service<T: Transport = GrpcTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Service<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<T> {
    pub(crate) config: ServiceConfig,
    pub(crate) transport: T,
    pub(crate) drain: Arc<DrainTracker>,
    listening: Mutex<bool>,
    closing: AtomicBool,
    closed: AtomicBool,
    /// Cancellation token of the open task stream. Also serializes the
    /// closing transition and the connection release.
    shutdown: tokio::sync::Mutex<Option<CancellationToken>>,
}

impl<T: Transport> Inner<T> {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Runs a unary call under the per-call timeout.
    pub(crate) async fn call<F>(&self, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let after = self.config.call_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| Error::Timeout { after })?
    }
}

impl Service<GrpcTransport> {
    /// Validates `config` and dials the orchestrator.
    ///
    /// # Errors
    ///
    /// - [`Error::EndpointNotSet`] / [`Error::TokenNotSet`] /
    ///   [`Error::InvalidConfig`] before any connection attempt.
    /// - [`Error::Connection`] if dialing fails.
    pub async fn connect(config: ServiceConfig) -> Result<Self> {
        let transport = GrpcTransport::connect(&config).await?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Service<T> {
    /// Builds a runtime over an existing transport.
    ///
    /// # Errors
    ///
    /// Returns the configuration error from [`ServiceConfig::validate`].
    pub fn with_transport(config: ServiceConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                drain: Arc::new(DrainTracker::new()),
                listening: Mutex::new(false),
                closing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        if self.inner.closed.load(Ordering::Acquire) {
            ServiceState::Closed
        } else if self.inner.is_closing() {
            ServiceState::Draining
        } else if *self.inner.listening.lock() {
            ServiceState::Listening
        } else {
            ServiceState::Idle
        }
    }

    /// Pending units of work: running executions, plus one for the receive in
    /// progress while listening.
    pub fn in_flight(&self) -> usize {
        self.inner.drain.in_flight()
    }

    /// Listens for task executions and runs them with the handlers in
    /// `registry`. Blocks until the stream fails or the service is shut down.
    ///
    /// Shutdown is a clean termination and yields `Ok(())`. Failures of single
    /// executions (unknown task, handler error, undeliverable reply) are
    /// logged and never end the loop.
    ///
    /// # Errors
    ///
    /// - [`Error::NoHandlers`] if `registry` is empty.
    /// - [`Error::AlreadyListening`] if the service listens already.
    /// - [`Error::ServiceShutdown`] if shutdown has been requested.
    /// - Any error opening the stream, or the stream's terminal error when it
    ///   was not caused by shutdown.
    pub async fn listen(&self, registry: HandlerRegistry) -> Result<()> {
        if registry.is_empty() {
            return Err(Error::NoHandlers);
        }
        self.claim_listener()?;

        let cancel = CancellationToken::new();
        {
            let mut slot = self.inner.shutdown.lock().await;
            if self.inner.is_closing() {
                return Err(Error::ServiceShutdown);
            }
            *slot = Some(cancel.clone());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Listening for tasks: {:?}", registry);

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            stream = self.inner.transport.open_task_stream(&self.inner.config.token) => stream?,
        };

        listener::receive_loop(Arc::clone(&self.inner), Arc::new(registry), stream, cancel).await
    }

    /// Stops receiving tasks, waits for every in-flight execution to finish
    /// and releases the connection.
    ///
    /// Calling it again after it completed is a no-op returning `Ok(())`.
    /// Must not be awaited from inside a handler, which would wait on itself.
    ///
    /// # Errors
    ///
    /// Returns the error reported while releasing the connection, if any.
    pub async fn shutdown(&self) -> Result<()> {
        let mut slot = self.inner.shutdown.lock().await;
        if self.inner.closed.load(Ordering::Acquire) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Service already closed");
            return Ok(());
        }

        // === Phase 0: Stop accepting new tasks ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new tasks");
        self.inner.closing.store(true, Ordering::Release);
        *self.inner.listening.lock() = true;

        // === Phase 1: Cancel the task stream, at most once ===
        if let Some(cancel) = slot.take() {
            cancel.cancel();
        }

        // === Phase 2: Wait for in-flight executions ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight executions ({} pending)",
            self.inner.drain.in_flight()
        );
        self.inner.drain.wait_idle().await;

        // === Phase 3: Release the connection ===
        let result = self.inner.transport.close().await;
        self.inner.closed.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        {
            match &result {
                Ok(()) => tracing::info!("Service shut down"),
                Err(e) => tracing::error!("Error releasing connection: {e}"),
            }
        }

        result
    }

    /// Emits event `key` with `data` encoded as JSON.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after shutdown.
    /// - [`Error::Serialization`] if `data` cannot be encoded.
    /// - [`Error::Rpc`] / [`Error::Timeout`] if the call fails.
    pub async fn emit<D>(&self, key: &str, data: &D) -> Result<()>
    where
        D: Serialize + ?Sized,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let data = serde_json::to_string(data).map_err(|e| Error::Serialization {
            context: format!("event {key:?}: {e}"),
        })?;
        let event = Event {
            key: key.to_string(),
            data,
        };

        let inner = &self.inner;
        inner
            .call(
                inner
                    .transport
                    .emit_event(&inner.config.token, event, inner.config.call_timeout),
            )
            .await
    }

    fn claim_listener(&self) -> Result<()> {
        let mut listening = self.inner.listening.lock();
        if *listening {
            return Err(if self.inner.is_closing() {
                Error::ServiceShutdown
            } else {
                Error::AlreadyListening
            });
        }
        *listening = true;
        Ok(())
    }
}
