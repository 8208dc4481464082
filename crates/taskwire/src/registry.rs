//! Task handlers and the registry the dispatcher resolves them from.
//!
//! The registry is filled before listening starts and is only read afterwards;
//! the runtime takes it by value in [`Service::listen`] and shares it behind an
//! `Arc`, so concurrent executions look handlers up without locking.
//!
//! [`Service::listen`]: crate::Service::listen

use crate::execution::{Execution, Output, TaskFailure};
use core::future::Future;
use std::{collections::HashMap, fmt, sync::Arc};
use taskwire_core::{Error, Result};

/// A named unit of work the worker can execute.
#[tonic::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Task key this handler answers to.
    fn key(&self) -> &str;

    /// Runs the task. `Ok` output is reported under its key; `Err` is reported
    /// as the execution's error message.
    async fn execute(&self, execution: &Execution) -> core::result::Result<Output, TaskFailure>;
}

/// Handler set keyed by task key.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of handlers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if two handlers share a key.
    pub fn from_handlers<I>(handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn TaskHandler>>,
    {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register_arc(handler)?;
        }
        Ok(registry)
    }

    /// Registers `handler` under its own key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if the key is already taken.
    pub fn register<H: TaskHandler>(&mut self, handler: H) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    /// Same as [`register`](Self::register) for an already shared handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if the key is already taken.
    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let key = handler.key().to_string();
        if self.handlers.contains_key(&key) {
            return Err(Error::DuplicateHandler { key });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if the key is already taken.
    pub fn with<H: TaskHandler>(mut self, handler: H) -> Result<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("tasks", &keys)
            .finish()
    }
}

/// Handler backed by an async closure. Built with [`task_fn`].
pub struct FnHandler<F> {
    key: String,
    f: F,
}

/// Wraps an async closure into a [`TaskHandler`] answering to `key`.
///
/// ```rust,ignore
/// let sum = task_fn("sum", |execution| async move {
///     let input: SumInput = execution.decode_input()?;
///     Ok::<_, TaskFailure>(Output::new("result", json!({ "result": input.a + input.b })))
/// });
/// ```
pub fn task_fn<F, Fut>(key: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Execution) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = core::result::Result<Output, TaskFailure>> + Send + 'static,
{
    FnHandler { key: key.into(), f }
}

#[tonic::async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Execution) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = core::result::Result<Output, TaskFailure>> + Send + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn execute(&self, execution: &Execution) -> core::result::Result<Output, TaskFailure> {
        (self.f)(execution.clone()).await
    }
}
