//! Runtime configuration.
//!
//! [`ServiceConfig`] carries the values the runtime consumes: where the
//! orchestrator lives, the token identifying this worker, and the timeouts
//! applied to dialing and unary calls. Loading those values is left to the
//! embedding process; [`ServiceConfig::from_env`] covers the common case.

use core::time::Duration;
use taskwire_core::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL, ENDPOINT_ENV, Error, Result, TOKEN_ENV,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Orchestrator address, e.g. `"127.0.0.1:50052"` or
    /// `"http://orchestrator:50052"`. Addresses without a scheme are dialed
    /// over plaintext HTTP/2.
    pub endpoint: String,
    /// Opaque token attached to every call.
    pub token: String,
    /// Timeout used while dialing and for every unary call.
    pub call_timeout: Duration,
    /// HTTP/2 ping and TCP keep-alive interval.
    pub keepalive_interval: Duration,
}

impl ServiceConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Reads the endpoint and token from `TASKWIRE_ENDPOINT` and
    /// `TASKWIRE_TOKEN`. Missing variables are left empty and rejected by
    /// [`validate`](Self::validate).
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(ENDPOINT_ENV).unwrap_or_default(),
            std::env::var(TOKEN_ENV).unwrap_or_default(),
        )
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Checks the preconditions that must hold before any connection attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::EndpointNotSet`] if the endpoint is empty.
    /// - [`Error::TokenNotSet`] if the token is empty.
    /// - [`Error::InvalidConfig`] if a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::EndpointNotSet);
        }
        if self.token.is_empty() {
            return Err(Error::TokenNotSet);
        }
        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "call timeout must be greater than 0".to_string(),
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "keep-alive interval must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// The endpoint as a URI, defaulting to `http://` when no scheme is given.
    pub fn endpoint_uri(&self) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        }
    }
}
