//! Collaborator boundary: downstream execution services reached over an
//! abstract tool-call transport.
//!
//! The core treats collaborators as opaque, fallible, and independently
//! timed out. Every outbound call carries an explicit timeout and is
//! retried with exponential backoff up to a fixed attempt count before the
//! failure is reported; the core never retries beyond that.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SwarmError;

/// Default per-call timeout in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base backoff between attempts; doubles per retry.
pub const RETRY_BACKOFF_BASE_MS: u64 = 500;

/// A tool invocation sent to a collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name.
    pub name: String,
    /// Structured argument map.
    pub arguments: Value,
}

/// A collaborator's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Structured result payload.
    pub content: Value,
    /// Whether the collaborator reported an error.
    pub is_error: bool,
}

/// A downstream service reachable through tool calls (search provider,
/// code-quality checker, documentation lookup, knowledge storage).
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Collaborator name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Invoke one tool. Implementations may block on I/O; the client wraps
    /// the call in a timeout.
    async fn call_tool(&self, request: &ToolRequest) -> Result<ToolResponse, anyhow::Error>;
}

/// Wraps a [`Collaborator`] with per-call timeout and bounded retry.
#[derive(Clone)]
pub struct CollaboratorClient {
    inner: Arc<dyn Collaborator>,
    timeout: Duration,
    max_retries: u32,
}

impl CollaboratorClient {
    /// Wrap a collaborator with default timeout and retry bounds.
    pub fn new(inner: Arc<dyn Collaborator>) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Builder: set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The wrapped collaborator's name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Call a tool, retrying transient failures with exponential backoff.
    ///
    /// A response with `is_error` set is surfaced as an integration error
    /// without retrying; transport failures and timeouts are retried up to
    /// the bound.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolResponse, SwarmError> {
        let request = ToolRequest { name: name.to_string(), arguments };
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = RETRY_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                log::debug!(
                    "retrying {}::{} (attempt {} of {}) after {}ms",
                    self.inner.name(),
                    name,
                    attempt + 1,
                    self.max_retries + 1,
                    backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match tokio::time::timeout(self.timeout, self.inner.call_tool(&request)).await {
                Ok(Ok(response)) => {
                    if response.is_error {
                        return Err(SwarmError::Integration(format!(
                            "{}::{} returned an error payload",
                            self.inner.name(),
                            name
                        )));
                    }
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    last_error = err.to_string();
                    log::warn!("{}::{} failed: {}", self.inner.name(), name, last_error);
                }
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.timeout);
                    log::warn!("{}::{} {}", self.inner.name(), name, last_error);
                }
            }
        }

        if last_error.contains("timed out") {
            Err(SwarmError::Timeout(format!(
                "{}::{} {} after {} attempts",
                self.inner.name(),
                name,
                last_error,
                self.max_retries + 1
            )))
        } else {
            Err(SwarmError::Integration(format!(
                "{}::{} failed after {} attempts: {}",
                self.inner.name(),
                name,
                self.max_retries + 1,
                last_error
            )))
        }
    }
}
