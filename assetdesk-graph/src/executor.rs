//! Resilient request execution.
//!
//! [`Executor::execute`] is the single path every upstream call takes. It
//! retries throttled responses (429/503) up to `max_retries` times, waiting
//! per [`crate::backoff`]; any other failure is returned on first sight.
//! Writes are never repeated except after a throttle, when the service has
//! not applied them.

use std::sync::Arc;

use assetdesk_core::{AssetdeskResult, TransportError};
use chrono::Utc;
use tokio::time::Instant;

use crate::backoff;
use crate::metrics::{CallContext, CallOutcome, CallReport};
use crate::transport::{HttpTransport, UpstreamRequest, UpstreamResponse};

/// Attempt bookkeeping for one logical call.
#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    retries: u32,
    started: Instant,
    last_status: Option<u16>,
}

impl RetryState {
    fn start() -> Self {
        Self {
            attempts: 0,
            retries: 0,
            started: Instant::now(),
            last_status: None,
        }
    }
}

/// Sends requests through an [`HttpTransport`] with throttle handling.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    max_retries: u32,
}

impl Executor {
    pub fn new(transport: Arc<dyn HttpTransport>, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }

    /// Send `request`, retrying on throttle.
    ///
    /// # Errors
    /// * `TransportError::ExceededRetries` after `max_retries + 1` throttled attempts
    /// * `TransportError::Upstream` for any other non-2xx status
    /// * `TransportError::Network` when no response arrived
    pub async fn execute(
        &self,
        ctx: &CallContext,
        request: &UpstreamRequest,
    ) -> AssetdeskResult<UpstreamResponse> {
        let mut state = RetryState::start();

        loop {
            state.attempts += 1;
            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(
                        operation = ctx.operation(),
                        correlation_id = %ctx.correlation_id(),
                        method = %request.method,
                        attempt = state.attempts,
                        error = %err,
                        "Upstream request failed"
                    );
                    self.finish(ctx, request, &state, CallOutcome::NetworkFailure);
                    return Err(err.into());
                }
            };
            state.last_status = Some(response.status);

            if response.is_success() {
                self.finish(ctx, request, &state, CallOutcome::Success);
                return Ok(response);
            }

            if !backoff::is_throttled(response.status) {
                self.finish(ctx, request, &state, CallOutcome::Rejected);
                return Err(TransportError::Upstream {
                    status: response.status,
                    body: response.body,
                }
                .into());
            }

            if state.retries >= self.max_retries {
                tracing::error!(
                    operation = ctx.operation(),
                    correlation_id = %ctx.correlation_id(),
                    method = %request.method,
                    status = response.status,
                    "Upstream still throttling after {} attempts",
                    state.attempts
                );
                self.finish(ctx, request, &state, CallOutcome::ExceededRetries);
                return Err(TransportError::ExceededRetries {
                    last_status: response.status,
                    attempts: state.attempts,
                }
                .into());
            }

            let delay =
                backoff::throttle_delay(response.header("retry-after"), state.retries, Utc::now());
            tracing::warn!(
                operation = ctx.operation(),
                correlation_id = %ctx.correlation_id(),
                method = %request.method,
                status = response.status,
                attempt = state.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Upstream throttled, backing off"
            );
            tokio::time::sleep(delay).await;
            state.retries += 1;
        }
    }

    fn finish(
        &self,
        ctx: &CallContext,
        request: &UpstreamRequest,
        state: &RetryState,
        outcome: CallOutcome,
    ) {
        tracing::debug!(
            operation = ctx.operation(),
            correlation_id = %ctx.correlation_id(),
            method = %request.method,
            write = request.method.is_write(),
            outcome = outcome.as_str(),
            attempts = state.attempts,
            retries = state.retries,
            "Upstream call finished"
        );
        ctx.report(&CallReport {
            operation: ctx.operation().to_string(),
            correlation_id: ctx.correlation_id(),
            method: request.method,
            attempts: state.attempts,
            retries: state.retries,
            elapsed: state.started.elapsed(),
            last_status: state.last_status,
            outcome,
        });
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
