//! Per-call reporting.
//!
//! Every upstream call ends in exactly one [`CallReport`], handed to the
//! [`MetricsSink`] carried by the [`CallContext`]. A context without a sink
//! makes reporting a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::transport::HttpMethod;

/// How an upstream call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// 2xx response.
    Success,
    /// Throttled on every allowed attempt.
    ExceededRetries,
    /// Non-throttle error status.
    Rejected,
    /// No response at all.
    NetworkFailure,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ExceededRetries => "exceeded_retries",
            Self::Rejected => "rejected",
            Self::NetworkFailure => "network_failure",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Summary of one logical upstream call, retries included.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReport {
    pub operation: String,
    pub correlation_id: Uuid,
    pub method: HttpMethod,
    /// Requests actually sent.
    pub attempts: u32,
    /// Throttle waits taken between attempts.
    pub retries: u32,
    pub elapsed: Duration,
    pub last_status: Option<u16>,
    pub outcome: CallOutcome,
}

/// Receives call reports. Implementations must be cheap and must not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, report: &CallReport);
}

/// Caller-supplied context threaded through every operation.
///
/// Cloning is cheap; child contexts keep the correlation id and sink.
#[derive(Clone)]
pub struct CallContext {
    operation: String,
    correlation_id: Uuid,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl CallContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            correlation_id: Uuid::now_v7(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Same correlation id and sink, different operation label.
    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            correlation_id: self.correlation_id,
            sink: self.sink.clone(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub(crate) fn report(&self, report: &CallReport) {
        if let Some(sink) = &self.sink {
            sink.record(report);
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("operation", &self.operation)
            .field("correlation_id", &self.correlation_id)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Running totals over every report it has seen.
#[derive(Debug, Default)]
pub struct AggregatingSink {
    calls: AtomicU64,
    failures: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    total_elapsed_us: AtomicU64,
    max_elapsed_us: AtomicU64,
}

/// Point-in-time view of an [`AggregatingSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub attempts: u64,
    pub retries: u64,
    pub total_elapsed: Duration,
    pub max_elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn mean_elapsed(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_elapsed / u32::try_from(self.calls).unwrap_or(u32::MAX)
        }
    }
}

impl AggregatingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_elapsed: Duration::from_micros(self.total_elapsed_us.load(Ordering::Relaxed)),
            max_elapsed: Duration::from_micros(self.max_elapsed_us.load(Ordering::Relaxed)),
        }
    }
}

impl MetricsSink for AggregatingSink {
    fn record(&self, report: &CallReport) {
        let elapsed_us = u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !report.outcome.is_success() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.attempts
            .fetch_add(u64::from(report.attempts), Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(report.retries), Ordering::Relaxed);
        self.total_elapsed_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
        self.max_elapsed_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }
}
