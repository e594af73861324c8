//! Telemetry for admission decisions.
//!
//! The distributed limiter emits an [`AdmissionEvent`] per check. Events flow through
//! `TelemetrySink` implementations, which are plain `tower::Service<AdmissionEvent>`s,
//! so they compose with standard tower combinators.
//!
//! ```rust
//! use tollgate::telemetry::AdmissionEvent;
//!
//! let event = AdmissionEvent::Rejected { key: "rate_limit:10.0.0.1".into(), remaining: 0.4 };
//! assert_eq!(event.to_string(), "Rejected(key=rate_limit:10.0.0.1, remaining=0.40)");
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tower::Service;

use crate::error::StoreError;
use crate::rate_limit::FailurePolicy;

/// A telemetry sink that consumes admission events.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use tollgate::telemetry::{AdmissionEvent, TelemetrySink};
/// use tower::Service;
/// use std::task::{Context, Poll};
/// use std::pin::Pin;
/// use std::future::Future;
///
/// #[derive(Clone)]
/// struct PrintSink;
///
/// impl Service<AdmissionEvent> for PrintSink {
///     type Response = ();
///     type Error = std::convert::Infallible;
///     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, event: AdmissionEvent) -> Self::Future {
///         println!("{}", event);
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// impl TelemetrySink for PrintSink {
///     type SinkError = std::convert::Infallible;
/// }
/// ```
pub trait TelemetrySink:
    Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Boxed future returned by the built-in sinks.
pub type SinkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// Best-effort emit helper that swallows errors.
///
/// Readiness is polled exactly once: a sink that is not ready right away (a full
/// buffer, a backed-up exporter) loses the event instead of stalling the caller.
/// Telemetry never changes an admission decision.
pub async fn emit_best_effort<S>(mut sink: S, event: AdmissionEvent)
where
    S: Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    let ready = std::future::poll_fn(|cx| Poll::Ready(sink.poll_ready(cx))).await;
    if let Poll::Ready(Ok(())) = ready {
        let _ = sink.call(event).await;
    } else {
        tracing::trace!(target: "tollgate::telemetry", "sink not ready; event dropped");
    }
}

/// Outcome of one distributed admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionEvent {
    /// The store admitted the request.
    Admitted {
        /// Namespaced bucket key.
        key: String,
        /// Tokens left after the check.
        remaining: f64,
    },
    /// The store refused the request.
    Rejected {
        /// Namespaced bucket key.
        key: String,
        /// Tokens left after the check.
        remaining: f64,
    },
    /// The store could not answer; `policy` decided the outcome.
    BackendFailure {
        /// Namespaced bucket key.
        key: String,
        /// What went wrong.
        error: StoreError,
        /// Policy applied in place of a store answer.
        policy: FailurePolicy,
    },
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { key, remaining } => {
                write!(f, "Admitted(key={}, remaining={:.2})", key, remaining)
            }
            AdmissionEvent::Rejected { key, remaining } => {
                write!(f, "Rejected(key={}, remaining={:.2})", key, remaining)
            }
            AdmissionEvent::BackendFailure { key, error, policy } => {
                write!(f, "BackendFailure(key={}, policy={:?}, error={})", key, policy, error)
            }
        }
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs each decision through `tracing` with structured `key`/`allowed`/`remaining`
/// fields; backend failures go out at WARN with the applied policy.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::Admitted { key, remaining } => {
                tracing::info!(
                    target: "tollgate::telemetry",
                    key = %key,
                    allowed = true,
                    remaining = *remaining,
                    "admission"
                );
            }
            AdmissionEvent::Rejected { key, remaining } => {
                tracing::info!(
                    target: "tollgate::telemetry",
                    key = %key,
                    allowed = false,
                    remaining = *remaining,
                    "admission"
                );
            }
            AdmissionEvent::BackendFailure { key, error, policy } => {
                tracing::warn!(
                    target: "tollgate::telemetry",
                    key = %key,
                    allowed = policy.degraded_admission().allowed,
                    policy = ?policy,
                    error = %error,
                    "admission degraded"
                );
            }
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A bounded in-memory sink. Oldest events are evicted once full.
///
/// ```rust
/// use tollgate::telemetry::{AdmissionEvent, MemorySink};
/// use tower::Service;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = MemorySink::with_capacity(1);
/// sink.call(AdmissionEvent::Admitted { key: "a".into(), remaining: 1.0 }).await.unwrap();
/// sink.call(AdmissionEvent::Admitted { key: "b".into(), remaining: 0.0 }).await.unwrap();
/// assert_eq!(sink.len(), 1);
/// assert_eq!(sink.evicted(), 1);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a snapshot of all events received so far.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.lock().clone()
    }

    /// Clears all stored events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns the number of events stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no events are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the number of evicted events.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AdmissionEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
