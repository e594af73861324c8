#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tollgate::rate_limit::{AtomicBucketStore, ScriptRequest, StoreValue};
use tollgate::telemetry::{AdmissionEvent, SinkFuture, TelemetrySink};
use tollgate::StoreError;
use tower::Service;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

/// Store that is always unreachable.
#[derive(Debug, Default, Clone)]
pub struct FailingStore {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AtomicBucketStore for FailingStore {
    async fn execute(&self, _request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Store that never answers within any reasonable deadline.
#[derive(Debug, Clone)]
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl AtomicBucketStore for SlowStore {
    async fn execute(&self, _request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![StoreValue::Int(1), StoreValue::Int(1)])
    }
}

/// Store that answers with a fixed reply, whatever the request.
#[derive(Debug, Clone)]
pub struct FixedReplyStore {
    pub reply: Vec<StoreValue>,
}

#[async_trait]
impl AtomicBucketStore for FixedReplyStore {
    async fn execute(&self, _request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        Ok(self.reply.clone())
    }
}

/// Sink that never completes: either never ready, or ready with calls that never finish.
#[derive(Debug, Clone, Default)]
pub struct StalledSink {
    pub ready: bool,
}

impl Service<AdmissionEvent> for StalledSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.ready {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        Box::pin(std::future::pending())
    }
}

impl TelemetrySink for StalledSink {
    type SinkError = Infallible;
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Install a thread-local subscriber capturing formatted logs into the returned buffer.
pub fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .with_ansi(false)
        .without_time()
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn logs(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}
