//! Convenient re-exports for common tollgate types.
pub use crate::{
    bucket::{Admission, BucketConfig},
    clock::{Clock, ManualClock, SystemClock},
    error::{AdmissionError, ConfigError, StoreError},
    rate_limit::{
        peer_identifier, AdmissionLayer, AtomicBucketStore, DistributedConfig,
        DistributedRateLimiter, FailurePolicy, InMemoryBucketStore, LocalRateLimiter, Quota,
        RateLimiter,
    },
    telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};
