use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::bucket::{refill_and_consume, Admission, BucketConfig, BucketState};
use crate::error::StoreError;

/// One atomic admission check against a shared store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptRequest<'a> {
    /// Namespaced key, e.g. `rate_limit:10.0.0.1`.
    pub key: &'a str,
    /// Tunables for this deployment.
    pub tunables: BucketConfig,
    /// Seconds since the UNIX epoch, sampled once by the caller.
    pub now: f64,
    /// Idle expiry to (re)arm after the write.
    pub idle_ttl: Duration,
}

/// A raw value as returned by a store, before normalization.
///
/// Stores disagree on how numbers come back: scripting runtimes may truncate to
/// integers, some protocols carry doubles, others only strings.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    /// Integer reply.
    Int(i64),
    /// Floating point reply.
    Float(f64),
    /// String or bulk reply holding a number.
    Text(String),
    /// Missing value.
    Nil,
}

impl StoreValue {
    /// Normalize to `f64`, accepting any numeric representation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoreValue::Int(v) => Some(*v as f64),
            StoreValue::Float(v) => Some(*v),
            StoreValue::Text(s) => s.trim().parse::<f64>().ok(),
            StoreValue::Nil => None,
        }
        .filter(|v| v.is_finite())
    }
}

/// Abstract atomic-execute capability against the store that owns bucket state.
///
/// An implementation must, for one key and within one execution: read
/// `(tokens, last_refill)` (absence means a fresh full bucket), apply
/// [`refill_and_consume`], write the new state back and re-arm the idle expiry,
/// without any other execution on the same key observing intermediate state.
/// The reply is `[allowed, remaining]` in whatever numeric form the store produces;
/// [`decode_reply`] normalizes it.
#[async_trait]
pub trait AtomicBucketStore: Send + Sync {
    /// Run one read-refill-consume-write cycle.
    async fn execute(&self, request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError>;
}

#[async_trait]
impl<S> AtomicBucketStore for Arc<S>
where
    S: AtomicBucketStore + ?Sized,
{
    async fn execute(&self, request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        (**self).execute(request).await
    }
}

/// Turn a store reply into an [`Admission`].
///
/// `allowed` is any non-zero number; `remaining` may arrive as an integer, a float
/// or a numeric string and is clamped at zero.
pub fn decode_reply(reply: Vec<StoreValue>) -> Result<Admission, StoreError> {
    let [allowed, remaining]: [StoreValue; 2] = reply.try_into().map_err(|r: Vec<StoreValue>| {
        StoreError::MalformedReply(format!("expected 2 values, got {}", r.len()))
    })?;

    let allowed = allowed
        .as_f64()
        .ok_or_else(|| StoreError::MalformedReply(format!("allowed flag {:?}", allowed)))?;
    let remaining = remaining
        .as_f64()
        .ok_or_else(|| StoreError::MalformedReply(format!("remaining tokens {:?}", remaining)))?;

    Ok(Admission { allowed: allowed != 0.0, remaining: remaining.max(0.0) })
}

/// Lua realization of the [`AtomicBucketStore`] contract for Redis-compatible servers.
///
/// `KEYS[1]` is the bucket key; `ARGV` is capacity, refill rate, now (seconds) and
/// idle ttl (whole seconds). Remaining tokens are returned with `tostring` because Lua
/// numbers are truncated to integers on the way out.
pub const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

if not tokens or not last_refill then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + elapsed * refill_rate)

local allowed = 0
if tokens >= 1 then
    allowed = 1
    tokens = tokens - 1
end

redis.call("HSET", key, "tokens", tostring(tokens), "last_refill", tostring(math.max(now, last_refill)))
redis.call("EXPIRE", key, ttl)

return { allowed, tostring(tokens) }
"#;

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    expires_at: f64,
}

#[derive(Debug, Default)]
struct Records {
    buckets: HashMap<String, StoredBucket>,
    writes_since_purge: usize,
}

impl Records {
    fn purge(&mut self, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, stored| stored.expires_at > now);
        self.writes_since_purge = 0;
        before - self.buckets.len()
    }
}

/// In-memory [`AtomicBucketStore`] that owns its whole key space behind one mutex.
///
/// Behaves like a single-threaded store: every execution is serialized, and records
/// not refreshed within their idle ttl read as absent. Expired records are dropped
/// every [`InMemoryBucketStore::PURGE_EVERY`] writes, so the map holds at most the
/// live keys plus one purge window of stale ones. Useful in tests and for sharing
/// buckets between limiters inside one process.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBucketStore {
    data: Arc<Mutex<Records>>,
}

impl InMemoryBucketStore {
    /// Writes between two automatic purges of expired records.
    pub const PURGE_EVERY: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    /// Remove records whose idle ttl has lapsed as of `now`. Returns how many.
    pub fn purge_expired(&self, now: f64) -> usize {
        self.lock().purge(now)
    }

    /// Live record for `key` as of `now`.
    pub fn get(&self, key: &str, now: f64) -> Option<BucketState> {
        self.lock().buckets.get(key).filter(|stored| stored.expires_at > now).map(|stored| stored.state)
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().buckets.len()
    }

    /// True if no record is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AtomicBucketStore for InMemoryBucketStore {
    async fn execute(&self, request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        let mut records = self.lock();

        records.writes_since_purge += 1;
        if records.writes_since_purge >= Self::PURGE_EVERY {
            records.purge(request.now);
        }

        let current = records
            .buckets
            .get(request.key)
            .filter(|stored| stored.expires_at > request.now)
            .map(|stored| stored.state);
        let (next, admission) = refill_and_consume(current, &request.tunables, request.now);
        records.buckets.insert(
            request.key.to_owned(),
            StoredBucket { state: next, expires_at: request.now + request.idle_ttl.as_secs_f64() },
        );

        Ok(vec![StoreValue::Int(i64::from(admission.allowed)), StoreValue::Float(admission.remaining)])
    }
}
