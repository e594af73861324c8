//! Redis-backed [`AtomicBucketStore`].
//!
//! Bring your own `redis::aio::ConnectionManager`; reconnection and pooling stay
//! with the caller. Each check is one `EVALSHA` of [`BUCKET_SCRIPT`] (falling back
//! to `EVAL` when the server has not cached the script yet).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};

use crate::error::StoreError;
use crate::rate_limit::store::{AtomicBucketStore, ScriptRequest, StoreValue, BUCKET_SCRIPT};

/// Bucket store living in a Redis-compatible server.
#[derive(Clone)]
pub struct RedisBucketStore {
    connection: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("connection", &"<redis::aio::ConnectionManager>")
            .field("script_hash", &self.script.get_hash())
            .finish()
    }
}

impl RedisBucketStore {
    /// Wrap an existing connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection, script: Script::new(BUCKET_SCRIPT) }
    }
}

#[async_trait]
impl AtomicBucketStore for RedisBucketStore {
    async fn execute(&self, request: ScriptRequest<'_>) -> Result<Vec<StoreValue>, StoreError> {
        let mut connection = self.connection.clone();
        let ttl_secs = request.idle_ttl.as_secs().max(1);
        let reply: Vec<Value> = self
            .script
            .key(request.key)
            .arg(request.tunables.capacity())
            .arg(request.tunables.refill_rate())
            .arg(request.now)
            .arg(ttl_secs)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(reply.into_iter().map(store_value).collect())
    }
}

fn store_value(value: Value) -> StoreValue {
    match value {
        Value::Int(v) => StoreValue::Int(v),
        Value::Double(v) => StoreValue::Float(v),
        Value::BulkString(bytes) => StoreValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) | Value::VerbatimString { text: s, .. } => StoreValue::Text(s),
        Value::Boolean(b) => StoreValue::Int(i64::from(b)),
        _ => StoreValue::Nil,
    }
}
