//! Live-updatable configuration values.
//!
//! Readers take an `Arc` snapshot through `ArcSwap`, so flipping a value (for example
//! the distributed limiter's failure policy) never blocks the admission path.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared handle to a value that operators may replace at runtime.
/// Clones observe the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Wrap an initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}

impl<T: Copy> DynamicConfig<T> {
    /// Copy out the current value.
    pub fn load(&self) -> T {
        **self.inner.load()
    }
}
