/*!
 * Time-bounded promise cache.
 *
 * A `PromiseCache` memoizes an asynchronous device operation for a fixed
 * window. The operation itself is cached as soon as it is created, not its
 * settled value, so every caller inside the window awaits the same in-flight
 * call and observes the same outcome.
 */
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{DeviceError, Result};

/// Outcome of a cached operation, shared by every caller of the window
pub type CacheOutput<T> = std::result::Result<T, Arc<DeviceError>>;

/// Handle to a cached operation; clone it freely and await any clone
pub type CachedOperation<T> = Shared<BoxFuture<'static, CacheOutput<T>>>;

struct CacheState<T> {
    promise: Option<CachedOperation<T>>,
    cache_expire: Instant,
}

struct CacheInner<T> {
    label: String,
    duration: Duration,
    state: Mutex<CacheState<T>>,
}

/// A memoizing cache for one asynchronous operation
///
/// Cloning the cache yields another handle onto the same state.
pub struct PromiseCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for PromiseCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PromiseCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseCache")
            .field("label", &self.inner.label)
            .field("duration", &self.inner.duration)
            .finish()
    }
}

impl<T> PromiseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache whose entries stay valid for `duration`
    pub fn new(duration: Duration, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                label: label.into(),
                duration,
                state: Mutex::new(CacheState {
                    promise: None,
                    cache_expire: Instant::now(),
                }),
            }),
        }
    }

    /// Diagnostic label of this cache
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Window during which a cached operation is reused
    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    /// Whether both handles refer to the same cache
    pub fn same_cache(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get the cached operation, or start a new one with `supplier`
    ///
    /// `supplier` is called at most once, and only when the cache is empty,
    /// expired or invalidated. The slot is reserved before `supplier` runs and
    /// the lock is released while it builds the future, so the supplier may
    /// use this cache; a nested `get_value` or `cached` returns the reserved
    /// operation. If `supplier` panics, the reserved operation fails with
    /// [`DeviceError::Other`] for the rest of its window.
    pub fn get_value<F, Fut>(&self, supplier: F) -> CachedOperation<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(promise) = Self::valid_promise(&state, now) {
            trace!(cache = %self.inner.label, "cache hit");
            return promise;
        }

        let (tx, rx) = oneshot::channel::<BoxFuture<'static, Result<T>>>();
        let promise = async move {
            match rx.await {
                Ok(operation) => operation.await.map_err(Arc::new),
                Err(_) => Err(Arc::new(DeviceError::other(
                    "supplier did not build an operation",
                ))),
            }
        }
        .boxed()
        .shared();
        state.promise = Some(promise.clone());
        state.cache_expire = now + self.inner.duration;
        drop(state);

        debug!(cache = %self.inner.label, "cache miss, invoking supplier");
        // `promise` owns the receiver, so the send cannot fail.
        let _ = tx.send(supplier().boxed());
        promise
    }

    /// Get the cached operation without supplying a way to recompute it
    ///
    /// Fails with [`DeviceError::NoSupplier`] when nothing valid is cached.
    pub fn cached(&self) -> Result<CachedOperation<T>> {
        let state = self.lock();
        Self::valid_promise(&state, Instant::now()).ok_or(DeviceError::NoSupplier)
    }

    /// Await the cached operation, starting it with `supplier` if needed
    pub async fn fetch<F, Fut>(&self, supplier: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_value(supplier).await.map_err(DeviceError::Cached)
    }

    /// Force the next `get_value` to call its supplier
    ///
    /// An operation already in flight keeps running and callers holding it
    /// still receive its result.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.cache_expire = Instant::now();
        debug!(cache = %self.inner.label, "cache invalidated");
    }

    fn valid_promise(state: &CacheState<T>, now: Instant) -> Option<CachedOperation<T>> {
        match &state.promise {
            Some(promise) if now < state.cache_expire => Some(promise.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
