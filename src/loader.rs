//! Cache-backed resource loading on top of a [`WorkerPool`].

use std::{io, sync::Arc};

use crate::{cache::Cache, pool::WorkerPool, task::Task};

/// A source of resource bytes, keyed by an opaque string (a URL, a path).
///
/// Fetching a key is expected to be slow; the [`Loader`] only ever calls it
/// from a worker thread. Any `Fn(&str) -> io::Result<Vec<u8>>` closure is a
/// source.
pub trait Source: Send + Sync {
    fn fetch(&self, key: &str) -> io::Result<Vec<u8>>;
}

impl<F> Source for F
where
    F: Fn(&str) -> io::Result<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, key: &str) -> io::Result<Vec<u8>> {
        self(key)
    }
}

/// Loads resources through a cache, falling back to a [`Source`] on a
/// worker thread.
///
/// On a cache hit the completion callback runs immediately on the calling
/// thread. On a miss, the fetch runs on a pool worker, the result is stored
/// back into the cache, and the callback runs on that same worker; shipping
/// the result to any other context is the callback's own business.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use workpool::{cache::{Cache, MemoryCache}, Loader, WorkerPool};
///
/// let pool = Arc::new(WorkerPool::builder().size(1).build());
/// let loader = Loader::new(
///     Arc::clone(&pool),
///     Cache::Memory(MemoryCache::new(1024 * 1024)),
///     |key: &str| -> std::io::Result<Vec<u8>> { Ok(key.as_bytes().to_vec()) },
/// );
///
/// loader.load("hello", |result| {
///     assert_eq!(result.unwrap().as_ref(), b"hello");
/// });
/// # pool.shutdown();
/// ```
pub struct Loader {
    pool: Arc<WorkerPool>,
    cache: Arc<Cache>,
    source: Arc<dyn Source>,
}

impl Loader {
    pub fn new(pool: Arc<WorkerPool>, cache: Cache, source: impl Source + 'static) -> Self {
        Self {
            pool,
            cache: Arc::new(cache),
            source: Arc::new(source),
        }
    }

    /// Load the resource for `key` and hand it to `on_done`.
    ///
    /// A store failure after a successful fetch is logged and does not fail
    /// the load; the bytes are still delivered.
    pub fn load<C>(&self, key: &str, on_done: C)
    where
        C: FnOnce(io::Result<Arc<[u8]>>) + Send + 'static,
    {
        if let Some(bytes) = self.cache.fetch(key) {
            log::trace!("cache hit for {:?}", key);
            on_done(Ok(bytes));
            return;
        }

        let key = key.to_owned();
        let cache = Arc::clone(&self.cache);
        let source = Arc::clone(&self.source);

        self.pool.submit(Task::with_callback(
            move || -> io::Result<Arc<[u8]>> {
                let bytes = Arc::from(source.fetch(&key)?);

                if let Err(e) = cache.store(&key, &bytes) {
                    log::warn!("cache store for {:?} failed: {}", key, e);
                }

                Ok(bytes)
            },
            on_done,
        ));
    }
}
