use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::unbounded;
use workpool::{
    cache::{Cache, MemoryCache},
    Loader,
    WorkerPool,
};

fn test_pool() -> Arc<WorkerPool> {
    Arc::new(WorkerPool::builder().size(1).build())
}

#[test]
fn cache_hit_invokes_callback_on_calling_thread() {
    let pool = test_pool();

    let cache = Cache::Memory(MemoryCache::new(1024));
    cache.store("k", b"cached").unwrap();

    // A source that must never be consulted.
    let loader = Loader::new(Arc::clone(&pool), cache, |key: &str| -> io::Result<Vec<u8>> {
        panic!("unexpected source fetch for {:?}", key);
    });

    let caller = thread::current().id();
    let (tx, rx) = unbounded();

    loader.load("k", move |result| {
        let _ = tx.send((result.unwrap(), thread::current().id()));
    });

    // The callback already fired, synchronously, before `load` returned.
    let (bytes, callback_thread) = rx.try_recv().unwrap();
    assert_eq!(bytes.as_ref(), b"cached");
    assert_eq!(callback_thread, caller);

    pool.shutdown();
}

#[test]
fn cache_miss_fetches_on_worker_and_stores() {
    let pool = test_pool();
    let fetches = Arc::new(AtomicUsize::new(0));

    let source = {
        let fetches = Arc::clone(&fetches);

        move |key: &str| -> io::Result<Vec<u8>> {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(format!("bytes for {}", key).into_bytes())
        }
    };

    let loader = Loader::new(Arc::clone(&pool), Cache::Memory(MemoryCache::new(1024)), source);

    let caller = thread::current().id();
    let (tx, rx) = unbounded();

    {
        let tx = tx.clone();
        loader.load("a", move |result| {
            let _ = tx.send((result.unwrap(), thread::current().id()));
        });
    }

    let (bytes, callback_thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(bytes.as_ref(), b"bytes for a");
    assert_ne!(callback_thread, caller);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Loaded once, cached: a second load must not touch the source again.
    loader.load("a", move |result| {
        let _ = tx.send((result.unwrap(), thread::current().id()));
    });

    let (bytes, callback_thread) = rx.try_recv().unwrap();
    assert_eq!(bytes.as_ref(), b"bytes for a");
    assert_eq!(callback_thread, caller);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    pool.shutdown();
}

#[test]
fn source_error_reaches_callback() {
    let pool = test_pool();

    let loader = Loader::new(
        Arc::clone(&pool),
        Cache::Memory(MemoryCache::new(1024)),
        |_key: &str| -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no route"))
        },
    );

    let (tx, rx) = unbounded();

    loader.load("missing", move |result| {
        let _ = tx.send(result.map_err(|e| e.kind()));
    });

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.unwrap_err(), io::ErrorKind::ConnectionRefused);

    pool.shutdown();
}
