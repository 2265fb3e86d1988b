//! Byte caches for loaded resources.
//!
//! A closed set of cache variants behind one `{fetch, store}` surface: an
//! in-memory LRU, a plain-files disk cache, and a two-tier composition of
//! both. These are collaborators of the pool, not part of it; the pool only
//! ever sees the closures the [`Loader`](crate::Loader) builds around them.

use std::{
    collections::HashMap,
    fs,
    io,
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// An error produced by a cache operation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("entry of {size} bytes exceeds the cache budget of {budget} bytes")]
    TooLarge { size: usize, budget: usize },
}

/// A resource cache.
///
/// The variants are a closed set rather than a trait object: callers either
/// keep bytes in memory, on disk, or in both tiers with memory consulted
/// first.
pub enum Cache {
    Memory(MemoryCache),
    Disk(DiskCache),
    Tiered(MemoryCache, DiskCache),
}

impl Cache {
    /// Look up a key. Disk read failures are treated as misses and logged.
    pub fn fetch(&self, key: &str) -> Option<Arc<[u8]>> {
        match self {
            Cache::Memory(memory) => memory.fetch(key),
            Cache::Disk(disk) => disk.fetch_logged(key),
            Cache::Tiered(memory, disk) => memory.fetch(key).or_else(|| {
                let bytes = disk.fetch_logged(key)?;

                // Promote disk hits into the memory tier.
                if let Err(e) = memory.store(key, &bytes) {
                    log::warn!("could not promote {:?} to memory cache: {}", key, e);
                }

                Some(bytes)
            }),
        }
    }

    /// Store a key. In the tiered variant both tiers are written; a memory
    /// tier failure does not prevent the disk write.
    pub fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        match self {
            Cache::Memory(memory) => memory.store(key, bytes),
            Cache::Disk(disk) => disk.store(key, bytes),
            Cache::Tiered(memory, disk) => {
                if let Err(e) = memory.store(key, bytes) {
                    log::warn!("memory cache store for {:?} failed: {}", key, e);
                }

                disk.store(key, bytes)
            }
        }
    }
}

struct MemoryEntry {
    bytes: Arc<[u8]>,
    last_access: u64,
}

struct MemoryInner {
    map: HashMap<String, MemoryEntry>,
    total_bytes: usize,
    tick: u64,
}

/// An in-memory least-recently-used byte cache with a byte budget.
///
/// Every fetch refreshes the entry's recency; stores evict the
/// least-recently-used entries until the cache fits its budget again.
pub struct MemoryCache {
    budget: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryCache {
    /// Create a cache that holds at most `budget` bytes of values.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(MemoryInner {
                map: HashMap::new(),
                total_bytes: 0,
                tick: 0,
            }),
        }
    }

    pub fn fetch(&self, key: &str) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        let entry = inner.map.get_mut(key)?;
        entry.last_access = tick;

        Some(Arc::clone(&entry.bytes))
    }

    pub fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        if bytes.len() > self.budget {
            return Err(CacheError::TooLarge {
                size: bytes.len(),
                budget: self.budget,
            });
        }

        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(old) = inner.map.insert(
            key.to_owned(),
            MemoryEntry {
                bytes: Arc::from(bytes),
                last_access: tick,
            },
        ) {
            inner.total_bytes -= old.bytes.len();
        }

        inner.total_bytes += bytes.len();

        while inner.total_bytes > self.budget {
            let coldest = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            match coldest {
                Some(key) => {
                    if let Some(evicted) = inner.map.remove(&key) {
                        inner.total_bytes -= evicted.bytes.len();
                    }
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of cached values.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }
}

/// A file-per-entry disk cache.
///
/// Entries are stored under a directory with file names derived from a
/// SHA-256 of the key, so arbitrary keys (URLs, paths) are safe. Writes go
/// through a temporary file and a rename so a torn write never leaves a
/// half-visible entry.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open a disk cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self { dir })
    }

    pub fn fetch(&self, key: &str) -> Result<Option<Arc<[u8]>>, CacheError> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(Arc::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        static TMP_SEQ: AtomicUsize = AtomicUsize::new(0);

        let path = self.entry_path(key);

        // Each write gets its own temporary file so concurrent stores of
        // the same key never interleave; the rename decides the winner.
        let tmp = path.with_extension(format!(
            "{}-{}.tmp",
            process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }

    /// Delete an entry if it exists.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }

    fn fetch_logged(&self, key: &str) -> Option<Arc<[u8]>> {
        match self.fetch(key) {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("disk cache read for {:?} failed: {}", key, e);
                None
            }
        }
    }
}
