//! The on-disk, content-addressed cache of compiled objects.

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::error::CoreError;

/// Storage backend for compiled objects, keyed by the name
/// [`crate::recompiler::hash::object_cache_name`] produces.
///
/// There is no eviction: a cache entry is only ever replaced by a
/// differently-named one (because its content hash changed), never
/// deleted to reclaim space. A deployment that wants a bound on disk usage
/// manages that externally, by clearing the directory this crate is
/// pointed at.
pub trait CacheStore: Send + Sync {
    /// Returns the cached bytes for `name`, if present.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, CoreError>;
    /// Stores `bytes` under `name`.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), CoreError>;
    /// Returns `true` if `name` is already cached, without reading its
    /// contents.
    fn contains(&self, name: &str) -> Result<bool, CoreError>;
}

/// A [`CacheStore`] rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    /// Opens (creating if necessary) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CacheIo`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CoreError::CacheIo {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl CacheStore for FsCacheStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let path = self.path_for(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CoreError::CacheIo {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let path = self.path_for(name);
        let tmp = path.with_extension("obj.tmp");
        fs::write(&tmp, bytes).map_err(|source| CoreError::CacheIo {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CoreError::CacheIo {
            path: path.display().to_string(),
            source,
        })
    }

    fn contains(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.path_for(name).is_file())
    }
}

/// Front end used by the recompiler driver: wraps a [`CacheStore`] and
/// exposes the get-or-compile pattern the driver needs.
#[derive(Debug, Clone)]
pub struct ObjectCache<S> {
    store: S,
}

impl<S: CacheStore> ObjectCache<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the cached object for `name`, compiling and storing it via
    /// `compile` on a miss.
    ///
    /// # Errors
    ///
    /// Propagates any [`CoreError`] from the underlying store, or whatever
    /// error `compile` itself returns (e.g. a failed IR verification).
    pub fn get_or_compile(
        &self,
        name: &str,
        compile: impl FnOnce() -> Result<Vec<u8>, CoreError>,
    ) -> Result<Vec<u8>, CoreError> {
        if let Some(bytes) = self.store.get(name)? {
            return Ok(bytes);
        }
        let bytes = compile()?;
        self.store.put(name, &bytes)?;
        Ok(bytes)
    }

    /// The underlying store, for direct inspection in tests.
    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Convenience constructor for the common case of a filesystem-backed
/// cache rooted at `dir`.
///
/// # Errors
///
/// Returns [`CoreError::CacheIo`] if `dir` cannot be created.
pub fn filesystem_cache(dir: &Path) -> Result<ObjectCache<FsCacheStore>, CoreError> {
    Ok(ObjectCache::new(FsCacheStore::open(dir)?))
}
