//! Upward lookup of shared fixture assets.
//!
//! Fixture files such as `schema.sql` or the `docker/` directory live at the
//! workspace root, while tests run from their own crate directory. The
//! [`AssetResolver`] walks from a start directory towards the filesystem root
//! looking for an entry with the requested name and caches every hit.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::errors::{Error, Result};

#[cfg(test)]
#[path = "asset_paths_tests.rs"]
mod tests;

/// Default number of directories inspected by an upward search.
pub const DEFAULT_MAX_UPWARD_TRAVERSAL: usize = 10;

/// A resolved fixture asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPath {
    name: String,
    path: PathBuf,
}

impl AssetPath {
    /// The logical name the asset was resolved for, e.g. `schema.sql`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path of the asset.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Joins a relative path under this asset.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }
}

/// Resolves fixture assets by name and remembers the results.
///
/// Each name is searched for at most once per resolver; later calls are
/// answered from the cache without touching the filesystem. Failed searches
/// are not cached.
#[derive(Debug)]
pub struct AssetResolver {
    start: PathBuf,
    max_levels: usize,
    cache: Mutex<HashMap<String, AssetPath>>,
}

impl AssetResolver {
    /// Creates a resolver that searches upward from `start`.
    pub fn new(start: impl Into<PathBuf>, max_levels: usize) -> Self {
        Self {
            start: start.into(),
            max_levels,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a resolver that searches upward from the working directory.
    pub fn from_current_dir(max_levels: usize) -> Result<Self> {
        let start = std::env::current_dir().map_err(|source| Error::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Ok(Self::new(start, max_levels))
    }

    /// The directory the search starts from.
    pub fn start(&self) -> &Path {
        &self.start
    }

    /// Resolves `name`, using the cached path when it was found before.
    pub fn resolve(&self, name: &str) -> Result<AssetPath> {
        // Held across the search so concurrent callers probe a name only once.
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(hit) = cache.get(name) {
            debug!(name = name, path = %hit.path.display(), "Asset path cache hit");
            return Ok(hit.clone());
        }

        let path = find_upward(&self.start, name, self.max_levels)?;
        debug!(name = name, path = %path.display(), "Resolved asset path");

        let asset = AssetPath {
            name: name.to_string(),
            path,
        };
        cache.insert(name.to_string(), asset.clone());
        Ok(asset)
    }

    /// Resolves `name` and returns `relative` joined under it, checking that
    /// the joined path exists.
    pub fn resolve_within(&self, name: &str, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.resolve(name)?.join(relative);
        match fs::metadata(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound {
                name: path.display().to_string(),
                start: self.start.clone(),
                levels: self.max_levels,
            }),
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    /// Returns the cached entry for `name` without searching.
    pub fn cached(&self, name: &str) -> Option<AssetPath> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

/// Searches `start` and up to `max_levels - 1` of its ancestors for an entry
/// named `name`.
///
/// "Does not exist" is the only error that continues the search; any other
/// I/O error is returned immediately.
pub fn find_upward(start: &Path, name: &str, max_levels: usize) -> Result<PathBuf> {
    let mut current = start.to_path_buf();

    for _ in 0..max_levels {
        let candidate = current.join(name);
        match fs::metadata(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Io {
                    path: candidate,
                    source,
                })
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Err(Error::NotFound {
        name: name.to_string(),
        start: start.to_path_buf(),
        levels: max_levels,
    })
}
