use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use anyhow::Context;
use tracing::{debug, info};
use crate::builder::{Builder, GoBuilder};
use crate::error::{ShedError, ShedResult};
use crate::global::utils::get_global_cache_dir;
use crate::tool::binary_name;
use crate::util::{current_target_triple, escape_path, is_executable};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    import_path: String,
    version: String,
}

/// Outcome of the one build allowed per key. `None` until a build finished.
type BuildSlot = Mutex<Option<Result<PathBuf, String>>>;

/// The shared store of built tool executables.
///
/// Entries live at `<dir>/tools/<target triple>/<import path>@<version>/`
/// and are never modified once built. Builds go through the configured
/// [`Builder`]; concurrent [`Cache::ensure`] calls for the same tool and
/// version share a single build while unrelated tools build in parallel.
pub struct Cache {
    dir: PathBuf,
    triple: String,
    builder: Arc<dyn Builder>,
    in_flight: Mutex<HashMap<CacheKey, Arc<BuildSlot>>>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("dir", &self.dir)
            .field("triple", &self.triple)
            .finish_non_exhaustive()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(get_global_cache_dir())
    }
}

impl Cache {
    /// A cache rooted at `dir` that builds with the `go` toolchain.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self::with_builder(dir, Arc::new(GoBuilder::new()))
    }

    /// A cache rooted at `dir` that builds with `builder`.
    pub fn with_builder<P: Into<PathBuf>>(dir: P, builder: Arc<dyn Builder>) -> Self {
        Cache {
            dir: dir.into(),
            triple: current_target_triple(),
            builder,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the cache directory if it doesn't exist yet.
    pub fn create_dir(&self) -> ShedResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ShedError::io(format!("creating cache dir {}", self.dir.display()), e)
        })
    }

    /// Deletes the whole cache directory.
    ///
    /// Must not be called while builds are running.
    pub fn clean(&self) -> ShedResult<()> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                info!("Removed cache {}", self.dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShedError::io(
                format!("removing cache dir {}", self.dir.display()),
                e,
            )),
        }
    }

    fn entry_dir(&self, import_path: &str, version: &str) -> PathBuf {
        self.dir
            .join("tools")
            .join(&self.triple)
            .join(format!("{}@{}", escape_path(import_path), escape_path(version)))
    }

    fn executable_path(&self, import_path: &str, version: &str) -> PathBuf {
        self.entry_dir(import_path, version)
            .join(binary_name(import_path))
    }

    /// Resolves `reference` to a canonical version through the builder.
    pub fn resolve(&self, import_path: &str, reference: &str) -> ShedResult<String> {
        let version = self
            .builder
            .resolve_version(import_path, reference)
            .map_err(|e| ShedError::Resolution {
                import_path: import_path.to_string(),
                reference: reference.to_string(),
                reason: format!("{e:#}"),
            })?;
        debug!("Resolved {}@{} to {}", import_path, reference, version);
        Ok(version)
    }

    /// Makes sure the executable for `import_path` at `reference` is in the
    /// cache, building it if needed.
    ///
    /// Returns the canonical version and the path of the executable.
    pub fn ensure(&self, import_path: &str, reference: &str) -> ShedResult<(String, PathBuf)> {
        let version = self.resolve(import_path, reference)?;
        let exe = self.ensure_built(import_path, &version)?;
        Ok((version, exe))
    }

    fn ensure_built(&self, import_path: &str, version: &str) -> ShedResult<PathBuf> {
        let key = CacheKey {
            import_path: import_path.to_string(),
            version: version.to_string(),
        };
        let slot = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();

        // Held for the whole build: callers asking for the same key wait here
        // and then see the outcome instead of building again.
        let mut outcome = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let build_error = |reason: String| ShedError::Build {
            import_path: import_path.to_string(),
            version: version.to_string(),
            reason,
        };
        match outcome.as_ref() {
            Some(Ok(exe)) if exe.exists() => return Ok(exe.clone()),
            Some(Err(reason)) => return Err(build_error(reason.clone())),
            _ => {}
        }

        let exe = self.executable_path(import_path, version);
        if is_executable(&exe) {
            debug!("Cache hit for {}@{}", import_path, version);
            *outcome = Some(Ok(exe.clone()));
            self.release(&key, &slot);
            return Ok(exe);
        }

        info!("Building {}@{}", import_path, version);
        let result = self.build(import_path, version, &exe).map_err(|e| format!("{e:#}"));
        match &result {
            Ok(_) => info!("Built {}@{}", import_path, version),
            Err(reason) => debug!("Build of {}@{} failed: {}", import_path, version, reason),
        }
        *outcome = Some(result.clone());
        if result.is_ok() {
            self.release(&key, &slot);
        }
        result.map_err(build_error)
    }

    /// Drops the slot of a key that is on disk now. Later callers find the
    /// executable without it; only failed keys stay in the table.
    fn release(&self, key: &CacheKey, slot: &Arc<BuildSlot>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            in_flight.remove(key);
        }
    }

    /// Builds into a staging directory and moves the executable into place,
    /// so an interrupted build never leaves a partial entry behind.
    fn build(&self, import_path: &str, version: &str, exe: &Path) -> anyhow::Result<PathBuf> {
        let tmp = self.dir.join("tmp");
        std::fs::create_dir_all(&tmp)
            .with_context(|| format!("could not create {}", tmp.display()))?;
        let staging = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&tmp)
            .context("could not create staging directory")?;
        let built = self.builder.build(import_path, version, staging.path())?;

        let entry_dir = self.entry_dir(import_path, version);
        std::fs::create_dir_all(&entry_dir)
            .with_context(|| format!("could not create {}", entry_dir.display()))?;
        std::fs::rename(&built, exe)
            .with_context(|| format!("could not move {} into the cache", built.display()))?;
        Ok(exe.to_path_buf())
    }

    /// Path of an already built executable. Never builds.
    ///
    /// # Errors
    /// [`ShedError::NotInstalled`] if the tool isn't in the cache.
    pub fn tool_path(&self, import_path: &str, version: &str) -> ShedResult<PathBuf> {
        let exe = self.executable_path(import_path, version);
        if is_executable(&exe) {
            Ok(exe)
        } else {
            Err(ShedError::NotInstalled {
                import_path: import_path.to_string(),
                version: version.to_string(),
            })
        }
    }

    /// Removes a cached executable. Does nothing if it isn't cached.
    pub fn evict(&self, import_path: &str, version: &str) -> ShedResult<()> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&CacheKey {
                import_path: import_path.to_string(),
                version: version.to_string(),
            });
        let entry_dir = self.entry_dir(import_path, version);
        match std::fs::remove_dir_all(&entry_dir) {
            Ok(()) => {
                debug!("Evicted {}@{}", import_path, version);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShedError::io(
                format!("removing {}", entry_dir.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MockBuilder;
    use std::time::Duration;
    use tempfile::tempdir;

    const EJSON: &str = "github.com/Shopify/ejson/cmd/ejson";

    fn mock() -> Arc<MockBuilder> {
        Arc::new(MockBuilder::new().tool(EJSON, &[("v1.2.2", "v1.2.2"), ("v1.1.0", "v1.1.0")]))
    }

    #[test]
    fn test_ensure_builds_once() {
        let dir = tempdir().unwrap();
        let mock = mock();
        let cache = Cache::with_builder(dir.path(), mock.clone());

        let (version, exe) = cache.ensure(EJSON, "").unwrap();
        assert_eq!(version, "v1.2.2");
        assert!(exe.starts_with(dir.path()));
        assert!(is_executable(&exe));

        let (_, again) = cache.ensure(EJSON, "v1.2.2").unwrap();
        assert_eq!(exe, again);
        assert_eq!(mock.build_count(), 1);
    }

    #[test]
    fn test_existing_entry_is_not_rebuilt() {
        let dir = tempdir().unwrap();
        let first = mock();
        Cache::with_builder(dir.path(), first.clone()).ensure(EJSON, "v1.1.0").unwrap();

        // A fresh cache object over the same directory finds the entry on disk.
        let second = mock();
        let cache = Cache::with_builder(dir.path(), second.clone());
        cache.ensure(EJSON, "v1.1.0").unwrap();
        assert_eq!(second.build_count(), 0);
    }

    #[test]
    fn test_concurrent_ensure_dedups_builds() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(
            MockBuilder::new()
                .tool(EJSON, &[("v1.2.2", "v1.2.2")])
                .with_build_delay(Duration::from_millis(50)),
        );
        let cache = Cache::with_builder(dir.path(), mock.clone());

        let paths: Vec<PathBuf> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.ensure(EJSON, "v1.2.2").unwrap().1))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(mock.build_count(), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_concurrent_failures_share_outcome() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(
            MockBuilder::new()
                .tool(EJSON, &[("v1.2.2", "v1.2.2")])
                .fail_builds_of(EJSON)
                .with_build_delay(Duration::from_millis(50)),
        );
        let cache = Cache::with_builder(dir.path(), mock.clone());

        let errors: Vec<ShedError> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| cache.ensure(EJSON, "v1.2.2").unwrap_err()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(mock.build_count(), 1);
        assert!(errors.iter().all(|e| matches!(e, ShedError::Build { .. })));
    }

    #[test]
    fn test_only_failed_keys_stay_in_flight() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(
            MockBuilder::new()
                .tool(EJSON, &[("v1.2.2", "v1.2.2")])
                .tool("example.org/broken", &[("v1.0.0", "v1.0.0")])
                .fail_builds_of("example.org/broken"),
        );
        let cache = Cache::with_builder(dir.path(), mock.clone());
        let in_flight = || cache.in_flight.lock().unwrap().len();

        cache.ensure(EJSON, "v1.2.2").unwrap();
        cache.ensure(EJSON, "v1.2.2").unwrap();
        assert_eq!(in_flight(), 0);
        assert_eq!(mock.build_count(), 1);

        cache.ensure("example.org/broken", "v1.0.0").unwrap_err();
        cache.ensure("example.org/broken", "v1.0.0").unwrap_err();
        assert_eq!(in_flight(), 1);
        assert_eq!(mock.build_count(), 2);
    }

    #[test]
    fn test_create_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("cache");
        let cache = Cache::with_builder(&root, mock());
        assert!(!root.exists());
        cache.create_dir().unwrap();
        assert!(root.is_dir());
        cache.create_dir().unwrap();
    }

    #[test]
    fn test_resolution_error() {
        let dir = tempdir().unwrap();
        let cache = Cache::with_builder(dir.path(), mock());
        let err = cache.ensure(EJSON, "v9.0.0").unwrap_err();
        assert!(matches!(err, ShedError::Resolution { ref reference, .. } if reference == "v9.0.0"));
    }

    #[test]
    fn test_tool_path_and_evict() {
        let dir = tempdir().unwrap();
        let mock = mock();
        let cache = Cache::with_builder(dir.path(), mock.clone());
        assert!(matches!(
            cache.tool_path(EJSON, "v1.2.2").unwrap_err(),
            ShedError::NotInstalled { .. }
        ));

        let (_, exe) = cache.ensure(EJSON, "v1.2.2").unwrap();
        assert_eq!(cache.tool_path(EJSON, "v1.2.2").unwrap(), exe);

        cache.evict(EJSON, "v1.2.2").unwrap();
        assert!(cache.tool_path(EJSON, "v1.2.2").is_err());
        // Evicting twice is fine.
        cache.evict(EJSON, "v1.2.2").unwrap();

        cache.ensure(EJSON, "v1.2.2").unwrap();
        assert_eq!(mock.build_count(), 2);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cache");
        let cache = Cache::with_builder(&root, mock());
        cache.ensure(EJSON, "").unwrap();
        assert!(root.exists());
        cache.clean().unwrap();
        assert!(!root.exists());
        cache.clean().unwrap();
    }

    #[test]
    fn test_staging_dir_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let cache = Cache::with_builder(dir.path(), mock());
        cache.ensure(EJSON, "").unwrap();
        let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
