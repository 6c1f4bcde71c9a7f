//! The `Shed` client: the entry point used by the CLI.
//!
//! A client owns one project's lockfile and a [`Cache`], and turns user
//! requests into [`InstallSet`]s.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use crate::error::{ErrorList, ShedError, ShedResult};
use crate::global::cache::Cache;
use crate::installer::{InstallSet, Workspace};
use crate::lock::{Lockfile, LOCKFILE_NAME};
use crate::tool::Tool;

/// Finds the lockfile for `cwd`: `cwd/shed.lock` or the closest one in an
/// ancestor directory. Sibling directories are never searched.
pub fn resolve_lockfile_path<P: AsRef<Path>>(cwd: P) -> Option<PathBuf> {
    cwd.as_ref()
        .ancestors()
        .map(|dir| dir.join(LOCKFILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Options for [`Shed::new`]. Everything left as `None` uses the default.
#[derive(Debug, Default)]
pub struct ShedOptions {
    /// Lockfile to use instead of searching from the current directory.
    pub lockfile_path: Option<PathBuf>,
    /// Cache to use instead of the user cache directory with the go builder.
    pub cache: Option<Cache>,
    /// Worker threads for installs.
    pub jobs: Option<usize>,
    /// Evict the cache entries of tools that get uninstalled.
    pub evict_on_remove: bool,
}

impl ShedOptions {
    pub fn lockfile_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.lockfile_path = Some(path.into());
        self
    }

    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn evict_on_remove(mut self, evict: bool) -> Self {
        self.evict_on_remove = evict;
        self
    }
}

/// Manages the tools pinned in one lockfile.
#[derive(Debug)]
pub struct Shed {
    lockfile_path: PathBuf,
    lockfile: Mutex<Lockfile>,
    cache: Cache,
    jobs: Option<usize>,
    evict_on_remove: bool,
}

impl Shed {
    /// Creates a client, loading the lockfile if it exists and creating the
    /// cache directory.
    pub fn new(options: ShedOptions) -> ShedResult<Self> {
        let lockfile_path = match options.lockfile_path {
            Some(path) => path,
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|e| ShedError::io("getting current directory", e))?;
                resolve_lockfile_path(&cwd).unwrap_or_else(|| cwd.join(LOCKFILE_NAME))
            }
        };
        debug!("Using lockfile {}", lockfile_path.display());
        let lockfile = Lockfile::load_or_default(&lockfile_path)?;

        let cache = options.cache.unwrap_or_default();
        cache.create_dir()?;
        debug!("Using cache {}", cache.dir().display());

        Ok(Shed {
            lockfile_path,
            lockfile: Mutex::new(lockfile),
            cache,
            jobs: options.jobs,
            evict_on_remove: options.evict_on_remove,
        })
    }

    pub fn lockfile_path(&self) -> &Path {
        &self.lockfile_path
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.dir()
    }

    fn workspace(&self) -> Workspace<'_> {
        Workspace {
            lockfile: &self.lockfile,
            lockfile_path: &self.lockfile_path,
            cache: &self.cache,
            jobs: self.jobs,
            evict: self.evict_on_remove,
        }
    }

    fn lockfile(&self) -> std::sync::MutexGuard<'_, Lockfile> {
        self.lockfile.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Computes the install set for `specs` (`name[@version]`, `name@none`
    /// to remove). With no specs every pinned tool is verified and rebuilt
    /// if missing.
    ///
    /// The returned set contains every spec that resolved, even when others
    /// failed; nothing is changed until it is applied.
    pub fn install<S: AsRef<str>>(&self, specs: &[S]) -> (InstallSet<'_>, Result<(), ErrorList>) {
        let (set, errors) = InstallSet::resolve(self.workspace(), specs);
        (set, errors.into_result())
    }

    /// Removes the named tools from the lockfile.
    ///
    /// Unlike `install(["name@none"])` this only touches the named tools:
    /// the other pinned tools are not verified or rebuilt. Every name must be
    /// pinned; unknown names are reported and the rest are still removed.
    pub fn uninstall<S: AsRef<str>>(&self, names: &[S]) -> ShedResult<()> {
        let mut errors = ErrorList::new();
        let mut lock = self.lockfile();
        let mut removed = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            match lock.get(name).map(|tool| tool.import_path.clone()) {
                Ok(import_path) => {
                    if let Ok(Some(tool)) = lock.remove(&import_path) {
                        removed.push(tool);
                    }
                }
                Err(e) => errors.push(name, e),
            }
        }
        lock.save(&self.lockfile_path)?;
        drop(lock);

        if self.evict_on_remove {
            for tool in &removed {
                if let Err(e) = self.cache.evict(&tool.import_path, &tool.version) {
                    warn!("Could not evict {}: {}", tool, e);
                }
            }
        }
        info!("Uninstalled {} tool(s)", removed.len());
        errors.into_result().map_err(ShedError::Tools)
    }

    /// All pinned tools in import path order.
    pub fn list(&self) -> Vec<Tool> {
        self.lockfile().iter().cloned().collect()
    }

    /// Path of the cached executable of a pinned tool.
    ///
    /// # Errors
    /// [`ShedError::NotFound`] if the tool isn't pinned,
    /// [`ShedError::NotInstalled`] if it was never built.
    pub fn tool_path(&self, name: &str) -> ShedResult<PathBuf> {
        let tool = self.lockfile().get(name)?.clone();
        self.cache.tool_path(&tool.import_path, &tool.version)
    }

    /// Deletes the whole cache directory.
    pub fn clean_cache(&self) -> ShedResult<()> {
        self.cache.clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch_lockfile(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        Lockfile::new().save(path).unwrap();
    }

    #[test]
    fn test_resolve_lockfile_path() {
        let cases: &[(&str, Option<&str>, Option<&str>)] = &[
            ("a/b", Some("a/b/shed.lock"), Some("a/b/shed.lock")),
            ("a/b", Some("a/shed.lock"), Some("a/shed.lock")),
            ("a/b/c/d", Some("a/shed.lock"), Some("a/shed.lock")),
            ("a/b", Some("a/c/shed.lock"), None),
            ("a/b", None, None),
            ("", Some("shed.lock"), Some("shed.lock")),
        ];
        for (cwd, location, want) in cases {
            let td = tempdir().unwrap();
            if let Some(location) = location {
                touch_lockfile(&td.path().join(location));
            }
            let cwd = td.path().join(cwd);
            fs::create_dir_all(&cwd).unwrap();
            let got = resolve_lockfile_path(&cwd);
            assert_eq!(got, want.map(|w| td.path().join(w)), "cwd {cwd:?}, lockfile at {location:?}");
        }
    }

    #[test]
    fn test_new_with_missing_lockfile() {
        let td = tempdir().unwrap();
        let shed = Shed::new(
            ShedOptions::default()
                .lockfile_path(td.path().join(LOCKFILE_NAME))
                .cache(Cache::new(td.path().join("cache"))),
        )
        .unwrap();
        assert!(shed.list().is_empty());
        assert!(shed.cache_dir().exists());
        assert!(!shed.lockfile_path().exists());
    }

    #[test]
    fn test_new_with_invalid_lockfile() {
        let td = tempdir().unwrap();
        let path = td.path().join(LOCKFILE_NAME);
        fs::write(&path, "example.org/a\n").unwrap();
        let err = Shed::new(
            ShedOptions::default()
                .lockfile_path(&path)
                .cache(Cache::new(td.path().join("cache"))),
        )
        .unwrap_err();
        assert!(matches!(err, ShedError::LockfileLoad { .. }));
    }
}
