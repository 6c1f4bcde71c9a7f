use std::path::PathBuf;
use directories::ProjectDirs;

/// Environment variable overriding the default cache location.
pub const CACHE_DIR_ENV: &str = "SHED_CACHE_DIR";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shed")
}

/// The directory tools are built into when no cache is configured.
///
/// `$SHED_CACHE_DIR` if set, otherwise the platform user cache directory
/// (e.g. `~/.cache/shed` on Linux). Falls back to the system temp directory
/// when no home directory can be determined.
pub fn get_global_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    project_dirs()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("shed"))
}
