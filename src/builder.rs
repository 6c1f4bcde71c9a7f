use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{anyhow, bail, Context, Result};
use semver::Version;
use serde::Deserialize;
use tracing::debug;
use crate::tool::{binary_name, Tool, LATEST};

/// The backend that turns import paths into executables.
///
/// Implementations must be safe to call from several threads at once; the
/// cache makes sure the same `(import path, version)` is never built twice
/// concurrently.
pub trait Builder: Send + Sync {
    /// Resolves `reference` (`""`/`latest`, a tag, a commit or an already
    /// canonical version) to a canonical version string.
    fn resolve_version(&self, import_path: &str, reference: &str) -> Result<String>;

    /// Builds `import_path` at `version` and places the executable in
    /// `dest_dir`, returning its path.
    fn build(&self, import_path: &str, version: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Builds tools with the `go` toolchain.
#[derive(Debug, Clone)]
pub struct GoBuilder {
    go: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ListedPackage {
    #[serde(rename = "Module")]
    module: Option<ListedModule>,
}

#[derive(Debug, Deserialize)]
struct ListedModule {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Version")]
    version: Option<String>,
}

impl Default for GoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GoBuilder {
    /// Uses the `go` binary found on `PATH`.
    pub fn new() -> Self {
        Self::with_binary("go")
    }

    pub fn with_binary<P: Into<PathBuf>>(go: P) -> Self {
        Self { go: go.into() }
    }

    fn go<I, S>(&self, dir: &Path, args: I, envs: &[(&str, &OsStr)]) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let cmdline = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("Running `go {}` in {}", cmdline, dir.display());
        let output = Command::new(&self.go)
            .args(&args)
            .current_dir(dir)
            .env("GOFLAGS", "-mod=mod")
            .envs(envs.iter().copied())
            .output()
            .with_context(|| format!("could not run {}", self.go.display()))?;
        if !output.status.success() {
            bail!(
                "`go {}` failed: {}",
                cmdline,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

impl Builder for GoBuilder {
    fn resolve_version(&self, import_path: &str, reference: &str) -> Result<String> {
        let reference = if reference.is_empty() { LATEST } else { reference };
        // Resolve inside a throwaway module so the user's go.mod is never touched.
        let scratch = tempfile::tempdir().context("could not create scratch module")?;
        self.go(scratch.path(), ["mod", "init", "shed-resolve"], &[])?;
        self.go(scratch.path(), ["get", format!("{import_path}@{reference}").as_str()], &[])?;
        let out = self.go(scratch.path(), ["list", "-json", import_path], &[])?;
        let pkg: ListedPackage =
            serde_json::from_slice(&out).context("could not parse `go list` output")?;
        let module = pkg
            .module
            .ok_or_else(|| anyhow!("{import_path} is not part of a module"))?;
        module
            .version
            .ok_or_else(|| anyhow!("module {} has no version", module.path))
    }

    fn build(&self, import_path: &str, version: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.go(
            dest_dir,
            ["install", format!("{import_path}@{version}").as_str()],
            &[("GOBIN", dest_dir.as_os_str())],
        )?;
        let exe = dest_dir.join(binary_name(import_path));
        if !exe.exists() {
            bail!("`go install` did not produce {}", exe.display());
        }
        Ok(exe)
    }
}

/// A [`Builder`] backed by a fixed table of versions, for tests.
///
/// Each tool maps version references to canonical versions. `latest`
/// resolves to the highest canonical version by semver, canonical versions
/// resolve to themselves. Builds write a small shell script and are
/// recorded so tests can count them.
#[derive(Debug, Default)]
pub struct MockBuilder {
    tools: BTreeMap<String, BTreeMap<String, String>>,
    failing: HashSet<String>,
    build_delay: Option<Duration>,
    builds: Mutex<Vec<Tool>>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `import_path` with `(reference, canonical version)` pairs.
    pub fn tool(mut self, import_path: &str, versions: &[(&str, &str)]) -> Self {
        let entry = self.tools.entry(import_path.to_string()).or_default();
        for (reference, canonical) in versions {
            entry.insert(reference.to_string(), canonical.to_string());
        }
        self
    }

    /// Makes every build of `import_path` fail.
    pub fn fail_builds_of(mut self, import_path: &str) -> Self {
        self.failing.insert(import_path.to_string());
        self
    }

    /// Sleeps this long inside every build.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// All builds performed so far, in the order they started.
    pub fn builds(&self) -> Vec<Tool> {
        self.builds.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().map(|b| b.len()).unwrap_or_default()
    }
}

fn parse_version(v: &str) -> Option<Version> {
    Version::parse(v.strip_prefix('v').unwrap_or(v)).ok()
}

impl Builder for MockBuilder {
    fn resolve_version(&self, import_path: &str, reference: &str) -> Result<String> {
        let versions = self
            .tools
            .get(import_path)
            .ok_or_else(|| anyhow!("unknown module {import_path}"))?;
        if reference.is_empty() || reference == LATEST {
            return versions
                .values()
                .filter_map(|v| parse_version(v).map(|parsed| (parsed, v)))
                .max_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| anyhow!("no versions available for {import_path}"));
        }
        if let Some(canonical) = versions.get(reference) {
            return Ok(canonical.clone());
        }
        versions
            .values()
            .find(|v| *v == reference)
            .cloned()
            .ok_or_else(|| anyhow!("unknown revision {reference}"))
    }

    fn build(&self, import_path: &str, version: &str, dest_dir: &Path) -> Result<PathBuf> {
        if let Ok(mut builds) = self.builds.lock() {
            builds.push(Tool::new(import_path, version));
        }
        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(import_path) {
            bail!("build of {import_path}@{version} failed");
        }
        let exe = dest_dir.join(binary_name(import_path));
        std::fs::write(&exe, format!("#!/bin/sh\necho \"{import_path} {version}\"\n"))
            .with_context(|| format!("could not write {}", exe.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(exe)
    }
}
