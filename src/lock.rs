use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;
use crate::error::{ShedError, ShedResult};
use crate::tool::{check_import_path, short_name, Tool};

/// File name of the lockfile searched for by [`crate::client::resolve_lockfile_path`].
pub const LOCKFILE_NAME: &str = "shed.lock";

const HEADER: &str = "# This file is generated by shed. Do not edit it by hand.";

/// The set of pinned tools of a project (`shed.lock`).
///
/// Tools are keyed by import path and always kept in ascending import path
/// order. A secondary index maps short names to import paths so tools can be
/// looked up by either.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Lockfile {
    tools: BTreeMap<String, Tool>,
    names: BTreeMap<String, BTreeSet<String>>,
}

impl Lockfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tool`, replacing any entry with the same import path.
    ///
    /// # Errors
    /// Returns [`ShedError::DuplicateShortName`] if a different tool already
    /// owns the same short name.
    pub fn put(&mut self, tool: Tool) -> ShedResult<()> {
        let name = short_name(&tool.import_path).to_string();
        if let Some(paths) = self.names.get(&name) {
            if let Some(existing) = paths.iter().find(|p| **p != tool.import_path) {
                return Err(ShedError::DuplicateShortName {
                    short_name: name,
                    existing: existing.clone(),
                    import_path: tool.import_path,
                });
            }
        }
        self.names
            .entry(name)
            .or_default()
            .insert(tool.import_path.clone());
        self.tools.insert(tool.import_path.clone(), tool);
        Ok(())
    }

    /// Looks up a tool by import path, falling back to its short name.
    pub fn get(&self, name: &str) -> ShedResult<&Tool> {
        let import_path = self.lookup(name)?;
        self.tools
            .get(import_path)
            .ok_or_else(|| ShedError::NotFound(name.to_string()))
    }

    /// Removes the tool matching `name` and returns it.
    ///
    /// Removing a tool that isn't in the lockfile is not an error, `Ok(None)`
    /// is returned instead.
    pub fn remove(&mut self, name: &str) -> ShedResult<Option<Tool>> {
        let import_path = match self.lookup(name) {
            Ok(path) => path.to_string(),
            Err(ShedError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let tool = self.tools.remove(&import_path);
        let name = short_name(&import_path);
        if let Some(paths) = self.names.get_mut(name) {
            paths.remove(&import_path);
            if paths.is_empty() {
                self.names.remove(name);
            }
        }
        Ok(tool)
    }

    fn lookup<'a>(&'a self, name: &str) -> ShedResult<&'a str> {
        if let Some((path, _)) = self.tools.get_key_value(name) {
            return Ok(path);
        }
        match self.names.get(name) {
            Some(paths) if paths.len() > 1 => Err(ShedError::AmbiguousName {
                name: name.to_string(),
                candidates: paths.iter().cloned().collect(),
            }),
            Some(paths) => paths
                .first()
                .map(String::as_str)
                .ok_or_else(|| ShedError::NotFound(name.to_string())),
            None => Err(ShedError::NotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Iterates over all tools in ascending import path order.
    pub fn iter(&self) -> impl Iterator<Item = &Tool> + '_ {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Renders the lockfile: a header comment followed by one
    /// `<import path> <version>` line per tool.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 1 + self.tools.len() * 64);
        out.push_str(HEADER);
        out.push('\n');
        for tool in self.iter() {
            out.push_str(&tool.import_path);
            out.push(' ');
            out.push_str(&tool.version);
            out.push('\n');
        }
        out
    }

    /// Parses the text produced by [`Lockfile::serialize`].
    ///
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    /// Returns [`ShedError::Format`] with the offending line number for
    /// malformed lines, invalid import paths, duplicate import paths and
    /// short name collisions.
    pub fn parse(content: &str) -> ShedResult<Self> {
        let mut lock = Lockfile::new();
        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason: String| ShedError::Format { line: line_no, reason };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [import_path, version] = fields[..] else {
                return Err(bad(format!(
                    "expected `<import path> <version>`, found {} field(s)",
                    fields.len()
                )));
            };
            check_import_path(import_path).map_err(|e| bad(e.to_string()))?;
            if lock.tools.contains_key(import_path) {
                return Err(bad(format!("duplicate tool {import_path}")));
            }
            lock.put(Tool::new(import_path, version))
                .map_err(|e| bad(e.to_string()))?;
        }
        Ok(lock)
    }

    /// Reads and parses the lockfile at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> ShedResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ShedError::io(format!("reading lockfile {}", path.display()), e))?;
        let lock = Self::parse(&content).map_err(|e| ShedError::LockfileLoad {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        debug!("Loaded {} tool(s) from {}", lock.len(), path.display());
        Ok(lock)
    }

    /// Loads the lockfile at `path`, or returns an empty one if it doesn't exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> ShedResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Writes the lockfile to `path` atomically.
    ///
    /// The content goes to a temporary file in the same directory which is
    /// then renamed over `path`, so readers never observe a partial file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ShedResult<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let context = || format!("writing lockfile {}", path.display());
        let mut file = NamedTempFile::new_in(dir).map_err(|e| ShedError::io(context(), e))?;
        file.write_all(self.serialize().as_bytes())
            .map_err(|e| ShedError::io(context(), e))?;
        file.as_file().sync_all().map_err(|e| ShedError::io(context(), e))?;
        file.persist(path).map_err(|e| ShedError::io(context(), e.error))?;
        debug!("Wrote {} tool(s) to {}", self.len(), path.display());
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Lockfile {
    type Item = &'a Tool;
    type IntoIter = std::collections::btree_map::Values<'a, String, Tool>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mock_lock() -> Lockfile {
        let mut lock = Lockfile::new();
        lock.put(Tool::new("github.com/cszatmary/go-fish", "v0.1.0")).unwrap();
        lock.put(Tool::new("github.com/golangci/golangci-lint/cmd/golangci-lint", "v1.33.0")).unwrap();
        lock.put(Tool::new("github.com/Shopify/ejson/cmd/ejson", "v1.2.2")).unwrap();
        lock
    }

    #[test]
    fn test_get_by_import_path_and_short_name() {
        let lock = mock_lock();
        let by_path = lock.get("github.com/cszatmary/go-fish").unwrap();
        let by_name = lock.get("go-fish").unwrap();
        assert_eq!(by_path, by_name);
        assert_eq!(by_name.version, "v0.1.0");
    }

    #[test]
    fn test_get_missing() {
        let lock = mock_lock();
        assert!(lock.get("stringer").unwrap_err().is_not_found());
    }

    #[test]
    fn test_put_overwrites_version() {
        let mut lock = mock_lock();
        lock.put(Tool::new("github.com/cszatmary/go-fish", "v0.2.0")).unwrap();
        assert_eq!(lock.len(), 3);
        assert_eq!(lock.get("go-fish").unwrap().version, "v0.2.0");
    }

    #[test]
    fn test_put_duplicate_short_name() {
        let mut lock = Lockfile::new();
        lock.put(Tool::new("golang.org/x/tools/cmd/stringer", "v0.1.0")).unwrap();
        let err = lock
            .put(Tool::new("example.org/z/random/stringer/v2/cmd/stringer", "v2.1.0"))
            .unwrap_err();
        assert!(matches!(err, ShedError::DuplicateShortName { .. }));
        assert_eq!(lock.len(), 1);
    }

    #[test]
    fn test_ambiguous_short_name() {
        let mut lock = Lockfile::new();
        lock.put(Tool::new("golang.org/x/tools/cmd/stringer", "v0.1.0")).unwrap();
        // Bypass put to simulate an index holding two paths for one name.
        lock.names
            .get_mut("stringer")
            .unwrap()
            .insert("example.org/stringer".to_string());
        lock.tools.insert(
            "example.org/stringer".to_string(),
            Tool::new("example.org/stringer", "v1.0.0"),
        );
        let err = lock.get("stringer").unwrap_err();
        assert!(matches!(err, ShedError::AmbiguousName { ref candidates, .. } if candidates.len() == 2));
        assert!(lock.get("example.org/stringer").is_ok());
    }

    #[test]
    fn test_remove_by_short_name() {
        let mut lock = mock_lock();
        let removed = lock.remove("ejson").unwrap();
        assert_eq!(removed.unwrap().import_path, "github.com/Shopify/ejson/cmd/ejson");
        assert!(!lock.contains("ejson"));
        // The name is free again.
        lock.put(Tool::new("example.org/ejson", "v1.0.0")).unwrap();
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut lock = mock_lock();
        assert_eq!(lock.remove("golang.org/x/tools/cmd/stringer").unwrap(), None);
        assert_eq!(lock.len(), 3);
    }

    #[test]
    fn test_iter_sorted_and_restartable() {
        let lock = mock_lock();
        let paths: Vec<_> = lock.iter().map(|t| t.import_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "github.com/Shopify/ejson/cmd/ejson",
                "github.com/cszatmary/go-fish",
                "github.com/golangci/golangci-lint/cmd/golangci-lint",
            ]
        );
        assert_eq!(lock.iter().count(), 3);
    }

    #[test]
    fn test_serialize_format() {
        let lock = mock_lock();
        let text = lock.serialize();
        let lines: Vec<_> = text.lines().skip(1).collect();
        assert_eq!(lines[0], "github.com/Shopify/ejson/cmd/ejson v1.2.2");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_parse_serialize_round_trip() {
        let lock = mock_lock();
        let parsed = Lockfile::parse(&lock.serialize()).unwrap();
        assert_eq!(parsed, lock);
        assert_eq!(Lockfile::parse(&Lockfile::new().serialize()).unwrap(), Lockfile::new());
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let text = "# pinned tools\n\n  github.com/cszatmary/go-fish   v0.1.0  \n# trailing\n";
        let lock = Lockfile::parse(text).unwrap();
        assert_eq!(lock.len(), 1);
        assert_eq!(lock.get("go-fish").unwrap().version, "v0.1.0");
    }

    #[test]
    fn test_parse_malformed_line() {
        let text = "github.com/cszatmary/go-fish v0.1.0\ngithub.com/Shopify/ejson/cmd/ejson\n";
        let err = Lockfile::parse(text).unwrap_err();
        assert!(matches!(err, ShedError::Format { line: 2, .. }));
    }

    #[test]
    fn test_parse_duplicate_import_path() {
        let text = "# header\ngithub.com/cszatmary/go-fish v0.1.0\ngithub.com/cszatmary/go-fish v0.2.0\n";
        let err = Lockfile::parse(text).unwrap_err();
        assert!(matches!(err, ShedError::Format { line: 3, .. }));
    }

    #[test]
    fn test_parse_short_name_collision() {
        let text = "golang.org/x/tools/cmd/stringer v1\nexample.org/z/stringer/v2 v2.0.0\n";
        let err = Lockfile::parse(text).unwrap_err();
        assert!(matches!(err, ShedError::Format { line: 2, .. }));
        assert!(err.to_string().contains("stringer"));
    }

    #[test]
    fn test_parse_invalid_import_path() {
        let err = Lockfile::parse("golangci-lint v1.33.0\n").unwrap_err();
        assert!(matches!(err, ShedError::Format { line: 1, .. }));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);
        let lock = mock_lock();
        lock.save(&path).unwrap();
        assert_eq!(Lockfile::load(&path).unwrap(), lock);
        // Overwrite in place.
        Lockfile::new().save(&path).unwrap();
        assert!(Lockfile::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_or_default_missing() {
        let dir = tempdir().unwrap();
        let lock = Lockfile::load_or_default(dir.path().join(LOCKFILE_NAME)).unwrap();
        assert!(lock.is_empty());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);
        fs::write(&path, "not a valid line here\n").unwrap();
        let err = Lockfile::load(&path).unwrap_err();
        assert!(matches!(err, ShedError::LockfileLoad { .. }));
    }
}
