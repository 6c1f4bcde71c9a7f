use std::fmt;
use std::sync::LazyLock;
use regex::Regex;
use crate::error::{ShedError, ShedResult};

/// Version reference meaning "the newest available version".
pub const LATEST: &str = "latest";
/// Version reference meaning "remove this tool".
pub const NONE: &str = "none";

static ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._~+\-]+$").expect("valid regex"));
static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.\-]*$").expect("valid regex"));
static MAJOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v[0-9]+$").expect("valid regex"));

/// A tool pinned to a canonical version.
///
/// The import path is the unique key of a tool; the version is whatever
/// canonical string the builder produced for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tool {
    pub import_path: String,
    pub version: String,
}

impl Tool {
    pub fn new(import_path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            version: version.into(),
        }
    }

    /// The human friendly name of the tool, see [`short_name`].
    pub fn name(&self) -> &str {
        short_name(&self.import_path)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.import_path, self.version)
    }
}

/// Returns the short name of an import path: its last element, skipping a
/// trailing major version suffix such as `v2`.
///
/// `github.com/golangci/golangci-lint/cmd/golangci-lint` -> `golangci-lint`,
/// `example.org/z/stringer/v2` -> `stringer`.
pub fn short_name(import_path: &str) -> &str {
    let mut elements = import_path.rsplit('/');
    let last = elements.next().unwrap_or(import_path);
    if MAJOR_RE.is_match(last) {
        if let Some(prev) = elements.next() {
            return prev;
        }
    }
    last
}

/// Executable file name for an import path, with `.exe` on Windows.
pub fn binary_name(import_path: &str) -> String {
    let name = short_name(import_path);
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Checks that `path` is a syntactically valid import path.
///
/// Elements are separated by `/`, may only contain ASCII letters, digits and
/// `._~+-`, and may not start or end with a dot. The first element is a
/// lowercase host name that contains at least one dot.
pub fn check_import_path(path: &str) -> ShedResult<()> {
    let invalid = |reason: &str| ShedError::InvalidImportPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty import path"));
    }
    for elem in path.split('/') {
        if elem.is_empty() {
            return Err(invalid("empty path element"));
        }
        if !ELEMENT_RE.is_match(elem) {
            return Err(invalid(&format!("invalid characters in element `{elem}`")));
        }
        if elem.starts_with('.') || elem.ends_with('.') {
            return Err(invalid(&format!("element `{elem}` has a leading or trailing dot")));
        }
    }
    let host = path.split('/').next().unwrap_or_default();
    if !host.contains('.') || !HOST_RE.is_match(host) {
        return Err(invalid("missing dot in first path element"));
    }
    Ok(())
}

/// The version part of a tool spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// No version given, or `latest`.
    Latest,
    /// `none`: the tool should be removed.
    Remove,
    /// An explicit version, tag or commit.
    Exact(String),
}

impl Reference {
    /// The string handed to the builder when resolving this reference.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Latest => LATEST,
            Self::Remove => NONE,
            Self::Exact(v) => v,
        }
    }
}

/// A requested change of the form `name[@ref]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Import path or short name.
    pub name: String,
    pub reference: Reference,
}

impl ToolSpec {
    pub fn parse(spec: &str) -> Self {
        let (name, reference) = match spec.split_once('@') {
            Some((name, r)) => (name, r),
            None => (spec, ""),
        };
        let reference = match reference {
            "" | LATEST => Reference::Latest,
            NONE => Reference::Remove,
            other => Reference::Exact(other.to_string()),
        };
        ToolSpec {
            name: name.to_string(),
            reference,
        }
    }
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reference {
            Reference::Latest => write!(f, "{}", self.name),
            _ => write!(f, "{}@{}", self.name, self.reference.as_str()),
        }
    }
}
