//! Error types for shed
//!
//! Library functions return [`ShedResult<T>`]. Operations that act on many
//! tools at once collect their failures into an [`ErrorList`] instead of
//! stopping at the first one.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shed operations
pub type ShedResult<T> = Result<T, ShedError>;

/// All errors that can occur in shed
#[derive(Error, Debug)]
pub enum ShedError {
    // Lockfile lookups
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("name `{name}` is ambiguous, it matches: {}", candidates.join(", "))]
    AmbiguousName { name: String, candidates: Vec<String> },

    #[error("cannot add {import_path}: short name `{short_name}` is already used by {existing}")]
    DuplicateShortName {
        short_name: String,
        existing: String,
        import_path: String,
    },

    // Lockfile parsing
    #[error("invalid lockfile at line {line}: {reason}")]
    Format { line: usize, reason: String },

    #[error("failed to load lockfile {path}")]
    LockfileLoad {
        path: PathBuf,
        #[source]
        source: Box<ShedError>,
    },

    #[error("invalid import path `{path}`: {reason}")]
    InvalidImportPath { path: String, reason: String },

    // Builder errors
    #[error("could not resolve {import_path}@{reference}: {reason}")]
    Resolution {
        import_path: String,
        reference: String,
        reason: String,
    },

    #[error("failed to build {import_path}@{version}: {reason}")]
    Build {
        import_path: String,
        version: String,
        reason: String,
    },

    // Cache errors
    #[error("{import_path}@{version} is not installed, run `shed install` first")]
    NotInstalled { import_path: String, version: String },

    #[error("operation on {0} was canceled")]
    Canceled(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tools(#[from] ErrorList),
}

impl ShedError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A failure attributed to a single tool or spec.
#[derive(Debug)]
pub struct ToolError {
    /// The spec or import path the error belongs to.
    pub subject: String,
    pub error: ShedError,
}

/// Aggregate of independent per-tool failures, kept sorted by subject.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<ToolError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subject: impl Into<String>, error: ShedError) {
        let subject = subject.into();
        let at = self.errors.partition_point(|e| e.subject <= subject);
        self.errors.insert(at, ToolError { subject, error });
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ToolError> {
        self.errors.iter()
    }

    pub fn extend(&mut self, other: ErrorList) {
        for e in other.errors {
            self.push(e.subject, e.error);
        }
    }

    /// `Ok(())` when nothing failed, otherwise the list itself.
    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl IntoIterator for ErrorList {
    type Item = ToolError;
    type IntoIter = std::vec::IntoIter<ToolError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", e.subject, e.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ShedError::NotFound("go-fish".to_string());
        assert_eq!(err.to_string(), "tool not found: go-fish");
    }

    #[test]
    fn ambiguous_lists_candidates() {
        let err = ShedError::AmbiguousName {
            name: "stringer".to_string(),
            candidates: vec!["a.org/stringer".to_string(), "b.org/stringer".to_string()],
        };
        assert!(err.to_string().contains("a.org/stringer, b.org/stringer"));
    }

    #[test]
    fn error_list_sorted_by_subject() {
        let mut list = ErrorList::new();
        list.push("b.org/tool", ShedError::Canceled("b.org/tool".to_string()));
        list.push("a.org/tool", ShedError::Canceled("a.org/tool".to_string()));
        list.push("c.org/tool", ShedError::Canceled("c.org/tool".to_string()));

        let subjects: Vec<_> = list.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a.org/tool", "b.org/tool", "c.org/tool"]);
    }

    #[test]
    fn error_list_display_one_line_per_error() {
        let mut list = ErrorList::new();
        list.push("x", ShedError::NotFound("x".to_string()));
        list.push("y", ShedError::NotFound("y".to_string()));
        assert_eq!(list.to_string(), "x: tool not found: x\ny: tool not found: y");
    }

    #[test]
    fn empty_error_list_is_ok() {
        assert!(ErrorList::new().into_result().is_ok());
    }
}
