//! Maps bare source file names reported by the target (`Foo.scala`) to the
//! canonical files on disk that carry that name.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use kestrel_vm::Location;
use serde::{Deserialize, Serialize};

/// A 1-based line in a canonical source file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
}

impl SourcePosition {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// The bare file name, which is all the target knows about a source file.
    pub fn file_name(&self) -> String {
        bare_name(&self.file)
    }
}

pub(crate) fn bare_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Canonical identity of a user-supplied path.
///
/// Falls back to the path as given when it does not exist on disk.
pub fn canonical_file(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read-only between rebuilds; rebuilt wholesale from configuration.
#[derive(Clone, Debug, Default)]
pub struct SourceIndex {
    by_name: HashMap<String, BTreeSet<PathBuf>>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut by_name: HashMap<String, BTreeSet<PathBuf>> = HashMap::new();
        for file in files {
            by_name.entry(bare_name(&file)).or_default().insert(file);
        }
        Self { by_name }
    }

    pub fn rebuild(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        *self = Self::from_files(files);
    }

    /// Number of distinct files indexed.
    pub fn len(&self) -> usize {
        self.by_name.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Every canonical file named `source_name`, in path order.
    pub fn candidates<'a>(&'a self, source_name: &str) -> impl Iterator<Item = &'a Path> + 'a {
        self.by_name
            .get(source_name)
            .into_iter()
            .flat_map(|files| files.iter().map(PathBuf::as_path))
    }

    /// Resolve a target-side source reference to a canonical position.
    ///
    /// When several files share the name, the one whose path ends with the
    /// target's package-relative `source_path` wins; otherwise the first in
    /// path order.
    pub fn resolve(
        &self,
        source_name: &str,
        source_path: Option<&str>,
        line: u32,
    ) -> Option<SourcePosition> {
        let files = self.by_name.get(source_name)?;
        let chosen = source_path
            .and_then(|rel| files.iter().find(|file| file.ends_with(rel)))
            .or_else(|| files.iter().next())?;
        Some(SourcePosition::new(chosen.clone(), line))
    }

    pub fn position_of(&self, location: &Location) -> Option<SourcePosition> {
        let source_name = location.source_name.as_deref()?;
        let line = location.line?;
        self.resolve(source_name, location.source_path.as_deref(), line)
    }
}
