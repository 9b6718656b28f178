//! Configuration for the Kestrel debug coordinator.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file (or no file at all) yields a usable [`KestrelConfig`].

mod logging;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

pub use logging::{init_tracing, init_tracing_with_config, LoggingConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_string())
    }
}

/// Top-level configuration.
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [debugger]
/// source_roots = ["src/main/scala"]
/// classpath = ["target/classes"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KestrelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub debugger: DebuggerConfig,
}

impl KestrelConfig {
    /// Load a config file. Relative paths inside it are resolved against the
    /// file's directory.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::load_from_str(&text)?;
        if let Some(base) = path.parent() {
            config.debugger.resolve_relative_paths(base);
        }
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerConfig {
    /// Directories walked recursively for source files.
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,

    /// File extensions (without the dot) that count as source files.
    #[serde(default = "DebuggerConfig::default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Classpath handed to launched targets.
    #[serde(default)]
    pub classpath: Vec<PathBuf>,

    /// Extra VM options handed to launched targets.
    #[serde(default)]
    pub vm_options: Vec<String>,

    /// Capacity of the coordinator's message inbox.
    #[serde(default = "DebuggerConfig::default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Maximum number of characters kept in string previews.
    #[serde(default = "DebuggerConfig::default_string_preview_len")]
    pub string_preview_len: usize,
}

impl DebuggerConfig {
    fn default_source_extensions() -> Vec<String> {
        vec!["scala".to_owned(), "java".to_owned()]
    }

    fn default_inbox_capacity() -> usize {
        256
    }

    fn default_string_preview_len() -> usize {
        50
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for path in self.source_roots.iter_mut().chain(self.classpath.iter_mut()) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Every source file below the configured roots, canonicalized, ordered
    /// and deduplicated.
    ///
    /// Missing roots and unreadable entries are skipped.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = BTreeSet::new();
        for root in &self.source_roots {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() || !self.is_source_file(entry.path()) {
                    continue;
                }
                let path = std::fs::canonicalize(entry.path())
                    .unwrap_or_else(|_| entry.path().to_path_buf());
                files.insert(path);
            }
        }
        tracing::debug!(
            target: "kestrel.config",
            roots = self.source_roots.len(),
            files = files.len(),
            "discovered source files"
        );
        files.into_iter().collect()
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.source_extensions.iter().any(|want| want == ext))
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            source_extensions: Self::default_source_extensions(),
            classpath: Vec::new(),
            vm_options: Vec::new(),
            inbox_capacity: Self::default_inbox_capacity(),
            string_preview_len: Self::default_string_preview_len(),
        }
    }
}
