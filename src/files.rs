//! Input path resolution.
//!
//! Expands glob patterns and directories into the ordered list of manifest
//! files a run will read.

use glob::glob;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Extensions picked up when a directory is given.
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FileResolveError {
    #[error("invalid path pattern \"{pattern}\": {message}")]
    Pattern { pattern: String, message: String },

    #[error("no files matched: {0}")]
    NoMatches(String),
}

pub trait FileResolver: Send + Sync {
    /// Resolve user-supplied paths into existing files, in argument order,
    /// without duplicates.
    fn filter_files(&self, paths: &[String]) -> Result<Vec<String>, FileResolveError>;
}

/// Resolver backed by the `glob` crate.
#[derive(Debug, Default, Clone)]
pub struct GlobFileResolver;

impl GlobFileResolver {
    pub fn new() -> Self {
        GlobFileResolver
    }

    fn expand(pattern: &str) -> Result<Vec<String>, FileResolveError> {
        let path = Path::new(pattern);
        if path.is_dir() {
            let mut found = Vec::new();
            for extension in MANIFEST_EXTENSIONS {
                let nested = path.join("**").join(format!("*.{}", extension));
                found.extend(Self::expand_glob(&nested.to_string_lossy())?);
            }
            found.sort();
            return Ok(found);
        }
        Self::expand_glob(pattern)
    }

    fn expand_glob(pattern: &str) -> Result<Vec<String>, FileResolveError> {
        let entries = glob(pattern).map_err(|e| FileResolveError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .map(|p| p.to_string_lossy().to_string())
            .collect())
    }
}

impl FileResolver for GlobFileResolver {
    fn filter_files(&self, paths: &[String]) -> Result<Vec<String>, FileResolveError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for pattern in paths {
            let matches = Self::expand(pattern)?;
            debug!(%pattern, matches = matches.len(), "resolved input pattern");
            for file in matches {
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        }

        if files.is_empty() {
            return Err(FileResolveError::NoMatches(paths.join(", ")));
        }
        Ok(files)
    }
}
