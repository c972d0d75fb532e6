//! Manifest extraction.
//!
//! Turns raw file bytes into per-file document sets. A file may hold several
//! YAML documents separated by `---`; each is parsed into a JSON value so the
//! schema validator and the policy evaluator share one document model.
//!
//! # Graceful Degradation
//!
//! - Unreadable file: becomes an [`InvalidFile`] with a read error
//! - Any malformed document: the whole file becomes an [`InvalidFile`]
//!   carrying the parse error; later documents are not read
//! - Content that is not UTF-8: an [`InvalidFile`] with a parse error
//! - Empty documents (`---` with nothing after it): dropped
//!
//! A failing file never affects its siblings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Parsed representation of one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfigurations {
    pub file_name: String,
    pub configurations: Vec<Value>,
}

impl FileConfigurations {
    pub fn new(file_name: impl Into<String>, configurations: Vec<Value>) -> Self {
        FileConfigurations {
            file_name: file_name.into(),
            configurations,
        }
    }
}

/// Per-file error attached to an [`InvalidFile`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FileError {
    #[error("failed to read file: {message}")]
    Read { message: String },

    #[error("document {document_index}: failed to parse YAML: {message}")]
    Parse {
        document_index: usize,
        message: String,
    },

    #[error("document {document_index}: {message}")]
    Validation {
        document_index: usize,
        message: String,
    },
}

/// A file that failed extraction or schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidFile {
    pub path: String,
    pub errors: Vec<FileError>,
}

impl InvalidFile {
    pub fn new(path: impl Into<String>, errors: Vec<FileError>) -> Self {
        InvalidFile {
            path: path.into(),
            errors,
        }
    }

    /// True when the file never reached schema validation.
    pub fn is_parse_failure(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, FileError::Read { .. } | FileError::Parse { .. }))
    }
}

/// Parse `content` into the documents of `file_name`.
pub fn extract_configurations(
    file_name: &str,
    content: &str,
) -> Result<FileConfigurations, InvalidFile> {
    let mut configurations = Vec::new();
    let mut errors = Vec::new();

    for (document_index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        match Value::deserialize(document) {
            Ok(Value::Null) => {}
            Ok(value) => configurations.push(value),
            Err(e) => {
                // The document stream cannot resume after a scanner error.
                errors.push(FileError::Parse {
                    document_index,
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    if errors.is_empty() {
        Ok(FileConfigurations::new(file_name, configurations))
    } else {
        debug!(file = file_name, errors = errors.len(), "file failed to parse");
        Err(InvalidFile::new(file_name, errors))
    }
}

/// Read `path` from disk and extract its documents.
pub async fn read_file_configurations(path: &str) -> Result<FileConfigurations, InvalidFile> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(content) => extract_configurations(path, &content),
            Err(e) => Err(InvalidFile::new(
                path,
                vec![FileError::Parse {
                    document_index: 0,
                    message: format!("file is not valid UTF-8: {}", e.utf8_error()),
                }],
            )),
        },
        Err(e) => Err(InvalidFile::new(
            path,
            vec![FileError::Read {
                message: e.to_string(),
            }],
        )),
    }
}

/// Extract every path in order, sending parsed files to `sender`.
///
/// Returns the files that could not be extracted. Stops sending (but keeps
/// classifying) if the receiving side has gone away.
pub async fn stream_file_configurations(
    paths: Vec<String>,
    sender: mpsc::Sender<FileConfigurations>,
) -> Vec<InvalidFile> {
    let mut invalid_files = Vec::new();

    for path in paths {
        match read_file_configurations(&path).await {
            Ok(file) => {
                if sender.send(file).await.is_err() {
                    debug!(file = %path, "validator input closed, dropping file");
                }
            }
            Err(invalid) => invalid_files.push(invalid),
        }
    }

    invalid_files
}
