//! # Keystone Storage Errors
//!
//! [`StorageError`] covers everything that can go wrong while reading or
//! writing descriptors, settings files and the persistent configuration
//! list: file I/O, unsupported formats and (de)serialization.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error during operation '{operation}' on path '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("Directory not found at path: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Serialization to '{format}' failed: {source}")]
    SerializationError {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Deserialization of '{path}' from '{format}' failed: {source}")]
    DeserializationError {
        path: PathBuf,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedConfigFormat(PathBuf),
}

impl StorageError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        StorageError::Io {
            source,
            operation: operation.into(),
            path: path.into(),
        }
    }
}
