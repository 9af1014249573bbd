// ABOUTME: Error types for SSH key operations using thiserror.
// ABOUTME: Provides typed errors for key inspection, generation and persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during SSH key operations.
#[derive(Error, Debug)]
pub enum SshError {
    /// Failed to read a private key file from disk.
    #[error("failed to read SSH key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `.pub` sibling of a private key is missing or unreadable.
    #[error("public key {path} is missing or unreadable: {source}")]
    ReadPublicKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Refused to overwrite an existing key file.
    #[error("SSH key already exists at {0}")]
    KeyExists(PathBuf),

    /// Failed to generate an SSH key.
    #[error("failed to generate SSH key: {0}")]
    GenerateKey(#[source] ssh_key::Error),

    /// Failed to serialize a key.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] ssh_key::Error),

    /// Failed to write a key file to disk.
    #[error("failed to write key to {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using SshError.
pub type Result<T> = std::result::Result<T, SshError>;
