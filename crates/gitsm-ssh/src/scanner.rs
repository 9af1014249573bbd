// ABOUTME: Discovery of usable SSH key pairs in a directory.
// ABOUTME: Filters non-key files, validates pairs, and never fails the caller.

use crate::error::{Result, SshError};
use crate::fingerprint::fingerprint_file;
use crate::key::{inspect_key, SshKeyRecord};
use std::path::{Path, PathBuf};

/// Files that live in `~/.ssh` but are never private keys.
const RESERVED_NAMES: &[&str] = &["known_hosts", "config", "authorized_keys"];

/// Whether a directory entry name can be a private key.
pub fn is_candidate_name(name: &str) -> bool {
    !name.ends_with(".pub") && !name.starts_with('.') && !RESERVED_NAMES.contains(&name)
}

/// Create the SSH directory if it is missing, with 0700 permissions on Unix.
pub fn ensure_ssh_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(dir).map_err(|e| SshError::CreateDirectory {
        path: dir.to_path_buf(),
        source: e,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            SshError::SetPermissions {
                path: dir.to_path_buf(),
                source: e,
            }
        })?;
    }

    Ok(())
}

/// Scans one directory for key pairs.
#[derive(Debug, Clone)]
pub struct KeyScanner {
    ssh_dir: PathBuf,
}

impl KeyScanner {
    pub fn new(ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssh_dir: ssh_dir.into(),
        }
    }

    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    /// Discover every valid key pair, sorted by file name.
    ///
    /// Never fails: a missing or unreadable directory yields an empty list (after
    /// trying to create the directory), and invalid entries are skipped.
    pub async fn discover(&self) -> Vec<SshKeyRecord> {
        let mut records = Vec::new();
        for path in self.candidate_paths() {
            match inspect_key(&path) {
                Ok(mut record) => {
                    record.fingerprint = fingerprint_file(&record.public_key_path).await;
                    records.push(record);
                }
                Err(e) => {
                    tracing::debug!(key = %path.display(), error = %e, "Skipping key candidate");
                }
            }
        }

        tracing::debug!(
            dir = %self.ssh_dir.display(),
            count = records.len(),
            "Discovered SSH keys"
        );
        records
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.ssh_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(
                    dir = %self.ssh_dir.display(),
                    error = %e,
                    "SSH directory unreadable"
                );
                if let Err(e) = ensure_ssh_dir(&self.ssh_dir) {
                    tracing::warn!(error = %e, "Could not create SSH directory");
                }
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(is_candidate_name)
                    .unwrap_or(false)
            })
            .map(|e| e.path())
            .collect();
        paths.sort();
        paths
    }
}
