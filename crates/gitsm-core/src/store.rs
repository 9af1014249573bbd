// ABOUTME: Persistent map from repository path to its bound SSH key and remote.
// ABOUTME: Whole-file JSON, written atomically; upsert also reconciles the repo's git config.

use crate::error::{GitsmError, Result};
use crate::gitconfig::ConfigReconciler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Association between one repository and the credential it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryBinding {
    pub repo_path: PathBuf,
    /// Empty means "no SSH key, use the default transport".
    #[serde(default)]
    pub ssh_key_path: PathBuf,
    #[serde(default)]
    pub remote_url: String,
    pub created_at: DateTime<Utc>,
}

impl RepositoryBinding {
    pub fn key(&self) -> Option<&Path> {
        if self.ssh_key_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.ssh_key_path)
        }
    }

    pub fn uses_ssh(&self) -> bool {
        self.key().is_some()
    }
}

/// On-disk document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryBinding>,
    #[serde(rename = "defaultSSHPath", default)]
    pub default_ssh_path: PathBuf,
}

impl StoreData {
    pub fn empty(default_ssh_path: impl Into<PathBuf>) -> Self {
        Self {
            repositories: BTreeMap::new(),
            default_ssh_path: default_ssh_path.into(),
        }
    }
}

/// Canonical identity of a repository: absolute, symlinks resolved, without
/// the Windows verbatim prefix.
pub fn canonical_repo_path(path: &Path) -> PathBuf {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    });

    let text = resolved.to_string_lossy();
    match text.strip_prefix(r"\\?\") {
        Some(stripped) => PathBuf::from(stripped),
        None => resolved,
    }
}

/// Owns the binding file. No locking: one gitsm process at a time.
#[derive(Debug, Clone)]
pub struct BindingStore {
    path: PathBuf,
    default_ssh_dir: PathBuf,
    reconciler: ConfigReconciler,
}

impl BindingStore {
    pub fn new(path: impl Into<PathBuf>, default_ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_ssh_dir: default_ssh_dir.into(),
            reconciler: ConfigReconciler::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store, creating and saving an empty one on first use. A corrupt
    /// file is an error and is left untouched.
    pub fn load(&self) -> Result<StoreData> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let data = StoreData::empty(&self.default_ssh_dir);
                self.save(&data)?;
                tracing::info!(store = %self.path.display(), "Created binding store");
                return Ok(data);
            }
            Err(e) => {
                return Err(GitsmError::StoreRead {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| GitsmError::StoreParse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Atomically replace the whole file.
    pub fn save(&self, data: &StoreData) -> Result<()> {
        let write_err = |e: std::io::Error| GitsmError::StoreWrite {
            path: self.path.clone(),
            source: e,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut json = serde_json::to_string_pretty(data).map_err(GitsmError::StoreSerialize)?;
        json.push('\n');

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        tracing::debug!(
            store = %self.path.display(),
            repositories = data.repositories.len(),
            "Saved binding store"
        );
        Ok(())
    }

    pub fn get(&self, repo: &Path) -> Result<Option<RepositoryBinding>> {
        let key = canonical_repo_path(repo);
        Ok(self
            .load()?
            .repositories
            .remove(key.to_string_lossy().as_ref()))
    }

    pub fn list(&self) -> Result<Vec<RepositoryBinding>> {
        Ok(self.load()?.repositories.into_values().collect())
    }

    /// The single mutation entry point: record the binding, then reconcile the
    /// repository's `core.sshCommand`. The binding is not rolled back if
    /// reconciliation fails; that error is returned.
    pub fn upsert(
        &self,
        repo: &Path,
        key: Option<&Path>,
        remote_url: &str,
    ) -> Result<RepositoryBinding> {
        let repo_path = canonical_repo_path(repo);
        let binding = RepositoryBinding {
            repo_path: repo_path.clone(),
            ssh_key_path: key.map(Path::to_path_buf).unwrap_or_default(),
            remote_url: remote_url.to_string(),
            created_at: Utc::now(),
        };

        let mut data = self.load()?;
        data.repositories
            .insert(repo_path.to_string_lossy().into_owned(), binding.clone());
        self.save(&data)?;

        tracing::info!(
            repo = %repo_path.display(),
            key = %binding.ssh_key_path.display(),
            remote = %remote_url,
            "Recorded binding"
        );

        self.reconciler.set_ssh_command(&repo_path, binding.key())?;
        Ok(binding)
    }
}
