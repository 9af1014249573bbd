// ABOUTME: Error taxonomy for binding, reconciliation and branch switching.
// ABOUTME: Each variant carries a recovery hint for the presentation layer.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitsmError {
    #[error("no SSH keys found in {}", .dir.display())]
    NoKeysFound { dir: PathBuf },

    #[error("invalid SSH key: {0}")]
    KeyValidation(#[from] gitsm_ssh::SshError),

    #[error("SSH authentication with {} failed: {detail}", .key.display())]
    AuthProbeFailure { key: PathBuf, detail: String },

    #[error("malformed git config {} at line {line}: {message}", .path.display())]
    ConfigParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to read git config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write git config {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a git repository", .0.display())]
    NotARepository(PathBuf),

    #[error("repository {} has no remote named '{remote}'", .repo.display())]
    NoRemoteConfigured { repo: PathBuf, remote: String },

    #[error("cannot convert remote URL '{0}'")]
    UnsupportedRemote(String),

    #[error("branch '{0}' does not exist")]
    UnknownBranch(String),

    #[error("git refused to switch branches because of local changes:\n{detail}")]
    LocalChangesRefused { detail: String },

    #[error("checkout of '{branch}' failed: {detail}")]
    CheckoutFailed {
        branch: String,
        detail: String,
        stash: Option<String>,
    },

    #[error("reapplying stash {stash} on '{branch}' left conflicts")]
    StashConflict { stash: String, branch: String },

    #[error("git {args} failed: {stderr}")]
    GitCommand { args: String, stderr: String },

    #[error("failed to run git: {0}")]
    GitUnavailable(#[source] std::io::Error),

    #[error("{command} timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("failed to read binding store {}: {source}", .path.display())]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write binding store {}: {source}", .path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("binding store {} is corrupt: {source}", .path.display())]
    StoreParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize binding store: {0}")]
    StoreSerialize(#[source] serde_json::Error),

    #[error("failed to read settings {}: {source}", .path.display())]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings {}: {source}", .path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine home directory")]
    NoHomeDirectory,

    #[error("aborted: {0}")]
    Aborted(String),
}

impl GitsmError {
    /// Soft failures have a fallback and do not indicate broken state.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            GitsmError::NoKeysFound { .. } | GitsmError::AuthProbeFailure { .. }
        )
    }

    /// What the user should do next.
    pub fn recovery_hint(&self) -> Option<String> {
        let hint = match self {
            GitsmError::NoKeysFound { dir } => format!(
                "Generate a key with `gitsm keygen` or `ssh-keygen -t ed25519 -f {}/id_ed25519`, add the public key to your Git host, then retry.",
                dir.display()
            ),
            GitsmError::KeyValidation(_) => {
                "Make sure both the private key and its .pub file exist and are readable.".to_string()
            }
            GitsmError::AuthProbeFailure { key, .. } => format!(
                "Add {}.pub to your Git host account, or rerun with --yes to bind anyway.",
                key.display()
            ),
            GitsmError::ConfigParse { path, .. } => format!(
                "Fix {} by hand (`git config --edit`), then run `gitsm fix`.",
                path.display()
            ),
            GitsmError::NotARepository(_) => {
                "Run the command inside a git repository or pass its path.".to_string()
            }
            GitsmError::NoRemoteConfigured { remote, .. } => {
                format!("Add one with `git remote add {remote} <url>`.")
            }
            GitsmError::UnsupportedRemote(_) => {
                "Only https://host/owner/repo and git@host:owner/repo URLs can be converted.".to_string()
            }
            GitsmError::UnknownBranch(branch) => {
                format!("Create it with `gitsm switch --create {branch}`.")
            }
            GitsmError::LocalChangesRefused { .. } => {
                "Commit, stash or discard your changes manually, then retry.".to_string()
            }
            GitsmError::CheckoutFailed {
                stash: Some(stash), ..
            } => format!(
                "Your changes are saved in stash {stash}. Restore them with `git stash apply {stash}`."
            ),
            GitsmError::StashConflict { stash, .. } => format!(
                "Resolve the conflicts, then `git stash drop` the entry for {stash}. To start over: `git reset --hard` and `git stash apply {stash}` on the original branch."
            ),
            GitsmError::StoreParse { path, .. } => format!(
                "Repair or move away {}; `gitsm fix` recreates bindings.",
                path.display()
            ),
            GitsmError::GitUnavailable(_) => "Install git and make sure it is on PATH.".to_string(),
            GitsmError::Timeout { .. } => {
                "Check your network connection and retry.".to_string()
            }
            _ => return None,
        };
        Some(hint)
    }
}

pub type Result<T> = std::result::Result<T, GitsmError>;
