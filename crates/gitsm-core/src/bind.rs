// ABOUTME: Bind and repair orchestration: discover, select, test, reconcile, persist.
// ABOUTME: Also clone, convert and unbind, which end in the same binding upsert.

use crate::error::{GitsmError, Result};
use crate::git::Git;
use crate::gitconfig::ssh_command_value;
use crate::remote::{is_ssh_url, repo_dir_name, to_https_url, to_ssh_url, Transport};
use crate::settings::Settings;
use crate::store::{BindingStore, RepositoryBinding};
use gitsm_ssh::{inspect_key, KeyProbe, KeyScanner, ProbeResult, SshKeyRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Interactive decisions the orchestrator delegates to its caller.
pub trait KeyPrompt: Send + Sync {
    /// Pick one of `keys`. `None` aborts the operation.
    fn select_key(&self, keys: &[SshKeyRecord], context: &str) -> Result<Option<usize>>;

    /// Whether to bind a key anyway after its probe failed.
    fn confirm_failed_probe(&self, key: &SshKeyRecord, result: &ProbeResult) -> Result<bool>;
}

/// Lifecycle of a repository's binding during one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    /// Binding missing or pointing at a key that no longer exists.
    Stale,
    Testing,
    Revalidating,
    Bound,
}

#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Use this key instead of prompting. It does not have to live in the SSH directory.
    pub key: Option<PathBuf>,
    /// Probe the selected key against the remote before binding.
    pub test_key: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            key: None,
            test_key: true,
        }
    }
}

/// What a bind-family operation did.
#[derive(Debug, Clone)]
pub struct BindReport {
    pub repo: PathBuf,
    pub binding: RepositoryBinding,
    /// Selected key, `None` for the default transport.
    pub key: Option<SshKeyRecord>,
    pub probe: Option<ProbeResult>,
    pub transitions: Vec<BindingState>,
    /// Soft failures the caller should show.
    pub warnings: Vec<String>,
}

/// Result of a bare key test.
#[derive(Debug, Clone)]
pub struct KeyTestReport {
    pub key: PathBuf,
    pub remote_url: String,
    pub result: ProbeResult,
}

#[derive(Default)]
struct Progress {
    transitions: Vec<BindingState>,
    warnings: Vec<String>,
}

impl Progress {
    fn enter(&mut self, state: BindingState) {
        tracing::debug!(state = ?state, "Binding state");
        self.transitions.push(state);
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Composes scanner, key tester, binding store and reconciler.
pub struct Binder {
    scanner: KeyScanner,
    probe: Arc<dyn KeyProbe>,
    store: BindingStore,
    remote_name: String,
    git_timeout: Duration,
    probe_timeout: Duration,
    network_timeout: Duration,
}

impl Binder {
    pub fn new(scanner: KeyScanner, probe: Arc<dyn KeyProbe>, store: BindingStore) -> Self {
        let defaults = Settings::default();
        Self {
            scanner,
            probe,
            store,
            remote_name: defaults.remote_name.clone(),
            git_timeout: defaults.git_timeout(),
            probe_timeout: defaults.probe_timeout(),
            network_timeout: defaults.network_timeout(),
        }
    }

    /// Build from settings with the system ssh client as the key tester. The SSH
    /// directory comes from settings, else from the store's recorded default.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let fallback_ssh_dir = gitsm_ssh::default_ssh_dir().ok_or(GitsmError::NoHomeDirectory)?;
        let store = BindingStore::new(settings.store_path()?, &fallback_ssh_dir);

        let ssh_dir = match settings.ssh_dir_override() {
            Some(dir) => dir,
            None => {
                let recorded = store.load()?.default_ssh_path;
                if recorded.as_os_str().is_empty() {
                    fallback_ssh_dir
                } else {
                    recorded
                }
            }
        };

        Ok(Self::new(
            KeyScanner::new(ssh_dir),
            Arc::new(settings.key_tester()),
            store,
        )
        .with_remote_name(settings.remote_name.clone())
        .with_timeouts(
            settings.git_timeout(),
            settings.probe_timeout(),
            settings.network_timeout(),
        ))
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    pub fn with_timeouts(mut self, git: Duration, probe: Duration, network: Duration) -> Self {
        self.git_timeout = git;
        self.probe_timeout = probe;
        self.network_timeout = network;
        self
    }

    pub fn ssh_dir(&self) -> &Path {
        self.scanner.ssh_dir()
    }

    pub fn store(&self) -> &BindingStore {
        &self.store
    }

    /// Discovered keys. Never fails; an empty list means "no keys".
    pub async fn keys(&self) -> Vec<SshKeyRecord> {
        self.scanner.discover().await
    }

    pub fn bindings(&self) -> Result<Vec<RepositoryBinding>> {
        self.store.list()
    }

    /// Generate an ed25519 key pair in the SSH directory.
    pub fn generate_key(&self, name: &str) -> Result<SshKeyRecord> {
        let record = gitsm_ssh::generate_key(&self.scanner.ssh_dir().join(name))?;
        tracing::info!(key = %record.path.display(), "Generated SSH key");
        Ok(record)
    }

    fn git(&self, repo: &Path) -> Git {
        Git::new(repo).with_timeout(self.git_timeout)
    }

    /// Working tree root and remote URL. Both missing cases are fatal.
    async fn resolve_repo(&self, path: &Path) -> Result<(PathBuf, String)> {
        let repo = self.git(path).toplevel().await?;
        let remote = self
            .git(&repo)
            .remote_url(&self.remote_name)
            .await?
            .ok_or_else(|| GitsmError::NoRemoteConfigured {
                repo: repo.clone(),
                remote: self.remote_name.clone(),
            })?;
        Ok((repo, remote))
    }

    async fn require_keys(&self) -> Result<Vec<SshKeyRecord>> {
        let keys = self.keys().await;
        if keys.is_empty() {
            return Err(GitsmError::NoKeysFound {
                dir: self.scanner.ssh_dir().to_path_buf(),
            });
        }
        Ok(keys)
    }

    /// Pick a key (explicit, or via the prompt) and optionally gate it on a probe.
    async fn select_key(
        &self,
        remote_url: &str,
        prompt: &dyn KeyPrompt,
        options: &BindOptions,
        context: &str,
        progress: &mut Progress,
    ) -> Result<(SshKeyRecord, Option<ProbeResult>)> {
        let key = match &options.key {
            Some(path) => {
                let mut record = inspect_key(path)?;
                record.fingerprint = gitsm_ssh::fingerprint_file(&record.public_key_path).await;
                record
            }
            None => {
                let keys = self.require_keys().await?;
                let index = prompt
                    .select_key(&keys, context)?
                    .ok_or_else(|| GitsmError::Aborted("no key selected".to_string()))?;
                keys.into_iter()
                    .nth(index)
                    .ok_or_else(|| GitsmError::Aborted(format!("invalid key selection {index}")))?
            }
        };

        if !options.test_key {
            return Ok((key, None));
        }

        progress.enter(BindingState::Testing);
        let result = self.probe.test(&key.path, remote_url).await;
        if result.success {
            tracing::info!(
                key = %key.path.display(),
                provider = ?result.provider,
                "SSH key authenticated"
            );
            return Ok((key, Some(result)));
        }

        let detail = result.error.clone().unwrap_or_default();
        progress.warn(format!(
            "SSH authentication with {} failed: {detail}",
            key.path.display()
        ));
        if !prompt.confirm_failed_probe(&key, &result)? {
            return Err(GitsmError::AuthProbeFailure {
                key: key.path.clone(),
                detail,
            });
        }
        Ok((key, Some(result)))
    }

    /// Bind a repository to a key: `Unbound -> Testing -> Bound`.
    pub async fn bind(
        &self,
        path: &Path,
        prompt: &dyn KeyPrompt,
        options: &BindOptions,
    ) -> Result<BindReport> {
        let (repo, remote) = self.resolve_repo(path).await?;
        let mut progress = Progress::default();
        progress.enter(BindingState::Unbound);

        let context = format!("Select an SSH key for {}", repo.display());
        let (key, probe) = self
            .select_key(&remote, prompt, options, &context, &mut progress)
            .await?;

        let binding = self.store.upsert(&repo, Some(&key.path), &remote)?;
        progress.enter(BindingState::Bound);
        tracing::info!(repo = %repo.display(), key = %key.path.display(), "Repository bound");

        Ok(BindReport {
            repo,
            binding,
            key: Some(key),
            probe,
            transitions: progress.transitions,
            warnings: progress.warnings,
        })
    }

    /// Repair a binding: `Bound|Stale -> Revalidating -> Bound`. Always rewrites
    /// both the store entry and the git config, so hand edits are corrected too.
    pub async fn repair(
        &self,
        path: &Path,
        prompt: &dyn KeyPrompt,
        options: &BindOptions,
    ) -> Result<BindReport> {
        let (repo, remote) = self.resolve_repo(path).await?;
        let mut progress = Progress::default();

        let existing = self.store.get(&repo)?;
        let reuse: Option<Option<PathBuf>> = match &existing {
            _ if options.key.is_some() => None,
            Some(binding) => match binding.key() {
                None => Some(None),
                Some(key) if key.is_file() => Some(Some(key.to_path_buf())),
                Some(key) => {
                    progress.warn(format!(
                        "Bound key {} no longer exists; select a new one",
                        key.display()
                    ));
                    None
                }
            },
            None => None,
        };

        progress.enter(if reuse.is_some() {
            BindingState::Bound
        } else {
            BindingState::Stale
        });
        progress.enter(BindingState::Revalidating);

        let (key_path, key, probe) = match reuse {
            Some(key_path) => (key_path, None, None),
            None => {
                let context = format!("Select an SSH key to repair {}", repo.display());
                let (key, probe) = self
                    .select_key(&remote, prompt, options, &context, &mut progress)
                    .await?;
                (Some(key.path.clone()), Some(key), probe)
            }
        };

        let binding = self.store.upsert(&repo, key_path.as_deref(), &remote)?;
        progress.enter(BindingState::Bound);

        if let Some(key_path) = &key_path {
            if let Some(warning) = self.reachability(key_path, &remote).await {
                progress.warn(warning);
            }
        }

        tracing::info!(repo = %repo.display(), key = ?key_path, "Binding repaired");
        Ok(BindReport {
            repo,
            binding,
            key,
            probe,
            transitions: progress.transitions,
            warnings: progress.warnings,
        })
    }

    /// Switch the remote between SSH and HTTPS and rebind accordingly.
    pub async fn convert(
        &self,
        path: &Path,
        to: Transport,
        prompt: &dyn KeyPrompt,
        options: &BindOptions,
    ) -> Result<BindReport> {
        let (repo, remote) = self.resolve_repo(path).await?;
        let mut progress = Progress::default();
        progress.enter(BindingState::Unbound);

        let converted = match to {
            Transport::Ssh => to_ssh_url(&remote),
            Transport::Https => to_https_url(&remote),
        }
        .ok_or_else(|| GitsmError::UnsupportedRemote(remote.clone()))?;

        let (key, probe) = match to {
            Transport::Ssh => {
                let context = format!("Select an SSH key for {converted}");
                let (key, probe) = self
                    .select_key(&converted, prompt, options, &context, &mut progress)
                    .await?;
                (Some(key), probe)
            }
            Transport::Https => (None, None),
        };

        if converted != remote {
            self.git(&repo)
                .set_remote_url(&self.remote_name, &converted)
                .await?;
            tracing::info!(from = %remote, to = %converted, "Converted remote URL");
        }

        let binding = self.store.upsert(
            &repo,
            key.as_ref().map(|k| k.path.as_path()),
            &converted,
        )?;
        progress.enter(BindingState::Bound);

        Ok(BindReport {
            repo,
            binding,
            key,
            probe,
            transitions: progress.transitions,
            warnings: progress.warnings,
        })
    }

    /// Drop the key from a repository: remove `core.sshCommand` and record an
    /// empty-key binding.
    pub async fn unbind(&self, path: &Path) -> Result<BindReport> {
        let (repo, remote) = self.resolve_repo(path).await?;
        let binding = self.store.upsert(&repo, None, &remote)?;
        tracing::info!(repo = %repo.display(), "Repository unbound");
        Ok(BindReport {
            repo,
            binding,
            key: None,
            probe: None,
            transitions: vec![BindingState::Unbound],
            warnings: Vec::new(),
        })
    }

    /// Clone and bind in one step. With no keys, or a non-SSH URL, the clone
    /// uses the default transport and records an empty-key binding.
    pub async fn clone_repo(
        &self,
        url: &str,
        dest: Option<&Path>,
        prompt: &dyn KeyPrompt,
        options: &BindOptions,
    ) -> Result<BindReport> {
        let dest = match dest {
            Some(dest) => dest.to_path_buf(),
            None => PathBuf::from(
                repo_dir_name(url).ok_or_else(|| GitsmError::UnsupportedRemote(url.to_string()))?,
            ),
        };
        let mut progress = Progress::default();
        progress.enter(BindingState::Unbound);

        let use_ssh = is_ssh_url(url)
            && (options.key.is_some() || !self.keys().await.is_empty());
        if is_ssh_url(url) && !use_ssh {
            progress.warn(format!(
                "No SSH keys found in {}; cloning with the default transport",
                self.scanner.ssh_dir().display()
            ));
        }

        let (key, probe) = if use_ssh {
            let context = format!("Select an SSH key to clone {url}");
            let (key, probe) = self
                .select_key(url, prompt, options, &context, &mut progress)
                .await?;
            (Some(key), probe)
        } else {
            (None, None)
        };

        let mut git = Git::global().with_timeout(self.git_timeout);
        if let Some(key) = &key {
            git = git.with_env("GIT_SSH_COMMAND", ssh_command_value(&key.path));
        }
        tracing::info!(url = %url, dest = %dest.display(), "Cloning");
        git.clone_repo(url, &dest, self.network_timeout).await?;

        let binding = self.store.upsert(
            &dest,
            key.as_ref().map(|k| k.path.as_path()),
            url,
        )?;
        progress.enter(BindingState::Bound);

        Ok(BindReport {
            repo: binding.repo_path.clone(),
            binding,
            key,
            probe,
            transitions: progress.transitions,
            warnings: progress.warnings,
        })
    }

    /// Probe a key against a repository's remote. Uses the bound key when none
    /// is given.
    pub async fn test(&self, path: &Path, key: Option<&Path>) -> Result<KeyTestReport> {
        let (repo, remote) = self.resolve_repo(path).await?;
        let key = match key {
            Some(key) => key.to_path_buf(),
            None => self
                .store
                .get(&repo)?
                .and_then(|b| b.key().map(Path::to_path_buf))
                .ok_or_else(|| {
                    GitsmError::Aborted(format!(
                        "{} has no bound SSH key; pass --key",
                        repo.display()
                    ))
                })?,
        };

        let result = self.probe.test(&key, &remote).await;
        Ok(KeyTestReport {
            key,
            remote_url: remote,
            result,
        })
    }

    /// `git ls-remote` with the key as a reachability check. Returns a warning
    /// on failure.
    async fn reachability(&self, key: &Path, remote_url: &str) -> Option<String> {
        let git = Git::global()
            .with_timeout(self.probe_timeout)
            .with_env("GIT_SSH_COMMAND", ssh_command_value(key));
        match git.ls_remote_heads(remote_url, self.probe_timeout).await {
            Ok(output) if output.success => {
                tracing::debug!(remote = %remote_url, "Remote reachable");
                None
            }
            Ok(output) => Some(format!(
                "Remote {remote_url} is not reachable with {}: {}",
                key.display(),
                output.combined()
            )),
            Err(e) => Some(format!("Remote {remote_url} is not reachable: {e}")),
        }
    }
}
