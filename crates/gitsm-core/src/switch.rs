// ABOUTME: Stash-guarded branch switching.
// ABOUTME: Shelves local changes, switches, reapplies with `apply`, and keeps the stash on conflict.

use crate::error::{GitsmError, Result};
use crate::git::{Git, GitOutput};
use crate::settings::Settings;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every stash message this engine creates.
pub const STASH_PREFIX: &str = "gitsm: auto-stash";

/// Git output meaning it refused to touch local changes.
const LOCAL_CHANGE_REFUSALS: &[&str] = &[
    "would be overwritten by checkout",
    "please commit your changes or stash them",
    "untracked working tree files would be",
    "resolve your current index first",
];

fn is_local_change_refusal(output: &str) -> bool {
    let lower = output.to_lowercase();
    LOCAL_CHANGE_REFUSALS.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Clean,
    Dirty,
    Stashed,
    Switched,
    Reapplying,
    Conflicted,
    Done,
}

#[derive(Debug, Clone)]
pub struct SwitchOptions {
    /// Create the branch when it does not exist.
    pub create: bool,
    /// Carry local changes across the checkout instead of stashing them.
    pub force: bool,
    /// Pull after switching. Failures are warnings.
    pub pull: bool,
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self {
            create: false,
            force: false,
            pull: true,
        }
    }
}

/// A stash created by the engine, identified by commit id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashRecord {
    pub commit: String,
    /// Position when it was created (`stash@{n}`); shifts as other stashes come and go.
    pub reference: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SwitchReport {
    pub from: String,
    pub to: String,
    pub transitions: Vec<SwitchState>,
    pub stash: Option<StashRecord>,
    /// The stash is still in the stash list.
    pub stash_kept: bool,
    pub conflicted_files: Vec<String>,
    pub warnings: Vec<String>,
    pub created: bool,
    pub already_on_target: bool,
}

impl SwitchReport {
    fn new(from: String, to: &str) -> Self {
        Self {
            from,
            to: to.to_string(),
            transitions: Vec::new(),
            stash: None,
            stash_kept: false,
            conflicted_files: Vec::new(),
            warnings: Vec::new(),
            created: false,
            already_on_target: false,
        }
    }

    fn enter(&mut self, state: SwitchState) {
        tracing::debug!(state = ?state, from = %self.from, to = %self.to, "Switch state");
        self.transitions.push(state);
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn state(&self) -> Option<SwitchState> {
        self.transitions.last().copied()
    }

    pub fn is_conflicted(&self) -> bool {
        self.state() == Some(SwitchState::Conflicted)
    }

    /// Manual steps after a conflicted reapply. Empty otherwise.
    pub fn recovery_steps(&self) -> Vec<String> {
        let Some(stash) = self.stash.as_ref().filter(|_| self.is_conflicted()) else {
            return Vec::new();
        };
        let mut steps = Vec::new();
        if !self.conflicted_files.is_empty() {
            steps.push(format!(
                "Resolve the conflicts in: {}",
                self.conflicted_files.join(", ")
            ));
        }
        steps.push("Stage the resolved files with `git add`.".to_string());
        steps.push(format!(
            "Your changes remain saved in stash {}. When done, find it in `git stash list` and `git stash drop` it.",
            stash.commit
        ));
        steps.push(format!(
            "To start over: `git reset --hard`, `git checkout {}`, then `git stash apply {}`.",
            self.from, stash.commit
        ));
        steps
    }

    /// A conflicted switch becomes [`GitsmError::StashConflict`].
    pub fn into_result(self) -> Result<Self> {
        match &self.stash {
            Some(stash) if self.is_conflicted() => Err(GitsmError::StashConflict {
                stash: stash.commit.clone(),
                branch: self.to.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// Moves one working tree between branches without losing uncommitted work.
#[derive(Debug, Clone)]
pub struct BranchSwitcher {
    git: Git,
    remote_name: String,
    pull_timeout: Duration,
}

impl BranchSwitcher {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        let defaults = Settings::default();
        Self {
            git: Git::new(repo).with_timeout(defaults.git_timeout()),
            remote_name: defaults.remote_name.clone(),
            pull_timeout: defaults.network_timeout(),
        }
    }

    pub fn from_settings(repo: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            git: Git::new(repo).with_timeout(settings.git_timeout()),
            remote_name: settings.remote_name.clone(),
            pull_timeout: settings.network_timeout(),
        }
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub async fn switch(&self, target: &str, options: &SwitchOptions) -> Result<SwitchReport> {
        self.git.toplevel().await?;

        let from = self.git.current_branch().await?;
        let dirty = self.git.is_dirty().await?;
        let mut report = SwitchReport::new(from.clone(), target);
        report.enter(if dirty {
            SwitchState::Dirty
        } else {
            SwitchState::Clean
        });

        if from == target {
            report.already_on_target = true;
            if options.pull {
                self.pull(&mut report).await;
            }
            report.enter(SwitchState::Done);
            return Ok(report);
        }

        let local = self.git.local_branch_exists(target).await?;
        let exists = local || self.git.remote_branch_exists(&self.remote_name, target).await?;
        if !exists && !options.create {
            return Err(GitsmError::UnknownBranch(target.to_string()));
        }
        let create = !exists;

        if dirty && options.force {
            report.warn(format!("Carrying uncommitted changes from '{from}' to '{target}'"));
        } else if dirty {
            if let Some(stash) = self.stash(&from, target).await? {
                report.stash = Some(stash);
                report.stash_kept = true;
                report.enter(SwitchState::Stashed);
            }
        }

        let output = self.git.checkout(target, create).await?;
        if !output.success {
            return Err(self.checkout_failure(target, output, &mut report).await);
        }
        report.created = create;
        report.enter(SwitchState::Switched);
        tracing::info!(from = %from, to = %target, created = create, "Switched branch");

        if options.pull && !create {
            self.pull(&mut report).await;
        }

        if report.stash.is_some() {
            self.reapply(&mut report).await?;
            if report.is_conflicted() {
                return Ok(report);
            }
        }

        report.enter(SwitchState::Done);
        Ok(report)
    }

    /// Stash everything with a unique message and look the entry up by that
    /// message to learn its commit id.
    async fn stash(&self, from: &str, target: &str) -> Result<Option<StashRecord>> {
        let message = format!(
            "{STASH_PREFIX} {from} -> {target} at {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.9fZ")
        );
        if !self.git.stash_push(&message).await? {
            tracing::debug!("Nothing to stash");
            return Ok(None);
        }

        let entry = self
            .git
            .stash_list()
            .await?
            .into_iter()
            .find(|e| e.message.ends_with(&message))
            .ok_or_else(|| GitsmError::GitCommand {
                args: "stash list".to_string(),
                stderr: format!("stash '{message}' was not recorded"),
            })?;

        tracing::info!(stash = %entry.commit, reference = %entry.reference, "Stashed local changes");
        Ok(Some(StashRecord {
            commit: entry.commit,
            reference: entry.reference,
            message,
        }))
    }

    /// Classify a failed checkout. HEAD has not moved, so a stash taken for it
    /// is put back on the original branch.
    async fn checkout_failure(
        &self,
        target: &str,
        output: GitOutput,
        report: &mut SwitchReport,
    ) -> GitsmError {
        let detail = output.combined();
        let stash = match report.stash.clone() {
            Some(stash) => match self.restore_in_place(&stash).await {
                Ok(true) => None,
                _ => Some(stash.commit),
            },
            None => None,
        };

        if is_local_change_refusal(&detail) && stash.is_none() {
            tracing::warn!(branch = %target, "git refused checkout because of local changes");
            return GitsmError::LocalChangesRefused { detail };
        }
        GitsmError::CheckoutFailed {
            branch: target.to_string(),
            detail,
            stash,
        }
    }

    /// Reapply and drop a stash on the current branch. Returns false, leaving
    /// the stash in place, if anything went wrong.
    async fn restore_in_place(&self, stash: &StashRecord) -> Result<bool> {
        let applied = self.git.stash_apply(&stash.commit).await?;
        if !applied.success || !self.git.unmerged_paths().await?.is_empty() {
            return Ok(false);
        }
        self.drop_stash(stash).await
    }

    async fn pull(&self, report: &mut SwitchReport) {
        match self.git.pull(self.pull_timeout).await {
            Ok(_) => tracing::debug!(branch = %report.to, "Pulled"),
            Err(e) => report.warn(format!("Pull failed: {e}")),
        }
    }

    async fn reapply(&self, report: &mut SwitchReport) -> Result<()> {
        let Some(stash) = report.stash.clone() else {
            return Ok(());
        };
        report.enter(SwitchState::Reapplying);

        let applied = self.git.stash_apply(&stash.commit).await?;
        let unmerged = self.git.unmerged_paths().await?;

        if !unmerged.is_empty() || !applied.success {
            if unmerged.is_empty() {
                report.warn(format!("Reapplying stash failed: {}", applied.combined()));
            }
            report.conflicted_files = unmerged;
            report.enter(SwitchState::Conflicted);
            tracing::warn!(
                stash = %stash.commit,
                files = report.conflicted_files.len(),
                "Stash reapply left conflicts; stash kept"
            );
            return Ok(());
        }

        if !self.drop_stash(&stash).await? {
            report.warn(format!(
                "Stash {} was no longer in the stash list",
                stash.commit
            ));
        }
        report.stash_kept = false;
        Ok(())
    }

    /// Drop the entry whose commit id matches, wherever it now sits.
    async fn drop_stash(&self, stash: &StashRecord) -> Result<bool> {
        let entry = self
            .git
            .stash_list()
            .await?
            .into_iter()
            .find(|e| e.commit == stash.commit);
        match entry {
            Some(entry) => {
                self.git.stash_drop(&entry.reference).await?;
                tracing::debug!(stash = %stash.commit, reference = %entry.reference, "Dropped stash");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
