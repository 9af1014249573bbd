// ABOUTME: Thin async wrapper over the git binary.
// ABOUTME: Every call is bounded by a timeout and runs with a fixed locale and no prompts.

use crate::error::{GitsmError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default bound on local git commands.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}

/// One line of `git stash list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    /// Positional reference such as `stash@{2}`
    pub reference: String,
    /// Commit id of the stash
    pub commit: String,
    pub message: String,
}

/// Runs git in one working directory (or none, for clone).
#[derive(Debug, Clone)]
pub struct Git {
    workdir: Option<PathBuf>,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl Git {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(repo.into()),
            timeout: DEFAULT_GIT_TIMEOUT,
            env: Vec::new(),
        }
    }

    /// Git not bound to a working directory.
    pub fn global() -> Self {
        Self {
            workdir: None,
            timeout: DEFAULT_GIT_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run git and capture its output whatever the exit status.
    pub async fn output(&self, args: &[&str]) -> Result<GitOutput> {
        self.output_within(args, self.timeout).await
    }

    async fn output_within(&self, args: &[&str], timeout: Duration) -> Result<GitOutput> {
        let joined = args.join(" ");
        tracing::debug!(
            args = %joined,
            dir = ?self.workdir,
            "Running git"
        );

        let output = match tokio::time::timeout(timeout, self.command(args).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(GitsmError::GitUnavailable(e)),
            Err(_) => {
                tracing::warn!(args = %joined, timeout_secs = timeout.as_secs(), "git timed out");
                return Err(GitsmError::Timeout {
                    command: format!("git {joined}"),
                    secs: timeout.as_secs(),
                });
            }
        };

        let result = GitOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(args = %joined, status = ?result.status, "git finished");
        Ok(result)
    }

    /// Run git and require a zero exit status.
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        let output = self.output(args).await?;
        ensure_success(args, output)
    }

    /// Like [`Git::run`] but returns trimmed stdout.
    pub async fn read(&self, args: &[&str]) -> Result<String> {
        Ok(self.run(args).await?.stdout.trim().to_string())
    }

    /// Absolute top-level directory of the working tree.
    pub async fn toplevel(&self) -> Result<PathBuf> {
        let dir = self.workdir.clone().unwrap_or_else(|| PathBuf::from("."));
        if !dir.is_dir() {
            return Err(GitsmError::NotARepository(dir));
        }
        let output = self.output(&["rev-parse", "--show-toplevel"]).await?;
        if !output.success {
            return Err(GitsmError::NotARepository(dir));
        }
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// URL of a remote, or `None` when no such remote exists.
    pub async fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        let output = self.output(&["remote", "get-url", remote]).await?;
        let url = output.stdout.trim();
        if !output.success || url.is_empty() {
            return Ok(None);
        }
        Ok(Some(url.to_string()))
    }

    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<()> {
        self.run(&["remote", "set-url", remote, url]).await?;
        Ok(())
    }

    /// Current branch name, or the short commit id on a detached HEAD.
    pub async fn current_branch(&self) -> Result<String> {
        let output = self.output(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        if output.success {
            return Ok(output.stdout.trim().to_string());
        }
        self.read(&["rev-parse", "--short", "HEAD"]).await
    }

    pub async fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        Ok(self
            .output(&["show-ref", "--verify", "--quiet", &refname])
            .await?
            .success)
    }

    pub async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let refname = format!("refs/remotes/{remote}/{branch}");
        Ok(self
            .output(&["show-ref", "--verify", "--quiet", &refname])
            .await?
            .success)
    }

    /// Any staged, unstaged or untracked change.
    pub async fn is_dirty(&self) -> Result<bool> {
        Ok(!self.read(&["status", "--porcelain"]).await?.is_empty())
    }

    /// Paths with unresolved merge conflicts.
    pub async fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self
            .read(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Checkout (or create) a branch. The raw output is returned so the caller
    /// can classify refusals.
    pub async fn checkout(&self, branch: &str, create: bool) -> Result<GitOutput> {
        if create {
            self.output(&["checkout", "-b", branch]).await
        } else {
            self.output(&["checkout", branch]).await
        }
    }

    pub async fn pull(&self, timeout: Duration) -> Result<GitOutput> {
        let output = self.output_within(&["pull"], timeout).await?;
        ensure_success(&["pull"], output)
    }

    /// Stash everything including untracked files. Returns false when git had
    /// nothing to save.
    pub async fn stash_push(&self, message: &str) -> Result<bool> {
        let output = self
            .run(&["stash", "push", "--include-untracked", "-m", message])
            .await?;
        Ok(!output.combined().contains("No local changes to save"))
    }

    pub async fn stash_list(&self) -> Result<Vec<StashEntry>> {
        let out = self
            .read(&["stash", "list", "--format=%gd%x09%H%x09%gs"])
            .await?;
        Ok(out.lines().filter_map(parse_stash_line).collect())
    }

    /// Apply a stash without removing it.
    pub async fn stash_apply(&self, stash: &str) -> Result<GitOutput> {
        self.output(&["stash", "apply", stash]).await
    }

    pub async fn stash_drop(&self, reference: &str) -> Result<()> {
        self.run(&["stash", "drop", reference]).await?;
        Ok(())
    }

    /// `git ls-remote --heads <url>`, used as a reachability check.
    pub async fn ls_remote_heads(&self, url: &str, timeout: Duration) -> Result<GitOutput> {
        self.output_within(&["ls-remote", "--heads", url], timeout)
            .await
    }

    pub async fn clone_repo(&self, url: &str, dest: &Path, timeout: Duration) -> Result<()> {
        let dest = dest.to_string_lossy();
        let args = ["clone", url, dest.as_ref()];
        let output = self.output_within(&args, timeout).await?;
        ensure_success(&args, output)?;
        Ok(())
    }
}

fn ensure_success(args: &[&str], output: GitOutput) -> Result<GitOutput> {
    if output.success {
        return Ok(output);
    }
    let stderr = match output.stderr.trim() {
        "" => output.stdout.trim().to_string(),
        s => s.to_string(),
    };
    Err(GitsmError::GitCommand {
        args: args.join(" "),
        stderr,
    })
}

fn parse_stash_line(line: &str) -> Option<StashEntry> {
    let mut parts = line.splitn(3, '\t');
    let reference = parts.next()?.trim();
    let commit = parts.next()?.trim();
    let message = parts.next().unwrap_or_default().trim();
    if reference.is_empty() || commit.is_empty() {
        return None;
    }
    Some(StashEntry {
        reference: reference.to_string(),
        commit: commit.to_string(),
        message: message.to_string(),
    })
}

/// Whether the git binary can be spawned at all.
pub async fn git_available() -> bool {
    Git::global().output(&["--version"]).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stash_line() {
        let entry =
            parse_stash_line("stash@{1}\t0123abcd\tOn main: gitsm: auto-stash main -> dev").unwrap();
        assert_eq!(entry.reference, "stash@{1}");
        assert_eq!(entry.commit, "0123abcd");
        assert_eq!(entry.message, "On main: gitsm: auto-stash main -> dev");
    }

    #[test]
    fn test_parse_stash_line_rejects_garbage() {
        assert!(parse_stash_line("").is_none());
        assert!(parse_stash_line("stash@{0}").is_none());
    }

    #[test]
    fn test_combined_output() {
        let output = GitOutput {
            status: Some(1),
            success: false,
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn test_ensure_success_prefers_stderr() {
        let output = GitOutput {
            status: Some(128),
            success: false,
            stdout: String::new(),
            stderr: "fatal: not a git repository\n".to_string(),
        };
        match ensure_success(&["status"], output) {
            Err(GitsmError::GitCommand { args, stderr }) => {
                assert_eq!(args, "status");
                assert_eq!(stderr, "fatal: not a git repository");
            }
            other => panic!("expected GitCommand, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_toplevel_outside_repository() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = Git::new(dir.path()).toplevel().await.unwrap_err();
        assert!(matches!(err, GitsmError::NotARepository(_)));
    }
}
