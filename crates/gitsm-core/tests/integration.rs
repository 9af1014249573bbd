// ABOUTME: Integration tests for gitsm-core against real git repositories.
// ABOUTME: Covers branch switching with stashes and the bind/repair orchestrator with stub probes.

use async_trait::async_trait;
use gitsm_core::{
    git_available, ssh_command_value, BindOptions, Binder, BindingState, BindingStore,
    BranchSwitcher, ConfigReconciler, GitsmError, KeyPrompt, SwitchOptions, SwitchState,
    Transport,
};
use gitsm_ssh::{KeyProbe, KeyScanner, ProbeResult, SshKeyRecord};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "core.hooksPath", "/dev/null"]);
    std::fs::write(dir.join("f"), "base\n").unwrap();
    git(dir, &["add", "f"]);
    git(dir, &["commit", "-q", "-m", "base"]);
}

fn read(dir: &Path, file: &str) -> String {
    std::fs::read_to_string(dir.join(file)).unwrap()
}

fn stash_commits(dir: &Path) -> Vec<String> {
    git(dir, &["stash", "list", "--format=%H"])
        .lines()
        .map(str::to_string)
        .collect()
}

fn no_pull() -> SwitchOptions {
    SwitchOptions {
        pull: false,
        ..SwitchOptions::default()
    }
}

// Branch switching

#[tokio::test]
async fn test_dirty_round_trip_restores_changes_and_leaves_no_stash() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    git(&repo, &["branch", "feature"]);

    std::fs::write(repo.join("f"), "mine\n").unwrap();
    std::fs::write(repo.join("notes.txt"), "untracked\n").unwrap();

    let switcher = BranchSwitcher::new(&repo);
    let there = switcher.switch("feature", &no_pull()).await.unwrap();
    assert_eq!(
        there.transitions,
        vec![
            SwitchState::Dirty,
            SwitchState::Stashed,
            SwitchState::Switched,
            SwitchState::Reapplying,
            SwitchState::Done,
        ]
    );
    assert_eq!(git(&repo, &["symbolic-ref", "--short", "HEAD"]), "feature");
    assert!(!there.stash_kept);

    let back = switcher.switch("main", &no_pull()).await.unwrap();
    assert_eq!(back.state(), Some(SwitchState::Done));
    assert_eq!(git(&repo, &["symbolic-ref", "--short", "HEAD"]), "main");
    assert_eq!(read(&repo, "f"), "mine\n");
    assert_eq!(read(&repo, "notes.txt"), "untracked\n");
    assert!(stash_commits(&repo).is_empty());
}

#[tokio::test]
async fn test_failed_pull_is_a_warning_and_changes_are_restored() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    git(&repo, &["branch", "feature"]);
    std::fs::write(repo.join("f"), "mine\n").unwrap();

    // `feature` has no upstream, so the default pull fails.
    let report = BranchSwitcher::new(&repo)
        .switch("feature", &SwitchOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![
            SwitchState::Dirty,
            SwitchState::Stashed,
            SwitchState::Switched,
            SwitchState::Reapplying,
            SwitchState::Done,
        ]
    );
    assert_eq!(report.warnings.len(), 1, "warnings: {:?}", report.warnings);
    assert!(report.warnings[0].starts_with("Pull failed"));
    assert_eq!(git(&repo, &["symbolic-ref", "--short", "HEAD"]), "feature");
    assert_eq!(read(&repo, "f"), "mine\n");
    assert!(stash_commits(&repo).is_empty());
}

#[tokio::test]
async fn test_conflicting_reapply_keeps_stash_for_recovery() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    git(&repo, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(repo.join("f"), "theirs\n").unwrap();
    git(&repo, &["commit", "-q", "-am", "theirs"]);
    git(&repo, &["checkout", "-q", "main"]);

    std::fs::write(repo.join("f"), "mine\n").unwrap();

    let report = BranchSwitcher::new(&repo)
        .switch("feature", &no_pull())
        .await
        .unwrap();

    assert!(report.is_conflicted());
    assert!(report.stash_kept);
    assert_eq!(report.conflicted_files, vec!["f".to_string()]);
    let stash = report.stash.clone().unwrap();
    assert_eq!(stash_commits(&repo), vec![stash.commit.clone()]);
    assert!(!report.recovery_steps().is_empty());

    git(&repo, &["reset", "--hard", "-q"]);
    git(&repo, &["checkout", "-q", "main"]);
    git(&repo, &["stash", "apply", &stash.commit]);
    assert_eq!(read(&repo, "f"), "mine\n");

    assert!(matches!(
        report.into_result(),
        Err(GitsmError::StashConflict { .. })
    ));
}

#[tokio::test]
async fn test_unknown_branch_is_fatal_and_touches_nothing() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    std::fs::write(repo.join("f"), "mine\n").unwrap();

    let err = BranchSwitcher::new(&repo)
        .switch("nope", &no_pull())
        .await
        .unwrap_err();

    assert!(matches!(err, GitsmError::UnknownBranch(ref b) if b == "nope"));
    assert_eq!(read(&repo, "f"), "mine\n");
    assert!(stash_commits(&repo).is_empty());
}

#[tokio::test]
async fn test_create_branch_carries_changes() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    std::fs::write(repo.join("f"), "mine\n").unwrap();

    let options = SwitchOptions {
        create: true,
        ..no_pull()
    };
    let report = BranchSwitcher::new(&repo)
        .switch("topic", &options)
        .await
        .unwrap();

    assert!(report.created);
    assert_eq!(report.state(), Some(SwitchState::Done));
    assert_eq!(git(&repo, &["symbolic-ref", "--short", "HEAD"]), "topic");
    assert_eq!(read(&repo, "f"), "mine\n");
    assert!(stash_commits(&repo).is_empty());
}

#[tokio::test]
async fn test_already_on_target_never_stashes() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    std::fs::write(repo.join("f"), "mine\n").unwrap();

    let report = BranchSwitcher::new(&repo)
        .switch("main", &no_pull())
        .await
        .unwrap();

    assert!(report.already_on_target);
    assert_eq!(report.transitions, vec![SwitchState::Dirty, SwitchState::Done]);
    assert!(report.stash.is_none());
    assert_eq!(read(&repo, "f"), "mine\n");
}

#[tokio::test]
async fn test_other_stashes_survive() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    git(&repo, &["branch", "feature"]);

    std::fs::write(repo.join("other.txt"), "older work\n").unwrap();
    git(&repo, &["stash", "push", "-q", "--include-untracked", "-m", "manual"]);
    let manual = stash_commits(&repo);

    std::fs::write(repo.join("f"), "mine\n").unwrap();
    BranchSwitcher::new(&repo)
        .switch("feature", &no_pull())
        .await
        .unwrap();

    assert_eq!(stash_commits(&repo), manual);
    assert_eq!(read(&repo, "f"), "mine\n");
}

#[tokio::test]
async fn test_forced_switch_reports_git_refusal() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    git(&repo, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(repo.join("f"), "theirs\n").unwrap();
    git(&repo, &["commit", "-q", "-am", "theirs"]);
    git(&repo, &["checkout", "-q", "main"]);
    std::fs::write(repo.join("f"), "mine\n").unwrap();

    let options = SwitchOptions {
        force: true,
        ..no_pull()
    };
    let err = BranchSwitcher::new(&repo)
        .switch("feature", &options)
        .await
        .unwrap_err();

    assert!(matches!(err, GitsmError::LocalChangesRefused { .. }));
    assert!(err.recovery_hint().is_some());
    assert_eq!(git(&repo, &["symbolic-ref", "--short", "HEAD"]), "main");
    assert_eq!(read(&repo, "f"), "mine\n");
    assert!(stash_commits(&repo).is_empty());
}

#[tokio::test]
async fn test_switch_outside_repository() {
    if !git_available().await {
        return;
    }
    let temp = TempDir::new().unwrap();
    let err = BranchSwitcher::new(temp.path())
        .switch("main", &no_pull())
        .await
        .unwrap_err();
    assert!(matches!(err, GitsmError::NotARepository(_)));
}

// Bind / repair orchestration

struct StubProbe {
    success: bool,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl StubProbe {
    fn new(success: bool) -> Arc<Self> {
        Arc::new(Self {
            success,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyProbe for StubProbe {
    async fn test(&self, key_path: &Path, remote_url: &str) -> ProbeResult {
        self.calls
            .lock()
            .unwrap()
            .push((key_path.to_path_buf(), remote_url.to_string()));
        if self.success {
            ProbeResult::succeeded("github")
        } else {
            ProbeResult::failed("Permission denied (publickey).")
        }
    }
}

struct StubPrompt {
    choice: Option<usize>,
    confirm: bool,
}

impl StubPrompt {
    fn pick(index: usize) -> Self {
        Self {
            choice: Some(index),
            confirm: false,
        }
    }
}

impl KeyPrompt for StubPrompt {
    fn select_key(&self, keys: &[SshKeyRecord], _context: &str) -> gitsm_core::Result<Option<usize>> {
        assert!(!keys.is_empty());
        Ok(self.choice)
    }

    fn confirm_failed_probe(
        &self,
        _key: &SshKeyRecord,
        _result: &ProbeResult,
    ) -> gitsm_core::Result<bool> {
        Ok(self.confirm)
    }
}

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    repo: PathBuf,
    remote: String,
}

impl Fixture {
    /// A repository whose origin is a local bare repository, so reachability
    /// checks never touch the network.
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let bare = root.join("remote.git");
        std::fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "-q", "--bare"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let repo = root.join("app");
        init_repo(&repo);
        let remote = bare.to_string_lossy().into_owned();
        git(&repo, &["remote", "add", "origin", &remote]);

        Self {
            _temp: temp,
            root,
            repo,
            remote,
        }
    }

    fn ssh_dir(&self) -> PathBuf {
        self.root.join("ssh")
    }

    fn binder(&self, probe: Arc<StubProbe>) -> Binder {
        Binder::new(
            KeyScanner::new(self.ssh_dir()),
            probe,
            BindingStore::new(self.root.join("repositories.json"), self.ssh_dir()),
        )
    }
}

#[tokio::test]
async fn test_bind_reconciles_config_and_store() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let probe = StubProbe::new(true);
    let binder = fx.binder(probe.clone());
    let key = binder.generate_key("id_work").unwrap();

    let report = binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![BindingState::Unbound, BindingState::Testing, BindingState::Bound]
    );
    assert_eq!(probe.calls(), vec![(key.path.clone(), fx.remote.clone())]);
    assert_eq!(report.binding.ssh_key_path, key.path);
    assert_eq!(report.binding.remote_url, fx.remote);

    assert_eq!(
        ConfigReconciler::new().ssh_command(&fx.repo).unwrap(),
        Some(ssh_command_value(&key.path))
    );
    let stored = binder.store().get(&fx.repo).unwrap().unwrap();
    assert_eq!(stored, report.binding);
}

#[tokio::test]
async fn test_bind_without_keys_asks_for_keygen() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(true));

    let err = binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GitsmError::NoKeysFound { .. }));
    assert!(err.recovery_hint().unwrap().contains("keygen"));
}

#[tokio::test]
async fn test_bind_fatal_preconditions() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(true));
    binder.generate_key("id_work").unwrap();

    let plain = fx.root.join("plain");
    std::fs::create_dir_all(&plain).unwrap();
    let err = binder
        .bind(&plain, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GitsmError::NotARepository(_)));

    let lonely = fx.root.join("lonely");
    init_repo(&lonely);
    let err = binder
        .bind(&lonely, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GitsmError::NoRemoteConfigured { .. }));
}

#[tokio::test]
async fn test_failed_probe_needs_confirmation() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(false));
    binder.generate_key("id_work").unwrap();

    let err = binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GitsmError::AuthProbeFailure { .. }));
    assert!(binder.store().get(&fx.repo).unwrap().is_none());
    assert_eq!(ConfigReconciler::new().ssh_command(&fx.repo).unwrap(), None);

    let confirm = StubPrompt {
        choice: Some(0),
        confirm: true,
    };
    let report = binder
        .bind(&fx.repo, &confirm, &BindOptions::default())
        .await
        .unwrap();
    assert!(!report.probe.unwrap().success);
    assert_eq!(report.warnings.len(), 1);
}

#[tokio::test]
async fn test_repair_restores_hand_edited_config() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(true));
    let key = binder.generate_key("id_work").unwrap();
    binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    git(&fx.repo, &["config", "core.sshCommand", "ssh -i /somewhere/else"]);

    // Reusing the bound key never consults the prompt.
    let never = StubPrompt {
        choice: None,
        confirm: false,
    };
    let report = binder
        .repair(&fx.repo, &never, &BindOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![BindingState::Bound, BindingState::Revalidating, BindingState::Bound]
    );
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(
        ConfigReconciler::new().ssh_command(&fx.repo).unwrap(),
        Some(ssh_command_value(&key.path))
    );
}

#[tokio::test]
async fn test_repair_with_missing_key_reselects() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(true));
    let old = binder.generate_key("id_old").unwrap();
    binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    std::fs::remove_file(&old.path).unwrap();
    std::fs::remove_file(&old.public_key_path).unwrap();
    let new = binder.generate_key("id_new").unwrap();

    let report = binder
        .repair(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![
            BindingState::Stale,
            BindingState::Revalidating,
            BindingState::Testing,
            BindingState::Bound,
        ]
    );
    assert_eq!(report.binding.ssh_key_path, new.path);
    assert!(report.warnings.iter().any(|w| w.contains("no longer exists")));
    assert_eq!(binder.bindings().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unbind_clears_directive() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let binder = fx.binder(StubProbe::new(true));
    binder.generate_key("id_work").unwrap();
    binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    let report = binder.unbind(&fx.repo).await.unwrap();
    assert!(!report.binding.uses_ssh());
    assert_eq!(ConfigReconciler::new().ssh_command(&fx.repo).unwrap(), None);
}

#[tokio::test]
async fn test_convert_between_transports() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    git(
        &fx.repo,
        &["remote", "set-url", "origin", "https://github.com/octo/app"],
    );
    let probe = StubProbe::new(true);
    let binder = fx.binder(probe.clone());
    let key = binder.generate_key("id_work").unwrap();

    let report = binder
        .convert(&fx.repo, Transport::Ssh, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();
    assert_eq!(
        git(&fx.repo, &["remote", "get-url", "origin"]),
        "git@github.com:octo/app.git"
    );
    assert_eq!(report.binding.ssh_key_path, key.path);
    assert_eq!(probe.calls()[0].1, "git@github.com:octo/app.git");

    let report = binder
        .convert(&fx.repo, Transport::Https, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();
    assert_eq!(
        git(&fx.repo, &["remote", "get-url", "origin"]),
        "https://github.com/octo/app.git"
    );
    assert!(!report.binding.uses_ssh());
    assert_eq!(ConfigReconciler::new().ssh_command(&fx.repo).unwrap(), None);
}

#[tokio::test]
async fn test_clone_local_remote_uses_default_transport() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    git(&fx.repo, &["push", "-q", "origin", "main"]);
    let binder = fx.binder(StubProbe::new(true));

    let dest = fx.root.join("copy");
    let report = binder
        .clone_repo(&fx.remote, Some(&dest), &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    assert!(dest.join(".git").is_dir());
    assert_eq!(read(&dest, "f"), "base\n");
    assert!(!report.binding.uses_ssh());
    assert_eq!(report.binding.remote_url, fx.remote);
    assert!(binder.store().get(&dest).unwrap().is_some());
}

#[tokio::test]
async fn test_key_test_uses_bound_key() {
    if !git_available().await {
        return;
    }
    let fx = Fixture::new();
    let probe = StubProbe::new(true);
    let binder = fx.binder(probe.clone());

    let err = binder.test(&fx.repo, None).await.unwrap_err();
    assert!(matches!(err, GitsmError::Aborted(_)));

    let key = binder.generate_key("id_work").unwrap();
    binder
        .bind(&fx.repo, &StubPrompt::pick(0), &BindOptions::default())
        .await
        .unwrap();

    let report = binder.test(&fx.repo, None).await.unwrap();
    assert_eq!(report.key, key.path);
    assert!(report.result.success);
}
