// ABOUTME: Authentication probe for a candidate key against a Git hosting provider.
// ABOUTME: Classifies ssh output by provider greeting text, not by exit status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Host used when a remote URL cannot be parsed.
pub const DEFAULT_HOST: &str = "github.com";
/// User used when a remote URL does not name one.
pub const DEFAULT_USER: &str = "git";
/// Default bound on one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// A greeting that proves the provider accepted the key.
///
/// Hosting providers authenticate the key and then refuse the shell, so `ssh`
/// exits non-zero on success. The greeting is the only reliable signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePattern {
    pub provider: String,
    /// Matched case-insensitively against combined stdout and stderr.
    pub pattern: String,
}

impl ProbePattern {
    pub fn new(provider: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            pattern: pattern.into(),
        }
    }
}

/// Built-in greetings, in match order.
pub fn default_patterns() -> Vec<ProbePattern> {
    [
        ("gitea", "successfully authenticated with the key named"),
        ("github", "successfully authenticated"),
        ("gitlab", "welcome to gitlab"),
        ("bitbucket", "authenticated via ssh key"),
        ("bitbucket", "logged in as"),
        ("azure-devops", "shell access is not supported"),
        ("generic", "you can use git to connect"),
    ]
    .into_iter()
    .map(|(provider, pattern)| ProbePattern::new(provider, pattern))
    .collect()
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    /// Provider whose greeting matched.
    pub provider: Option<String>,
    /// Raw output or failure reason when unsuccessful.
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn succeeded(provider: impl Into<String>) -> Self {
        Self {
            success: true,
            provider: Some(provider.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider: None,
            error: Some(error.into()),
        }
    }
}

/// Match probe output against patterns in order. The exit status is deliberately
/// not an input.
pub fn classify_output(output: &str, patterns: &[ProbePattern]) -> ProbeResult {
    let haystack = output.to_lowercase();
    match patterns
        .iter()
        .find(|p| !p.pattern.is_empty() && haystack.contains(&p.pattern.to_lowercase()))
    {
        Some(p) => ProbeResult::succeeded(p.provider.clone()),
        None => {
            let trimmed = output.trim();
            if trimmed.is_empty() {
                ProbeResult::failed("no response from SSH server")
            } else {
                ProbeResult::failed(trimmed)
            }
        }
    }
}

/// SSH endpoint derived from a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
}

impl RemoteHost {
    /// `user@host`, as passed to ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl Default for RemoteHost {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: None,
        }
    }
}

/// Extract the SSH endpoint from `user@host:path` or URL syntax. Never fails;
/// unparseable input yields [`RemoteHost::default`].
pub fn parse_remote_host(remote_url: &str) -> RemoteHost {
    let remote_url = remote_url.trim();

    if remote_url.contains("://") {
        let Ok(url) = url::Url::parse(remote_url) else {
            return RemoteHost::default();
        };
        let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
            return RemoteHost::default();
        };
        let user = if url.username().is_empty() {
            DEFAULT_USER.to_string()
        } else {
            url.username().to_string()
        };
        // An https port says nothing about where sshd listens.
        let port = match url.scheme() {
            "ssh" | "git+ssh" | "ssh+git" => url.port(),
            _ => None,
        };
        return RemoteHost {
            user,
            host: host.to_string(),
            port,
        };
    }

    let Some((authority, _path)) = remote_url.split_once(':') else {
        return RemoteHost::default();
    };
    let (user, host) = match authority.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (user, host),
        Some((_, host)) => (DEFAULT_USER, host),
        None => (DEFAULT_USER, authority),
    };
    if host.is_empty() || host.contains('/') || host.contains('\\') {
        return RemoteHost::default();
    }

    RemoteHost {
        user: user.to_string(),
        host: host.to_string(),
        port: None,
    }
}

/// Something that can test a key against a remote.
#[async_trait]
pub trait KeyProbe: Send + Sync {
    /// Never fails; problems are reported through [`ProbeResult::error`].
    async fn test(&self, key_path: &Path, remote_url: &str) -> ProbeResult;
}

/// Probes with the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshKeyTester {
    ssh_binary: String,
    timeout: Duration,
    patterns: Vec<ProbePattern>,
}

impl Default for SshKeyTester {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            patterns: default_patterns(),
        }
    }
}

impl SshKeyTester {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Append patterns after the built-in ones.
    pub fn with_extra_patterns(mut self, extra: impl IntoIterator<Item = ProbePattern>) -> Self {
        self.patterns.extend(extra);
        self
    }

    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    pub fn patterns(&self) -> &[ProbePattern] {
        &self.patterns
    }

    fn command(&self, key_path: &Path, remote: &RemoteHost) -> Command {
        let connect_timeout = self.timeout.as_secs().clamp(1, 15);
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-i")
            .arg(key_path)
            .arg("-T")
            .args(["-F", "/dev/null"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "IdentitiesOnly=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", &format!("ConnectTimeout={connect_timeout}")]);
        if let Some(port) = remote.port {
            cmd.args(["-p", &port.to_string()]);
        }
        cmd.arg(remote.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl KeyProbe for SshKeyTester {
    async fn test(&self, key_path: &Path, remote_url: &str) -> ProbeResult {
        let remote = parse_remote_host(remote_url);
        tracing::debug!(
            key = %key_path.display(),
            destination = %remote.destination(),
            "Probing SSH authentication"
        );

        let output = match tokio::time::timeout(
            self.timeout,
            self.command(key_path, &remote).output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ProbeResult::failed(format!("failed to run {}: {e}", self.ssh_binary))
            }
            Err(_) => {
                tracing::warn!(
                    destination = %remote.destination(),
                    timeout_secs = self.timeout.as_secs(),
                    "SSH probe timed out"
                );
                return ProbeResult::failed(format!(
                    "timed out after {} seconds connecting to {}",
                    self.timeout.as_secs(),
                    remote.host
                ));
            }
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let result = classify_output(&combined, &self.patterns);
        tracing::debug!(
            exit_code = ?output.status.code(),
            success = result.success,
            provider = ?result.provider,
            "SSH probe finished"
        );
        result
    }
}
