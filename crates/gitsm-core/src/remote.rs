// ABOUTME: Remote URL helpers: transport detection and https <-> ssh conversion.
// ABOUTME: Pure string functions used by clone and convert.

use std::fmt;

/// How a remote is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ssh,
    Https,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ssh => write!(f, "ssh"),
            Transport::Https => write!(f, "https"),
        }
    }
}

/// `ssh://`, `git+ssh://` or scp-like `user@host:path`.
pub fn is_ssh_url(url: &str) -> bool {
    let url = url.trim();
    if let Some((scheme, _)) = url.split_once("://") {
        return matches!(scheme, "ssh" | "git+ssh" | "ssh+git");
    }
    match url.split_once(':') {
        Some((authority, _)) => !authority.is_empty() && !authority.contains('/'),
        None => false,
    }
}

pub fn transport(url: &str) -> Transport {
    if is_ssh_url(url) {
        Transport::Ssh
    } else {
        Transport::Https
    }
}

/// `https://host/owner/repo` becomes `git@host:owner/repo.git`. SSH URLs are
/// returned unchanged; anything else yields `None`.
pub fn to_ssh_url(url: &str) -> Option<String> {
    let url = url.trim();
    if is_ssh_url(url) {
        return Some(url.to_string());
    }
    let parsed = url::Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let path = repo_path(parsed.path())?;
    Some(format!("git@{host}:{path}.git"))
}

/// `git@host:owner/repo.git` or `ssh://git@host/owner/repo.git` becomes
/// `https://host/owner/repo.git`. HTTPS URLs are returned unchanged.
pub fn to_https_url(url: &str) -> Option<String> {
    let url = url.trim();
    if !is_ssh_url(url) {
        let parsed = url::Url::parse(url).ok()?;
        return matches!(parsed.scheme(), "http" | "https").then(|| url.to_string());
    }

    let (host, path) = if url.contains("://") {
        let parsed = url::Url::parse(url).ok()?;
        (parsed.host_str()?.to_string(), parsed.path().to_string())
    } else {
        let (authority, path) = url.split_once(':')?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        (host.to_string(), path.to_string())
    };
    if host.is_empty() {
        return None;
    }
    let path = repo_path(&path)?;
    Some(format!("https://{host}/{path}.git"))
}

/// `owner/repo` without leading slash or `.git` suffix.
fn repo_path(path: &str) -> Option<String> {
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Directory name `git clone` would pick for a URL.
pub fn repo_dir_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
