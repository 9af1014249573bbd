// ABOUTME: User settings for gitsm, loaded from an optional TOML file.
// ABOUTME: Locates the binding store, SSH directory, timeouts and extra probe patterns.

use crate::error::{GitsmError, Result};
use gitsm_ssh::{ProbePattern, SshKeyTester};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Binding store location (defaults to `<config dir>/repositories.json`)
    pub store_path: Option<PathBuf>,

    /// Overrides the SSH directory recorded in the binding store. `~` is expanded.
    pub ssh_dir: Option<String>,

    /// Remote whose URL is bound and probed
    pub remote_name: String,

    /// Bound on one SSH authentication or reachability probe
    pub probe_timeout_secs: u64,

    /// Bound on local git commands
    pub git_timeout_secs: u64,

    /// Bound on clone and pull
    pub network_timeout_secs: u64,

    /// Greetings tried after the built-in ones
    pub probe_patterns: Vec<ProbePattern>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: None,
            ssh_dir: None,
            remote_name: "origin".to_string(),
            probe_timeout_secs: 15,
            git_timeout_secs: 60,
            network_timeout_secs: 300,
            probe_patterns: Vec::new(),
        }
    }
}

impl Settings {
    /// The gitsm config directory (`$XDG_CONFIG_HOME/gitsm`, else `~/.config/gitsm`).
    pub fn config_dir() -> Result<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|p| p.join("gitsm"))
            .ok_or(GitsmError::NoHomeDirectory)
    }

    /// Get the default settings file path (`<config dir>/config.toml`)
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(GitsmError::SettingsRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&content).map_err(|e| GitsmError::SettingsParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Resolved binding store path
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(expand(&path.to_string_lossy())),
            None => Ok(Self::config_dir()?.join("repositories.json")),
        }
    }

    /// Expanded SSH directory override, if configured
    pub fn ssh_dir_override(&self) -> Option<PathBuf> {
        self.ssh_dir.as_deref().map(expand)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Key tester with the configured timeout and extra patterns
    pub fn key_tester(&self) -> SshKeyTester {
        SshKeyTester::new(self.probe_timeout()).with_extra_patterns(self.probe_patterns.clone())
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
