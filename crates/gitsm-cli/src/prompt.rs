// ABOUTME: Terminal implementation of the orchestrator's KeyPrompt.
// ABOUTME: Uses dialoguer for key selection and failed-probe confirmation.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};
use gitsm_core::{GitsmError, KeyPrompt, Result};
use gitsm_ssh::{ProbeResult, SshKeyRecord};

pub struct CliPrompt {
    /// Bind keys whose probe failed without asking.
    assume_yes: bool,
}

impl CliPrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

fn prompt_error(e: dialoguer::Error) -> GitsmError {
    GitsmError::Aborted(format!("prompt failed: {e}"))
}

impl KeyPrompt for CliPrompt {
    fn select_key(&self, keys: &[SshKeyRecord], context: &str) -> Result<Option<usize>> {
        let items: Vec<String> = keys.iter().map(SshKeyRecord::label).collect();
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(context)
            .items(&items)
            .default(0)
            .interact_opt()
            .map_err(prompt_error)
    }

    fn confirm_failed_probe(&self, key: &SshKeyRecord, result: &ProbeResult) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        eprintln!(
            "SSH authentication with {} failed:\n  {}",
            key.path.display(),
            result.error.as_deref().unwrap_or("no response")
        );
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Bind this key anyway?")
            .default(false)
            .interact()
            .map_err(prompt_error)
    }
}
