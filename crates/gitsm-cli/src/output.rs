// ABOUTME: Plain-text rendering of orchestrator and switch reports.
// ABOUTME: Keeps presentation out of gitsm-core; main only prints these strings.

use gitsm_core::{BindReport, RepositoryBinding, SwitchReport};
use gitsm_ssh::SshKeyRecord;
use std::fmt::Write;

pub fn format_bind_report(action: &str, report: &BindReport) -> String {
    let mut out = String::new();
    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    match &report.key {
        Some(key) => {
            let _ = writeln!(out, "{action} {} to {}", report.repo.display(), key.label());
        }
        None => match report.binding.key() {
            Some(path) => {
                let _ = writeln!(out, "{action} {} to {}", report.repo.display(), path.display());
            }
            None => {
                let _ = writeln!(
                    out,
                    "{action} {} with the default transport",
                    report.repo.display()
                );
            }
        },
    }
    if let Some(provider) = report.probe.as_ref().and_then(|p| p.provider.as_deref()) {
        let _ = writeln!(out, "  authenticated with {provider}");
    }
    let _ = writeln!(out, "  remote: {}", report.binding.remote_url);
    out
}

pub fn format_switch_report(report: &SwitchReport) -> String {
    let mut out = String::new();
    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }

    if report.already_on_target {
        let _ = writeln!(out, "Already on '{}'", report.to);
        return out;
    }

    if report.is_conflicted() {
        let _ = writeln!(
            out,
            "Switched from '{}' to '{}', but your changes conflict:",
            report.from, report.to
        );
        for step in report.recovery_steps() {
            let _ = writeln!(out, "  - {step}");
        }
        return out;
    }

    let verb = if report.created {
        "Created and switched"
    } else {
        "Switched"
    };
    let _ = writeln!(out, "{verb} from '{}' to '{}'", report.from, report.to);
    if report.stash.is_some() {
        let _ = writeln!(out, "  local changes restored");
    }
    out
}

pub fn format_bindings(bindings: &[RepositoryBinding]) -> String {
    if bindings.is_empty() {
        return "No repositories bound yet. Run `gitsm bind` inside one.\n".to_string();
    }
    let mut out = String::new();
    for binding in bindings {
        let key = match binding.key() {
            Some(key) if key.is_file() => key.display().to_string(),
            Some(key) => format!("{} (missing, run `gitsm fix`)", key.display()),
            None => "(default transport)".to_string(),
        };
        let _ = writeln!(out, "{}", binding.repo_path.display());
        let _ = writeln!(out, "  key:    {key}");
        let _ = writeln!(out, "  remote: {}", binding.remote_url);
        let _ = writeln!(
            out,
            "  bound:  {}",
            binding
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    out
}

pub fn format_keys(keys: &[SshKeyRecord]) -> String {
    let mut out = String::new();
    for key in keys {
        let _ = writeln!(out, "{}", key.label());
        let _ = writeln!(out, "  {}", key.path.display());
    }
    out
}
