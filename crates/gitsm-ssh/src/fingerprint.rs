// ABOUTME: Best-effort SSH public key fingerprinting.
// ABOUTME: Asks ssh-keygen first, parses the key in-process second, "Unknown" last.

use ssh_key::{HashAlg, PublicKey};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Sentinel reported when no fingerprint could be computed.
pub const UNKNOWN_FINGERPRINT: &str = "Unknown";

const KEYGEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Compute the SHA256 fingerprint of a public key in OpenSSH notation (`SHA256:<base64>`).
pub fn compute_fingerprint(public_key: &PublicKey) -> String {
    public_key.fingerprint(HashAlg::Sha256).to_string()
}

/// Extract the fingerprint column from `ssh-keygen -lf` output.
///
/// The output format is `<bits> <fingerprint> <comment> (<TYPE>)`.
pub fn parse_keygen_output(output: &str) -> Option<String> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fingerprint = line.split_whitespace().nth(1)?;
    if fingerprint.contains(':') {
        Some(fingerprint.to_string())
    } else {
        None
    }
}

/// Fingerprint a public key file. Never fails.
pub async fn fingerprint_file(public_key_path: &Path) -> String {
    if let Some(fp) = fingerprint_with_keygen(public_key_path).await {
        return fp;
    }

    match std::fs::read_to_string(public_key_path)
        .ok()
        .and_then(|content| PublicKey::from_openssh(content.trim()).ok())
    {
        Some(key) => compute_fingerprint(&key),
        None => {
            tracing::debug!(
                key = %public_key_path.display(),
                "Could not fingerprint public key"
            );
            UNKNOWN_FINGERPRINT.to_string()
        }
    }
}

async fn fingerprint_with_keygen(public_key_path: &Path) -> Option<String> {
    let mut cmd = Command::new("ssh-keygen");
    cmd.arg("-lf")
        .arg(public_key_path)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(KEYGEN_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            parse_keygen_output(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(Ok(output)) => {
            tracing::debug!(
                key = %public_key_path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ssh-keygen rejected public key"
            );
            None
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "ssh-keygen unavailable");
            None
        }
        Err(_) => {
            tracing::debug!(key = %public_key_path.display(), "ssh-keygen timed out");
            None
        }
    }
}
