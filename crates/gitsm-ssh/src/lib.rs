// ABOUTME: SSH key discovery, inspection and provider probing for gitsm.
// ABOUTME: Re-exports the scanner, key records, fingerprinting and the key tester.

pub mod error;
pub mod fingerprint;
pub mod key;
pub mod probe;
pub mod scanner;

pub use error::{Result, SshError};
pub use fingerprint::{fingerprint_file, UNKNOWN_FINGERPRINT};
pub use key::{
    default_ssh_dir, generate_key, inspect_key, public_key_path, KeyType, SshKeyRecord,
};
pub use probe::{
    default_patterns, parse_remote_host, KeyProbe, ProbePattern, ProbeResult, RemoteHost,
    SshKeyTester,
};
pub use scanner::KeyScanner;
