// ABOUTME: CLI library components for the gitsm binary.
// ABOUTME: Interactive prompts and report formatting shared by the subcommands.

//! # gitsm-cli
//!
//! Command-line interface for binding git repositories to SSH keys and
//! switching branches without losing uncommitted work.
//!
//! ```text
//! gitsm
//! ├── clone <url> [dir]             # Clone and bind in one step
//! ├── list                          # Show stored bindings
//! ├── fix [path]                    # Repair a repository's binding
//! ├── convert [path] [--https]      # Switch the remote between https and ssh
//! ├── bind [path]                   # Bind a repository to a key
//! ├── unbind [path]                 # Go back to the default transport
//! ├── switch <branch>               # Stash-guarded branch switch
//! ├── keys                          # List usable SSH keys
//! ├── keygen [name]                 # Generate an ed25519 key
//! └── test [path]                   # Probe a key against the remote
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Clone with a chosen key
//! gitsm clone git@github.com:octo/app.git
//!
//! # Bind an existing checkout
//! gitsm bind ~/src/app --key ~/.ssh/id_work
//!
//! # Switch branches, carrying local edits along
//! gitsm switch feature/login
//! ```

pub mod output;
pub mod prompt;

/// Version of the gitsm CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
