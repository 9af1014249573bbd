// ABOUTME: Core library for gitsm: per-repository SSH key binding and safe branch switching.
// ABOUTME: Re-exports the orchestrator, reconciler, binding store, git runner and switch engine.

pub mod bind;
pub mod error;
pub mod git;
pub mod gitconfig;
pub mod remote;
pub mod settings;
pub mod store;
pub mod switch;

pub use bind::{BindOptions, BindReport, Binder, BindingState, KeyPrompt, KeyTestReport};
pub use error::{GitsmError, Result};
pub use git::{git_available, Git, GitOutput, StashEntry};
pub use gitconfig::{ssh_command_value, ConfigReconciler, GitConfigText};
pub use remote::{to_https_url, to_ssh_url, Transport};
pub use settings::Settings;
pub use store::{canonical_repo_path, BindingStore, RepositoryBinding, StoreData};
pub use switch::{BranchSwitcher, StashRecord, SwitchOptions, SwitchReport, SwitchState};
