// ABOUTME: CLI entry point for gitsm.
// ABOUTME: Parses commands, loads settings and logging, and dispatches to gitsm-core.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gitsm_cli::output::{format_bind_report, format_bindings, format_keys, format_switch_report};
use gitsm_cli::prompt::CliPrompt;
use gitsm_core::{
    BindOptions, Binder, BranchSwitcher, GitsmError, Settings, SwitchOptions, Transport,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gitsm")]
#[command(about = "Bind git repositories to SSH keys and switch branches without losing work")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to ~/.config/gitsm/config.toml)
    #[arg(long, global = true, env = "GITSM_CONFIG")]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true, env = "GITSM_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Key selection flags shared by the binding commands.
#[derive(Args, Debug, Clone)]
struct KeyArgs {
    /// Use this private key instead of choosing interactively
    #[arg(long)]
    key: Option<PathBuf>,

    /// Skip the SSH authentication probe
    #[arg(long)]
    no_test: bool,

    /// Bind even if the authentication probe fails
    #[arg(short, long)]
    yes: bool,
}

impl KeyArgs {
    fn options(&self) -> BindOptions {
        BindOptions {
            key: self.key.clone(),
            test_key: !self.no_test,
        }
    }

    fn prompt(&self) -> CliPrompt {
        CliPrompt::new(self.yes)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a repository and bind it to an SSH key
    Clone {
        /// Remote URL
        url: String,

        /// Target directory (defaults to the repository name)
        dir: Option<PathBuf>,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// List bound repositories
    List,

    /// Repair a repository's binding and rewrite its git config
    Fix {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Convert the remote between HTTPS and SSH
    Convert {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Convert to HTTPS instead of SSH
        #[arg(long)]
        https: bool,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Bind a repository to an SSH key
    Bind {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Remove a repository's SSH key binding
    Unbind {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Switch branches, stashing and restoring uncommitted changes
    Switch {
        /// Target branch
        branch: String,

        /// Create the branch if it does not exist
        #[arg(short = 'c', long)]
        create: bool,

        /// Carry local changes without stashing them
        #[arg(long)]
        force: bool,

        /// Do not pull after switching
        #[arg(long)]
        no_pull: bool,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// List usable SSH keys
    Keys,

    /// Generate an ed25519 key pair in the SSH directory
    Keygen {
        /// Key file name
        #[arg(default_value = "id_ed25519")]
        name: String,
    },

    /// Test SSH authentication against the repository's remote
    Test {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Key to test (defaults to the bound key)
        #[arg(long)]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => gitsm_log::init_file(path, cli.verbose),
        None => gitsm_log::init(cli.verbose),
    }

    let settings_path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    tracing::debug!(settings = %settings_path.display(), "Loaded settings");

    let result = run(cli.command, &settings).await;
    if let Err(e) = &result {
        if let Some(hint) = e
            .downcast_ref::<GitsmError>()
            .and_then(GitsmError::recovery_hint)
        {
            eprintln!("hint: {hint}");
        }
    }
    result
}

async fn run(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Clone { url, dir, keys } => {
            let binder = Binder::from_settings(settings)?;
            let report = binder
                .clone_repo(&url, dir.as_deref(), &keys.prompt(), &keys.options())
                .await?;
            print!("{}", format_bind_report("Cloned", &report));
            Ok(())
        }
        Commands::List => {
            let binder = Binder::from_settings(settings)?;
            print!("{}", format_bindings(&binder.bindings()?));
            Ok(())
        }
        Commands::Fix { path, keys } => {
            let binder = Binder::from_settings(settings)?;
            let report = binder
                .repair(&path, &keys.prompt(), &keys.options())
                .await?;
            print!("{}", format_bind_report("Repaired", &report));
            Ok(())
        }
        Commands::Convert { path, https, keys } => {
            let binder = Binder::from_settings(settings)?;
            let to = if https { Transport::Https } else { Transport::Ssh };
            let report = binder
                .convert(&path, to, &keys.prompt(), &keys.options())
                .await?;
            print!("{}", format_bind_report(&format!("Converted to {to}:"), &report));
            Ok(())
        }
        Commands::Bind { path, keys } => {
            let binder = Binder::from_settings(settings)?;
            let report = binder
                .bind(&path, &keys.prompt(), &keys.options())
                .await?;
            print!("{}", format_bind_report("Bound", &report));
            Ok(())
        }
        Commands::Unbind { path } => {
            let binder = Binder::from_settings(settings)?;
            let report = binder.unbind(&path).await?;
            print!("{}", format_bind_report("Unbound", &report));
            Ok(())
        }
        Commands::Switch {
            branch,
            create,
            force,
            no_pull,
            repo,
        } => {
            let options = SwitchOptions {
                create,
                force,
                pull: !no_pull,
            };
            let report = BranchSwitcher::from_settings(&repo, settings)
                .switch(&branch, &options)
                .await?;
            print!("{}", format_switch_report(&report));
            report.into_result()?;
            Ok(())
        }
        Commands::Keys => {
            let binder = Binder::from_settings(settings)?;
            let keys = binder.keys().await;
            if keys.is_empty() {
                return Err(GitsmError::NoKeysFound {
                    dir: binder.ssh_dir().to_path_buf(),
                }
                .into());
            }
            print!("{}", format_keys(&keys));
            Ok(())
        }
        Commands::Keygen { name } => {
            let binder = Binder::from_settings(settings)?;
            let key = binder.generate_key(&name)?;
            let public = std::fs::read_to_string(&key.public_key_path).with_context(|| {
                format!("Failed to read {}", key.public_key_path.display())
            })?;
            println!("Generated {}", key.label());
            println!("  {}", key.path.display());
            println!();
            println!("Add this public key to your Git host:");
            print!("{public}");
            Ok(())
        }
        Commands::Test { path, key } => {
            let binder = Binder::from_settings(settings)?;
            let report = binder.test(&path, key.as_deref()).await?;
            if report.result.success {
                println!(
                    "{} authenticated with {} ({})",
                    report.key.display(),
                    report.result.provider.as_deref().unwrap_or("unknown provider"),
                    report.remote_url
                );
                return Ok(());
            }
            Err(GitsmError::AuthProbeFailure {
                key: report.key,
                detail: report.result.error.unwrap_or_default(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_switch_flags() {
        let cli = Cli::try_parse_from(["gitsm", "switch", "-c", "--no-pull", "topic"]).unwrap();
        match cli.command {
            Commands::Switch {
                branch,
                create,
                force,
                no_pull,
                repo,
            } => {
                assert_eq!(branch, "topic");
                assert!(create);
                assert!(!force);
                assert!(no_pull);
                assert_eq!(repo, PathBuf::from("."));
            }
            _ => panic!("expected switch"),
        }
    }

    #[test]
    fn test_bind_key_args() {
        let cli =
            Cli::try_parse_from(["gitsm", "bind", "/src/app", "--key", "/k/id", "--no-test", "-y"])
                .unwrap();
        match cli.command {
            Commands::Bind { path, keys } => {
                assert_eq!(path, PathBuf::from("/src/app"));
                let options = keys.options();
                assert_eq!(options.key, Some(PathBuf::from("/k/id")));
                assert!(!options.test_key);
                assert!(keys.yes);
            }
            _ => panic!("expected bind"),
        }
    }
}
