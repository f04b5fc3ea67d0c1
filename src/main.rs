//! # Intelligent Library CLI (`ilib`)
//!
//! The `ilib` binary runs the backend the desktop front end talks to, and
//! offers a few maintenance commands.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ilib serve` | Run the stdin/stdout request loop (default) |
//! | `ilib license status` | Show trial or license status |
//! | `ilib license activate <KEY>` | Activate a license key |
//! | `ilib license generate [--days N]` | Generate a key for this machine |
//! | `ilib check-key <KEY>` | Validate an OpenAI API key |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use intelligent_library::config::{self, Config};
use intelligent_library::credential;
use intelligent_library::license::LicenseManager;
use intelligent_library::llm::OpenAiBackend;
use intelligent_library::picker::SystemFilePicker;
use intelligent_library::server::{self, Server};
use intelligent_library::session::Session;

/// Intelligent Library: chat with your PDF documents.
#[derive(Parser)]
#[command(
    name = "ilib",
    about = "Intelligent Library backend: answers questions grounded in your PDF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `~/.IntelligentLibrary/config.toml` if it exists, and to
    /// built-in settings otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve line-delimited JSON requests on stdin, responses on stdout.
    Serve,

    /// Inspect or change the license.
    License {
        #[command(subcommand)]
        action: LicenseAction,
    },

    /// Check an OpenAI API key against the API.
    CheckKey {
        /// The key to check (starts with `sk-`).
        key: String,
    },
}

#[derive(Subcommand)]
enum LicenseAction {
    /// Show the current trial or license status.
    Status,

    /// Activate a license key for this machine.
    Activate {
        /// Key of the form `IL-XXXXXXXX-365-XXXXXXXXXXXXXXXX`.
        key: String,
    },

    /// Generate a key bound to this machine (for testing).
    Generate {
        /// Validity encoded in the key: 7, 30, or 365.
        #[arg(long, default_value = "365")]
        days: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await?,
        Commands::License { action } => {
            let manager = LicenseManager::new(cfg.paths.license_file());
            match action {
                LicenseAction::Status => {
                    let status = manager.status()?;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                LicenseAction::Activate { key } => {
                    let result = manager.activate(&key);
                    println!("{}", result.message);
                    if !result.success {
                        std::process::exit(1);
                    }
                }
                LicenseAction::Generate { days } => {
                    println!("Machine ID:  {}", manager.machine_id());
                    println!("License Key: {}", manager.generate_key(days)?);
                }
            }
        }
        Commands::CheckKey { key } => {
            let backend = OpenAiBackend::new(cfg.agent.clone());
            match credential::check_api_key(&backend, &key).await {
                Ok(()) => println!("{}", credential::VALID_MESSAGE),
                Err(e) => {
                    println!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn serve(cfg: Config) -> Result<()> {
    let session = Session::from_config(cfg)?;

    let status = session.license_status()?;
    tracing::info!(status = ?status.status, days_left = status.days_left, "license checked");
    if session.config().license.enforce && !status.is_active() {
        bail!("{}", status.message);
    }

    tracing::info!(
        data_dir = %session.config().paths.data_dir.display(),
        "backend ready, waiting for requests"
    );
    server::serve_stdio(Server::new(session, Box::new(SystemFilePicker))).await
}
