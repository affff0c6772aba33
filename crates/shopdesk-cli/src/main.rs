//! shopdesk - command line front end for the shopdesk product listing backend.
//!
//! Logs in against the backend, keeps the issued tokens in the configured
//! token store and drives the account and product endpoints.

mod commands;
mod format;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shopdesk_core::models::Platform;
use shopdesk_core::{ApiError, Config};

/// Log file prefix inside the cache directory
const LOG_FILE: &str = "shopdesk.log";

#[derive(Debug, Parser)]
#[command(name = "shopdesk", version, about = "Product listing backend client")]
struct Cli {
    /// Backend API URL (overrides config and SHOPDESK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the issued tokens
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Invalidate the session and clear stored tokens
    Logout,
    /// Create a new account
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
    },
    /// Show whether a session is stored and when it expires
    Status,
    /// View or edit your profile
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Manage generated product listings
    #[command(subcommand)]
    Products(ProductsCommand),
    /// Send an authenticated request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,
        /// Path relative to the API URL, e.g. shopify-products/
        path: String,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
    /// Inspect or change the client configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    Show,
    Update {
        #[arg(long)]
        bio: Option<String>,
        /// Image file to use as profile picture
        #[arg(long)]
        picture: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProductsCommand {
    List,
    Show {
        id: i64,
    },
    /// Upload a product image and generate a listing from it
    Upload {
        path: PathBuf,
        #[arg(long, default_value_t = Platform::Shopify)]
        platform: Platform,
    },
    Delete {
        id: i64,
        #[arg(long, default_value_t = Platform::Shopify)]
        platform: Platform,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show,
    SetUrl { url: String },
    /// keyring, cookie-file, encrypted-file or memory
    SetStore { kind: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Stderr gets `RUST_LOG` (default `warn`); the daily log file in the cache
/// directory always records debug output from this crate and the library.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(filter);

    let log_dir = config
        .cache_dir()
        .ok()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::new("shopdesk=debug,shopdesk_core=debug,warn"));
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            None
        }
    }
}

fn load_config(api_url: Option<String>) -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    if let Some(url) = api_url {
        config.api_url = url;
        config.validate()?;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.api_url)?;
    let _log_guard = init_tracing(&config);
    info!(api_url = %config.api_url, store = %config.token_store, "shopdesk starting");

    let client = || commands::build_client(&config);

    match cli.command {
        Command::Login { email } => commands::login(&client()?, &config, email).await,
        Command::Logout => commands::logout(&client()?).await,
        Command::Register {
            first_name,
            last_name,
            email,
        } => commands::register(&client()?, first_name, last_name, email).await,
        Command::Status => commands::status(&client()?),
        Command::Profile(command) => commands::profile(&client()?, command).await,
        Command::Products(command) => commands::products(&client()?, command).await,
        Command::Request { method, path, json } => {
            commands::raw_request(&client()?, &method, &path, json.as_deref()).await
        }
        Command::Config(command) => commands::config(&config, command),
    }
}

/// Print an error for the terminal. Field-keyed validation errors get one
/// line per message.
fn report(err: &anyhow::Error) {
    if let Some(fields) = err.downcast_ref::<ApiError>().and_then(ApiError::field_errors) {
        eprintln!("Please correct the following:");
        for (field, messages) in fields.iter() {
            for message in messages {
                eprintln!("  {}: {}", field, message);
            }
        }
        return;
    }

    eprintln!("Error: {:#}", err);
    if needs_login_hint(err) {
        eprintln!("Run `shopdesk login` to sign in.");
    }
}

/// Failures that went through the login redirect already printed a hint
fn needs_login_hint(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
