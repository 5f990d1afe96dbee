//! device-tokens - Admin CLI for multi-device bearer tokens
//!
//! This is the main entry point for managing principals and their tokens.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use device_tokens::auth::token::generate_token_id;
use device_tokens::auth::{Credentials, TokenAuthenticatable, TokenIssuer};
use device_tokens::config::{Config, StorageBackend};
use device_tokens::database::{Database, DocumentDatabase, SqliteDatabase};
use device_tokens::error::AppError;
use device_tokens::logging::init_tracing;
use device_tokens::models::{Principal, RequestContext};

/// device-tokens - Issue and verify per-device bearer tokens
#[derive(Parser, Debug)]
#[command(name = "device-tokens")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "DEVICE_TOKENS_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage principals
    Principal {
        #[command(subcommand)]
        action: PrincipalCommand,
    },

    /// Manage tokens
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PrincipalCommand {
    /// Register a principal under a lookup key
    Add {
        /// Lookup key (e.g. email address)
        lookup_key: String,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a token and print its secret once
    Issue {
        /// Principal lookup key
        lookup_key: String,

        /// Sliding expiry in seconds (0 = never)
        #[arg(long)]
        expires_in: Option<u64>,

        /// Client IP address recorded with the token
        #[arg(long)]
        ip: Option<IpAddr>,

        /// Client user agent recorded with the token
        #[arg(long)]
        user_agent: Option<String>,
    },

    /// Check a token the way a request would be authenticated
    Verify { lookup_key: String, token: String },

    /// Revoke a token
    Revoke { lookup_key: String, token: String },

    /// Delete least recently used tokens beyond the per-principal cap
    Purge { lookup_key: String },

    /// List a principal's tokens, most recently used first
    List { lookup_key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.database.backend,
        "Starting device-tokens"
    );

    match config.database.backend {
        StorageBackend::Sqlite => {
            let database = SqliteDatabase::new(&config.database.path).await?;
            info!(path = %config.database.path, "SQLite database initialized");
            run(Arc::new(database), &config, args.command).await
        }
        StorageBackend::Document => {
            let database = if config.database.path == ":memory:" {
                DocumentDatabase::in_memory()
            } else {
                DocumentDatabase::open(&config.database.path).await?
            };
            info!(path = %config.database.path, "Document store initialized");
            run(Arc::new(database), &config, args.command).await
        }
    }
}

/// Execute a command against the selected backend
async fn run<D: Database + 'static>(
    database: Arc<D>,
    config: &Config,
    command: Command,
) -> anyhow::Result<()> {
    let issuer = TokenIssuer::new(Arc::clone(&database), config.auth.issuer_config())?;

    match command {
        Command::Principal {
            action: PrincipalCommand::Add { lookup_key },
        } => {
            let principal = Principal::new(generate_token_id(), lookup_key);
            database.insert_principal(&principal).await?;
            info!(principal_id = %principal.id, "Principal added");
            println!("{}", principal.id);
        }
        Command::Token { action } => match action {
            TokenCommand::Issue {
                lookup_key,
                expires_in,
                ip,
                user_agent,
            } => {
                let principal = find_principal(database.as_ref(), &lookup_key).await?;
                let expires_in = match expires_in {
                    Some(secs) => Some(Duration::from_secs(secs)),
                    None => config.auth.default_expires_in(),
                };
                let context = RequestContext::new(ip, user_agent);

                let secret = issuer
                    .create_and_return_token(&principal, &context, expires_in)
                    .await?;
                issuer.purge_old_tokens(&principal).await?;

                // The only place the raw secret ever leaves the process
                println!("{}", secret);
            }
            TokenCommand::Verify { lookup_key, token } => {
                let strategy = TokenAuthenticatable::new(
                    Arc::clone(&database),
                    Arc::new(issuer),
                    config.auth.header_names(),
                );
                let credentials = Credentials::new(lookup_key, token);

                match strategy.authenticate_credentials(&credentials).await {
                    Ok(principal) => println!("valid: {}", principal.id),
                    Err(e) => {
                        info!(error = %e, "Token verification failed");
                        anyhow::bail!(e.public_message());
                    }
                }
            }
            TokenCommand::Revoke { lookup_key, token } => {
                let principal = find_principal(database.as_ref(), &lookup_key).await?;
                if issuer.expire_token(&principal, &token).await? {
                    println!("revoked");
                } else {
                    println!("no matching token");
                }
            }
            TokenCommand::Purge { lookup_key } => {
                let principal = find_principal(database.as_ref(), &lookup_key).await?;
                let purged = issuer.purge_old_tokens(&principal).await?;
                println!("purged {}", purged);
            }
            TokenCommand::List { lookup_key } => {
                let principal = find_principal(database.as_ref(), &lookup_key).await?;
                for token in issuer.list_tokens(&principal).await? {
                    let expires_in = token
                        .expires_in
                        .map(|d| format!("{}s", d.as_secs()))
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{}\tlast_used={}\texpires_in={}\tip={}\tuser_agent={}",
                        token.id,
                        token.last_used_at.to_rfc3339(),
                        expires_in,
                        token.ip_address.as_deref().unwrap_or("-"),
                        token.user_agent.as_deref().unwrap_or("-"),
                    );
                }
            }
        },
    }

    Ok(())
}

/// Resolve a principal by lookup key
async fn find_principal<D: Database + ?Sized>(
    database: &D,
    lookup_key: &str,
) -> Result<Principal, AppError> {
    database
        .find_principal_by_lookup_key(lookup_key)
        .await?
        .ok_or_else(|| AppError::PrincipalNotFound(lookup_key.to_string()))
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e)),
    }
}
