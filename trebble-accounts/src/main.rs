//! trebble-accounts - Operator tool for social accounts and API tokens
//!
//! Users and their LinkedIn authorizations are owned by the identity provider.
//! This tool writes what the publishing core reads: the account rows with
//! their access tokens, and hashed bearer tokens for the HTTP API.

use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use libtrebble::accounts::issue_token;
use libtrebble::logging::LoggingConfig;
use libtrebble::scheduling::now_secs;
use libtrebble::{Config, Credential, Database, SocialAccount};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "trebble-accounts")]
#[command(about = "Register social accounts and issue API tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a social account with its access token
    Add {
        /// Account uid used by API clients
        uid: String,

        /// Owning user id
        #[arg(long)]
        user: String,

        /// Member id on the network (the part after urn:li:person:)
        #[arg(long)]
        external_id: String,

        /// Network the account belongs to
        #[arg(long, default_value = "linkedin")]
        provider: String,

        #[command(flatten)]
        token: TokenSource,
    },

    /// List registered accounts (without showing tokens)
    List {
        /// Only accounts owned by this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Replace an account's access token after a refresh
    SetToken {
        /// Account uid
        uid: String,

        #[command(flatten)]
        token: TokenSource,
    },

    /// Issue a bearer token for the HTTP API (printed once)
    IssueToken {
        /// User id the token authenticates as
        user: String,

        /// Free-form note, e.g. the client it was issued to
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TokenSource {
    /// Access token value
    #[arg(long)]
    token: Option<String>,

    /// Read the access token from stdin (for automation)
    #[arg(long)]
    stdin: bool,
}

impl TokenSource {
    fn read(self) -> Result<Credential> {
        let value = if self.stdin {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read token from stdin")?;
            buf
        } else {
            self.token.unwrap_or_default()
        };

        let value = value.trim();
        if value.is_empty() {
            bail!("Access token cannot be empty");
        }
        Ok(Credential::new(value))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run_command(cli.command).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn open_database() -> Result<Database> {
    let config = Config::load().context("Failed to load configuration")?;
    Database::new(&config.database.path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))
}

async fn run_command(command: Commands) -> Result<()> {
    let db = open_database().await?;

    match command {
        Commands::Add {
            uid,
            user,
            external_id,
            provider,
            token,
        } => {
            let account = SocialAccount {
                uid,
                user_id: user,
                provider,
                external_id,
                credential: token.read()?,
                created_at: now_secs(),
            };
            if db.get_account(&account.uid).await?.is_some() {
                bail!("Account '{}' already exists; use set-token to update it", account.uid);
            }
            db.insert_account(&account).await?;
            info!(account = %account.uid, "Registered account");
            println!(
                "✓ Added {} account '{}' for user '{}'",
                account.provider, account.uid, account.user_id
            );
        }
        Commands::List { user } => {
            let accounts = db.list_accounts(user.as_deref()).await?;
            if accounts.is_empty() {
                println!("No accounts registered");
                return Ok(());
            }
            println!("{:<20} {:<20} {:<10} EXTERNAL ID", "UID", "USER", "PROVIDER");
            for account in accounts {
                println!(
                    "{:<20} {:<20} {:<10} {}",
                    account.uid, account.user_id, account.provider, account.external_id
                );
            }
        }
        Commands::SetToken { uid, token } => {
            if !db.update_account_token(&uid, &token.read()?).await? {
                bail!("Account '{}' not found", uid);
            }
            info!(account = %uid, "Access token replaced");
            println!("✓ Updated token for '{}'", uid);
        }
        Commands::IssueToken { user, label } => {
            let token = issue_token(&db, &user, label.as_deref()).await?;
            info!(user = %user, "Issued API token");
            println!("{}", token);
        }
    }

    Ok(())
}
