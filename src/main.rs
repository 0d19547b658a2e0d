//! Sigpass - local EVM wallet custody from the terminal
//!
//! # WARNING
//! - The backup phrase is the only way to recover a wallet. Write it down.
//! - Resetting the registry does not delete secrets, but without a backup
//!   phrase they become unreachable.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

// Use the library crate
use sigpass_wallet::cli::commands;
use sigpass_wallet::config::Config;
use sigpass_wallet::store::ProtectionKind;

/// Sigpass - passkey and password protected EVM wallets
#[derive(Parser)]
#[command(name = "sigpass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sigpass.toml", env = "SIGPASS_CONFIG")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Registered wallet management
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Single passkey wallet (no registry)
    Passkey {
        #[command(subcommand)]
        action: PasskeyAction,
    },

    /// Show current configuration
    Config,

    /// Check the local environment (random source, storage, credentials)
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protection {
    Passkey,
    Password,
}

impl From<Protection> for ProtectionKind {
    fn from(protection: Protection) -> Self {
        match protection {
            Protection::Passkey => ProtectionKind::Authenticator,
            Protection::Password => ProtectionKind::Password,
        }
    }
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new wallet
    Create {
        /// Wallet name (prompted if omitted)
        name: Option<String>,

        /// Protection kind (prompted if omitted)
        #[arg(long, value_enum)]
        protection: Option<Protection>,

        /// Password for password protection (prompted if omitted)
        #[arg(long, env = "SIGPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Print the backup phrase after creation
        #[arg(long)]
        show_mnemonic: bool,
    },

    /// List registered wallets
    List,

    /// Show registry status (active wallet, lock state)
    Status,

    /// Unlock a wallet (default: the active one)
    Unlock {
        name: Option<String>,

        #[arg(long, env = "SIGPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Lock all wallets
    Lock,

    /// Sign a message (EIP-191) with a wallet
    Sign {
        /// Message to sign
        message: String,

        /// Wallet name (default: the active one)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, env = "SIGPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Print a wallet's backup phrase
    Export {
        name: Option<String>,

        #[arg(long, env = "SIGPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Forget every registered wallet
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PasskeyAction {
    /// Create the passkey wallet
    Create {
        #[arg(default_value = "sigpass")]
        name: String,
    },

    /// Check whether a passkey wallet exists
    Status,

    /// Assert the passkey and show the wallet address
    Address,

    /// Remove the passkey wallet and its credential
    Forget {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing on stderr
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sigpass_wallet=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Wallet { action } => match action {
            WalletAction::Create {
                name,
                protection,
                password,
                show_mnemonic,
            } => {
                commands::wallet_create(
                    &config,
                    name,
                    protection.map(Into::into),
                    password,
                    show_mnemonic,
                )
                .await
            }
            WalletAction::List => commands::wallet_list(&config).await,
            WalletAction::Status => commands::wallet_status(&config).await,
            WalletAction::Unlock { name, password } => {
                commands::wallet_unlock(&config, name, password).await
            }
            WalletAction::Lock => commands::wallet_lock(&config).await,
            WalletAction::Sign {
                message,
                name,
                password,
            } => commands::wallet_sign(&config, name, &message, password).await,
            WalletAction::Export {
                name,
                password,
                force,
            } => commands::wallet_export(&config, name, password, force).await,
            WalletAction::Reset { force } => commands::wallet_reset(&config, force).await,
        },
        Commands::Passkey { action } => match action {
            PasskeyAction::Create { name } => commands::passkey_create(&config, &name).await,
            PasskeyAction::Status => commands::passkey_status(&config).await,
            PasskeyAction::Address => commands::passkey_address(&config).await,
            PasskeyAction::Forget { force } => commands::passkey_forget(&config, force).await,
        },
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
