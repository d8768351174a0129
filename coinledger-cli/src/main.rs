//! coinledger CLI - crypto and brokerage history in your terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{account, export, import, ledger, logs, settings, sync, two_factor};
use coinledger_core::services::ImportFormat;
use coinledger_core::TransactionSource;

/// coinledger - Coinbase and Fidelity history in one ledger
#[derive(Parser)]
#[command(name = "coinledger", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Log in with username and password
    Login {
        #[arg(long)]
        username: Option<String>,
        /// Authenticator code, for accounts with 2FA
        #[arg(long)]
        code: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Finish a login that is waiting for a 2FA code
    #[command(name = "verify-2fa")]
    Verify2fa {
        code: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Log out
    Logout,

    /// Show the logged-in user
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage two-factor authentication
    #[command(name = "2fa")]
    TwoFactor {
        #[command(subcommand)]
        command: two_factor::TwoFactorCommands,
    },

    /// Change email, password or exchange credentials
    Settings {
        #[command(subcommand)]
        command: settings::SettingsCommands,
    },

    /// Pull transactions from the Coinbase API
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import a CSV export or backup
    Import {
        /// coinbase, fidelity, coinbase-backup or fidelity-backup
        format: ImportFormat,
        /// Path to CSV file
        file: PathBuf,
        /// Preview without importing
        #[arg(long)]
        preview: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a backup CSV of one source
    Export {
        #[command(subcommand)]
        command: export::ExportCommands,
    },

    /// Delete all transactions of one source
    Clear {
        #[command(subcommand)]
        command: export::ClearCommands,
    },

    /// List transactions, newest first
    Transactions {
        #[command(flatten)]
        args: ledger::LedgerArgs,
        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// List assets held in one source
    Assets {
        #[arg(long, default_value = "coinbase")]
        source: TransactionSource,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Running balance by date
    Chart {
        #[command(flatten)]
        args: ledger::LedgerArgs,
    },

    /// Current balance of every asset
    Balances {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage application logs
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Register { username, email, json } => account::register(username, email, json),
        Commands::Login { username, code, json } => account::login(username, code, json),
        Commands::Verify2fa { code, json } => account::verify_2fa(code, json),
        Commands::Logout => account::logout(),
        Commands::Whoami { json } => account::whoami(json),
        Commands::TwoFactor { command } => two_factor::run(command),
        Commands::Settings { command } => settings::run(command),
        Commands::Sync { json } => sync::run(json),
        Commands::Import { format, file, preview, json } => import::run(format, &file, preview, json),
        Commands::Export { command } => export::run_export(command),
        Commands::Clear { command } => export::run_clear(command),
        Commands::Transactions { args, page } => ledger::transactions(args, page),
        Commands::Assets { source, json } => ledger::assets(source, json),
        Commands::Chart { args } => ledger::chart(args),
        Commands::Balances { json } => ledger::balances(json),
        Commands::Logs { command } => logs::run(command),
    }
}
