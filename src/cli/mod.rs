use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::application::{LedgerService, RequestContext};
use crate::config::{DatabaseConfig, LedgerConfig};
use crate::domain::{
    EntryType, TypeFilter, Uid, UserLookup, WalletLookup, format_amount, parse_amount,
};
use crate::logging;

/// Wallet Ledger - balances, transfers and history for user wallets
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "A transactional wallet ledger with an append-only journal")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ./wallet-ledger.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file path, overrides database.url
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Abort the operation after this many milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open an account: a user and its empty wallet
    Open { username: String, email: String },

    /// Look up a user
    User(UserArgs),

    /// Credit a wallet from outside the ledger
    Deposit {
        uid: Uid,
        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Debit a wallet to outside the ledger
    Withdraw {
        uid: Uid,
        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Move funds between two wallets
    Transfer {
        from: Uid,
        to: Uid,
        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Show the balance of a wallet
    Balance { uid: Uid },

    /// List the history of a wallet, newest first
    History {
        uid: Uid,

        /// all, deposit, withdraw, transfer, or a type code (0-3)
        #[arg(short = 't', long = "type", default_value = "all")]
        entry_type: String,

        #[arg(short, long, default_value_t = 1)]
        page: i64,

        #[arg(short = 's', long, default_value_t = 20)]
        page_size: i64,
    },

    /// Compare a stored balance with its journal
    Reconcile { uid: Uid },

    /// Export the full history of a wallet
    Export {
        uid: Uid,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct UserArgs {
    #[arg(long)]
    id: Option<Uid>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    email: Option<String>,
}

impl UserArgs {
    fn lookup(self) -> Option<UserLookup> {
        self.id
            .map(UserLookup::ById)
            .or(self.username.map(UserLookup::ByUsername))
            .or(self.email.map(UserLookup::ByEmail))
    }
}

impl Cli {
    fn load_config(&self) -> Result<LedgerConfig> {
        let mut config = LedgerConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.database {
            config.database.url = DatabaseConfig::for_path(path).url;
        }
        if self.verbose {
            config.log.level = "debug".to_string();
        }
        Ok(config)
    }

    fn request_context(&self) -> RequestContext {
        match self.timeout_ms {
            Some(ms) => RequestContext::with_timeout(Duration::from_millis(ms)),
            None => RequestContext::background(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        logging::init(&config.log);

        let service = LedgerService::connect(&config).await?;
        let ctx = self.request_context();

        match self.command {
            Commands::Init => {
                println!("Database initialized: {}", config.database.url);
            }

            Commands::Open { username, email } => {
                let account = service.open_account(&ctx, &username, &email).await?;
                println!(
                    "Opened account '{}' (uid {}, wallet {})",
                    account.user.username, account.user.id, account.wallet.id
                );
            }

            Commands::User(args) => {
                let lookup = args.lookup().context("One of --id, --username, --email is required")?;
                let user = service.find_user(lookup).await?;
                println!("{:<8} {:<20} {:<30} {:<8}", "UID", "USERNAME", "EMAIL", "STATUS");
                println!(
                    "{:<8} {:<20} {:<30} {:?}",
                    user.id, user.username, user.email, user.status
                );
            }

            Commands::Deposit { uid, amount } => {
                let amount = parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let entry = service.deposit(&ctx, uid, amount.value()).await?;
                println!("Deposited {} to uid {} (entry {})", amount, uid, entry.id);
            }

            Commands::Withdraw { uid, amount } => {
                let amount = parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let entry = service.withdraw(&ctx, uid, amount.value()).await?;
                println!("Withdrew {} from uid {} (entry {})", amount, uid, entry.id);
            }

            Commands::Transfer { from, to, amount } => {
                let amount = parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let entry = service.transfer(&ctx, from, to, amount.value()).await?;
                println!(
                    "Transferred {} from uid {} to uid {} (entry {})",
                    amount, from, to, entry.id
                );
            }

            Commands::Balance { uid } => {
                let balance = service.balance(&ctx, uid).await?;
                println!("uid {}: {}", uid, format_amount(balance));
            }

            Commands::History {
                uid,
                entry_type,
                page,
                page_size,
            } => {
                let filter: TypeFilter = entry_type
                    .parse()
                    .with_context(|| format!("Invalid type filter '{}'", entry_type))?;
                run_history_command(&service, &ctx, uid, filter, page, page_size).await?;
            }

            Commands::Reconcile { uid } => {
                let report = service.reconcile(&ctx, uid).await?;
                println!("Stored balance:  {}", format_amount(report.wallet.balance));
                println!("Journal balance: {}", format_amount(report.journal_balance));
                println!("Entries:         {}", report.entry_count);
                if report.is_consistent() {
                    println!("✓ Wallet is consistent with its journal");
                } else {
                    anyhow::bail!("Wallet of uid {} does not reconcile", uid);
                }
            }

            Commands::Export {
                uid,
                format,
                output,
            } => {
                run_export_command(&service, &ctx, uid, &format, output).await?;
            }
        }

        Ok(())
    }
}

async fn run_history_command(
    service: &LedgerService,
    ctx: &RequestContext,
    uid: Uid,
    filter: TypeFilter,
    page: i64,
    page_size: i64,
) -> Result<()> {
    let wallet = service
        .find_wallet(WalletLookup::ByUid(uid))
        .await?
        .with_context(|| format!("No wallet for uid {}", uid))?;
    let history = service
        .list_transactions(ctx, uid, filter, page, page_size)
        .await?;

    if history.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<26} {:<10} {:>12} {:<20}",
        "ID", "DATE", "TYPE", "AMOUNT", "COUNTERPARTY"
    );
    println!("{}", "-".repeat(80));
    for line in &history.items {
        let entry = &line.entry;
        let sign = if entry.delta_for(wallet.id).is_sign_negative() { "-" } else { "+" };
        let counterparty = match entry.entry_type {
            EntryType::Transfer => line.counterparty(wallet.id).unwrap_or("?"),
            _ => "external",
        };
        println!(
            "{:<8} {:<26} {:<10} {:>12} {:<20}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.entry_type,
            format!("{}{}", sign, entry.amount),
            counterparty
        );
    }
    if history.has_more {
        println!("(more on page {})", page.max(1) + 1);
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    ctx: &RequestContext,
    uid: Uid,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    use crate::io::{ExportFormat, Exporter};
    use std::fs::File;
    use std::io::{Write, stdout};

    let format: ExportFormat = format.parse()?;
    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = exporter.export(ctx, uid, format, writer).await?;
    if output.is_some() {
        eprintln!("Exported {} entries", count);
    }
    Ok(())
}
