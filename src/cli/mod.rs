use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::application::{CreateTransferParams, LedgerError, LedgerService};
use crate::config::LedgerConfig;
use crate::domain::{
    Account, Currency, Entry, Page, Transfer, TransferFilter, format_cents, parse_cents,
};

/// Bursar - multi-currency account ledger
#[derive(Parser)]
#[command(name = "bursar")]
#[command(about = "An account ledger with atomic, double-entry transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "BURSAR_DATABASE", default_value = LedgerConfig::DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, env = "BURSAR_MAX_CONNECTIONS", default_value_t = LedgerConfig::DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// How long to wait for the database write lock, in milliseconds
    #[arg(long, env = "BURSAR_BUSY_TIMEOUT_MS", default_value_t = LedgerConfig::DEFAULT_BUSY_TIMEOUT.as_millis() as u64)]
    pub busy_timeout_ms: u64,

    /// Principal to act as (account owner)
    #[arg(long = "as", env = "BURSAR_PRINCIPAL", global = true)]
    pub principal: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

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

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transfer money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account id (must be owned by the principal)
        #[arg(long)]
        from: i64,

        /// Destination account id
        #[arg(long)]
        to: i64,

        /// Currency of the transfer: USD, EUR or CAD
        #[arg(short, long, default_value = "USD")]
        currency: String,
    },

    /// List transfers
    Transfers {
        /// Transfers touching this account, on either side
        #[arg(long)]
        account: Option<i64>,

        /// Transfers out of this account
        #[arg(long)]
        from: Option<i64>,

        /// Transfers into this account
        #[arg(long)]
        to: Option<i64>,

        /// Maximum number of transfers to show
        #[arg(short, long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// List the entries of an account
    Entries {
        /// Account id
        account: i64,

        #[arg(short, long, default_value_t = Page::DEFAULT_LIMIT)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account owned by the principal
    Create {
        /// Currency code: USD, EUR or CAD
        #[arg(short, long, default_value = "USD")]
        currency: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long, default_value = "0")]
        balance: String,
    },

    /// List the principal's accounts
    List {
        #[arg(short, long, default_value_t = Page::DEFAULT_LIMIT)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show account details
    Show {
        /// Account id
        id: i64,
    },

    /// Delete an account that has no entries
    Delete {
        /// Account id
        id: i64,
    },
}

impl Cli {
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    fn principal(&self) -> Result<String> {
        self.principal
            .clone()
            .context("This command needs a principal: pass --as <OWNER> or set BURSAR_PRINCIPAL")
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();
        let output = Output { json: self.json };

        if matches!(self.command, Commands::Init) {
            let service = LedgerService::init(&config).await?;
            service.repository().close().await;
            println!("Database initialized: {}", config.database_path.display());
            return Ok(());
        }

        let service = LedgerService::connect(&config).await?;
        let result = self.dispatch(&service, &output).await;
        service.repository().close().await;
        result
    }

    async fn dispatch(self, service: &LedgerService, output: &Output) -> Result<()> {
        match self.command {
            Commands::Init => Ok(()),

            Commands::Account(ref cmd) => {
                let principal = self.principal()?;
                run_account_command(service, output, &principal, cmd).await
            }

            Commands::Transfer {
                ref amount,
                from,
                to,
                ref currency,
            } => {
                let principal = self.principal()?;
                let amount = parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let currency = currency.parse::<Currency>().map_err(LedgerError::from)?;

                let transfer = service
                    .create_transfer(CreateTransferParams {
                        principal,
                        from_account_id: from,
                        to_account_id: to,
                        amount,
                        currency,
                    })
                    .await?;

                output.show(&transfer, || {
                    println!(
                        "Recorded transfer {}: {} {} from account {} to account {}",
                        transfer.id,
                        format_cents(transfer.amount),
                        currency,
                        transfer.from_account_id,
                        transfer.to_account_id
                    );
                })
            }

            Commands::Transfers {
                account,
                from,
                to,
                limit,
                offset,
            } => {
                let filter = TransferFilter {
                    account,
                    from_account: from,
                    to_account: to,
                    page: limit.map(|limit| Page::new(limit, offset)),
                };
                let transfers = service.list_transfers(&filter).await?;
                output.show(&transfers, || print_transfers(&transfers))
            }

            Commands::Entries {
                account,
                limit,
                offset,
            } => {
                let principal = self.principal()?;
                let entries = service
                    .list_entries(&principal, account, Page::new(limit, offset))
                    .await?;
                output.show(&entries, || print_entries(&entries))
            }

            Commands::Check => run_check_command(service, output).await,
        }
    }
}

async fn run_account_command(
    service: &LedgerService,
    output: &Output,
    principal: &str,
    cmd: &AccountCommands,
) -> Result<()> {
    match cmd {
        AccountCommands::Create { currency, balance } => {
            let currency = currency.parse::<Currency>().map_err(LedgerError::from)?;
            let opening_balance =
                parse_cents(balance).context("Invalid balance format. Use '100.00' or '100'")?;

            let account = service
                .create_account(principal, currency, opening_balance)
                .await?;
            output.show(&account, || {
                println!(
                    "Created account {} ({}, {} {})",
                    account.id,
                    account.owner,
                    format_cents(account.balance),
                    account.currency
                );
            })
        }

        AccountCommands::List { limit, offset } => {
            let accounts = service
                .list_accounts(principal, Page::new(*limit, *offset))
                .await?;
            output.show(&accounts, || print_accounts(&accounts))
        }

        AccountCommands::Show { id } => {
            let account = service.get_account(principal, *id).await?;
            output.show(&account, || {
                println!("Account: {}", account.id);
                println!("  Owner:    {}", account.owner);
                println!("  Currency: {}", account.currency);
                println!("  Balance:  {}", format_cents(account.balance));
                println!(
                    "  Created:  {}",
                    account.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            })
        }

        AccountCommands::Delete { id } => {
            let account = service.delete_account(principal, *id).await?;
            output.show(&account, || println!("Deleted account {}", account.id))
        }
    }
}

async fn run_check_command(service: &LedgerService, output: &Output) -> Result<()> {
    let report = service.check_integrity().await?;

    output.show(&report, || {
        println!("Checking ledger integrity...\n");
        println!("Accounts:  {}", report.account_count);
        println!("Transfers: {}", report.transfer_count);
        println!("Entries:   {}", report.entry_count);
        println!("Total:     {}", format_cents(report.total_balance));
        println!();

        if report.is_healthy() {
            println!("Ledger is consistent.");
        } else {
            println!("Issues found:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    })?;

    if !report.is_healthy() {
        anyhow::bail!("Ledger integrity check failed");
    }
    Ok(())
}

fn print_accounts(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found.");
        return;
    }

    println!("{:>6} {:<8} {:>14} OWNER", "ID", "CURRENCY", "BALANCE");
    println!("{}", "-".repeat(44));
    for account in accounts {
        println!(
            "{:>6} {:<8} {:>14} {}",
            account.id,
            account.currency,
            format_cents(account.balance),
            account.owner
        );
    }
}

fn print_transfers(transfers: &[Transfer]) {
    if transfers.is_empty() {
        println!("No transfers found.");
        return;
    }

    println!(
        "{:>6} {:<20} {:>6} {:>6} {:>14}",
        "ID", "DATE", "FROM", "TO", "AMOUNT"
    );
    println!("{}", "-".repeat(56));
    for transfer in transfers {
        println!(
            "{:>6} {:<20} {:>6} {:>6} {:>14}",
            transfer.id,
            transfer.created_at.format("%Y-%m-%d %H:%M:%S"),
            transfer.from_account_id,
            transfer.to_account_id,
            format_cents(transfer.amount)
        );
    }
}

fn print_entries(entries: &[Entry]) {
    if entries.is_empty() {
        println!("No entries found.");
        return;
    }

    println!(
        "{:>6} {:<20} {:<6} {:>14} TRANSFER",
        "ID", "DATE", "SIDE", "AMOUNT"
    );
    println!("{}", "-".repeat(60));
    for entry in entries {
        let transfer = entry
            .transfer_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "opening".to_string());
        println!(
            "{:>6} {:<20} {:<6} {:>14} {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            if entry.is_debit() { "debit" } else { "credit" },
            format_cents(entry.amount),
            transfer
        );
    }
}

/// Chooses between JSON and the human-readable table output.
struct Output {
    json: bool,
}

impl Output {
    fn show<T: Serialize + ?Sized>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}
