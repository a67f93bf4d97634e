// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bursar::application::{CreateTransferParams, LedgerService};
use bursar::config::LedgerConfig;
use bursar::domain::{Account, AccountId, Cents, Currency};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(&test_config(&temp_dir)).await?;
    Ok((service, temp_dir))
}

pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    LedgerConfig::new(temp_dir.path().join("test.db"))
}

/// Open a USD account for `owner` with an opening balance in cents.
pub async fn usd_account(service: &LedgerService, owner: &str, balance: Cents) -> Result<Account> {
    Ok(service.create_account(owner, Currency::Usd, balance).await?)
}

pub fn usd_transfer(
    principal: &str,
    from: AccountId,
    to: AccountId,
    amount: Cents,
) -> CreateTransferParams {
    CreateTransferParams {
        principal: principal.to_string(),
        from_account_id: from,
        to_account_id: to,
        amount,
        currency: Currency::Usd,
    }
}

/// Current balance of an account, read through its owner.
pub async fn balance_of(service: &LedgerService, account: &Account) -> Result<Cents> {
    Ok(service.get_account(&account.owner, account.id).await?.balance)
}
