use futures::FutureExt;
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, Cents, Currency, Entry, IntegrityReport, NewAccount, Page, Transfer,
    TransferFilter, TransferId, build_integrity_report,
};
use crate::storage::{LedgerRepository, Repository, Transactional};

use super::LedgerError;

/// Application service providing the ledger operations.
/// This is the primary interface for any client (CLI, API, RPC handlers, etc.).
pub struct LedgerService<R = Repository> {
    pub(super) repo: R,
}

impl LedgerService<Repository> {
    /// Initialize a database (created if missing) and connect to it.
    pub async fn init(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::init(config).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    /// Check that balances match entries and that every transfer has its two
    /// balancing entries.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let snapshot = self.repo.integrity_snapshot().await?;
        let report = build_integrity_report(
            &snapshot.accounts,
            &snapshot.entry_totals,
            &snapshot.transfers,
            snapshot.entry_count,
        );

        if !report.is_healthy() {
            warn!(issues = report.issues.len(), "ledger integrity check failed");
        }
        Ok(report)
    }
}

impl<R> LedgerService<R>
where
    R: LedgerRepository + Transactional,
{
    /// Create a new ledger service with the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account. A positive opening balance is booked as an entry in
    /// the same transaction, so the balance always equals its entries.
    pub async fn create_account(
        &self,
        owner: &str,
        currency: Currency,
        opening_balance: Cents,
    ) -> Result<Account, LedgerError> {
        if opening_balance < 0 {
            return Err(LedgerError::InvalidAmount(
                opening_balance,
                "opening balance cannot be negative",
            ));
        }

        let new_account = NewAccount::new(owner, currency);
        let account = self
            .repo
            .run(move |tx| open_account(tx, new_account, opening_balance).boxed())
            .await?;

        info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            balance = account.balance,
            "account created"
        );
        Ok(account)
    }

    /// Get an account owned by `principal`.
    pub async fn get_account(
        &self,
        principal: &str,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = self.fetch_account(id).await?;
        ensure_owner(&account, principal)?;
        Ok(account)
    }

    /// List the accounts owned by `owner`.
    pub async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, LedgerError> {
        Ok(self.repo.list_accounts(owner, page).await?)
    }

    /// Delete an account owned by `principal`. Only accounts without entries
    /// can be deleted; anything else would orphan ledger history.
    pub async fn delete_account(
        &self,
        principal: &str,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = self.get_account(principal, id).await?;

        // The account existed a moment ago, so a refused delete means it has
        // entries by now.
        if !self.repo.delete_account(id).await? {
            return Err(LedgerError::AccountInUse(id));
        }

        info!(account_id = id, owner = %account.owner, "account deleted");
        Ok(account)
    }

    /// Look up an account without an ownership check.
    pub(crate) async fn fetch_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    // ========================
    // Entry operations
    // ========================

    /// List entries of an account owned by `principal`, oldest first.
    pub async fn list_entries(
        &self,
        principal: &str,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.get_account(principal, account_id).await?;
        Ok(self.repo.list_entries(account_id, page).await?)
    }

    // ========================
    // Transfer queries
    // ========================

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer, LedgerError> {
        self.repo
            .get_transfer(id)
            .await?
            .ok_or(LedgerError::TransferNotFound(id))
    }

    pub async fn list_transfers(
        &self,
        filter: &TransferFilter,
    ) -> Result<Vec<Transfer>, LedgerError> {
        Ok(self.repo.list_transfers(filter).await?)
    }
}

fn ensure_owner(account: &Account, principal: &str) -> Result<(), LedgerError> {
    if account.is_owned_by(principal) {
        Ok(())
    } else {
        warn!(account_id = account.id, principal, "account does not belong to principal");
        Err(LedgerError::Unauthorized {
            account_id: account.id,
            principal: principal.to_string(),
        })
    }
}

async fn open_account<S: LedgerRepository>(
    tx: &S,
    new_account: NewAccount,
    opening_balance: Cents,
) -> Result<Account, LedgerError> {
    let mut account = tx.create_account(&new_account).await?;

    if opening_balance > 0 {
        tx.create_entry(account.id, opening_balance, None).await?;
        account.balance = tx
            .add_account_balance(account.id, opening_balance)
            .await?
            .ok_or(LedgerError::AccountNotFound(account.id))?;
    }

    Ok(account)
}
