use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, NewAccount, Page, Transfer, TransferFilter,
    TransferId,
};

use super::{MIGRATION_001_INITIAL, queries};

/// Data access for accounts, entries and transfers.
///
/// Implemented once on the connection pool ([`Repository`]) and once on an
/// open transaction ([`TxRepository`]). Every method behaves the same in both;
/// writes through a `TxRepository` are durable only when its transaction
/// commits.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// True for a repository bound to an open transaction.
    fn in_transaction(&self) -> bool;

    async fn create_account(&self, account: &NewAccount) -> Result<Account>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>>;

    /// Delete an account that has no entries. Returns false if the account
    /// does not exist or has entries.
    async fn delete_account(&self, id: AccountId) -> Result<bool>;

    /// Atomically add `delta` to the stored balance and return the new balance,
    /// or `None` if the account does not exist.
    async fn add_account_balance(&self, id: AccountId, delta: Cents) -> Result<Option<Cents>>;

    async fn create_entry(
        &self,
        account_id: AccountId,
        amount: Cents,
        transfer_id: Option<TransferId>,
    ) -> Result<Entry>;

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>>;

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    async fn count_entries(&self, account_id: AccountId) -> Result<i64>;

    async fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer>;

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>>;

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>>;
}

/// Everything the integrity check needs, read in one transaction.
#[derive(Debug, Clone)]
pub struct IntegritySnapshot {
    pub accounts: Vec<Account>,
    pub entry_totals: HashMap<AccountId, Cents>,
    pub transfers: Vec<(Transfer, Vec<Entry>)>,
    pub entry_count: usize,
}

/// Top-level repository backed by a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using the given configuration.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect, creating the file, then migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let config = config.clone().with_create_if_missing(true);
        let repo = Self::connect(&config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire database connection")
    }

    /// Read accounts, entry totals and transfer entries from one snapshot.
    pub async fn integrity_snapshot(&self) -> Result<IntegritySnapshot> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin integrity snapshot")?;

        let accounts = queries::all_accounts(&mut tx).await?;
        let entry_totals = queries::entry_totals(&mut tx).await?;
        let entry_count = queries::count_all_entries(&mut tx).await?;
        let transfers = queries::all_transfers(&mut tx).await?;
        let mut linked = queries::transfer_entries(&mut tx).await?;

        tx.commit()
            .await
            .context("Failed to close integrity snapshot")?;

        let transfers = transfers
            .into_iter()
            .map(|transfer| {
                let entries = linked.remove(&transfer.id).unwrap_or_default();
                (transfer, entries)
            })
            .collect();

        Ok(IntegritySnapshot {
            accounts,
            entry_totals,
            transfers,
            entry_count: entry_count as usize,
        })
    }
}

#[async_trait]
impl LedgerRepository for Repository {
    fn in_transaction(&self) -> bool {
        false
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let mut conn = self.acquire().await?;
        queries::create_account(&mut conn, account).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let mut conn = self.acquire().await?;
        queries::get_account(&mut conn, id).await
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        let mut conn = self.acquire().await?;
        queries::list_accounts(&mut conn, owner, page).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool> {
        let mut conn = self.acquire().await?;
        queries::delete_account(&mut conn, id).await
    }

    async fn add_account_balance(&self, id: AccountId, delta: Cents) -> Result<Option<Cents>> {
        let mut conn = self.acquire().await?;
        queries::add_account_balance(&mut conn, id, delta).await
    }

    async fn create_entry(
        &self,
        account_id: AccountId,
        amount: Cents,
        transfer_id: Option<TransferId>,
    ) -> Result<Entry> {
        let mut conn = self.acquire().await?;
        queries::create_entry(&mut conn, account_id, amount, transfer_id).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        let mut conn = self.acquire().await?;
        queries::get_entry(&mut conn, id).await
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let mut conn = self.acquire().await?;
        queries::list_entries(&mut conn, account_id, page).await
    }

    async fn count_entries(&self, account_id: AccountId) -> Result<i64> {
        let mut conn = self.acquire().await?;
        queries::count_entries(&mut conn, account_id).await
    }

    async fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer> {
        let mut conn = self.acquire().await?;
        queries::create_transfer(&mut conn, from_account_id, to_account_id, amount).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>> {
        let mut conn = self.acquire().await?;
        queries::get_transfer(&mut conn, id).await
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        let mut conn = self.acquire().await?;
        queries::list_transfers(&mut conn, filter).await
    }
}

/// Repository bound to one open transaction.
///
/// Handed to the closure passed to
/// [`Transactional::run`](super::Transactional::run); it cannot start a
/// transaction of its own.
pub struct TxRepository {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

impl TxRepository {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    pub(crate) async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.into_inner().commit().await
    }

    pub(crate) async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.into_inner().rollback().await
    }
}

#[async_trait]
impl LedgerRepository for TxRepository {
    fn in_transaction(&self) -> bool {
        true
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let mut tx = self.tx.lock().await;
        queries::create_account(&mut tx, account).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let mut tx = self.tx.lock().await;
        queries::get_account(&mut tx, id).await
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        let mut tx = self.tx.lock().await;
        queries::list_accounts(&mut tx, owner, page).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool> {
        let mut tx = self.tx.lock().await;
        queries::delete_account(&mut tx, id).await
    }

    async fn add_account_balance(&self, id: AccountId, delta: Cents) -> Result<Option<Cents>> {
        let mut tx = self.tx.lock().await;
        queries::add_account_balance(&mut tx, id, delta).await
    }

    async fn create_entry(
        &self,
        account_id: AccountId,
        amount: Cents,
        transfer_id: Option<TransferId>,
    ) -> Result<Entry> {
        let mut tx = self.tx.lock().await;
        queries::create_entry(&mut tx, account_id, amount, transfer_id).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        let mut tx = self.tx.lock().await;
        queries::get_entry(&mut tx, id).await
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let mut tx = self.tx.lock().await;
        queries::list_entries(&mut tx, account_id, page).await
    }

    async fn count_entries(&self, account_id: AccountId) -> Result<i64> {
        let mut tx = self.tx.lock().await;
        queries::count_entries(&mut tx, account_id).await
    }

    async fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer> {
        let mut tx = self.tx.lock().await;
        queries::create_transfer(&mut tx, from_account_id, to_account_id, amount).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>> {
        let mut tx = self.tx.lock().await;
        queries::get_transfer(&mut tx, id).await
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        let mut tx = self.tx.lock().await;
        queries::list_transfers(&mut tx, filter).await
    }
}
