//! In-memory store for exercising the service layer without SQLite.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use super::{LedgerRepository, TransactionError, Transactional};
use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, NewAccount, Page, Transfer, TransferFilter,
    TransferId,
};

#[derive(Debug, Clone, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store that records every call and can be told to fail one operation.
/// Transactions snapshot the state and restore it on rollback.
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Option<&'static str>>>,
    transactions: Arc<AtomicUsize>,
    in_transaction: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            calls: Arc::default(),
            fail_on: Arc::default(),
            transactions: Arc::default(),
            in_transaction: false,
        }
    }

    /// Insert an account with a given id, owner, balance and currency.
    pub fn seed_account(&self, account: Account) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(account.id);
        state.accounts.insert(account.id, account);
    }

    /// Make the next call to `operation` fail.
    pub fn fail_on(&self, operation: &'static str) {
        *self.fail_on.lock().unwrap() = Some(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transactions_started(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.state.lock().unwrap().accounts.get(&id).cloned()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    /// Another handle on the same store, inside a transaction if this one is.
    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            calls: Arc::clone(&self.calls),
            fail_on: Arc::clone(&self.fail_on),
            transactions: Arc::clone(&self.transactions),
            in_transaction: self.in_transaction,
        }
    }

    fn scoped(&self) -> Self {
        Self {
            in_transaction: true,
            ..self.handle()
        }
    }

    fn record(&self, call: String) -> Result<()> {
        let name = call.split('(').next().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(call);

        let mut fail_on = self.fail_on.lock().unwrap();
        if fail_on.is_some_and(|op| op == name) {
            *fail_on = None;
            bail!("injected failure in {}", name);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account> {
        self.record(format!("create_account({})", account.owner))?;
        let mut state = self.state.lock().unwrap();
        let account = Account {
            id: state.next_id(),
            owner: account.owner.clone(),
            balance: 0,
            currency: account.currency,
            created_at: account.created_at,
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.record(format!("get_account({})", id))?;
        Ok(self.account(id))
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        self.record(format!("list_accounts({})", owner))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool> {
        self.record(format!("delete_account({})", id))?;
        let mut state = self.state.lock().unwrap();
        if state.entries.iter().any(|entry| entry.account_id == id) {
            return Ok(false);
        }
        Ok(state.accounts.remove(&id).is_some())
    }

    async fn add_account_balance(&self, id: AccountId, delta: Cents) -> Result<Option<Cents>> {
        self.record(format!("add_account_balance({}, {})", id, delta))?;
        let mut state = self.state.lock().unwrap();
        Ok(state.accounts.get_mut(&id).map(|account| {
            account.balance += delta;
            account.balance
        }))
    }

    async fn create_entry(
        &self,
        account_id: AccountId,
        amount: Cents,
        transfer_id: Option<TransferId>,
    ) -> Result<Entry> {
        self.record(format!("create_entry({}, {})", account_id, amount))?;
        let mut state = self.state.lock().unwrap();
        let entry = Entry {
            id: state.next_id(),
            account_id,
            amount,
            transfer_id,
            created_at: Utc::now(),
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        self.record(format!("get_entry({})", id))?;
        let state = self.state.lock().unwrap();
        Ok(state.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.record(format!("list_entries({})", account_id))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_entries(&self, account_id: AccountId) -> Result<i64> {
        self.record(format!("count_entries({})", account_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.entries.iter().filter(|e| e.account_id == account_id).count() as i64)
    }

    async fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer> {
        self.record(format!(
            "create_transfer({}, {}, {})",
            from_account_id, to_account_id, amount
        ))?;
        let mut state = self.state.lock().unwrap();
        let transfer = Transfer {
            id: state.next_id(),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        state.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>> {
        self.record(format!("get_transfer({})", id))?;
        let state = self.state.lock().unwrap();
        Ok(state.transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        self.record("list_transfers()".to_string())?;
        let state = self.state.lock().unwrap();
        let page = filter.page.unwrap_or(Page::new(u32::MAX, 0));
        Ok(state
            .transfers
            .iter()
            .filter(|t| filter.account.is_none_or(|id| t.involves(id)))
            .filter(|t| filter.from_account.is_none_or(|id| t.from_account_id == id))
            .filter(|t| filter.to_account.is_none_or(|id| t.to_account_id == id))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }
}

impl Transactional for MemoryStore {
    type Scoped = MemoryStore;

    fn run<'a, T, E, F>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<TransactionError> + Send + 'a,
        F: for<'t> FnOnce(&'t Self::Scoped) -> BoxFuture<'t, Result<T, E>> + Send + 'a,
    {
        if self.in_transaction {
            return Box::pin(future::ready(Err(TransactionError::Nested.into())));
        }

        Box::pin(async move {
            self.transactions.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push("begin".to_string());
            let snapshot = self.state.lock().unwrap().clone();
            let scoped = self.scoped();

            let outcome = AssertUnwindSafe(async { f(&scoped).await })
                .catch_unwind()
                .await;

            let committed = matches!(outcome, Ok(Ok(_)));
            if !committed {
                *self.state.lock().unwrap() = snapshot;
            }
            self.calls
                .lock()
                .unwrap()
                .push(if committed { "commit" } else { "rollback" }.to_string());

            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}
