//! SQL for the ledger tables.
//!
//! Every function runs on a plain connection so the pool-backed and the
//! transaction-backed repositories share one copy of each statement.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{
    Account, AccountId, Cents, Currency, Entry, EntryId, NewAccount, Page, Transfer,
    TransferFilter, TransferId,
};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, transfer_id, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

// ========================
// Accounts
// ========================

pub(crate) async fn create_account(
    conn: &mut SqliteConnection,
    account: &NewAccount,
) -> Result<Account> {
    let row = sqlx::query(&format!(
        "INSERT INTO accounts (owner, balance, currency, created_at) VALUES (?, 0, ?, ?) RETURNING {}",
        ACCOUNT_COLUMNS
    ))
    .bind(&account.owner)
    .bind(account.currency.as_str())
    .bind(account.created_at.to_rfc3339())
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create account")?;

    row_to_account(&row)
}

pub(crate) async fn get_account(
    conn: &mut SqliteConnection,
    id: AccountId,
) -> Result<Option<Account>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE id = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch account")?;

    row.as_ref().map(row_to_account).transpose()
}

pub(crate) async fn list_accounts(
    conn: &mut SqliteConnection,
    owner: &str,
    page: Page,
) -> Result<Vec<Account>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE owner = ? ORDER BY id LIMIT ? OFFSET ?",
        ACCOUNT_COLUMNS
    ))
    .bind(owner)
    .bind(i64::from(page.limit))
    .bind(i64::from(page.offset))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list accounts")?;

    rows.iter().map(row_to_account).collect()
}

pub(crate) async fn all_accounts(conn: &mut SqliteConnection) -> Result<Vec<Account>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM accounts ORDER BY id",
        ACCOUNT_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list all accounts")?;

    rows.iter().map(row_to_account).collect()
}

/// Entry check and delete are one statement, so an entry booked concurrently
/// either blocks the delete or lands after it.
pub(crate) async fn delete_account(conn: &mut SqliteConnection, id: AccountId) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM accounts WHERE id = ? AND NOT EXISTS (SELECT 1 FROM entries WHERE account_id = ?)",
    )
    .bind(id)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("Failed to delete account")?;

    Ok(result.rows_affected() > 0)
}

/// Single-statement increment: the new balance is computed by the store, so
/// concurrent updates to one row can never lose each other's delta.
pub(crate) async fn add_account_balance(
    conn: &mut SqliteConnection,
    id: AccountId,
    delta: Cents,
) -> Result<Option<Cents>> {
    let row = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = balance + ?
        WHERE id = ?
        RETURNING balance
        "#,
    )
    .bind(delta)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("Failed to add {} to balance of account {}", delta, id))?;

    Ok(row.map(|row| row.get("balance")))
}

// ========================
// Entries
// ========================

pub(crate) async fn create_entry(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    amount: Cents,
    transfer_id: Option<TransferId>,
) -> Result<Entry> {
    let row = sqlx::query(&format!(
        "INSERT INTO entries (account_id, amount, transfer_id, created_at) VALUES (?, ?, ?, ?) RETURNING {}",
        ENTRY_COLUMNS
    ))
    .bind(account_id)
    .bind(amount)
    .bind(transfer_id)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create entry")?;

    row_to_entry(&row)
}

pub(crate) async fn get_entry(conn: &mut SqliteConnection, id: EntryId) -> Result<Option<Entry>> {
    let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch entry")?;

    row.as_ref().map(row_to_entry).transpose()
}

pub(crate) async fn list_entries(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    page: Page,
) -> Result<Vec<Entry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM entries WHERE account_id = ? ORDER BY id LIMIT ? OFFSET ?",
        ENTRY_COLUMNS
    ))
    .bind(account_id)
    .bind(i64::from(page.limit))
    .bind(i64::from(page.offset))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list entries")?;

    rows.iter().map(row_to_entry).collect()
}

pub(crate) async fn count_entries(conn: &mut SqliteConnection, account_id: AccountId) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM entries WHERE account_id = ?")
        .bind(account_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count entries")?;

    Ok(row.get("count"))
}

pub(crate) async fn count_all_entries(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM entries")
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count entries")?;

    Ok(row.get("count"))
}

/// Sum of entry amounts per account.
pub(crate) async fn entry_totals(conn: &mut SqliteConnection) -> Result<HashMap<AccountId, Cents>> {
    let rows = sqlx::query(
        r#"
        SELECT account_id, SUM(amount) as total
        FROM entries
        GROUP BY account_id
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to sum entries")?;

    Ok(rows
        .iter()
        .map(|row| (row.get("account_id"), row.get("total")))
        .collect())
}

/// Transfer-linked entries grouped by transfer id.
pub(crate) async fn transfer_entries(
    conn: &mut SqliteConnection,
) -> Result<HashMap<TransferId, Vec<Entry>>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM entries WHERE transfer_id IS NOT NULL ORDER BY id",
        ENTRY_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list transfer entries")?;

    let mut grouped: HashMap<TransferId, Vec<Entry>> = HashMap::new();
    for row in &rows {
        let entry = row_to_entry(row)?;
        if let Some(transfer_id) = entry.transfer_id {
            grouped.entry(transfer_id).or_default().push(entry);
        }
    }
    Ok(grouped)
}

// ========================
// Transfers
// ========================

pub(crate) async fn create_transfer(
    conn: &mut SqliteConnection,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: Cents,
) -> Result<Transfer> {
    let row = sqlx::query(&format!(
        "INSERT INTO transfers (from_account_id, to_account_id, amount, created_at) VALUES (?, ?, ?, ?) RETURNING {}",
        TRANSFER_COLUMNS
    ))
    .bind(from_account_id)
    .bind(to_account_id)
    .bind(amount)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create transfer")?;

    row_to_transfer(&row)
}

pub(crate) async fn get_transfer(
    conn: &mut SqliteConnection,
    id: TransferId,
) -> Result<Option<Transfer>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM transfers WHERE id = ?",
        TRANSFER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch transfer")?;

    row.as_ref().map(row_to_transfer).transpose()
}

pub(crate) async fn all_transfers(conn: &mut SqliteConnection) -> Result<Vec<Transfer>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM transfers ORDER BY id",
        TRANSFER_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list all transfers")?;

    rows.iter().map(row_to_transfer).collect()
}

/// List transfers with optional filters, oldest first.
pub(crate) async fn list_transfers(
    conn: &mut SqliteConnection,
    filter: &TransferFilter,
) -> Result<Vec<Transfer>> {
    // Build query dynamically based on filters
    let mut query = format!("SELECT {} FROM transfers WHERE 1=1", TRANSFER_COLUMNS);

    if filter.account.is_some() {
        query.push_str(" AND (from_account_id = ? OR to_account_id = ?)");
    }
    if filter.from_account.is_some() {
        query.push_str(" AND from_account_id = ?");
    }
    if filter.to_account.is_some() {
        query.push_str(" AND to_account_id = ?");
    }

    query.push_str(" ORDER BY id");

    if filter.page.is_some() {
        query.push_str(" LIMIT ? OFFSET ?");
    }

    let mut sql_query = sqlx::query(&query);

    if let Some(account_id) = filter.account {
        sql_query = sql_query.bind(account_id).bind(account_id);
    }
    if let Some(from) = filter.from_account {
        sql_query = sql_query.bind(from);
    }
    if let Some(to) = filter.to_account {
        sql_query = sql_query.bind(to);
    }
    if let Some(page) = filter.page {
        sql_query = sql_query
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset));
    }

    let rows = sql_query
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list transfers")?;

    rows.iter().map(row_to_transfer).collect()
}

// ========================
// Row mapping
// ========================

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let currency_str: String = row.get("currency");
    let created_at_str: String = row.get("created_at");

    Ok(Account {
        id: row.get("id"),
        owner: row.get("owner"),
        balance: row.get("balance"),
        currency: currency_str
            .parse::<Currency>()
            .context("Invalid account currency")?,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry> {
    let created_at_str: String = row.get("created_at");

    Ok(Entry {
        id: row.get("id"),
        account_id: row.get("account_id"),
        amount: row.get("amount"),
        transfer_id: row.get("transfer_id"),
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn row_to_transfer(row: &SqliteRow) -> Result<Transfer> {
    let created_at_str: String = row.get("created_at");

    Ok(Transfer {
        id: row.get("id"),
        from_account_id: row.get("from_account_id"),
        to_account_id: row.get("to_account_id"),
        amount: row.get("amount"),
        created_at: parse_timestamp(&created_at_str)?,
    })
}
