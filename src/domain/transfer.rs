use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Cents, Page};

pub type TransferId = i64;

/// A movement of money from one account to another.
/// Transfers are immutable; each one is realised as two balancing entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Source account (balance decreases)
    pub from_account_id: AccountId,
    /// Destination account (balance increases)
    pub to_account_id: AccountId,
    /// Always positive
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Returns true if the account is either side of this transfer.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }

    /// Signed effect of this transfer on the given account's balance.
    pub fn delta_for(&self, account_id: AccountId) -> Cents {
        if account_id == self.from_account_id {
            -self.amount
        } else if account_id == self.to_account_id {
            self.amount
        } else {
            0
        }
    }
}

/// Filter for querying transfers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    /// Either side of the transfer
    pub account: Option<AccountId>,
    pub from_account: Option<AccountId>,
    pub to_account: Option<AccountId>,
    pub page: Option<Page>,
}

impl TransferFilter {
    pub fn for_account(account_id: AccountId) -> Self {
        Self {
            account: Some(account_id),
            ..Self::default()
        }
    }
}
