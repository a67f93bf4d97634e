use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Currency};

/// Store-assigned account identifier. Ordering on it is the lock order.
pub type AccountId = i64;

/// A balance-holding account owned by a single principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Principal that controls the account
    pub owner: String,
    /// Always equal to the sum of the account's entries
    pub balance: Cents,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.owner == principal
    }
}

/// Fields for inserting an account. Balances always start at zero; an
/// opening balance is booked as an entry afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: String,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            created_at: Utc::now(),
        }
    }
}

/// Limit/offset window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}
