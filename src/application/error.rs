use thiserror::Error;

use crate::domain::{AccountId, Cents, Currency, TransferId, UnsupportedCurrency};
use crate::storage::TransactionError;

/// Transport-neutral failure classes. Delivery layers map these to their own
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Invalid amount {0}: {1}")]
    InvalidAmount(Cents, &'static str),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    #[error("Account {account_id} currency mismatch: {account_currency} vs {requested}")]
    CurrencyMismatch {
        account_id: AccountId,
        account_currency: Currency,
        requested: Currency,
    },

    #[error(transparent)]
    UnsupportedCurrency(#[from] UnsupportedCurrency),

    #[error("Account {0} has entries and cannot be deleted")]
    AccountInUse(AccountId),

    #[error("Account {account_id} does not belong to {principal}")]
    Unauthorized {
        account_id: AccountId,
        principal: String,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_) | LedgerError::TransferNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::InvalidAmount(..)
            | LedgerError::SameAccount(_)
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::AccountInUse(_) => ErrorKind::InvalidArgument,
            LedgerError::Unauthorized { .. } => ErrorKind::Unauthorized,
            LedgerError::Transaction(_) | LedgerError::Database(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::AccountNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::TransferNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(
            LedgerError::InvalidAmount(0, "must be positive").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(LedgerError::SameAccount(3).kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            LedgerError::UnsupportedCurrency(UnsupportedCurrency("GBP".into())).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            LedgerError::Unauthorized {
                account_id: 1,
                principal: "mallory".into()
            }
            .kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            LedgerError::Transaction(TransactionError::Nested).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            LedgerError::Database(anyhow::anyhow!("disk I/O error")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_display() {
        let err = LedgerError::CurrencyMismatch {
            account_id: 7,
            account_currency: Currency::Eur,
            requested: Currency::Usd,
        };
        assert_eq!(err.to_string(), "Account 7 currency mismatch: EUR vs USD");
        assert_eq!(ErrorKind::Unauthorized.to_string(), "UNAUTHORIZED");
        assert_eq!(
            LedgerError::Transaction(TransactionError::Nested).to_string(),
            "nested transactions are not supported"
        );
    }
}
