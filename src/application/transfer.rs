use anyhow::anyhow;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    Account, AccountId, Cents, Currency, Transfer, balance_updates, transfer_postings,
};
use crate::storage::{LedgerRepository, Transactional};

use super::{LedgerError, LedgerService};

/// A transfer request as submitted by `principal`, who must own the source account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub principal: String,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Cents,
    pub currency: Currency,
}

impl<R> LedgerService<R>
where
    R: LedgerRepository + Transactional,
{
    /// Move `amount` between two accounts of the same currency.
    ///
    /// Validation happens before any transaction is opened. The transfer row,
    /// its debit and credit entries, and both balance changes are then
    /// written in one transaction: either all of them land or none do.
    pub async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        let CreateTransferParams {
            principal,
            from_account_id,
            to_account_id,
            amount,
            currency,
        } = params;

        if amount <= 0 {
            warn!(amount, "rejected transfer with non-positive amount");
            return Err(LedgerError::InvalidAmount(
                amount,
                "transfer amount must be positive",
            ));
        }
        if from_account_id == to_account_id {
            warn!(account_id = from_account_id, "rejected transfer to the same account");
            return Err(LedgerError::SameAccount(from_account_id));
        }

        let from = self.account_in_currency(from_account_id, currency).await?;
        if !from.is_owned_by(&principal) {
            warn!(
                account_id = from.id,
                principal = %principal,
                "rejected transfer from an account the principal does not own"
            );
            return Err(LedgerError::Unauthorized {
                account_id: from.id,
                principal,
            });
        }
        self.account_in_currency(to_account_id, currency).await?;

        debug!(from_account_id, to_account_id, amount, "recording transfer");
        let transfer = self
            .repo
            .run(move |tx| record_transfer(tx, from_account_id, to_account_id, amount).boxed())
            .await?;

        info!(
            transfer_id = transfer.id,
            from_account_id,
            to_account_id,
            amount,
            currency = %currency,
            "transfer completed"
        );
        Ok(transfer)
    }

    async fn account_in_currency(
        &self,
        id: AccountId,
        currency: Currency,
    ) -> Result<Account, LedgerError> {
        let account = self.fetch_account(id).await?;
        if account.currency != currency {
            warn!(
                account_id = id,
                account_currency = %account.currency,
                requested = %currency,
                "rejected transfer with mismatched currency"
            );
            return Err(LedgerError::CurrencyMismatch {
                account_id: id,
                account_currency: account.currency,
                requested: currency,
            });
        }
        Ok(account)
    }
}

/// The atomic body of a transfer. Balances are touched lower account id
/// first so concurrent opposite-direction transfers acquire row locks in the
/// same order.
async fn record_transfer<S: LedgerRepository>(
    tx: &S,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: Cents,
) -> Result<Transfer, LedgerError> {
    let transfer = tx
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;

    for posting in transfer_postings(from_account_id, to_account_id, amount) {
        tx.create_entry(posting.account_id, posting.delta, Some(transfer.id))
            .await?;
    }

    for change in balance_updates(from_account_id, to_account_id, amount) {
        let balance = tx
            .add_account_balance(change.account_id, change.delta)
            .await?
            .ok_or(LedgerError::AccountNotFound(change.account_id))?;
        debug!(account_id = change.account_id, balance, "balance updated");
    }

    let stored = tx
        .get_transfer(transfer.id)
        .await?
        .ok_or_else(|| anyhow!("transfer {} missing after insert", transfer.id))?;
    Ok(stored)
}
