use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::{Account, AccountId, Cents, Entry, Transfer, TransferId};

/// A signed change to apply to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub account_id: AccountId,
    pub delta: Cents,
}

impl BalanceChange {
    pub fn new(account_id: AccountId, delta: Cents) -> Self {
        Self { account_id, delta }
    }
}

/// Order two account ids so the lower one comes first.
///
/// Every code path that touches two balances in one transaction locks them in
/// this order, so two transactions over the same pair can never wait on each
/// other in a cycle.
pub fn ordered_pair(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// The two entries a transfer produces: debit on the source, credit on the
/// destination. They always sum to zero.
pub fn transfer_postings(from: AccountId, to: AccountId, amount: Cents) -> [BalanceChange; 2] {
    [BalanceChange::new(from, -amount), BalanceChange::new(to, amount)]
}

/// The balance updates for a transfer, in lock order.
pub fn balance_updates(from: AccountId, to: AccountId, amount: Cents) -> [BalanceChange; 2] {
    let [debit, credit] = transfer_postings(from, to, amount);
    let (first, _) = ordered_pair(from, to);
    if first == from {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Check that a transfer's linked entries are exactly its two postings.
pub fn verify_transfer_entries(transfer: &Transfer, entries: &[Entry]) -> Result<(), String> {
    if entries.len() != 2 {
        return Err(format!("has {} entries, expected 2", entries.len()));
    }

    let sum: Cents = entries.iter().map(|e| e.amount).sum();
    if sum != 0 {
        return Err(format!("entries sum to {}, expected 0", sum));
    }

    let expected = transfer_postings(transfer.from_account_id, transfer.to_account_id, transfer.amount);
    for posting in expected {
        let found = entries
            .iter()
            .any(|e| e.account_id == posting.account_id && e.amount == posting.delta);
        if !found {
            return Err(format!(
                "missing entry of {} on account {}",
                posting.delta, posting.account_id
            ));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Stored balance differs from the sum of the account's entries
    BalanceMismatch {
        account_id: AccountId,
        stored: Cents,
        from_entries: Cents,
    },
    /// Transfer entries do not balance or do not match the transfer
    TransferEntries {
        transfer_id: TransferId,
        reason: String,
    },
    /// Entries exist for an account id that has no account row
    UnknownAccount { account_id: AccountId },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                account_id,
                stored,
                from_entries,
            } => write!(
                f,
                "Account {}: stored balance {} but entries sum to {}",
                account_id, stored, from_entries
            ),
            IntegrityIssue::TransferEntries {
                transfer_id,
                reason,
            } => write!(f, "Transfer {}: {}", transfer_id, reason),
            IntegrityIssue::UnknownAccount { account_id } => {
                write!(f, "Entries reference unknown account {}", account_id)
            }
        }
    }
}

/// Result of checking the ledger invariants.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transfer_count: usize,
    pub entry_count: usize,
    /// Sum of all balances; opening balances are the only entries that do not net out
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Build an integrity report from stored accounts, per-account entry totals,
/// and every transfer with its linked entries.
pub fn build_integrity_report(
    accounts: &[Account],
    entry_totals: &HashMap<AccountId, Cents>,
    transfers: &[(Transfer, Vec<Entry>)],
    entry_count: usize,
) -> IntegrityReport {
    let mut issues = Vec::new();

    for account in accounts {
        let from_entries = entry_totals.get(&account.id).copied().unwrap_or(0);
        if account.balance != from_entries {
            issues.push(IntegrityIssue::BalanceMismatch {
                account_id: account.id,
                stored: account.balance,
                from_entries,
            });
        }
    }

    let mut unknown: Vec<AccountId> = entry_totals
        .keys()
        .filter(|id| !accounts.iter().any(|a| a.id == **id))
        .copied()
        .collect();
    unknown.sort_unstable();
    issues.extend(
        unknown
            .into_iter()
            .map(|account_id| IntegrityIssue::UnknownAccount { account_id }),
    );

    for (transfer, entries) in transfers {
        if let Err(reason) = verify_transfer_entries(transfer, entries) {
            issues.push(IntegrityIssue::TransferEntries {
                transfer_id: transfer.id,
                reason,
            });
        }
    }

    IntegrityReport {
        account_count: accounts.len(),
        transfer_count: transfers.len(),
        entry_count,
        total_balance: accounts
            .iter()
            .fold(0, |total: Cents, a| total.saturating_add(a.balance)),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::Currency;

    fn entry(id: i64, account_id: AccountId, amount: Cents, transfer_id: Option<TransferId>) -> Entry {
        Entry {
            id,
            account_id,
            amount,
            transfer_id,
            created_at: Utc::now(),
        }
    }

    fn account(id: AccountId, balance: Cents) -> Account {
        Account {
            id,
            owner: format!("owner-{}", id),
            balance,
            currency: Currency::Usd,
            created_at: Utc::now(),
        }
    }

    fn transfer(id: TransferId, from: AccountId, to: AccountId, amount: Cents) -> Transfer {
        Transfer {
            id,
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ordered_pair() {
        assert_eq!(ordered_pair(1, 2), (1, 2));
        assert_eq!(ordered_pair(2, 1), (1, 2));
        assert_eq!(ordered_pair(7, 7), (7, 7));
        assert_eq!(ordered_pair(-3, 4), (-3, 4));
    }

    #[test]
    fn test_ordered_pair_is_symmetric() {
        for (a, b) in [(1, 9), (42, 3), (100, 101)] {
            assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
        }
    }

    #[test]
    fn test_postings_sum_to_zero() {
        let [debit, credit] = transfer_postings(5, 9, 3000);
        assert_eq!(debit, BalanceChange::new(5, -3000));
        assert_eq!(credit, BalanceChange::new(9, 3000));
        assert_eq!(debit.delta + credit.delta, 0);
    }

    #[test]
    fn test_balance_updates_lower_id_first() {
        assert_eq!(
            balance_updates(1, 2, 100),
            [BalanceChange::new(1, -100), BalanceChange::new(2, 100)]
        );
        // Opposite direction over the same pair still touches account 1 first
        assert_eq!(
            balance_updates(2, 1, 100),
            [BalanceChange::new(1, 100), BalanceChange::new(2, -100)]
        );
    }

    #[test]
    fn test_verify_transfer_entries() {
        let t = transfer(1, 1, 2, 500);
        assert!(verify_transfer_entries(&t, &[entry(1, 1, -500, Some(1)), entry(2, 2, 500, Some(1))]).is_ok());

        let err = verify_transfer_entries(&t, &[entry(1, 1, -500, Some(1))]).unwrap_err();
        assert!(err.contains("1 entries"));

        // Balanced, but on the wrong sides
        let err = verify_transfer_entries(&t, &[entry(1, 1, 500, Some(1)), entry(2, 2, -500, Some(1))])
            .unwrap_err();
        assert!(err.contains("missing entry"));

        let err = verify_transfer_entries(&t, &[entry(1, 1, -500, Some(1)), entry(2, 2, 400, Some(1))])
            .unwrap_err();
        assert!(err.contains("sum to -100"));
    }

    #[test]
    fn test_integrity_report_healthy() {
        let accounts = vec![account(1, 7000), account(2, 3000)];
        let t = transfer(1, 1, 2, 3000);
        let entries = vec![
            entry(1, 1, 10000, None),
            entry(2, 1, -3000, Some(1)),
            entry(3, 2, 3000, Some(1)),
        ];
        let totals = HashMap::from([(1, 7000), (2, 3000)]);
        let linked = vec![(t, entries[1..].to_vec())];

        let report = build_integrity_report(&accounts, &totals, &linked, entries.len());

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.account_count, 2);
        assert_eq!(report.transfer_count, 1);
        assert_eq!(report.entry_count, 3);
        assert_eq!(report.total_balance, 10000);
    }

    #[test]
    fn test_integrity_report_detects_issues() {
        let accounts = vec![account(1, 9999)];
        let totals = HashMap::from([(1, 10000), (4, 20)]);
        let linked = vec![(transfer(3, 1, 2, 10), vec![])];

        let report = build_integrity_report(&accounts, &totals, &linked, 2);

        assert!(!report.is_healthy());
        assert_eq!(
            report.issues,
            vec![
                IntegrityIssue::BalanceMismatch {
                    account_id: 1,
                    stored: 9999,
                    from_entries: 10000
                },
                IntegrityIssue::UnknownAccount { account_id: 4 },
                IntegrityIssue::TransferEntries {
                    transfer_id: 3,
                    reason: "has 0 entries, expected 2".to_string()
                },
            ]
        );
    }
}
