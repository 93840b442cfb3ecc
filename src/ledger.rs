//! Append-only coin ledger with hold/settle/release semantics
//!
//! One account per user; transactions are appended and never removed. The
//! cached balance always equals the signed sum of Completed transactions and
//! can be re-derived by `replay` at any time. Holds follow the uniform
//! hold-then-settle model: a hold is a Pending negative row that leaves the
//! balance untouched but is subtracted from the *available* balance; only
//! settlement makes the debit permanent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RefnetError;
use crate::graph::UserId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxKind {
    Earn,
    Bonus,
    AdminAdjust,
    WithdrawalHold,
    WithdrawalRefund,
    WithdrawalSettle,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub account: UserId,
    pub kind: TxKind,
    /// Signed amount in the smallest coin unit
    pub amount: i64,
    pub status: TxStatus,
    /// Globally unique idempotency key supplied by the caller
    pub reference: String,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LedgerAccount {
    pub transactions: Vec<Transaction>,
    /// Cache of the Completed sum; never authoritative, see `replay`
    pub balance: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CoinLedger {
    accounts: HashMap<UserId, LedgerAccount>,
    /// reference -> owning account, enforces global uniqueness
    references: HashMap<String, UserId>,
}

/// Earned/withdrawn lifetime totals for the balance query
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountTotals {
    pub total_earned: i64,
    pub total_withdrawn: i64,
}

impl CoinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_account(&self, account: &UserId) -> bool {
        self.accounts.contains_key(account)
    }

    pub fn balance(&self, account: &UserId) -> i64 {
        self.accounts.get(account).map(|a| a.balance).unwrap_or(0)
    }

    /// Sum of amounts currently locked by pending holds (positive number)
    pub fn held(&self, account: &UserId) -> i64 {
        self.accounts
            .get(account)
            .map(|a| {
                a.transactions
                    .iter()
                    .filter(|t| t.status == TxStatus::Pending && t.amount < 0)
                    .map(|t| -t.amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Balance minus pending holds; the spendable figure
    pub fn available(&self, account: &UserId) -> i64 {
        self.balance(account) - self.held(account)
    }

    /// Append a completed positive transaction. The reference is an
    /// idempotency guard against retried external calls.
    pub fn credit(
        &mut self,
        account: &UserId,
        amount: i64,
        kind: TxKind,
        reference: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Transaction, RefnetError> {
        if amount <= 0 {
            return Err(RefnetError::Validation(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        let new_balance = self.balance(account).checked_add(amount).ok_or_else(|| {
            RefnetError::Validation("balance overflow".to_string())
        })?;
        self.claim_reference(account, reference)?;

        let entry = self.accounts.entry(account.clone()).or_default();
        let tx = Transaction {
            id: Uuid::new_v4(),
            account: account.clone(),
            kind,
            amount,
            status: TxStatus::Completed,
            reference: reference.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        entry.balance = new_balance;
        entry.transactions.push(tx.clone());
        debug!("Credit {} to {} ({:?}, ref {})", amount, account, kind, reference);
        Ok(tx)
    }

    /// Append a completed negative transaction. Checked against the
    /// *available* balance so a direct debit can never undermine a hold.
    pub fn debit(
        &mut self,
        account: &UserId,
        amount: i64,
        kind: TxKind,
        reference: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Transaction, RefnetError> {
        if amount <= 0 {
            return Err(RefnetError::Validation(format!(
                "debit amount must be positive, got {}",
                amount
            )));
        }
        let available = self.available(account);
        if available < amount {
            return Err(RefnetError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        self.claim_reference(account, reference)?;

        let entry = self.accounts.entry(account.clone()).or_default();
        let tx = Transaction {
            id: Uuid::new_v4(),
            account: account.clone(),
            kind,
            amount: -amount,
            status: TxStatus::Completed,
            reference: reference.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        entry.balance -= amount;
        entry.transactions.push(tx.clone());
        debug!("Debit {} from {} ({:?}, ref {})", amount, account, kind, reference);
        Ok(tx)
    }

    /// Reserve funds for a withdrawal: a Pending negative row. The balance is
    /// untouched until settlement, but the amount leaves "available".
    pub fn hold(
        &mut self,
        account: &UserId,
        amount: i64,
        reference: &str,
    ) -> Result<Transaction, RefnetError> {
        if amount <= 0 {
            return Err(RefnetError::Validation(format!(
                "hold amount must be positive, got {}",
                amount
            )));
        }
        let available = self.available(account);
        if available < amount {
            return Err(RefnetError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        self.claim_reference(account, reference)?;

        let entry = self.accounts.entry(account.clone()).or_default();
        let tx = Transaction {
            id: Uuid::new_v4(),
            account: account.clone(),
            kind: TxKind::WithdrawalHold,
            amount: -amount,
            status: TxStatus::Pending,
            reference: reference.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        entry.transactions.push(tx.clone());
        info!("Hold {} on {} (ref {})", amount, account, reference);
        Ok(tx)
    }

    /// Settle a pending hold: the point at which the balance is permanently
    /// reduced. The row flips to Completed and is relabeled WithdrawalSettle.
    pub fn settle(&mut self, reference: &str) -> Result<Transaction, RefnetError> {
        let tx = self.resolve_hold(reference, TxStatus::Completed, TxKind::WithdrawalSettle)?;
        info!("Settled hold {} ({} on {})", reference, -tx.amount, tx.account);
        Ok(tx)
    }

    /// Cancel a pending hold: the amount returns to "available" with no
    /// balance change. The row flips to Failed and is relabeled
    /// WithdrawalRefund.
    pub fn release(&mut self, reference: &str) -> Result<Transaction, RefnetError> {
        let tx = self.resolve_hold(reference, TxStatus::Failed, TxKind::WithdrawalRefund)?;
        info!("Released hold {} ({} on {})", reference, -tx.amount, tx.account);
        Ok(tx)
    }

    /// Re-derive the balance from the full log. The cached field is an
    /// optimization only; this is the authoritative figure.
    pub fn replay(&self, account: &UserId) -> i64 {
        self.accounts
            .get(account)
            .map(|a| {
                a.transactions
                    .iter()
                    .filter(|t| t.status == TxStatus::Completed)
                    .map(|t| t.amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Replay-equals-cache check for one account
    pub fn verify(&self, account: &UserId) -> bool {
        self.replay(account) == self.balance(account)
    }

    /// Accounts whose cached balance disagrees with replay
    pub fn verify_all(&self) -> Vec<UserId> {
        let mut bad: Vec<UserId> = self
            .accounts
            .keys()
            .filter(|id| !self.verify(id))
            .cloned()
            .collect();
        bad.sort();
        bad
    }

    pub fn totals(&self, account: &UserId) -> AccountTotals {
        let mut totals = AccountTotals::default();
        if let Some(acc) = self.accounts.get(account) {
            for tx in &acc.transactions {
                if tx.status != TxStatus::Completed {
                    continue;
                }
                if tx.amount > 0 {
                    totals.total_earned += tx.amount;
                } else {
                    totals.total_withdrawn += -tx.amount;
                }
            }
        }
        totals
    }

    /// Most recent transactions first, capped at `limit`
    pub fn recent(&self, account: &UserId, limit: usize) -> Vec<Transaction> {
        self.accounts
            .get(account)
            .map(|a| a.transactions.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn transaction_by_reference(&self, reference: &str) -> Option<&Transaction> {
        let account = self.references.get(reference)?;
        self.accounts
            .get(account)?
            .transactions
            .iter()
            .find(|t| t.reference == reference)
    }

    pub fn transaction_count(&self) -> usize {
        self.accounts.values().map(|a| a.transactions.len()).sum()
    }

    fn claim_reference(&mut self, account: &UserId, reference: &str) -> Result<(), RefnetError> {
        if reference.is_empty() {
            return Err(RefnetError::Validation("empty transaction reference".to_string()));
        }
        if self.references.contains_key(reference) {
            return Err(RefnetError::DuplicateReference(reference.to_string()));
        }
        self.references.insert(reference.to_string(), account.clone());
        Ok(())
    }

    /// Status transition on a pending hold - the only in-place mutation the
    /// ledger allows.
    fn resolve_hold(
        &mut self,
        reference: &str,
        status: TxStatus,
        kind: TxKind,
    ) -> Result<Transaction, RefnetError> {
        let account = self
            .references
            .get(reference)
            .cloned()
            .ok_or_else(|| RefnetError::NotFound(format!("reference {}", reference)))?;
        let acc = self
            .accounts
            .get_mut(&account)
            .ok_or_else(|| RefnetError::NotFound(format!("account {}", account)))?;
        let tx = acc
            .transactions
            .iter_mut()
            .find(|t| t.reference == reference)
            .ok_or_else(|| RefnetError::NotFound(format!("reference {}", reference)))?;

        if tx.kind != TxKind::WithdrawalHold || tx.status != TxStatus::Pending {
            return Err(RefnetError::InvalidTransition {
                from: tx.status.to_string(),
                to: status.to_string(),
            });
        }
        tx.status = status;
        tx.kind = kind;
        let resolved = tx.clone();
        if status == TxStatus::Completed {
            acc.balance += resolved.amount;
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        id.to_string()
    }

    fn meta() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_credit_and_debit() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 1000, TxKind::Earn, "e1", meta()).unwrap();
        assert_eq!(ledger.balance(&user("a")), 1000);

        ledger.debit(&user("a"), 300, TxKind::AdminAdjust, "d1", meta()).unwrap();
        assert_eq!(ledger.balance(&user("a")), 700);

        let err = ledger.debit(&user("a"), 1000, TxKind::AdminAdjust, "d2", meta()).unwrap_err();
        assert_eq!(err, RefnetError::InsufficientBalance { available: 700, requested: 1000 });
    }

    #[test]
    fn test_duplicate_reference_rejected() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 100, TxKind::Earn, "r1", meta()).unwrap();
        // Retried external call with the same reference, even on another account
        assert_eq!(
            ledger.credit(&user("b"), 100, TxKind::Earn, "r1", meta()),
            Err(RefnetError::DuplicateReference("r1".to_string()))
        );
        // The failed retry must not have mutated anything
        assert_eq!(ledger.balance(&user("b")), 0);
        assert_eq!(ledger.replay(&user("a")), 100);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut ledger = CoinLedger::new();
        assert!(matches!(
            ledger.credit(&user("a"), 0, TxKind::Earn, "z", meta()),
            Err(RefnetError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit(&user("a"), -5, TxKind::Earn, "n", meta()),
            Err(RefnetError::Validation(_))
        ));
    }

    #[test]
    fn test_hold_leaves_balance_reduces_available() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 50_000, TxKind::Earn, "e1", meta()).unwrap();

        ledger.hold(&user("a"), 40_000, "h1").unwrap();
        assert_eq!(ledger.balance(&user("a")), 50_000);
        assert_eq!(ledger.available(&user("a")), 10_000);

        // A second hold over the available balance is refused
        let err = ledger.hold(&user("a"), 20_000, "h2").unwrap_err();
        assert_eq!(err, RefnetError::InsufficientBalance { available: 10_000, requested: 20_000 });
    }

    #[test]
    fn test_settle_reduces_balance_once() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 50_000, TxKind::Earn, "e1", meta()).unwrap();
        ledger.hold(&user("a"), 40_000, "h1").unwrap();

        let tx = ledger.settle("h1").unwrap();
        assert_eq!(tx.kind, TxKind::WithdrawalSettle);
        assert_eq!(ledger.balance(&user("a")), 10_000);
        assert_eq!(ledger.available(&user("a")), 10_000);

        // The settled row is findable by its reference and Completed
        let stored = ledger.transaction_by_reference("h1").unwrap();
        assert_eq!(stored.status, TxStatus::Completed);
        assert_eq!(stored.amount, -40_000);

        // Settling twice is an invalid transition
        assert!(matches!(
            ledger.settle("h1"),
            Err(RefnetError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_release_restores_available_exactly() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 50_000, TxKind::Earn, "e1", meta()).unwrap();
        ledger.hold(&user("a"), 40_000, "h1").unwrap();

        let tx = ledger.release("h1").unwrap();
        assert_eq!(tx.kind, TxKind::WithdrawalRefund);
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(ledger.balance(&user("a")), 50_000);
        assert_eq!(ledger.available(&user("a")), 50_000);
    }

    #[test]
    fn test_settle_unknown_reference() {
        let mut ledger = CoinLedger::new();
        assert!(matches!(ledger.settle("nope"), Err(RefnetError::NotFound(_))));
    }

    #[test]
    fn test_settle_non_hold_reference() {
        let mut ledger = CoinLedger::new();
        ledger.credit(&user("a"), 100, TxKind::Earn, "e1", meta()).unwrap();
        // A completed credit is not a pending hold
        assert!(matches!(
            ledger.settle("e1"),
            Err(RefnetError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_replay_always_matches_cache() {
        let mut ledger = CoinLedger::new();
        let a = user("a");
        ledger.credit(&a, 10_000, TxKind::Earn, "e1", meta()).unwrap();
        ledger.credit(&a, 5_000, TxKind::Bonus, "b1", meta()).unwrap();
        ledger.debit(&a, 2_000, TxKind::AdminAdjust, "d1", meta()).unwrap();
        ledger.hold(&a, 4_000, "h1").unwrap();
        assert!(ledger.verify(&a));

        ledger.settle("h1").unwrap();
        assert!(ledger.verify(&a));

        ledger.hold(&a, 1_000, "h2").unwrap();
        ledger.release("h2").unwrap();
        assert!(ledger.verify(&a));
        assert_eq!(ledger.balance(&a), 9_000);
        assert!(ledger.verify_all().is_empty());
    }

    #[test]
    fn test_balance_never_negative() {
        let mut ledger = CoinLedger::new();
        let a = user("a");
        ledger.credit(&a, 100, TxKind::Earn, "e1", meta()).unwrap();
        ledger.hold(&a, 100, "h1").unwrap();
        // Everything is held: no debit or further hold can pass
        assert!(ledger.debit(&a, 1, TxKind::AdminAdjust, "d1", meta()).is_err());
        assert!(ledger.hold(&a, 1, "h2").is_err());
        ledger.settle("h1").unwrap();
        assert_eq!(ledger.balance(&a), 0);
        assert!(ledger.balance(&a) >= 0);
    }

    #[test]
    fn test_totals_and_recent() {
        let mut ledger = CoinLedger::new();
        let a = user("a");
        ledger.credit(&a, 10_000, TxKind::Earn, "e1", meta()).unwrap();
        ledger.credit(&a, 2_000, TxKind::Bonus, "b1", meta()).unwrap();
        ledger.hold(&a, 3_000, "h1").unwrap();
        ledger.settle("h1").unwrap();

        let totals = ledger.totals(&a);
        assert_eq!(totals.total_earned, 12_000);
        assert_eq!(totals.total_withdrawn, 3_000);

        let recent = ledger.recent(&a, 2);
        assert_eq!(recent.len(), 2);
        // Newest first
        assert_eq!(recent[0].reference, "h1");
        assert_eq!(recent[1].reference, "b1");
    }
}
