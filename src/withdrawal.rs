//! Withdrawal request state machine over the coin ledger
//!
//! pending -> {approved, rejected}; approved -> completed. Rejected and
//! completed are terminal. Funds are reserved with a ledger hold at creation,
//! settled at approval and released at rejection; `complete` only records the
//! externally confirmed payment and never touches the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::RefnetError;
use crate::graph::UserId;
use crate::ledger::CoinLedger;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub user: UserId,
    pub amount: i64,
    pub status: WithdrawalStatus,
    /// Reference of the ledger hold reserving the funds
    pub hold_reference: String,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub admin_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub payment_details: Option<String>,
}

/// Policy bounds for a single request, from config
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct WithdrawalPolicy {
    pub min_amount: i64,
    pub max_amount: i64,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            min_amount: 1_000,
            max_amount: 10_000_000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WithdrawalBook {
    requests: HashMap<Uuid, WithdrawalRequest>,
}

impl WithdrawalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Result<&WithdrawalRequest, RefnetError> {
        self.requests
            .get(id)
            .ok_or_else(|| RefnetError::NotFound(format!("withdrawal request {}", id)))
    }

    pub fn pending_for(&self, user: &UserId) -> Option<&WithdrawalRequest> {
        self.requests
            .values()
            .find(|r| r.user == *user && r.status == WithdrawalStatus::Pending)
    }

    pub fn for_user(&self, user: &UserId) -> Vec<&WithdrawalRequest> {
        let mut reqs: Vec<&WithdrawalRequest> =
            self.requests.values().filter(|r| r.user == *user).collect();
        reqs.sort_by_key(|r| r.created_at);
        reqs
    }

    pub fn count_with_status(&self, status: WithdrawalStatus) -> usize {
        self.requests.values().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Validate policy, eligibility, the single-outstanding invariant and
    /// available balance, then place the hold and persist the request as
    /// Pending. All validations run before any mutation; the hold is the
    /// first and only fallible mutation, so a typed error means nothing
    /// changed.
    pub fn create(
        &mut self,
        ledger: &mut CoinLedger,
        user: &UserId,
        amount: i64,
        policy: &WithdrawalPolicy,
        user_is_active: bool,
    ) -> Result<WithdrawalRequest, RefnetError> {
        if amount < policy.min_amount || amount > policy.max_amount {
            return Err(RefnetError::Validation(format!(
                "amount {} outside policy bounds [{}, {}]",
                amount, policy.min_amount, policy.max_amount
            )));
        }
        if !user_is_active {
            return Err(RefnetError::Validation(format!(
                "user {} is not an active member",
                user
            )));
        }
        if self.pending_for(user).is_some() {
            return Err(RefnetError::PendingRequestExists(user.clone()));
        }

        let id = Uuid::new_v4();
        let hold_reference = format!("wd-{}", id);
        ledger.hold(user, amount, &hold_reference)?;

        let request = WithdrawalRequest {
            id,
            user: user.clone(),
            amount,
            status: WithdrawalStatus::Pending,
            hold_reference,
            created_at: Utc::now(),
            decided_at: None,
            completed_at: None,
            admin_note: None,
            rejection_reason: None,
            payment_details: None,
        };
        self.requests.insert(id, request.clone());
        info!("Withdrawal request {} created: {} by {}", id, amount, user);
        Ok(request)
    }

    /// pending -> approved; settles the hold (balance drops here)
    pub fn approve(
        &mut self,
        ledger: &mut CoinLedger,
        id: &Uuid,
        note: Option<String>,
    ) -> Result<WithdrawalRequest, RefnetError> {
        let req = self
            .requests
            .get_mut(id)
            .ok_or_else(|| RefnetError::NotFound(format!("withdrawal request {}", id)))?;
        if req.status != WithdrawalStatus::Pending {
            return Err(RefnetError::InvalidTransition {
                from: req.status.to_string(),
                to: WithdrawalStatus::Approved.to_string(),
            });
        }
        ledger.settle(&req.hold_reference)?;
        req.status = WithdrawalStatus::Approved;
        req.decided_at = Some(Utc::now());
        req.admin_note = note;
        info!("Withdrawal request {} approved", id);
        Ok(req.clone())
    }

    /// pending -> rejected; releases the hold (available restored)
    pub fn reject(
        &mut self,
        ledger: &mut CoinLedger,
        id: &Uuid,
        reason: String,
    ) -> Result<WithdrawalRequest, RefnetError> {
        let req = self
            .requests
            .get_mut(id)
            .ok_or_else(|| RefnetError::NotFound(format!("withdrawal request {}", id)))?;
        if req.status != WithdrawalStatus::Pending {
            return Err(RefnetError::InvalidTransition {
                from: req.status.to_string(),
                to: WithdrawalStatus::Rejected.to_string(),
            });
        }
        ledger.release(&req.hold_reference)?;
        req.status = WithdrawalStatus::Rejected;
        req.decided_at = Some(Utc::now());
        req.rejection_reason = Some(reason);
        info!("Withdrawal request {} rejected", id);
        Ok(req.clone())
    }

    /// approved -> completed; records the external payment confirmation,
    /// no ledger mutation (funds were settled at approval)
    pub fn complete(
        &mut self,
        id: &Uuid,
        payment_details: String,
    ) -> Result<WithdrawalRequest, RefnetError> {
        let req = self
            .requests
            .get_mut(id)
            .ok_or_else(|| RefnetError::NotFound(format!("withdrawal request {}", id)))?;
        if req.status != WithdrawalStatus::Approved {
            return Err(RefnetError::InvalidTransition {
                from: req.status.to_string(),
                to: WithdrawalStatus::Completed.to_string(),
            });
        }
        req.status = WithdrawalStatus::Completed;
        req.completed_at = Some(Utc::now());
        req.payment_details = Some(payment_details);
        info!("Withdrawal request {} completed", id);
        Ok(req.clone())
    }
}
