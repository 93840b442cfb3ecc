//! Service façade over graph, rank engine, ledger and withdrawal workflow
//!
//! All state sits behind one `RwLock`, which serializes every critical
//! section of the engine: the pending-request check plus hold creation, the
//! rank chain walk, and hold settlement/release each happen inside a single
//! lock scope. Callers are trusted on identity (the session layer
//! authenticates upstream).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::config::RefnetConfig;
use crate::error::RefnetError;
use crate::graph::{ReferralGraph, UserId};
use crate::ledger::{AccountTotals, CoinLedger, Transaction, TxKind};
use crate::rank::engine::RankEngine;
use crate::rank::worker::RankWorker;
use crate::rank::{requirements_progress, Rank, TierCounts, TierRequirement};
use crate::withdrawal::{WithdrawalBook, WithdrawalPolicy, WithdrawalRequest};

/// The whole engine state; snapshot-serializable
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RefnetState {
    pub graph: ReferralGraph,
    pub ledger: CoinLedger,
    pub withdrawals: WithdrawalBook,
    pub engine: RankEngine,
    pub policy: WithdrawalPolicy,
    pub recent_limit: usize,
}

impl RefnetState {
    pub fn new(policy: WithdrawalPolicy, recent_limit: usize) -> Self {
        Self {
            graph: ReferralGraph::new(),
            ledger: CoinLedger::new(),
            withdrawals: WithdrawalBook::new(),
            engine: RankEngine::new(),
            policy,
            recent_limit,
        }
    }

    pub fn recompute(&mut self, user: &UserId) -> Result<Rank, RefnetError> {
        let Self { graph, engine, .. } = self;
        engine.recompute(graph, user)
    }

    /// Current qualifying counts: cached copy when the epoch stamp is
    /// current, otherwise derived fresh (a stale cache is never served)
    fn current_counts(&self, user: &UserId) -> Result<TierCounts, RefnetError> {
        let node = self.graph.get(user)?;
        if node.counts_epoch == self.graph.epoch() {
            Ok(node.cached_counts)
        } else {
            self.graph.derive_counts(user)
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RankInfo {
    pub rank: Rank,
    pub rank_assigned_at: Option<DateTime<Utc>>,
    pub tier_counts: TierCounts,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TeamStructure {
    pub direct_active_members: usize,
    pub team_leaders: usize,
    pub assistant_managers: usize,
    pub managers: usize,
    pub zonal_heads: usize,
    pub requirements_progress: Vec<TierRequirement>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BalanceInfo {
    pub balance: i64,
    pub available: i64,
    pub total_earned: i64,
    pub total_withdrawn: i64,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceStats {
    pub users: usize,
    pub graph_epoch: u64,
    pub ledger_transactions: usize,
    pub withdrawal_requests: usize,
    pub pending_withdrawals: usize,
    pub rank_writes: u64,
}

#[derive(Clone)]
pub struct RefnetService {
    state: Arc<RwLock<RefnetState>>,
    worker: Option<RankWorker>,
}

impl RefnetService {
    pub fn new(config: &RefnetConfig) -> Self {
        Self::from_state(RefnetState::new(
            config.withdrawal_policy(),
            config.service.recent_transactions,
        ))
    }

    pub fn from_state(state: RefnetState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            worker: None,
        }
    }

    pub fn state_arc(&self) -> Arc<RwLock<RefnetState>> {
        self.state.clone()
    }

    /// Attach the async recompute worker. Requires a tokio runtime; until
    /// called, recomputation runs inline with the triggering call.
    pub fn spawn_worker(&mut self, shards: usize) {
        self.worker = Some(RankWorker::spawn(self.state.clone(), shards));
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RefnetState>, RefnetError> {
        self.state
            .read()
            .map_err(|e| RefnetError::ConcurrentMutation(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RefnetState>, RefnetError> {
        self.state
            .write()
            .map_err(|e| RefnetError::ConcurrentMutation(e.to_string()))
    }

    /// Queue a recompute through the worker, or run it inline when no worker
    /// is attached
    pub fn trigger_recompute(&self, user: &UserId) -> Result<(), RefnetError> {
        if let Some(worker) = &self.worker {
            worker.enqueue(user.clone());
            Ok(())
        } else {
            self.write()?.recompute(user).map(|_| ())
        }
    }

    /// Register a user with an immutable referrer link and re-evaluate the
    /// referrer's chain
    pub fn register_user(
        &self,
        id: &UserId,
        referrer: Option<&UserId>,
    ) -> Result<(), RefnetError> {
        {
            let mut state = self.write()?;
            // Validate the referrer up front so a bad link leaves no orphan
            if let Some(parent) = referrer {
                if !state.graph.contains(parent) {
                    return Err(RefnetError::NotFound(format!("user {}", parent)));
                }
            }
            state.graph.register(id.clone(), false)?;
            if let Some(parent) = referrer {
                state.graph.attach(id, parent)?;
            }
        }
        info!("Registered user {} (referrer: {:?})", id, referrer);
        if let Some(parent) = referrer {
            self.trigger_recompute(parent)?;
        }
        Ok(())
    }

    /// Consume the activation signal from the KYC subsystem. A change shifts
    /// the referrer's active-member count, so the chain is re-evaluated.
    pub fn set_active_member(&self, id: &UserId, active: bool) -> Result<(), RefnetError> {
        let parent = {
            let mut state = self.write()?;
            let changed = state.graph.set_active(id, active)?;
            if !changed {
                return Ok(());
            }
            state.graph.get(id)?.referrer.clone()
        };
        info!("User {} active_member={}", id, active);
        if let Some(parent) = parent {
            self.trigger_recompute(&parent)?;
        }
        Ok(())
    }

    /// Entry point for external commission/bonus calculators; amounts arrive
    /// pre-computed
    pub fn credit(
        &self,
        user: &UserId,
        amount: i64,
        kind: TxKind,
        reference: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Transaction, RefnetError> {
        self.write()?.ledger.credit(user, amount, kind, reference, metadata)
    }

    pub fn query_rank(&self, user: &UserId) -> Result<RankInfo, RefnetError> {
        let state = self.read()?;
        let node = state.graph.get(user)?;
        Ok(RankInfo {
            rank: node.rank,
            rank_assigned_at: node.rank_assigned_at,
            tier_counts: state.current_counts(user)?,
        })
    }

    pub fn query_team_structure(&self, user: &UserId) -> Result<TeamStructure, RefnetError> {
        let state = self.read()?;
        let counts = state.current_counts(user)?;
        Ok(TeamStructure {
            direct_active_members: counts.active_members,
            team_leaders: counts.team_leaders,
            assistant_managers: counts.assistant_managers,
            managers: counts.managers,
            zonal_heads: counts.zonal_heads,
            requirements_progress: requirements_progress(&counts),
        })
    }

    pub fn get_balance(&self, user: &UserId) -> Result<BalanceInfo, RefnetError> {
        let state = self.read()?;
        if !state.graph.contains(user) && !state.ledger.has_account(user) {
            return Err(RefnetError::NotFound(format!("user {}", user)));
        }
        let AccountTotals { total_earned, total_withdrawn } = state.ledger.totals(user);
        Ok(BalanceInfo {
            balance: state.ledger.balance(user),
            available: state.ledger.available(user),
            total_earned,
            total_withdrawn,
            recent_transactions: state.ledger.recent(user, state.recent_limit),
        })
    }

    /// The no-pending-request check and the hold are taken under one write
    /// lock, so two concurrent creates cannot both pass
    pub fn create_withdrawal(&self, user: &UserId, amount: i64) -> Result<Uuid, RefnetError> {
        let mut state = self.write()?;
        let active = state.graph.get(user)?.active_member;
        let policy = state.policy;
        let RefnetState { ledger, withdrawals, .. } = &mut *state;
        let request = withdrawals.create(ledger, user, amount, &policy, active)?;
        Ok(request.id)
    }

    pub fn admin_approve(
        &self,
        request_id: &Uuid,
        note: Option<String>,
    ) -> Result<WithdrawalRequest, RefnetError> {
        let mut state = self.write()?;
        let RefnetState { ledger, withdrawals, .. } = &mut *state;
        withdrawals.approve(ledger, request_id, note)
    }

    pub fn admin_reject(
        &self,
        request_id: &Uuid,
        reason: String,
    ) -> Result<WithdrawalRequest, RefnetError> {
        let mut state = self.write()?;
        let RefnetState { ledger, withdrawals, .. } = &mut *state;
        withdrawals.reject(ledger, request_id, reason)
    }

    pub fn admin_complete(
        &self,
        request_id: &Uuid,
        payment_details: String,
    ) -> Result<WithdrawalRequest, RefnetError> {
        self.write()?.withdrawals.complete(request_id, payment_details)
    }

    pub fn get_withdrawal(&self, request_id: &Uuid) -> Result<WithdrawalRequest, RefnetError> {
        Ok(self.read()?.withdrawals.get(request_id)?.clone())
    }

    /// Accounts whose cached balance disagrees with log replay
    pub fn verify_ledger(&self) -> Result<Vec<UserId>, RefnetError> {
        Ok(self.read()?.ledger.verify_all())
    }

    /// Full-forest rank sweep; returns corrected node count
    pub fn reconcile_ranks(&self) -> Result<usize, RefnetError> {
        let mut state = self.write()?;
        let RefnetState { graph, engine, .. } = &mut *state;
        engine.reconcile(graph)
    }

    pub fn stats(&self) -> Result<ServiceStats, RefnetError> {
        let state = self.read()?;
        Ok(ServiceStats {
            users: state.graph.len(),
            graph_epoch: state.graph.epoch(),
            ledger_transactions: state.ledger.transaction_count(),
            withdrawal_requests: state.withdrawals.len(),
            pending_withdrawals: state
                .withdrawals
                .count_with_status(crate::withdrawal::WithdrawalStatus::Pending),
            rank_writes: state.engine.writes,
        })
    }

    /// Persist the full state as pretty JSON
    pub fn save(&self, path: &str) -> Result<(), RefnetError> {
        let state = self.read()?;
        let data = serde_json::to_string_pretty(&*state)
            .map_err(|e| RefnetError::Snapshot(e.to_string()))?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RefnetError::Snapshot(e.to_string()))?;
            }
        }
        std::fs::write(path, data).map_err(|e| RefnetError::Snapshot(e.to_string()))?;
        info!("Snapshot saved to {}", path);
        Ok(())
    }

    /// Load a snapshot if one exists, else start empty. Policy and limits
    /// always come from the config, not the snapshot.
    pub fn load(path: &str, config: &RefnetConfig) -> Result<Self, RefnetError> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::new(config));
        }
        let data =
            std::fs::read_to_string(path).map_err(|e| RefnetError::Snapshot(e.to_string()))?;
        let mut state: RefnetState =
            serde_json::from_str(&data).map_err(|e| RefnetError::Snapshot(e.to_string()))?;
        state.policy = config.withdrawal_policy();
        state.recent_limit = config.service.recent_transactions;
        info!("Snapshot loaded from {} ({} users)", path, state.graph.len());
        Ok(Self::from_state(state))
    }
}
