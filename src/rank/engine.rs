//! Bottom-up rank computation with upward propagation
//!
//! `recompute` drains an explicit work queue instead of recursing, so deep
//! referral chains cannot overflow the stack. A node is persisted only when
//! its derived rank or counts differ from the stored copy; an unchanged node
//! produces zero writes and ends the upward walk.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

use crate::error::RefnetError;
use crate::graph::{ReferralGraph, UserId};
use crate::rank::{qualified_rank, Rank};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RankEngine {
    /// Nodes evaluated (including no-op evaluations)
    pub recomputes: u64,
    /// Nodes actually persisted (rank or cached counts changed)
    pub writes: u64,
    /// Rank boundary crossings
    pub rank_changes: u64,
}

impl RankEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-evaluate `user` and propagate along the ancestor chain wherever a
    /// rank crossed a boundary. Returns the (possibly unchanged) rank of
    /// `user`. Safe to retry: a repeat call with no underlying change
    /// evaluates once and writes nothing.
    pub fn recompute(
        &mut self,
        graph: &mut ReferralGraph,
        user: &UserId,
    ) -> Result<Rank, RefnetError> {
        let mut queue: VecDeque<UserId> = VecDeque::new();
        let mut queued: HashSet<UserId> = HashSet::new();
        queue.push_back(user.clone());
        queued.insert(user.clone());

        let mut result = graph.get(user)?.rank;

        while let Some(id) = queue.pop_front() {
            self.recomputes += 1;
            let counts = graph.derive_counts(&id)?;
            let new_rank = qualified_rank(&counts);

            let node = graph.get(&id)?;
            let rank_changed = node.rank != new_rank;
            let counts_changed = node.cached_counts != counts;
            let old_rank = node.rank;

            if id == *user {
                result = new_rank;
            }
            if !rank_changed && !counts_changed {
                debug!("Rank unchanged for {} ({})", id, old_rank);
                continue;
            }

            self.writes += 1;
            graph.apply_rank(&id, new_rank, counts)?;

            if rank_changed {
                self.rank_changes += 1;
                info!("Rank change: {} {} -> {}", id, old_rank, new_rank);
                // The crossing shifts an ancestor's qualifying counts, so the
                // whole chain above this node gets re-evaluated (child before
                // parent, queue order preserves it).
                for ancestor in graph.ancestor_chain(&id) {
                    if queued.insert(ancestor.clone()) {
                        queue.push_back(ancestor);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Full-forest sweep, deepest nodes first. Backstop for propagation that
    /// was interrupted mid-chain; returns the number of corrected nodes.
    pub fn reconcile(&mut self, graph: &mut ReferralGraph) -> Result<usize, RefnetError> {
        let mut ids: Vec<(usize, UserId)> = graph
            .user_ids()
            .into_iter()
            .map(|id| (graph.depth(&id), id))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut corrected = 0;
        for (_, id) in ids {
            self.recomputes += 1;
            let counts = graph.derive_counts(&id)?;
            let new_rank = qualified_rank(&counts);
            let node = graph.get(&id)?;
            if node.rank == new_rank && node.cached_counts == counts {
                continue;
            }
            let old_rank = node.rank;
            self.writes += 1;
            if graph.apply_rank(&id, new_rank, counts)? {
                self.rank_changes += 1;
                info!("Reconcile: {} {} -> {}", id, old_rank, new_rank);
            }
            corrected += 1;
        }
        if corrected > 0 {
            info!("Reconcile sweep corrected {} node(s)", corrected);
        }
        Ok(corrected)
    }
}
