//! Referral forest: parent-pointer arena with ordered children
//!
//! Nodes are addressed by stable user ids. The referrer link is immutable
//! once attached; `attach` rejects cycles explicitly. Every mutation that can
//! change qualifying counts bumps the graph epoch, which invalidates the
//! per-node cached counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RefnetError;
use crate::rank::{Rank, TierCounts};

/// User identifier - supplied by the identity layer, trusted as-is
pub type UserId = String;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserNode {
    pub id: UserId,
    pub referrer: Option<UserId>,
    /// Direct children in attach order (deterministic traversal)
    pub children: Vec<UserId>,
    /// Activation signal from the KYC subsystem; base qualifying unit
    pub active_member: bool,
    pub rank: Rank,
    pub rank_assigned_at: Option<DateTime<Utc>>,
    /// Cached qualifying counts, valid only when counts_epoch == graph epoch
    pub cached_counts: TierCounts,
    pub counts_epoch: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReferralGraph {
    nodes: HashMap<UserId, UserNode>,
    /// Bumped on every count-affecting mutation (attach, activation, rank write)
    epoch: u64,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &UserId) -> Result<&UserNode, RefnetError> {
        self.nodes
            .get(id)
            .ok_or_else(|| RefnetError::NotFound(format!("user {}", id)))
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.nodes.keys().cloned().collect()
    }

    /// Register a new node as a forest root (no referrer yet)
    pub fn register(&mut self, id: UserId, active_member: bool) -> Result<(), RefnetError> {
        if self.nodes.contains_key(&id) {
            return Err(RefnetError::AlreadyRegistered(id));
        }
        let node = UserNode {
            id: id.clone(),
            referrer: None,
            children: Vec::new(),
            active_member,
            rank: Rank::ActiveMember,
            rank_assigned_at: None,
            cached_counts: TierCounts::default(),
            counts_epoch: 0,
            created_at: Utc::now(),
        };
        self.nodes.insert(id, node);
        self.epoch += 1;
        Ok(())
    }

    /// Link `child` under `parent`. The referrer link is write-once.
    pub fn attach(&mut self, child: &UserId, parent: &UserId) -> Result<(), RefnetError> {
        if !self.nodes.contains_key(child) {
            return Err(RefnetError::NotFound(format!("user {}", child)));
        }
        if !self.nodes.contains_key(parent) {
            return Err(RefnetError::NotFound(format!("user {}", parent)));
        }
        if child == parent || self.is_descendant(parent, child) {
            return Err(RefnetError::Cycle {
                child: child.clone(),
                parent: parent.clone(),
            });
        }
        {
            let node = self.nodes.get(child).ok_or_else(|| {
                RefnetError::NotFound(format!("user {}", child))
            })?;
            if node.referrer.is_some() {
                return Err(RefnetError::AlreadyAttached(child.clone()));
            }
        }

        if let Some(node) = self.nodes.get_mut(child) {
            node.referrer = Some(parent.clone());
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child.clone());
        }
        self.epoch += 1;
        tracing::debug!("Attached {} under {}", child, parent);
        Ok(())
    }

    /// Direct children in attach order
    pub fn children_of(&self, id: &UserId) -> Result<&[UserId], RefnetError> {
        Ok(&self.get(id)?.children)
    }

    /// Immediate referrer up to the root. Walks are bounded by the arena
    /// size so a corrupt self-referencing link degrades to a root, not a hang.
    pub fn ancestor_chain(&self, id: &UserId) -> Vec<UserId> {
        let mut chain = Vec::new();
        let mut cur = self.nodes.get(id).and_then(|n| n.referrer.clone());
        while let Some(next) = cur {
            if next == *id || chain.contains(&next) || chain.len() >= self.nodes.len() {
                break;
            }
            cur = self.nodes.get(&next).and_then(|n| n.referrer.clone());
            chain.push(next);
        }
        chain
    }

    /// True when `node` sits somewhere below `ancestor`
    pub fn is_descendant(&self, node: &UserId, ancestor: &UserId) -> bool {
        let mut steps = 0;
        let mut cur = self.nodes.get(node).and_then(|n| n.referrer.clone());
        while let Some(next) = cur {
            if next == *ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            cur = self.nodes.get(&next).and_then(|n| n.referrer.clone());
        }
        false
    }

    /// Apply the activation signal. Returns whether the flag actually changed.
    pub fn set_active(&mut self, id: &UserId, active: bool) -> Result<bool, RefnetError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RefnetError::NotFound(format!("user {}", id)))?;
        if node.active_member == active {
            return Ok(false);
        }
        node.active_member = active;
        self.epoch += 1;
        Ok(true)
    }

    /// Re-derive qualifying counts from the current children ranks.
    /// Read-only; never trusts the cached copy.
    pub fn derive_counts(&self, id: &UserId) -> Result<TierCounts, RefnetError> {
        let node = self.get(id)?;
        let mut counts = TierCounts::default();
        for child_id in &node.children {
            if let Some(child) = self.nodes.get(child_id) {
                counts.absorb(child.rank, child.active_member);
            }
        }
        Ok(counts)
    }

    /// Persist a rank evaluation result. Bumps the epoch only when the rank
    /// crossed a boundary (cached-count refreshes alone do not invalidate
    /// other nodes). Returns whether the rank changed.
    pub fn apply_rank(
        &mut self,
        id: &UserId,
        rank: Rank,
        counts: TierCounts,
    ) -> Result<bool, RefnetError> {
        let changed = {
            let node = self.get(id)?;
            node.rank != rank
        };
        if changed {
            self.epoch += 1;
        }
        let epoch = self.epoch;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RefnetError::NotFound(format!("user {}", id)))?;
        if changed {
            node.rank = rank;
            node.rank_assigned_at = Some(Utc::now());
        }
        node.cached_counts = counts;
        node.counts_epoch = epoch;
        Ok(changed)
    }

    /// Depth of a node (root = 0), used for bottom-up sweeps
    pub fn depth(&self, id: &UserId) -> usize {
        self.ancestor_chain(id).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(ids: &[&str]) -> ReferralGraph {
        let mut g = ReferralGraph::new();
        for id in ids {
            g.register(id.to_string(), false).unwrap();
        }
        g
    }

    #[test]
    fn test_register_and_attach() {
        let mut g = graph_with(&["root", "a", "b"]);
        g.attach(&"a".to_string(), &"root".to_string()).unwrap();
        g.attach(&"b".to_string(), &"root".to_string()).unwrap();

        assert_eq!(g.children_of(&"root".to_string()).unwrap(), &["a", "b"]);
        assert_eq!(g.ancestor_chain(&"a".to_string()), vec!["root".to_string()]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut g = graph_with(&["a"]);
        assert_eq!(
            g.register("a".to_string(), false),
            Err(RefnetError::AlreadyRegistered("a".to_string()))
        );
    }

    #[test]
    fn test_attach_rejects_self_referral() {
        let mut g = graph_with(&["a"]);
        let err = g.attach(&"a".to_string(), &"a".to_string()).unwrap_err();
        assert!(matches!(err, RefnetError::Cycle { .. }));
    }

    #[test]
    fn test_attach_rejects_cycle() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.attach(&"b".to_string(), &"a".to_string()).unwrap();
        g.attach(&"c".to_string(), &"b".to_string()).unwrap();

        // a -> b -> c; attaching a under c would close the loop
        let err = g.attach(&"a".to_string(), &"c".to_string()).unwrap_err();
        assert!(matches!(err, RefnetError::Cycle { .. }));
    }

    #[test]
    fn test_referrer_is_write_once() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.attach(&"c".to_string(), &"a".to_string()).unwrap();
        assert_eq!(
            g.attach(&"c".to_string(), &"b".to_string()),
            Err(RefnetError::AlreadyAttached("c".to_string()))
        );
    }

    #[test]
    fn test_ancestor_chain_order() {
        let mut g = graph_with(&["root", "mid", "leaf"]);
        g.attach(&"mid".to_string(), &"root".to_string()).unwrap();
        g.attach(&"leaf".to_string(), &"mid".to_string()).unwrap();

        assert_eq!(
            g.ancestor_chain(&"leaf".to_string()),
            vec!["mid".to_string(), "root".to_string()]
        );
        assert!(g.ancestor_chain(&"root".to_string()).is_empty());
    }

    #[test]
    fn test_epoch_bumps_on_mutation() {
        let mut g = graph_with(&["a", "b"]);
        let before = g.epoch();
        g.attach(&"b".to_string(), &"a".to_string()).unwrap();
        assert!(g.epoch() > before);

        let before = g.epoch();
        assert!(g.set_active(&"b".to_string(), true).unwrap());
        assert!(g.epoch() > before);

        // no-op activation does not invalidate anything
        let before = g.epoch();
        assert!(!g.set_active(&"b".to_string(), true).unwrap());
        assert_eq!(g.epoch(), before);
    }

    #[test]
    fn test_derive_counts_childless() {
        let g = graph_with(&["a"]);
        let counts = g.derive_counts(&"a".to_string()).unwrap();
        assert_eq!(counts, TierCounts::default());
    }
}
