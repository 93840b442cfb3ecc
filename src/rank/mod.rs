//! Rank tiers, promotion table and qualifying counts

pub mod engine;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Rank tiers in ascending order. The derived `Ord` is the tier ordering.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Rank {
    ActiveMember,
    TeamLeader,
    AssistantManager,
    Manager,
    ZonalHead,
    NationalHeadPromoter,
}

impl Rank {
    pub fn label(&self) -> &'static str {
        match self {
            Rank::ActiveMember => "Active Member",
            Rank::TeamLeader => "Team Leader",
            Rank::AssistantManager => "Assistant Manager",
            Rank::Manager => "Manager",
            Rank::ZonalHead => "Zonal Head",
            Rank::NationalHeadPromoter => "National Head Promoter",
        }
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Promotion rules, highest tier first: (target, required child tier, threshold).
/// A user is assigned the highest target whose threshold is met.
pub const PROMOTION_TABLE: [(Rank, Rank, usize); 5] = [
    (Rank::NationalHeadPromoter, Rank::ZonalHead, 2),
    (Rank::ZonalHead, Rank::Manager, 3),
    (Rank::Manager, Rank::AssistantManager, 5),
    (Rank::AssistantManager, Rank::TeamLeader, 7),
    (Rank::TeamLeader, Rank::ActiveMember, 10),
];

/// Number of direct children at or above each tier.
///
/// `active_members` is the base unit and counts the activation flag, not the
/// rank: an inactive Team Leader still counts toward `team_leaders` but not
/// toward `active_members`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub active_members: usize,
    pub team_leaders: usize,
    pub assistant_managers: usize,
    pub managers: usize,
    pub zonal_heads: usize,
}

impl TierCounts {
    /// Fold one direct child into the counts
    pub fn absorb(&mut self, rank: Rank, active_member: bool) {
        if active_member {
            self.active_members += 1;
        }
        if rank >= Rank::TeamLeader {
            self.team_leaders += 1;
        }
        if rank >= Rank::AssistantManager {
            self.assistant_managers += 1;
        }
        if rank >= Rank::Manager {
            self.managers += 1;
        }
        if rank >= Rank::ZonalHead {
            self.zonal_heads += 1;
        }
    }

    pub fn at_or_above(&self, tier: Rank) -> usize {
        match tier {
            Rank::ActiveMember => self.active_members,
            Rank::TeamLeader => self.team_leaders,
            Rank::AssistantManager => self.assistant_managers,
            Rank::Manager => self.managers,
            Rank::ZonalHead => self.zonal_heads,
            // Nothing promotes off National Head Promoter children
            Rank::NationalHeadPromoter => 0,
        }
    }
}

/// Evaluate the promotion table highest-first: direct jump to the highest
/// qualifying tier, never sequential.
pub fn qualified_rank(counts: &TierCounts) -> Rank {
    for (target, required, threshold) in PROMOTION_TABLE {
        if counts.at_or_above(required) >= threshold {
            return target;
        }
    }
    Rank::ActiveMember
}

/// Progress toward one promotion rule, for team-structure queries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TierRequirement {
    pub tier: Rank,
    pub have: usize,
    pub need: usize,
}

/// Per-tier progress, lowest tier first
pub fn requirements_progress(counts: &TierCounts) -> Vec<TierRequirement> {
    PROMOTION_TABLE
        .iter()
        .rev()
        .map(|(target, required, threshold)| TierRequirement {
            tier: *target,
            have: counts.at_or_above(*required),
            need: *threshold,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(Rank::ActiveMember < Rank::TeamLeader);
        assert!(Rank::TeamLeader < Rank::AssistantManager);
        assert!(Rank::ZonalHead < Rank::NationalHeadPromoter);
    }

    #[test]
    fn test_absorb_counts_at_or_above() {
        let mut counts = TierCounts::default();
        counts.absorb(Rank::Manager, true);

        // A Manager counts toward every tier up to Manager
        assert_eq!(counts.active_members, 1);
        assert_eq!(counts.team_leaders, 1);
        assert_eq!(counts.assistant_managers, 1);
        assert_eq!(counts.managers, 1);
        assert_eq!(counts.zonal_heads, 0);
    }

    #[test]
    fn test_inactive_child_not_a_base_unit() {
        let mut counts = TierCounts::default();
        counts.absorb(Rank::TeamLeader, false);
        assert_eq!(counts.active_members, 0);
        assert_eq!(counts.team_leaders, 1);
    }

    #[test]
    fn test_qualified_rank_thresholds() {
        let mut counts = TierCounts::default();
        counts.active_members = 9;
        assert_eq!(qualified_rank(&counts), Rank::ActiveMember);

        counts.active_members = 10;
        assert_eq!(qualified_rank(&counts), Rank::TeamLeader);

        counts.team_leaders = 7;
        assert_eq!(qualified_rank(&counts), Rank::AssistantManager);
    }

    #[test]
    fn test_qualified_rank_jumps_to_highest() {
        // Meets the Zonal Head rule without holding any lower tier first
        let counts = TierCounts {
            active_members: 0,
            team_leaders: 0,
            assistant_managers: 0,
            managers: 3,
            zonal_heads: 0,
        };
        assert_eq!(qualified_rank(&counts), Rank::ZonalHead);
    }

    #[test]
    fn test_requirements_progress_order() {
        let counts = TierCounts {
            active_members: 4,
            ..TierCounts::default()
        };
        let progress = requirements_progress(&counts);
        assert_eq!(progress.len(), 5);
        assert_eq!(progress[0].tier, Rank::TeamLeader);
        assert_eq!(progress[0].have, 4);
        assert_eq!(progress[0].need, 10);
        assert_eq!(progress[4].tier, Rank::NationalHeadPromoter);
        assert_eq!(progress[4].need, 2);
    }
}
