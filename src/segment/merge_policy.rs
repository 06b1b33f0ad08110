//! Tiered merge policy.
//!
//! After each flush, segments are grouped into size tiers; when a tier
//! holds too many segments, the smallest ones are scheduled for a single
//! merge.

use serde::{Deserialize, Serialize};

use crate::segment::info::SegmentInfo;

/// Knobs for the tiered merge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePolicyConfig {
    /// Maximum number of segments merged in one operation.
    pub max_merge_at_once: usize,

    /// Maximum number of segments allowed in a size tier before a merge is
    /// scheduled.
    pub max_segments_per_tier: usize,

    /// Segments smaller than this many blocks are treated as having this
    /// size when forming tiers, so a steady trickle of tiny flushes still
    /// groups together.
    pub floor_segment_blocks: u32,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        MergePolicyConfig {
            max_merge_at_once: 10,
            max_segments_per_tier: 10,
            floor_segment_blocks: 4,
        }
    }
}

/// Selects at most one merge per commit cycle.
#[derive(Debug)]
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        TieredMergePolicy { config }
    }

    /// Pick the segment ids to merge, or an empty plan.
    ///
    /// Segments are sorted by floor-clamped block count; a tier spans a
    /// factor-2 band above its smallest member. The first overflowing tier
    /// contributes up to `max_merge_at_once` of its smallest segments.
    pub fn select_merge(&self, segments: &[SegmentInfo]) -> Vec<u32> {
        if segments.len() < 2 {
            return Vec::new();
        }

        let mut sized: Vec<(u32, u32)> = segments
            .iter()
            .map(|s| (s.block_count().max(self.config.floor_segment_blocks), s.id()))
            .collect();
        sized.sort_unstable();

        let mut tier_start = 0;
        while tier_start < sized.len() {
            let floor = sized[tier_start].0;
            let mut tier_end = tier_start + 1;
            while tier_end < sized.len() && sized[tier_end].0 <= floor.saturating_mul(2) {
                tier_end += 1;
            }

            let tier = &sized[tier_start..tier_end];
            if tier.len() > self.config.max_segments_per_tier {
                let take = self.config.max_merge_at_once.min(tier.len()).max(2);
                return tier.iter().take(take).map(|&(_, id)| id).collect();
            }
            tier_start = tier_end;
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::docs::SegmentDocs;
    use crate::segment::index::{SegmentIndex, DEFAULT_INDEX_FANOUT};
    use std::sync::Arc;

    fn segment(id: u32, block_count: u32) -> SegmentInfo {
        SegmentInfo::new(
            id,
            block_count,
            512,
            0,
            0,
            Arc::new(SegmentIndex::new(vec![], DEFAULT_INDEX_FANOUT)),
            Arc::new(SegmentDocs::default()),
        )
    }

    fn policy(max_merge_at_once: usize, max_segments_per_tier: usize, floor: u32) -> TieredMergePolicy {
        TieredMergePolicy::new(MergePolicyConfig {
            max_merge_at_once,
            max_segments_per_tier,
            floor_segment_blocks: floor,
        })
    }

    #[test]
    fn test_no_merge_below_tier_limit() {
        let policy = policy(10, 10, 4);
        let segments: Vec<_> = (1..=5).map(|i| segment(i, 1)).collect();
        assert!(policy.select_merge(&segments).is_empty());
    }

    #[test]
    fn test_overflowing_tier_merges_smallest() {
        let policy = policy(2, 2, 0);
        let segments = vec![segment(1, 1), segment(2, 1), segment(3, 1)];
        let plan = policy.select_merge(&segments);
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(&1));
        assert!(plan.contains(&2));
    }

    #[test]
    fn test_floor_groups_tiny_segments() {
        // Without the floor, block counts 1 and 3 fall in different
        // factor-2 bands; the floor of 4 pulls them into one tier.
        let policy = policy(10, 2, 4);
        let segments = vec![segment(1, 1), segment(2, 3), segment(3, 2)];
        let plan = policy.select_merge(&segments);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_large_tier_left_alone() {
        let policy = policy(10, 2, 0);
        // Two big segments and three small ones; only the small tier
        // overflows.
        let segments = vec![
            segment(1, 100),
            segment(2, 120),
            segment(3, 1),
            segment(4, 1),
            segment(5, 1),
        ];
        let plan = policy.select_merge(&segments);
        assert_eq!(plan.len(), 3);
        assert!(!plan.contains(&1));
        assert!(!plan.contains(&2));
    }

    #[test]
    fn test_max_merge_at_once_caps_plan() {
        let policy = policy(3, 2, 0);
        let segments: Vec<_> = (1..=8).map(|i| segment(i, 1)).collect();
        let plan = policy.select_merge(&segments);
        assert_eq!(plan.len(), 3);
    }
}
