// src/capacity.rs
//
// Buffer sizing ahead of generation. Every index written by the generator must
// fit inside the numbers computed here, so the arithmetic is checked against
// the i32 index range used by the flat layout.

use std::ops::Range;

use crate::error::{Result, TreeError};

const INDEX_LIMIT: u64 = i32::MAX as u64;

/// Max branches one tree can hold: `sum_{i=1..=max_depth} branch_splits^(i-1)`.
pub fn capacity_per_tree(branch_splits: u32, max_depth: u32) -> Result<u32> {
    if max_depth as u64 > INDEX_LIMIT {
        return Err(TreeError::InvalidConfiguration(format!(
            "max_depth {max_depth} exceeds index range"
        )));
    }

    match branch_splits {
        0 => return Ok(u32::from(max_depth > 0)),
        1 => return Ok(max_depth),
        _ => {}
    }

    let splits = branch_splits as u64;
    let mut total: u64 = 0;
    let mut term: u64 = 1;

    for i in 1..=max_depth {
        total += term;
        if total > INDEX_LIMIT {
            return Err(TreeError::InvalidConfiguration(format!(
                "capacity for branch_splits={branch_splits}, max_depth={max_depth} overflows index range"
            )));
        }
        if i < max_depth {
            // total <= i32::MAX and splits <= u32::MAX, so this cannot wrap u64.
            term *= splits;
        }
    }

    Ok(total as u32)
}

/// Total buffer length for `generation_count` trees.
pub fn total_capacity(capacity_per_tree: u32, generation_count: u32) -> Result<u32> {
    if generation_count < 1 {
        return Err(TreeError::InvalidConfiguration(
            "generation_count must be at least 1".to_string(),
        ));
    }
    let total = capacity_per_tree as u64 * generation_count as u64;
    if total > INDEX_LIMIT {
        return Err(TreeError::InvalidConfiguration(format!(
            "{generation_count} trees of {capacity_per_tree} branches overflow index range"
        )));
    }
    Ok(total as u32)
}

/// Sizing for one batch, computed once and shared by every region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityPlan {
    pub branch_splits: u32,
    pub max_depth: u32,
    pub capacity_per_tree: u32,
    pub generation_count: u32,
    pub total: u32,
}

impl CapacityPlan {
    pub fn new(branch_splits: u32, max_depth: u32, generation_count: u32) -> Result<Self> {
        let capacity_per_tree = capacity_per_tree(branch_splits, max_depth)?;
        let total = total_capacity(capacity_per_tree, generation_count)?;
        Ok(Self {
            branch_splits,
            max_depth,
            capacity_per_tree,
            generation_count,
            total,
        })
    }

    /// Plan for a request that yields nothing (`generation_count == 0`).
    pub fn empty(branch_splits: u32, max_depth: u32) -> Self {
        Self {
            branch_splits,
            max_depth,
            capacity_per_tree: 0,
            generation_count: 0,
            total: 0,
        }
    }

    #[inline]
    pub fn region_base(&self, region: u32) -> u32 {
        region * self.capacity_per_tree
    }

    #[inline]
    pub fn region_range(&self, region: u32) -> Range<usize> {
        let base = self.region_base(region) as usize;
        base..base + self.capacity_per_tree as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
