// src/generator.rs
//
// Iterative tree builder.
// Fills one region of a FlatTreeBuffer depth-first without recursion: an
// explicit path of open branches (one per depth) replaces the call stack, and
// backtracking walks that path upward to the nearest branch still missing
// children. Only fixed-size arrays and integer indices are touched, so the same
// loop can run inside a kernel with no call stack and no allocator.

use tracing::{debug, error};

use crate::buffer::{BranchRecord, RegionMut, NO_INDEX};
use crate::capacity::CapacityPlan;
use crate::error::{Result, TreeError};
use crate::policy::{AttributePolicy, BranchSlot};

/// Counters for one region's generation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub region: u32,
    /// Branches written, root included.
    pub branches: u32,
    /// Connection slots reserved for child lists.
    pub connections: u32,
    /// Times the cursor climbed back up the path.
    pub backtracks: u32,
    pub deepest: u32,
}

impl RegionStats {
    fn empty(region: u32) -> Self {
        Self {
            region,
            ..Self::default()
        }
    }
}

// -----------------------------------------------------------------------------
// Generation-local state (never shared across regions or calls)
// -----------------------------------------------------------------------------

struct Cursor {
    /// Local index of the open branch at each depth.
    working_path: Box<[u32]>,
    depth: usize,
    /// Branches created after the root (0 = only the root is placed).
    created_count: u32,
    /// Children declared by every branch created so far.
    branches_to_create: u32,
    /// Next free local slot of the connection table.
    next_connection: u32,
    backtracks: u32,
    deepest: usize,
}

impl Cursor {
    fn new(path_len: usize) -> Self {
        Self {
            working_path: vec![0u32; path_len].into_boxed_slice(),
            depth: 0,
            created_count: 0,
            branches_to_create: 0,
            next_connection: 0,
            backtracks: 0,
            deepest: 0,
        }
    }
}

/// Reserves `count` consecutive connection slots; returns the global start index.
#[inline]
fn reserve_connections(cur: &mut Cursor, region: &RegionMut<'_>, count: u32) -> Result<i32> {
    let start = cur.next_connection;
    let end = start as usize + count as usize;
    if end > region.connections.len() {
        return Err(TreeError::invariant(
            region.region,
            format!(
                "connection slots {start}..{end} exceed region capacity {}",
                region.connections.len()
            ),
        ));
    }
    cur.next_connection = end as u32;
    Ok((region.base + start) as i32)
}

/// Builds one complete tree in `region` using `plan`'s branching factor and depth.
///
/// `max_depth == 0` leaves the region untouched and reports zero branches.
pub fn generate_region<P: AttributePolicy + ?Sized>(
    plan: &CapacityPlan,
    mut region: RegionMut<'_>,
    policy: &mut P,
) -> Result<RegionStats> {
    let cap = region.capacity();
    if plan.max_depth == 0 || cap == 0 {
        return Ok(RegionStats::empty(region.region));
    }
    if cap != plan.capacity_per_tree as usize || region.connections.len() != cap {
        return Err(TreeError::invariant(
            region.region,
            format!(
                "region holds {cap} slots, plan expects {}",
                plan.capacity_per_tree
            ),
        ));
    }

    let max_depth = plan.max_depth as usize;
    let leaf_depth = max_depth - 1;
    let splits = plan.branch_splits;
    let base = region.base;

    // A path never holds more distinct branches than the region has slots.
    let mut cur = Cursor::new(max_depth.min(cap));

    // --- root ---
    let root_children = if max_depth > 1 { splits } else { 0 };
    let mut root = BranchRecord {
        rotation: BranchRecord::IDENTITY_ROTATION,
        scale: policy.root_scale(),
        child_count: root_children as i32,
        connected_count: 0,
        child_start_index: NO_INDEX,
    };
    if root_children > 0 {
        root.child_start_index = reserve_connections(&mut cur, &region, root_children)?;
    }
    region.branches[0] = root;
    cur.working_path[0] = 0;
    cur.branches_to_create = root_children;

    loop {
        // Complete once every declared child exists and the cursor rests at the
        // deepest level (a root that can never grow is complete immediately).
        if cur.created_count == cur.branches_to_create
            && (cur.depth == leaf_depth || cur.branches_to_create == 0)
        {
            break;
        }

        if cur.depth == leaf_depth {
            // Climb to the nearest branch still missing children.
            loop {
                if cur.depth == 0 {
                    error!(
                        region = region.region,
                        created = cur.created_count,
                        to_create = cur.branches_to_create,
                        "backtracking exhausted the working path"
                    );
                    return Err(TreeError::invariant(
                        region.region,
                        "backtracking found no branch with missing children",
                    ));
                }
                cur.depth -= 1;
                let open = &region.branches[cur.working_path[cur.depth] as usize];
                if open.connected_count < open.child_count {
                    break;
                }
            }
            cur.backtracks += 1;
        }

        // --- build one branch under the open branch at `depth` ---
        let parent_local = cur.working_path[cur.depth] as usize;
        let parent = region.branches[parent_local];
        if parent.connected_count >= parent.child_count || parent.child_start_index < 0 {
            return Err(TreeError::invariant(
                region.region,
                format!(
                    "branch {} has no free child slot ({}/{})",
                    base as usize + parent_local,
                    parent.connected_count,
                    parent.child_count
                ),
            ));
        }

        let local = cur.created_count as usize + 1;
        if local >= cap {
            return Err(TreeError::invariant(
                region.region,
                format!("branch index {} outside region of {cap}", base as usize + local),
            ));
        }
        cur.created_count += 1;
        let global = base + local as u32;

        let child_depth = cur.depth + 1;
        let slot = BranchSlot {
            region: region.region,
            depth: child_depth as u32,
            max_depth: plan.max_depth,
            sibling_index: parent.connected_count as u32,
            sibling_count: parent.child_count as u32,
        };

        let mut child = BranchRecord {
            rotation: policy.rotation(&slot).to_array(),
            scale: policy.scale(&slot),
            child_count: 0,
            connected_count: 0,
            child_start_index: NO_INDEX,
        };
        if child_depth < leaf_depth && splits > 0 {
            child.child_count = splits as i32;
            child.child_start_index = reserve_connections(&mut cur, &region, splits)?;
            cur.branches_to_create += splits;
        }
        region.branches[local] = child;

        // Link parent -> child in the parent's next connection slot.
        let conn_global = parent.child_start_index as usize + parent.connected_count as usize;
        let conn_local = conn_global.wrapping_sub(base as usize);
        if conn_local >= region.connections.len() {
            return Err(TreeError::invariant(
                region.region,
                format!("connection slot {conn_global} outside region"),
            ));
        }
        region.connections[conn_local] = global as i32;
        region.branches[parent_local].connected_count += 1;

        cur.depth = child_depth;
        cur.working_path[cur.depth] = local as u32;
        cur.deepest = cur.deepest.max(cur.depth);
    }

    let stats = RegionStats {
        region: region.region,
        branches: cur.created_count + 1,
        connections: cur.next_connection,
        backtracks: cur.backtracks,
        deepest: cur.deepest as u32,
    };
    debug!(
        region = stats.region,
        branches = stats.branches,
        backtracks = stats.backtracks,
        "region generated"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FlatTreeBuffer;
    use crate::policy::DeterministicPolicy;

    fn build(splits: u32, depth: u32) -> (FlatTreeBuffer, RegionStats) {
        let plan = CapacityPlan::new(splits, depth, 1).unwrap();
        let mut buf = FlatTreeBuffer::allocate(plan);
        let mut policy = DeterministicPolicy::new(25.0, 0.8);
        let stats = generate_region(&plan, buf.region_mut(0), &mut policy).unwrap();
        (buf, stats)
    }

    #[test]
    fn single_round_is_a_leaf_root() {
        let (buf, stats) = build(2, 1);
        assert_eq!(buf.len(), 1);
        let root = buf.branches()[0];
        assert_eq!(root.child_count, 0);
        assert_eq!(root.child_start_index, NO_INDEX);
        assert!(root.is_root_oriented());
        assert_eq!(stats.branches, 1);
    }

    #[test]
    fn zero_splits_stops_at_root() {
        let (buf, stats) = build(0, 5);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.branches()[0].child_count, 0);
        assert_eq!(stats.branches, 1);
        assert_eq!(stats.backtracks, 0);
    }

    #[test]
    fn fills_every_slot_and_validates() {
        for splits in 1..5 {
            for depth in 1..6 {
                let (buf, stats) = build(splits, depth);
                assert_eq!(stats.branches as usize, buf.len(), "splits={splits} depth={depth}");
                assert_eq!(stats.connections as usize, buf.len() - 1);
                buf.validate().unwrap();
            }
        }
    }

    #[test]
    fn binary_depth_three_layout() {
        // Creation order: 0 root, 1 (child of 0), 2 (child of 1), 3 (child of 1),
        // 4 (child of 0), 5 (child of 4), 6 (child of 4).
        let (buf, stats) = build(2, 3);
        assert_eq!(buf.children(0), &[1, 4]);
        assert_eq!(buf.children(1), &[2, 3]);
        assert_eq!(buf.children(4), &[5, 6]);
        assert!(buf.children(2).is_empty());
        assert_eq!(buf.branches()[0].child_start_index, 0);
        assert_eq!(buf.branches()[1].child_start_index, 2);
        assert_eq!(buf.branches()[4].child_start_index, 4);
        assert_eq!(stats.deepest, 2);
        assert_eq!(stats.backtracks, 3);
    }

    #[test]
    fn children_use_parent_scale_from_policy() {
        let (buf, _) = build(3, 3);
        assert_eq!(buf.branches()[0].scale, 1.0);
        assert!(buf.branches()[1..].iter().all(|b| b.scale == 0.8));
    }

    #[test]
    fn mismatched_plan_is_an_invariant_violation() {
        let small = CapacityPlan::new(2, 2, 1).unwrap();
        let big = CapacityPlan::new(2, 3, 1).unwrap();
        let mut buf = FlatTreeBuffer::allocate(small);
        let mut policy = DeterministicPolicy::new(10.0, 1.0);
        let err = generate_region(&big, buf.region_mut(0), &mut policy).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn zero_depth_writes_nothing() {
        let plan = CapacityPlan::new(3, 0, 1).unwrap();
        let mut buf = FlatTreeBuffer::allocate(plan);
        assert!(buf.is_empty());
        let mut policy = DeterministicPolicy::new(10.0, 1.0);
        let stats = generate_region(&plan, buf.region_mut(0), &mut policy).unwrap();
        assert_eq!(stats.branches, 0);
    }
}
