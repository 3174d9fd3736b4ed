// src/buffer.rs
//
// Flat tree storage: one Vec of fixed-size branch records plus one Vec of i32
// child indices. Nothing points at anything; every edge is an integer offset.
//
// Layout contract with external executors (byte-for-byte):
//   BranchRecord = { rotation: [f32; 4], scale: f32, child_count: i32,
//                    connected_count: i32, child_start_index: i32 }  (32 bytes)
//   connections  = i32 per slot, -1 = not yet connected

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Quat};

use crate::capacity::CapacityPlan;
use crate::error::{Result, TreeError};

/// Sentinel for "no index" in `child_start_index` and unfilled connection slots.
pub const NO_INDEX: i32 = -1;

pub const BRANCH_RECORD_BYTES: usize = std::mem::size_of::<BranchRecord>();

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct BranchRecord {
    /// Quaternion (x, y, z, w) relative to the parent's frame.
    pub rotation: [f32; 4],
    pub scale: f32,
    pub child_count: i32,
    pub connected_count: i32,
    /// First slot of this branch's child list in the connection table, or `NO_INDEX`.
    pub child_start_index: i32,
}

impl BranchRecord {
    /// Unwritten slot.
    pub const EMPTY: Self = Self {
        rotation: [0.0; 4],
        scale: 0.0,
        child_count: 0,
        connected_count: 0,
        child_start_index: NO_INDEX,
    };

    pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.rotation)
    }

    #[inline]
    pub fn set_rotation(&mut self, q: Quat) {
        self.rotation = q.to_array();
    }

    #[inline]
    pub fn is_root_oriented(&self) -> bool {
        self.rotation == Self::IDENTITY_ROTATION
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.child_count == 0
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.connected_count == self.child_count
    }

    /// (tilt, spread, roll) in degrees, for consumers that store Euler angles.
    /// Decomposes `rotation = Ry(spread) * Rx(tilt) * Rz(roll)`.
    pub fn euler_degrees(&self) -> [f32; 3] {
        let m = Mat3::from_quat(self.rotation());
        let tilt = (-m.z_axis.y).clamp(-1.0, 1.0).asin();
        let spread = m.z_axis.x.atan2(m.z_axis.z);
        let roll = m.x_axis.y.atan2(m.y_axis.y);
        [tilt.to_degrees(), spread.to_degrees(), roll.to_degrees()]
    }
}

impl Default for BranchRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Branch records + connection table for a whole batch.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatTreeBuffer {
    plan: CapacityPlan,
    branches: Vec<BranchRecord>,
    connections: Vec<i32>,
}

impl FlatTreeBuffer {
    /// Allocates every slot up front. Nothing grows after this.
    pub fn allocate(plan: CapacityPlan) -> Self {
        let len = plan.total as usize;
        Self {
            plan,
            branches: vec![BranchRecord::EMPTY; len],
            connections: vec![NO_INDEX; len],
        }
    }

    pub fn empty(plan: CapacityPlan) -> Self {
        Self {
            plan,
            branches: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Rebuilds a buffer from bytes returned by an external executor.
    pub fn from_bytes(plan: CapacityPlan, branch_bytes: &[u8], connection_bytes: &[u8]) -> Result<Self> {
        let len = plan.total as usize;
        if branch_bytes.len() != len * BRANCH_RECORD_BYTES {
            return Err(TreeError::InvalidConfiguration(format!(
                "branch bytes: expected {} got {}",
                len * BRANCH_RECORD_BYTES,
                branch_bytes.len()
            )));
        }
        if connection_bytes.len() != len * std::mem::size_of::<i32>() {
            return Err(TreeError::InvalidConfiguration(format!(
                "connection bytes: expected {} got {}",
                len * std::mem::size_of::<i32>(),
                connection_bytes.len()
            )));
        }

        // Source slices may be unaligned; read each element by value.
        let branches = branch_bytes
            .chunks_exact(BRANCH_RECORD_BYTES)
            .map(bytemuck::pod_read_unaligned::<BranchRecord>)
            .collect();
        let connections = connection_bytes
            .chunks_exact(std::mem::size_of::<i32>())
            .map(bytemuck::pod_read_unaligned::<i32>)
            .collect();

        Ok(Self {
            plan,
            branches,
            connections,
        })
    }

    #[inline]
    pub fn plan(&self) -> &CapacityPlan {
        &self.plan
    }

    #[inline]
    pub fn branches(&self) -> &[BranchRecord] {
        &self.branches
    }

    #[inline]
    pub fn connections(&self) -> &[i32] {
        &self.connections
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    #[inline]
    pub fn region_count(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.plan.generation_count
        }
    }

    #[inline]
    pub fn root_index(&self, region: u32) -> usize {
        self.plan.region_base(region) as usize
    }

    #[inline]
    pub fn branch(&self, index: usize) -> Option<&BranchRecord> {
        self.branches.get(index)
    }

    /// Global indices of the children of `index`, in connection order.
    pub fn children(&self, index: usize) -> &[i32] {
        let Some(b) = self.branches.get(index) else {
            return &[];
        };
        if b.child_start_index < 0 || b.connected_count <= 0 {
            return &[];
        }
        let start = b.child_start_index as usize;
        let end = (start + b.connected_count as usize).min(self.connections.len());
        &self.connections[start.min(end)..end]
    }

    pub fn branch_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.branches)
    }

    pub fn connection_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.connections)
    }

    /// Mutable view of one tree's slots.
    pub fn region_mut(&mut self, region: u32) -> RegionMut<'_> {
        let range = self.plan.region_range(region);
        RegionMut {
            region,
            base: self.plan.region_base(region),
            branches: &mut self.branches[range.clone()],
            connections: &mut self.connections[range],
        }
    }

    /// Disjoint mutable views, one per tree.
    pub fn regions_mut(&mut self) -> impl Iterator<Item = RegionMut<'_>> {
        let cap = (self.plan.capacity_per_tree as usize).max(1);
        let per_tree = self.plan.capacity_per_tree;
        self.branches
            .chunks_mut(cap)
            .zip(self.connections.chunks_mut(cap))
            .enumerate()
            .map(move |(g, (branches, connections))| RegionMut {
                region: g as u32,
                base: g as u32 * per_tree,
                branches,
                connections,
            })
    }

    pub(crate) fn split_storage_mut(&mut self) -> (&mut [BranchRecord], &mut [i32]) {
        (&mut self.branches, &mut self.connections)
    }

    /// Checks every structural invariant of a completed region.
    pub fn validate_region(&self, region: u32) -> Result<()> {
        let cap = self.plan.capacity_per_tree as usize;
        if self.is_empty() || cap == 0 {
            return Ok(());
        }
        if region >= self.plan.generation_count {
            return Err(TreeError::invariant(region, "region out of range"));
        }

        let base = self.plan.region_base(region) as usize;
        let end = base + cap;
        let max_depth = self.plan.max_depth as usize;
        let fail = |detail: String| TreeError::invariant(region, detail);

        let root = &self.branches[base];
        if !root.is_root_oriented() {
            return Err(fail(format!("root {base} is not identity-oriented")));
        }

        let mut visited = vec![false; cap];
        let mut claimed = vec![false; cap];
        let mut stack = vec![(base, 0usize)];
        visited[0] = true;

        while let Some((index, depth)) = stack.pop() {
            let b = &self.branches[index];
            if !b.is_complete() {
                return Err(fail(format!(
                    "branch {index} connected {}/{}",
                    b.connected_count, b.child_count
                )));
            }
            if depth + 1 >= max_depth && !b.is_leaf() {
                return Err(fail(format!("branch {index} at depth {depth} has children")));
            }
            if b.is_leaf() {
                if b.child_start_index != NO_INDEX {
                    return Err(fail(format!("leaf {index} has a child list")));
                }
                continue;
            }
            if b.child_count < 0 || b.child_start_index < 0 {
                return Err(fail(format!("branch {index} has a malformed child list")));
            }

            let start = b.child_start_index as usize;
            let stop = start + b.child_count as usize;
            if start < base || stop > end {
                return Err(fail(format!(
                    "branch {index} child list {start}..{stop} leaves region {base}..{end}"
                )));
            }

            for slot in start..stop {
                if std::mem::replace(&mut claimed[slot - base], true) {
                    return Err(fail(format!("connection slot {slot} shared")));
                }
                let child = self.connections[slot];
                if child < 0 || (child as usize) < base || (child as usize) >= end {
                    return Err(fail(format!("slot {slot} points at {child}")));
                }
                let child = child as usize;
                if std::mem::replace(&mut visited[child - base], true) {
                    return Err(fail(format!("branch {child} has two parents")));
                }
                stack.push((child, depth + 1));
            }
        }

        for (offset, seen) in visited.iter().enumerate() {
            if !seen && self.branches[base + offset] != BranchRecord::EMPTY {
                return Err(fail(format!("branch {} unreachable", base + offset)));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        (0..self.region_count()).try_for_each(|g| self.validate_region(g))
    }
}

/// One tree's slice of the buffer. Indices inside are local; `base` maps them
/// to global buffer indices.
#[derive(Debug)]
pub struct RegionMut<'a> {
    pub region: u32,
    pub base: u32,
    pub branches: &'a mut [BranchRecord],
    pub connections: &'a mut [i32],
}

impl RegionMut<'_> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.branches.len()
    }
}
