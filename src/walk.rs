// src/walk.rs
//
// Read-only instantiation walk. Turns a completed buffer into world-space
// branch placements: each child starts at its parent's tip, its world rotation
// is `parent_world * child.rotation`, and scale accumulates down the tree.

use glam::{Quat, Vec3};

use crate::buffer::FlatTreeBuffer;
use crate::config;
use crate::error::{Result, TreeError};

/// One placed branch segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BranchInstance {
    /// Global buffer index.
    pub index: u32,
    pub region: u32,
    pub depth: u32,
    pub origin: Vec3,
    pub tip: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WalkSettings {
    /// Roots are placed at `(region * tree_spacing, 0, 0)`.
    pub tree_spacing: f32,
    /// Unscaled segment length along local +Y.
    pub segment_length: f32,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            tree_spacing: config::DEFAULT_TREE_SPACING,
            segment_length: config::BRANCH_SEGMENT_LENGTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkOutcome {
    NothingGenerated,
    Walked { trees: u32, instances: usize },
}

#[derive(Clone, Copy)]
struct Pending {
    index: usize,
    depth: u32,
    origin: Vec3,
    parent_rotation: Quat,
    parent_scale: f32,
}

/// Walks one tree, calling `visit` for each branch in depth-first pre-order.
pub fn walk_tree<F>(buffer: &FlatTreeBuffer, region: u32, settings: &WalkSettings, mut visit: F) -> Result<usize>
where
    F: FnMut(&BranchInstance),
{
    if buffer.is_empty() {
        return Ok(0);
    }
    if region >= buffer.region_count() {
        return Err(TreeError::invariant(region, "walk past last region"));
    }

    let range = buffer.plan().region_range(region);
    let budget = range.len();
    let mut stack = vec![Pending {
        index: range.start,
        depth: 0,
        origin: Vec3::new(region as f32 * settings.tree_spacing, 0.0, 0.0),
        parent_rotation: Quat::IDENTITY,
        parent_scale: 1.0,
    }];
    let mut visited = 0usize;

    while let Some(p) = stack.pop() {
        visited += 1;
        if visited > budget {
            return Err(TreeError::invariant(region, "walk visited more branches than the region holds"));
        }

        let Some(&b) = buffer.branch(p.index) else {
            return Err(TreeError::invariant(region, format!("branch {} outside buffer", p.index)));
        };
        let rotation = p.parent_rotation * b.rotation();
        let scale = p.parent_scale * b.scale;
        let tip = p.origin + rotation * (Vec3::Y * settings.segment_length * scale);

        visit(&BranchInstance {
            index: p.index as u32,
            region,
            depth: p.depth,
            origin: p.origin,
            tip,
            rotation,
            scale,
        });

        // Reverse push keeps siblings in connection order.
        for &child in buffer.children(p.index).iter().rev() {
            if child < 0 || !range.contains(&(child as usize)) {
                return Err(TreeError::invariant(
                    region,
                    format!("branch {} links to {child} outside its region", p.index),
                ));
            }
            stack.push(Pending {
                index: child as usize,
                depth: p.depth + 1,
                origin: tip,
                parent_rotation: rotation,
                parent_scale: scale,
            });
        }
    }

    Ok(visited)
}

/// Walks every tree in the buffer.
pub fn walk<F>(buffer: &FlatTreeBuffer, settings: &WalkSettings, mut visit: F) -> Result<WalkOutcome>
where
    F: FnMut(&BranchInstance),
{
    if buffer.is_empty() {
        return Ok(WalkOutcome::NothingGenerated);
    }
    let trees = buffer.region_count();
    let mut instances = 0;
    for g in 0..trees {
        instances += walk_tree(buffer, g, settings, &mut visit)?;
    }
    Ok(WalkOutcome::Walked { trees, instances })
}

pub fn collect_instances(buffer: &FlatTreeBuffer, settings: &WalkSettings) -> Result<Vec<BranchInstance>> {
    let mut out = Vec::with_capacity(buffer.len());
    walk(buffer, settings, |i| out.push(*i))?;
    Ok(out)
}
