// src/config.rs
// -------------
// Generation knobs: compile-time constants plus the per-request config struct.

use crate::error::{Result, TreeError};

// Rayon workers in the shared generation pool.
pub const WORKER_THREADS: usize = 4;

// Distance between neighbouring tree roots along +X in the render walk (world units).
pub const DEFAULT_TREE_SPACING: f32 = 10.0;

// Length of one unscaled branch segment (world units). Child branches attach at its tip.
pub const BRANCH_SEGMENT_LENGTH: f32 = 1.0;

// Upper bound on the configured tilt, degrees.
pub const MAX_BRANCH_ANGLE_DEG: f32 = 90.0;

/// Parameters for one generation request.
///
/// `max_depth` counts generation rounds, with the root as round 1. A tree with
/// `max_depth == 1` is a lone root; `max_depth == 0` produces nothing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Children per non-leaf branch.
    pub branch_splits: u32,
    /// Generation rounds (tree depth in levels).
    pub max_depth: u32,
    /// Independent trees packed into one buffer.
    pub generation_count: u32,
    /// Tilt away from the parent axis, degrees (deterministic policy).
    ///
    /// At 0 the first child of every branch has no spread either, so it shares
    /// the root's identity rotation. Only a non-zero tilt leaves the root as the
    /// one identity-oriented branch of its region.
    pub branch_angle: f32,
    /// Scale of every non-root branch (deterministic policy).
    pub branch_size: f32,
    /// Scale of each tree root.
    pub root_scale: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            branch_splits: 2,
            max_depth: 1,
            generation_count: 1,
            branch_angle: 0.0,
            branch_size: 1.0,
            root_scale: 1.0,
        }
    }
}

impl GenerationConfig {
    pub fn new(branch_splits: u32, max_depth: u32) -> Self {
        Self {
            branch_splits,
            max_depth,
            ..Self::default()
        }
    }

    pub fn with_generations(mut self, generation_count: u32) -> Self {
        self.generation_count = generation_count;
        self
    }

    pub fn with_angle(mut self, degrees: f32) -> Self {
        self.branch_angle = degrees;
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.branch_size = size;
        self
    }

    pub fn with_root_scale(mut self, scale: f32) -> Self {
        self.root_scale = scale;
        self
    }

    /// Checks the attribute knobs. Capacity limits are checked by the planner.
    pub fn validate(&self) -> Result<()> {
        if !self.branch_angle.is_finite()
            || !(0.0..=MAX_BRANCH_ANGLE_DEG).contains(&self.branch_angle)
        {
            return Err(TreeError::InvalidConfiguration(format!(
                "branch_angle {} outside [0, {}]",
                self.branch_angle, MAX_BRANCH_ANGLE_DEG
            )));
        }
        if !self.branch_size.is_finite() || self.branch_size < 0.0 {
            return Err(TreeError::InvalidConfiguration(format!(
                "branch_size {} must be finite and non-negative",
                self.branch_size
            )));
        }
        if !self.root_scale.is_finite() || self.root_scale < 0.0 {
            return Err(TreeError::InvalidConfiguration(format!(
                "root_scale {} must be finite and non-negative",
                self.root_scale
            )));
        }
        Ok(())
    }
}
