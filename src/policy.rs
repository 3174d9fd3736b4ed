// src/policy.rs
//
// Attribute policies decide the rotation and scale of each new branch. The
// generator only ever talks to the `AttributePolicy` trait, so the topology
// code is identical for deterministic and stochastic trees.

use glam::Quat;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::GenerationConfig;
use crate::error::{Result, TreeError};
use crate::hash::region_seed;

/// Where a new branch sits, as seen by a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchSlot {
    pub region: u32,
    /// Depth of the new branch (root = 0).
    pub depth: u32,
    pub max_depth: u32,
    /// Parent's `connected_count` before this branch is linked.
    pub sibling_index: u32,
    /// Parent's `child_count`.
    pub sibling_count: u32,
}

impl BranchSlot {
    /// `depth / max_depth`, in `[0, 1]`.
    #[inline]
    pub fn depth_fraction(&self) -> f32 {
        if self.max_depth == 0 {
            0.0
        } else {
            (self.depth as f32 / self.max_depth as f32).clamp(0.0, 1.0)
        }
    }

    /// Even angular spread around the parent axis, degrees.
    #[inline]
    pub fn spread_degrees(&self) -> f32 {
        if self.sibling_count == 0 {
            0.0
        } else {
            (360.0 / self.sibling_count as f32) * self.sibling_index as f32
        }
    }
}

/// Tilt `tilt_deg` away from the parent axis, then turn `spread_deg` around it.
#[inline]
pub fn branch_rotation(tilt_deg: f32, spread_deg: f32) -> Quat {
    Quat::from_rotation_y(spread_deg.to_radians()) * Quat::from_rotation_x(tilt_deg.to_radians())
}

pub trait AttributePolicy {
    fn root_scale(&mut self) -> f32;
    fn rotation(&mut self, slot: &BranchSlot) -> Quat;
    fn scale(&mut self, slot: &BranchSlot) -> f32;
}

impl<P: AttributePolicy + ?Sized> AttributePolicy for &mut P {
    fn root_scale(&mut self) -> f32 {
        (**self).root_scale()
    }
    fn rotation(&mut self, slot: &BranchSlot) -> Quat {
        (**self).rotation(slot)
    }
    fn scale(&mut self, slot: &BranchSlot) -> f32 {
        (**self).scale(slot)
    }
}

// -----------------------------------------------------------------------------
// Deterministic
// -----------------------------------------------------------------------------

/// Fixed tilt, fixed size, spread purely from sibling position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeterministicPolicy {
    pub angle: f32,
    pub size: f32,
    pub root_size: f32,
}

impl DeterministicPolicy {
    pub fn new(angle: f32, size: f32) -> Self {
        Self {
            angle,
            size,
            root_size: 1.0,
        }
    }

    pub fn from_config(cfg: &GenerationConfig) -> Self {
        Self {
            angle: cfg.branch_angle,
            size: cfg.branch_size,
            root_size: cfg.root_scale,
        }
    }
}

impl AttributePolicy for DeterministicPolicy {
    fn root_scale(&mut self) -> f32 {
        self.root_size
    }

    fn rotation(&mut self, slot: &BranchSlot) -> Quat {
        branch_rotation(self.angle, slot.spread_degrees())
    }

    fn scale(&mut self, _slot: &BranchSlot) -> f32 {
        self.size
    }
}

// -----------------------------------------------------------------------------
// Response curves
// -----------------------------------------------------------------------------

/// Scale multiplier as a function of normalized depth in `[0, 1]`.
pub trait ResponseCurve {
    fn evaluate(&self, t: f32) -> f32;
}

impl<F: Fn(f32) -> f32> ResponseCurve for F {
    fn evaluate(&self, t: f32) -> f32 {
        self(t)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantCurve(pub f32);

impl ResponseCurve for ConstantCurve {
    fn evaluate(&self, _t: f32) -> f32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearCurve {
    pub start: f32,
    pub end: f32,
}

impl ResponseCurve for LinearCurve {
    fn evaluate(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        self.start + (self.end - self.start) * t
    }
}

/// Piecewise-linear curve through `(t, value)` keys, clamped at both ends.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyframeCurve {
    keys: Vec<(f32, f32)>,
}

impl KeyframeCurve {
    pub fn new(mut keys: Vec<(f32, f32)>) -> Result<Self> {
        if keys.is_empty() {
            return Err(TreeError::InvalidConfiguration(
                "keyframe curve needs at least one key".to_string(),
            ));
        }
        if keys.iter().any(|(t, v)| !t.is_finite() || !v.is_finite()) {
            return Err(TreeError::InvalidConfiguration(
                "keyframe curve keys must be finite".to_string(),
            ));
        }
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { keys })
    }
}

impl ResponseCurve for KeyframeCurve {
    fn evaluate(&self, t: f32) -> f32 {
        let first = self.keys[0];
        let last = self.keys[self.keys.len() - 1];
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        // first key with time >= t; always in 1..len here
        let i = self.keys.partition_point(|k| k.0 < t);
        let (t0, v0) = self.keys[i - 1];
        let (t1, v1) = self.keys[i];
        let span = t1 - t0;
        if span <= f32::EPSILON {
            return v1;
        }
        v0 + (v1 - v0) * ((t - t0) / span)
    }
}

// -----------------------------------------------------------------------------
// Stochastic
// -----------------------------------------------------------------------------

/// Closed interval sampled uniformly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(TreeError::InvalidConfiguration(format!(
                "invalid range [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    pub const fn fixed(v: f32) -> Self {
        Self { min: v, max: v }
    }

    #[inline]
    pub fn sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> f32 {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Ranges and curve shared by every region of a stochastic batch.
#[derive(Clone, Debug)]
pub struct StochasticSettings<C> {
    pub angle: ValueRange,
    pub size: ValueRange,
    pub curve: C,
    pub root_scale: f32,
}

impl<C: ResponseCurve + Clone> StochasticSettings<C> {
    pub fn new(angle: ValueRange, size: ValueRange, curve: C) -> Result<Self> {
        // Fields are public, so a literal range may have skipped `ValueRange::new`.
        let angle = ValueRange::new(angle.min, angle.max)?;
        let size = ValueRange::new(size.min, size.max)?;
        if angle.min < 0.0 || angle.max > crate::config::MAX_BRANCH_ANGLE_DEG {
            return Err(TreeError::InvalidConfiguration(format!(
                "angle range [{}, {}] outside [0, {}]",
                angle.min,
                angle.max,
                crate::config::MAX_BRANCH_ANGLE_DEG
            )));
        }
        if size.min < 0.0 {
            return Err(TreeError::InvalidConfiguration(format!(
                "size range [{}, {}] must be non-negative",
                size.min, size.max
            )));
        }
        Ok(Self {
            angle,
            size,
            curve,
            root_scale: 1.0,
        })
    }

    pub fn with_root_scale(mut self, root_scale: f32) -> Self {
        self.root_scale = root_scale;
        self
    }

    /// Policy for one region, with its own stream derived from the batch seed.
    pub fn seeded(&self, seed: u64, region: u32) -> StochasticPolicy<ChaCha8Rng, C> {
        StochasticPolicy::new(
            self.clone(),
            ChaCha8Rng::seed_from_u64(region_seed(seed, region)),
        )
    }
}

/// Uniform tilt and size, size shaped by a depth response curve.
///
/// The random source is handed in by the caller; pass `&mut rng` to lend one.
#[derive(Clone, Debug)]
pub struct StochasticPolicy<R, C> {
    settings: StochasticSettings<C>,
    rng: R,
}

impl<R: RngCore, C: ResponseCurve> StochasticPolicy<R, C> {
    pub fn new(settings: StochasticSettings<C>, rng: R) -> Self {
        Self { settings, rng }
    }
}

impl<R: RngCore, C: ResponseCurve> AttributePolicy for StochasticPolicy<R, C> {
    fn root_scale(&mut self) -> f32 {
        self.settings.root_scale
    }

    fn rotation(&mut self, slot: &BranchSlot) -> Quat {
        let tilt = self.settings.angle.sample(&mut self.rng);
        branch_rotation(tilt, slot.spread_degrees())
    }

    fn scale(&mut self, slot: &BranchSlot) -> f32 {
        let base = self.settings.size.sample(&mut self.rng);
        (base * self.settings.curve.evaluate(slot.depth_fraction())).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(sibling_index: u32, sibling_count: u32) -> BranchSlot {
        BranchSlot {
            region: 0,
            depth: 1,
            max_depth: 3,
            sibling_index,
            sibling_count,
        }
    }

    #[test]
    fn four_way_spread_is_ninety_degrees() {
        let spreads: Vec<f32> = (0..4).map(|i| slot(i, 4).spread_degrees()).collect();
        assert_eq!(spreads, vec![0.0, 90.0, 180.0, 270.0]);
    }

    #[test]
    fn deterministic_policy_is_fixed() {
        let mut p = DeterministicPolicy::new(30.0, 0.5);
        let a = p.rotation(&slot(1, 2));
        let b = p.rotation(&slot(1, 2));
        assert_eq!(a, b);
        assert_eq!(p.scale(&slot(0, 2)), 0.5);
        assert_eq!(p.root_scale(), 1.0);
    }

    #[test]
    fn zero_tilt_first_child_is_identity() {
        let q = branch_rotation(0.0, 0.0);
        assert!(q.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn keyframes_interpolate_and_clamp() {
        let c = KeyframeCurve::new(vec![(1.0, 0.0), (0.0, 1.0), (0.5, 0.5)]).unwrap();
        assert_eq!(c.evaluate(-1.0), 1.0);
        assert_eq!(c.evaluate(2.0), 0.0);
        assert!((c.evaluate(0.25) - 0.75).abs() < 1e-6);
        assert!((c.evaluate(0.75) - 0.25).abs() < 1e-6);
        assert!(KeyframeCurve::new(Vec::new()).is_err());
    }

    #[test]
    fn linear_and_closure_curves() {
        let l = LinearCurve { start: 1.0, end: 0.0 };
        assert_eq!(l.evaluate(0.5), 0.5);
        let f = |t: f32| 2.0 * t;
        assert_eq!(f.evaluate(0.25), 0.5);
    }

    #[test]
    fn stochastic_values_stay_in_range() {
        let settings = StochasticSettings::new(
            ValueRange::new(10.0, 40.0).unwrap(),
            ValueRange::new(0.5, 1.5).unwrap(),
            ConstantCurve(1.0),
        )
        .unwrap();
        let mut p = settings.seeded(7, 0);
        for i in 0..64 {
            let s = p.scale(&slot(i % 3, 3));
            assert!((0.5..=1.5).contains(&s));
        }
    }

    #[test]
    fn stochastic_is_seed_reproducible() {
        let settings = StochasticSettings::new(
            ValueRange::new(0.0, 90.0).unwrap(),
            ValueRange::new(0.1, 2.0).unwrap(),
            LinearCurve { start: 1.0, end: 0.2 },
        )
        .unwrap();
        let mut a = settings.seeded(99, 3);
        let mut b = settings.seeded(99, 3);
        for i in 0..16 {
            assert_eq!(a.rotation(&slot(i, 16)), b.rotation(&slot(i, 16)));
            assert_eq!(a.scale(&slot(i, 16)), b.scale(&slot(i, 16)));
        }
    }

    #[test]
    fn lent_rng_is_advanced() {
        let settings = StochasticSettings::new(
            ValueRange::new(0.0, 45.0).unwrap(),
            ValueRange::fixed(1.0),
            ConstantCurve(1.0),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let before = rng.clone();
        {
            let mut p = StochasticPolicy::new(settings, &mut rng);
            p.rotation(&slot(0, 2));
        }
        assert_ne!(rng.get_word_pos(), before.get_word_pos());
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(ValueRange::new(2.0, 1.0).is_err());
        assert!(StochasticSettings::new(
            ValueRange::new(0.0, 120.0).unwrap(),
            ValueRange::fixed(1.0),
            ConstantCurve(1.0)
        )
        .is_err());
    }

    #[test]
    fn literal_ranges_are_rechecked() {
        let inverted = ValueRange { min: 40.0, max: 10.0 };
        let res = StochasticSettings::new(inverted, ValueRange::fixed(1.0), ConstantCurve(1.0));
        assert!(matches!(res, Err(TreeError::InvalidConfiguration(_))));

        let nan = ValueRange { min: f32::NAN, max: 1.0 };
        let res = StochasticSettings::new(ValueRange::fixed(10.0), nan, ConstantCurve(1.0));
        assert!(matches!(res, Err(TreeError::InvalidConfiguration(_))));
    }
}
