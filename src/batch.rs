// src/batch.rs
//
// Batch orchestration: one capacity plan, one buffer, one generator pass per
// tree region. Regions are disjoint slices, so the parallel path hands each
// rayon task its own `&mut` pair and needs no locking.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rand_chacha::ChaCha8Rng;
use tracing::{error, info, warn};

use crate::buffer::{FlatTreeBuffer, RegionMut};
use crate::capacity::{capacity_per_tree, CapacityPlan};
use crate::config::{self, GenerationConfig};
use crate::error::Result;
use crate::generator::{generate_region, RegionStats};
use crate::policy::{AttributePolicy, DeterministicPolicy, ResponseCurve, StochasticPolicy, StochasticSettings};

pub static GENERATION_POOL: Lazy<ThreadPool> = Lazy::new(|| {
    ThreadPoolBuilder::new()
        .num_threads(config::WORKER_THREADS)
        .thread_name(|i| format!("tree-gen-{}", i))
        .build()
        .expect("failed to build tree generation thread pool")
});

// --- Batch profiling ---------------------------------------------------------

#[derive(Clone, Copy, Default, Debug)]
pub struct BatchTimingsMs {
    pub total: f64,
    pub plan: f64,
    pub allocate: f64,
    pub generate: f64,
}

#[inline(always)]
pub(crate) fn ms_since(t0: std::time::Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}

macro_rules! time_it {
    ($tim:expr, $field:ident, $body:block) => {{
        let _t0 = std::time::Instant::now();
        let _r = { $body };
        $tim.$field += ms_since(_t0);
        _r
    }};
}

// -----------------------------------------------------------------------------
// Output
// -----------------------------------------------------------------------------

pub struct BatchOutput {
    pub buffer: FlatTreeBuffer,
    pub regions: Vec<RegionStats>,
    pub timings: BatchTimingsMs,
}

impl BatchOutput {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn total_branches(&self) -> u64 {
        self.regions.iter().map(|r| r.branches as u64).sum()
    }
}

/// How regions are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    #[default]
    Sequential,
    Parallel,
}

/// Plans and allocates, or returns `None` for a benign empty request.
fn prepare(cfg: &GenerationConfig, tim: &mut BatchTimingsMs) -> Result<Option<FlatTreeBuffer>> {
    cfg.validate()?;
    // Oversized trees are rejected even when no tree is requested.
    capacity_per_tree(cfg.branch_splits, cfg.max_depth)?;

    if cfg.generation_count == 0 {
        warn!("generation_count is 0; nothing generated");
        return Ok(None);
    }

    let plan = time_it!(tim, plan, {
        CapacityPlan::new(cfg.branch_splits, cfg.max_depth, cfg.generation_count)?
    });

    if plan.is_empty() {
        warn!(max_depth = cfg.max_depth, "empty tree requested; nothing generated");
        return Ok(None);
    }

    Ok(Some(time_it!(tim, allocate, { FlatTreeBuffer::allocate(plan) })))
}

fn empty_output(cfg: &GenerationConfig, timings: BatchTimingsMs) -> BatchOutput {
    BatchOutput {
        buffer: FlatTreeBuffer::empty(CapacityPlan::empty(cfg.branch_splits, cfg.max_depth)),
        regions: Vec::new(),
        timings,
    }
}

fn finish(buffer: FlatTreeBuffer, regions: Vec<RegionStats>, mut timings: BatchTimingsMs, t0: std::time::Instant) -> BatchOutput {
    timings.total = ms_since(t0);
    let plan = *buffer.plan();
    info!(
        capacity_per_tree = plan.capacity_per_tree,
        generations = plan.generation_count,
        total = plan.total,
        ms = timings.total,
        "tree batch generated"
    );
    BatchOutput {
        buffer,
        regions,
        timings,
    }
}

/// Generates every region in order on the calling thread.
///
/// `make_policy(g)` supplies the attribute policy for region `g`.
pub fn generate_batch<P, F>(cfg: &GenerationConfig, mut make_policy: F) -> Result<BatchOutput>
where
    P: AttributePolicy,
    F: FnMut(u32) -> P,
{
    let t0 = std::time::Instant::now();
    let mut tim = BatchTimingsMs::default();

    let Some(mut buffer) = prepare(cfg, &mut tim)? else {
        return Ok(empty_output(cfg, tim));
    };
    let plan = *buffer.plan();

    let regions = time_it!(tim, generate, {
        let mut out = Vec::with_capacity(plan.generation_count as usize);
        for region in buffer.regions_mut() {
            let g = region.region;
            let mut policy = make_policy(g);
            match generate_region(&plan, region, &mut policy) {
                Ok(stats) => out.push(stats),
                Err(e) => {
                    error!(region = g, error = %e, "batch aborted");
                    return Err(e);
                }
            }
        }
        out
    });

    Ok(finish(buffer, regions, tim, t0))
}

/// Generates regions concurrently on [`GENERATION_POOL`].
///
/// Output is identical to [`generate_batch`] given the same per-region policies.
pub fn generate_batch_parallel<P, F>(cfg: &GenerationConfig, make_policy: F) -> Result<BatchOutput>
where
    P: AttributePolicy,
    F: Fn(u32) -> P + Sync,
{
    let t0 = std::time::Instant::now();
    let mut tim = BatchTimingsMs::default();

    let Some(mut buffer) = prepare(cfg, &mut tim)? else {
        return Ok(empty_output(cfg, tim));
    };
    let plan = *buffer.plan();
    let cap = plan.capacity_per_tree as usize;

    let result: Result<Vec<RegionStats>> = time_it!(tim, generate, {
        let (branches, connections) = buffer.split_storage_mut();
        GENERATION_POOL.install(|| {
            branches
                .par_chunks_mut(cap)
                .zip(connections.par_chunks_mut(cap))
                .enumerate()
                .map(|(g, (branches, connections))| {
                    let g = g as u32;
                    let region = RegionMut {
                        region: g,
                        base: plan.region_base(g),
                        branches,
                        connections,
                    };
                    let mut policy = make_policy(g);
                    generate_region(&plan, region, &mut policy)
                })
                .collect::<Result<Vec<RegionStats>>>()
        })
    });

    let regions = match result {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "parallel batch aborted");
            return Err(e);
        }
    };

    Ok(finish(buffer, regions, tim, t0))
}

// -----------------------------------------------------------------------------
// Policy-specific entry points
// -----------------------------------------------------------------------------

/// Deterministic batch from the config's fixed angle and size.
pub fn generate_deterministic(cfg: &GenerationConfig, schedule: Schedule) -> Result<BatchOutput> {
    let policy = DeterministicPolicy::from_config(cfg);
    match schedule {
        Schedule::Sequential => generate_batch(cfg, |_| policy),
        Schedule::Parallel => generate_batch_parallel(cfg, |_| policy),
    }
}

/// Stochastic batch; region `g` draws from a stream derived from `(seed, g)`.
pub fn generate_stochastic<C>(
    cfg: &GenerationConfig,
    settings: &StochasticSettings<C>,
    seed: u64,
    schedule: Schedule,
) -> Result<BatchOutput>
where
    C: ResponseCurve + Clone + Sync,
{
    let make = |g: u32| -> StochasticPolicy<ChaCha8Rng, C> { settings.seeded(seed, g) };
    match schedule {
        Schedule::Sequential => generate_batch(cfg, make),
        Schedule::Parallel => generate_batch_parallel(cfg, make),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ConstantCurve, ValueRange};

    #[test]
    fn three_way_two_trees() {
        let cfg = GenerationConfig::new(3, 2).with_generations(2).with_angle(30.0);
        let out = generate_deterministic(&cfg, Schedule::Sequential).unwrap();
        assert_eq!(out.buffer.len(), 8);
        assert_eq!(out.regions.len(), 2);
        for g in 0..2u32 {
            let root = out.buffer.root_index(g);
            assert_eq!(root, g as usize * 4);
            let r = out.buffer.branches()[root];
            assert_eq!(r.child_count, 3);
            let kids = out.buffer.children(root);
            assert_eq!(kids.len(), 3);
            for &k in kids {
                assert!((root..root + 4).contains(&(k as usize)));
                assert_eq!(out.buffer.branches()[k as usize].child_count, 0);
            }
        }
        out.buffer.validate().unwrap();
    }

    #[test]
    fn zero_generations_is_empty_not_error() {
        let cfg = GenerationConfig::new(2, 3).with_generations(0);
        let out = generate_deterministic(&cfg, Schedule::Parallel).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.buffer.region_count(), 0);
    }

    #[test]
    fn overflow_rejected_without_generations() {
        let cfg = GenerationConfig::new(10, 12).with_generations(0);
        let res = generate_deterministic(&cfg, Schedule::Sequential);
        assert!(matches!(res, Err(crate::error::TreeError::InvalidConfiguration(_))));
    }

    #[test]
    fn zero_depth_is_empty_not_error() {
        let cfg = GenerationConfig::new(2, 0).with_generations(3);
        let out = generate_deterministic(&cfg, Schedule::Sequential).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn overflow_rejected_before_allocation() {
        let cfg = GenerationConfig::new(10, 12);
        assert!(generate_deterministic(&cfg, Schedule::Sequential).is_err());
    }

    #[test]
    fn parallel_matches_sequential() {
        let cfg = GenerationConfig::new(3, 4).with_generations(9);
        let settings = StochasticSettings::new(
            ValueRange::new(5.0, 60.0).unwrap(),
            ValueRange::new(0.3, 1.2).unwrap(),
            ConstantCurve(1.0),
        )
        .unwrap();
        let a = generate_stochastic(&cfg, &settings, 1234, Schedule::Sequential).unwrap();
        let b = generate_stochastic(&cfg, &settings, 1234, Schedule::Parallel).unwrap();
        assert_eq!(a.buffer.branch_bytes(), b.buffer.branch_bytes());
        assert_eq!(a.buffer.connection_bytes(), b.buffer.connection_bytes());
        assert_eq!(a.regions, b.regions);
        assert_eq!(a.total_branches(), 9 * 40);
    }
}
