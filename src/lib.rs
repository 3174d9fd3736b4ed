//! Fractal branch-tree generation into flat, pre-sized, index-addressed buffers.
//!
//! A [`CapacityPlan`] sizes the buffer before anything is written, the
//! iterative generator fills one tree region per generation without recursion,
//! and the result is a [`FlatTreeBuffer`] whose records and connection table can
//! be handed byte-for-byte to a parallel executor or walked into world-space
//! placements.
//!
//! ```
//! use fractal_tree::{generate_deterministic, GenerationConfig, Schedule};
//!
//! let cfg = GenerationConfig::new(3, 2).with_generations(2).with_angle(30.0);
//! let out = generate_deterministic(&cfg, Schedule::Sequential).unwrap();
//! assert_eq!(out.buffer.len(), 8);
//! assert_eq!(out.buffer.children(0).len(), 3);
//! ```

pub mod batch;
pub mod buffer;
pub mod capacity;
pub mod config;
pub mod error;
pub mod generator;
pub mod hash;
pub mod policy;
pub mod timer;
pub mod walk;

pub use batch::{
    generate_batch, generate_batch_parallel, generate_deterministic, generate_stochastic, BatchOutput,
    BatchTimingsMs, Schedule,
};
pub use buffer::{BranchRecord, FlatTreeBuffer, RegionMut, BRANCH_RECORD_BYTES, NO_INDEX};
pub use capacity::{capacity_per_tree, total_capacity, CapacityPlan};
pub use config::GenerationConfig;
pub use error::{Result, TreeError};
pub use generator::{generate_region, RegionStats};
pub use policy::{
    AttributePolicy, BranchSlot, ConstantCurve, DeterministicPolicy, KeyframeCurve, LinearCurve, ResponseCurve,
    StochasticPolicy, StochasticSettings, ValueRange,
};
pub use timer::{GenerationTimer, TimingReport};
pub use walk::{collect_instances, walk, walk_tree, BranchInstance, WalkOutcome, WalkSettings};
