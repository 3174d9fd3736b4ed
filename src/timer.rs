// src/timer.rs
//
// Repeated-run timing harness for the batch generator.

use std::fmt;
use std::time::Instant;

use tracing::{debug, info};

use crate::batch::{ms_since, BatchOutput};
use crate::error::{Result, TreeError};
use crate::walk::{walk, WalkSettings};

#[derive(Clone, Copy, Debug)]
pub struct GenerationTimer {
    pub runs: usize,
    /// Also run the instantiation walk inside each timed run.
    pub instantiate: bool,
    pub walk: WalkSettings,
}

impl Default for GenerationTimer {
    fn default() -> Self {
        Self {
            runs: 1,
            instantiate: false,
            walk: WalkSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimingReport {
    /// Generation time per run. The walk is never inside this interval.
    pub dispatch_ms: Vec<f64>,
    /// Walk time per run; empty when not instantiating.
    pub walk_ms: Vec<f64>,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Branches produced by the last run.
    pub branches: u64,
    /// Instances visited by the last run's walk (0 when not instantiating).
    pub instances: usize,
}

impl TimingReport {
    /// Run times joined as `a, b, c` (ms, two decimals).
    pub fn formatted_times(&self) -> String {
        self.dispatch_ms
            .iter()
            .map(|ms| format!("{ms:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            concat!(
                "[timer] runs={} avg={:.2}ms min={:.2}ms max={:.2}ms\n",
                "  branches={} instances={}\n",
                "  times=[{}]"
            ),
            self.dispatch_ms.len(),
            self.average_ms,
            self.min_ms,
            self.max_ms,
            self.branches,
            self.instances,
            self.formatted_times(),
        )
    }
}

impl GenerationTimer {
    pub fn new(runs: usize) -> Self {
        Self {
            runs,
            ..Self::default()
        }
    }

    pub fn with_instantiation(mut self, on: bool) -> Self {
        self.instantiate = on;
        self
    }

    /// Times `runs` calls of `generate`. Each call starts from a fresh buffer.
    pub fn run<F>(&self, mut generate: F) -> Result<TimingReport>
    where
        F: FnMut() -> Result<BatchOutput>,
    {
        if self.runs == 0 {
            return Err(TreeError::InvalidConfiguration(
                "timer needs at least one run".to_string(),
            ));
        }

        let mut dispatch_ms = Vec::with_capacity(self.runs);
        let mut walk_ms = Vec::new();
        let mut branches = 0;
        let mut instances = 0;

        for run in 0..self.runs {
            let t0 = Instant::now();
            let out = generate()?;
            let ms = ms_since(t0);
            if self.instantiate {
                let t1 = Instant::now();
                let mut n = 0usize;
                walk(&out.buffer, &self.walk, |_| n += 1)?;
                walk_ms.push(ms_since(t1));
                instances = n;
            }
            branches = out.total_branches();
            debug!(run, ms, "timed run complete");
            dispatch_ms.push(ms);
        }

        let sum: f64 = dispatch_ms.iter().sum();
        let report = TimingReport {
            average_ms: sum / dispatch_ms.len() as f64,
            min_ms: dispatch_ms.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: dispatch_ms.iter().copied().fold(0.0, f64::max),
            dispatch_ms,
            walk_ms,
            branches,
            instances,
        };
        info!(
            runs = self.runs,
            avg_ms = report.average_ms,
            branches = report.branches,
            "timing complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{generate_deterministic, Schedule};
    use crate::config::GenerationConfig;

    #[test]
    fn records_one_time_per_run() {
        let cfg = GenerationConfig::new(2, 4).with_generations(2);
        let timer = GenerationTimer::new(3).with_instantiation(true);
        let report = timer
            .run(|| generate_deterministic(&cfg, Schedule::Sequential))
            .unwrap();
        assert_eq!(report.dispatch_ms.len(), 3);
        assert!(report.min_ms <= report.average_ms + 1e-9);
        assert!(report.average_ms <= report.max_ms + 1e-9);
        assert_eq!(report.branches, 30);
        assert_eq!(report.instances, 30);
        assert_eq!(report.formatted_times().split(", ").count(), 3);
        assert_eq!(report.walk_ms.len(), 3);
    }

    #[test]
    fn walk_is_timed_apart_from_generation() {
        let cfg = GenerationConfig::new(2, 3);
        let plain = GenerationTimer::new(2)
            .run(|| generate_deterministic(&cfg, Schedule::Sequential))
            .unwrap();
        assert!(plain.walk_ms.is_empty());
        assert_eq!(plain.instances, 0);

        let walking = GenerationTimer {
            runs: 2,
            instantiate: true,
            walk: WalkSettings::default(),
        };
        let report = walking
            .run(|| generate_deterministic(&cfg, Schedule::Sequential))
            .unwrap();
        assert_eq!(report.walk_ms.len(), 2);
        assert_eq!(report.dispatch_ms.len(), 2);
        assert_eq!(report.instances, 7);
    }

    #[test]
    fn zero_runs_is_rejected() {
        let cfg = GenerationConfig::default();
        let err = GenerationTimer::new(0).run(|| generate_deterministic(&cfg, Schedule::Sequential));
        assert!(err.is_err());
    }
}
