// src/error.rs

/// Failures surfaced by planning and generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Rejected before any buffer is allocated.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Planner and generator disagree on sizing. Aborts the whole batch.
    #[error("invariant violation in region {region}: {detail}")]
    InvariantViolation { region: u32, detail: String },
}

impl TreeError {
    pub(crate) fn invariant(region: u32, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            region,
            detail: detail.into(),
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;
