//! Error types for the FMM core.

use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, FmmError>;

/// Errors that can occur while setting up or advancing a simulation.
#[derive(Error, Debug)]
pub enum FmmError {
    /// The tree needs more nodes than were preallocated. The run cannot continue.
    #[error("tree node budget exceeded at depth {depth}: {required} nodes needed, capacity is {capacity}")]
    CapacityExceeded {
        depth: usize,
        required: usize,
        capacity: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Intensity map could not be read.
    #[error("failed to read intensity map: {0}")]
    Io(#[from] std::io::Error),

    /// Intensity map was read but is unusable.
    #[error("invalid intensity map: {0}")]
    InvalidImage(String),

    /// A structural check on the tree or the sort output failed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl FmmError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        FmmError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Whether the caller may recover, e.g. by falling back to random initial conditions.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FmmError::Io(_) | FmmError::InvalidImage(_))
    }
}
