//! Error types for `smallworld`.
//!
//! A single unified error type covers every operation on builders, models and
//! searchers. Error codes follow the pattern `SW-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for `smallworld` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, persisting or querying an index.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value (SW-001).
    #[error("[SW-001] Configuration error: {0}")]
    Config(String),

    /// Vector dimension mismatch (SW-002).
    #[error("[SW-002] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Operation invalid for the current lifecycle stage (SW-003).
    ///
    /// Raised before any mutation is committed, so prior state stays intact.
    #[error("[SW-003] Invalid state: {0}")]
    State(String),

    /// Corrupt, truncated or version-incompatible model file (SW-004).
    #[error("[SW-004] Model format error: {0}")]
    Format(String),

    /// Unknown item id (SW-005).
    #[error("[SW-005] Item with id {0} not found")]
    NotFound(usize),

    /// IO error (SW-006).
    #[error("[SW-006] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (SW-007).
    #[error("[SW-007] Serialization error: {0}")]
    Serialization(String),

    /// A search with `ensure_k` could not reach `k` live items despite
    /// frontier widening (SW-008).
    #[error("[SW-008] Insufficient reachable items: found {found}, requested {requested}")]
    InsufficientReachable {
        /// Number of live items the widened search reached.
        found: usize,
        /// Requested result count.
        requested: usize,
    },
}

impl Error {
    /// Returns the error code (e.g., "SW-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "SW-001",
            Self::DimensionMismatch { .. } => "SW-002",
            Self::State(_) => "SW-003",
            Self::Format(_) => "SW-004",
            Self::NotFound(_) => "SW-005",
            Self::Io(_) => "SW-006",
            Self::Serialization(_) => "SW-007",
            Self::InsufficientReachable { .. } => "SW-008",
        }
    }

    /// Returns true if this error is recoverable by the caller.
    ///
    /// Format errors indicate an unusable artifact and are not recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Format(_))
    }
}
