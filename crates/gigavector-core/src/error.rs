//! Error types for GigaVector.
//!
//! This module provides a unified error type for all engine operations.
//! Error codes follow the pattern `GV-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for GigaVector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in GigaVector operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument (GV-001): null/zero required input, `k = 0`,
    /// unknown enum value, empty phase list, first phase not ANN.
    #[error("[GV-001] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch (GV-002).
    #[error("[GV-002] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Row not found (GV-003): out of range or tombstoned.
    #[error("[GV-003] Row {0} not found")]
    RowNotFound(u64),

    /// Index used before training (GV-004).
    #[error("[GV-004] Index '{0}' must be trained before use")]
    Untrained(&'static str),

    /// Training failed (GV-005): k-means produced no usable centroids
    /// within the configured iteration cap.
    #[error("[GV-005] Training failed: {0}")]
    TrainingFailed(String),

    /// Corruption (GV-006): an invariant violation detected on load.
    /// The index is not usable.
    #[error("[GV-006] Corrupted index state: {0}")]
    Corrupted(String),

    /// IO error (GV-007): short read/write, missing file.
    #[error("[GV-007] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (GV-008).
    #[error("[GV-008] Serialization error: {0}")]
    Serialization(String),

    /// Expression error (GV-009): filter/rerank expression failed to parse.
    #[error("[GV-009] Expression error: {0}")]
    Expr(String),

    /// Configuration error (GV-010).
    #[error("[GV-010] Configuration error: {0}")]
    Config(String),

    /// Internal error (GV-011). Indicates a bug; please report if encountered.
    #[error("[GV-011] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "GV-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "GV-001",
            Self::DimensionMismatch { .. } => "GV-002",
            Self::RowNotFound(_) => "GV-003",
            Self::Untrained(_) => "GV-004",
            Self::TrainingFailed(_) => "GV-005",
            Self::Corrupted(_) => "GV-006",
            Self::Io(_) => "GV-007",
            Self::Serialization(_) => "GV-008",
            Self::Expr(_) => "GV-009",
            Self::Config(_) => "GV-010",
            Self::Internal(_) => "GV-011",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Non-recoverable errors include corruption and internal errors.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupted(_) | Self::Internal(_))
    }

    /// Shorthand for a dimension-mismatch check used across the index family.
    pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::DimensionMismatch { expected, actual })
        }
    }
}
