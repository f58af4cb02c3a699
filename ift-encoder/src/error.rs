//! Error type shared by all planner operations.

use read_fonts::ReadError;
use thiserror::Error;

/// Errors produced while computing a glyph segmentation plan.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SegmenterError {
    /// An input value (glyph id, segment index, subset definition) was out of
    /// range or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested computation is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// A validation check on produced data failed.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The glyph closure backend refused or failed to process a subset
    /// definition.
    #[error("glyph closure failed: {0}")]
    Closure(String),

    /// Reserved for callers that abandon a computation. Never raised by the
    /// planner itself.
    #[error("cancelled")]
    Cancelled,
}

impl From<ReadError> for SegmenterError {
    fn from(err: ReadError) -> Self {
        SegmenterError::Closure(err.to_string())
    }
}
