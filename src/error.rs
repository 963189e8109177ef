//! Error Types
//!
//! Every primitive and block returns [`Result`]. Primitive errors describe
//! a broken input contract (shapes, configuration); cache errors describe a
//! [`BlockCache`](crate::cache::BlockCache) whose stage entries do not line up
//! with the block that is unwinding it.
//!
//! Blocks never wrap or translate primitive errors: whatever a primitive
//! returns reaches the caller unchanged through `?`.

use crate::cache::{BlockKind, StageKind};
use thiserror::Error;

/// Errors raised by primitives and composite blocks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Shape mismatch in '{op}': expected {expected}, got {got}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        got: String,
    },

    #[error("Invalid parameter for '{op}': {reason}")]
    InvalidParam { op: &'static str, reason: String },

    #[error("Stage cache out of order: expected {expected}, found {found}")]
    StageMismatch { expected: StageKind, found: StageKind },

    #[error("Stage cache missing: expected {expected}, but the block cache is exhausted")]
    MissingStage { expected: StageKind },

    #[error("Block cache for {block} has {remaining} unconsumed stage(s)")]
    TrailingStages { block: BlockKind, remaining: usize },

    #[error("Block cache was produced by {found}, but {expected} backward was called")]
    BlockMismatch { expected: BlockKind, found: BlockKind },
}

impl LayerError {
    pub(crate) fn shape(op: &'static str, expected: impl Into<String>, got: &[usize]) -> Self {
        LayerError::ShapeMismatch {
            op,
            expected: expected.into(),
            got: format!("{:?}", got),
        }
    }

    pub(crate) fn param(op: &'static str, reason: impl Into<String>) -> Self {
        LayerError::InvalidParam {
            op,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LayerError>;
