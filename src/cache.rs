//! Stage and Block Caches
//!
//! A composite block's forward pass runs several primitives and must hand
//! every primitive's cache to the matching backward call in reverse order.
//! Instead of an anonymous tuple, the block collects them in a
//! [`BlockCache`]: an ordered list of [`StageCache`] entries, each tagged
//! with the primitive that produced it, plus the [`BlockKind`] that built
//! the list.
//!
//! ## Unwinding
//!
//! ```text
//! forward:   push(Affine) → push(Relu) → push(BatchNorm)
//! backward:  pop::<BatchNormCache>() → pop::<ReluCache>() → pop::<AffineCache>() → finish()
//! ```
//!
//! Each `pop` names the stage it expects. A cache of the wrong kind, an
//! exhausted list, or entries left over after the block is done all come
//! back as [`LayerError`]s. Stage payloads themselves stay opaque: the block
//! only moves them between the primitive calls.

use crate::error::{LayerError, Result};
use crate::layers::{AffineCache, BatchNormCache, ConvCache, DropoutCache, MaxPoolCache, ReluCache};
use std::fmt;

/// The primitive that produced a stage cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Affine,
    Relu,
    BatchNorm,
    Dropout,
    Conv,
    MaxPool,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Affine => "affine",
            StageKind::Relu => "relu",
            StageKind::BatchNorm => "batchnorm",
            StageKind::Dropout => "dropout",
            StageKind::Conv => "conv",
            StageKind::MaxPool => "max_pool",
        };
        f.write_str(name)
    }
}

/// One primitive's cache, tagged with its kind
#[derive(Clone, Debug)]
pub enum StageCache {
    Affine(AffineCache),
    Relu(ReluCache),
    BatchNorm(BatchNormCache),
    Dropout(DropoutCache),
    Conv(ConvCache),
    MaxPool(MaxPoolCache),
}

impl StageCache {
    pub fn kind(&self) -> StageKind {
        match self {
            StageCache::Affine(_) => StageKind::Affine,
            StageCache::Relu(_) => StageKind::Relu,
            StageCache::BatchNorm(_) => StageKind::BatchNorm,
            StageCache::Dropout(_) => StageKind::Dropout,
            StageCache::Conv(_) => StageKind::Conv,
            StageCache::MaxPool(_) => StageKind::MaxPool,
        }
    }
}

/// A primitive cache type that can live in a [`BlockCache`]
pub trait Stage: Sized {
    const KIND: StageKind;

    fn into_stage(self) -> StageCache;

    /// Unwrap the payload, or give the entry back if it is another kind
    fn from_stage(stage: StageCache) -> std::result::Result<Self, StageCache>;
}

macro_rules! impl_stage {
    ($cache:ty, $variant:ident) => {
        impl Stage for $cache {
            const KIND: StageKind = StageKind::$variant;

            fn into_stage(self) -> StageCache {
                StageCache::$variant(self)
            }

            fn from_stage(stage: StageCache) -> std::result::Result<Self, StageCache> {
                match stage {
                    StageCache::$variant(cache) => Ok(cache),
                    other => Err(other),
                }
            }
        }
    };
}

impl_stage!(AffineCache, Affine);
impl_stage!(ReluCache, Relu);
impl_stage!(BatchNormCache, BatchNorm);
impl_stage!(DropoutCache, Dropout);
impl_stage!(ConvCache, Conv);
impl_stage!(MaxPoolCache, MaxPool);

/// The composite block that produced a [`BlockCache`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    AffineRelu,
    AffineReluBatchNorm,
    AffineReluBatchNormDropout,
    AffineReluDropout,
    ConvRelu,
    ConvReluPool,
}

impl BlockKind {
    /// Primitive stages in forward-execution order
    pub fn stages(&self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            BlockKind::AffineRelu => &[Affine, Relu],
            BlockKind::AffineReluBatchNorm => &[Affine, Relu, BatchNorm],
            BlockKind::AffineReluBatchNormDropout => &[Affine, Relu, BatchNorm, Dropout],
            BlockKind::AffineReluDropout => &[Affine, Relu, Dropout],
            BlockKind::ConvRelu => &[Conv, Relu],
            BlockKind::ConvReluPool => &[Conv, Relu, MaxPool],
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::AffineRelu => "affine_relu",
            BlockKind::AffineReluBatchNorm => "affine_relu_batchnorm",
            BlockKind::AffineReluBatchNormDropout => "affine_relu_batchnorm_dropout",
            BlockKind::AffineReluDropout => "affine_relu_dropout",
            BlockKind::ConvRelu => "conv_relu",
            BlockKind::ConvReluPool => "conv_relu_pool",
        };
        f.write_str(name)
    }
}

/// Ordered stage caches produced by one composite forward call
#[derive(Clone, Debug)]
pub struct BlockCache {
    kind: BlockKind,
    stages: Vec<StageCache>,
}

impl BlockCache {
    pub(crate) fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            stages: Vec::with_capacity(kind.stages().len()),
        }
    }

    /// Reassemble a cache from its parts
    ///
    /// Nothing is validated here; a backward call reports any mismatch
    /// when it unwinds the stages.
    pub fn from_parts(kind: BlockKind, stages: Vec<StageCache>) -> Self {
        Self { kind, stages }
    }

    /// Take the cache apart, stages in forward order
    pub fn into_parts(self) -> (BlockKind, Vec<StageCache>) {
        (self.kind, self.stages)
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage caches in forward order
    pub fn stages(&self) -> &[StageCache] {
        &self.stages
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(StageCache::kind).collect()
    }

    pub(crate) fn push<C: Stage>(&mut self, cache: C) {
        self.stages.push(cache.into_stage());
    }

    /// Pop the most recent stage, which must be a `C`
    pub(crate) fn pop<C: Stage>(&mut self) -> Result<C> {
        let stage = self
            .stages
            .pop()
            .ok_or(LayerError::MissingStage { expected: C::KIND })?;
        C::from_stage(stage).map_err(|found| LayerError::StageMismatch {
            expected: C::KIND,
            found: found.kind(),
        })
    }

    pub(crate) fn expect_kind(&self, expected: BlockKind) -> Result<()> {
        if self.kind != expected {
            return Err(LayerError::BlockMismatch {
                expected,
                found: self.kind,
            });
        }
        Ok(())
    }

    /// Check every stage was consumed
    pub(crate) fn finish(self) -> Result<()> {
        if !self.stages.is_empty() {
            return Err(LayerError::TrailingStages {
                block: self.kind,
                remaining: self.stages.len(),
            });
        }
        Ok(())
    }
}
