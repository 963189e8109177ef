//! Composite Blocks
//!
//! Convenience layers that chain primitives into the stages a network is
//! usually built from. Each block is a forward/backward pair:
//!
//! ```text
//! affine_relu                    x → Affine → ReLU → out
//! affine_relu_batchnorm          x → Affine → ReLU → BatchNorm(γ=1, β=0) → out
//! affine_relu_batchnorm_dropout  x → Affine → ReLU → BatchNorm(γ=1, β=0) → Dropout → out
//! affine_relu_dropout            x → Affine → ReLU → Dropout → out
//! conv_relu                      x → Conv → ReLU → out
//! conv_relu_pool                 x → Conv → ReLU → MaxPool → out
//! ```
//!
//! ## Backward Pass
//!
//! Backward walks the same chain in reverse. Every stage receives the
//! gradient produced by the stage after it, never the block's `dout`
//! directly (the chain rule applied one stage at a time):
//!
//! ```text
//! conv_relu_pool:  dout → MaxPool' → ReLU' → Conv' → (dx, dw, db)
//! ```
//!
//! Stage caches travel in a [`BlockCache`] and are popped in reverse with
//! their kind checked, so a cache from another block, or one whose stages
//! were reordered, fails with a [`LayerError`](crate::LayerError).
//!
//! ## Fixed Batch Norm Parameters
//!
//! The batch-norm blocks normalize with γ = 1 and β = 0: they use batch
//! norm only for its rescaling, not as a trainable layer. The γ/β gradients
//! batch norm computes are dropped, and the returned gradients cover only
//! the affine weight and bias.
//!
//! ## Parameters
//!
//! `bn_param`, `dropout_param`, `conv_param` and `pool_param` are handed to
//! their primitive untouched. Running statistics in `bn_param` are updated by
//! batch norm itself.

use crate::cache::{BlockCache, BlockKind};
use crate::error::Result;
use crate::gradients::ParamGradients;
use crate::layers::dropout;
use crate::layers::{
    affine_backward, affine_forward, batchnorm_backward, batchnorm_forward, conv_backward,
    conv_forward, dropout_backward, dropout_forward, max_pool_backward, max_pool_forward,
    relu_backward, relu_forward, AffineCache, BatchNormCache, ConvCache, DropoutCache,
    MaxPoolCache, ReluCache,
};
use crate::params::{BatchNormParam, ConvParam, DropoutParam, PoolParam};
use crate::tensor::Tensor;

//=============================================================================
// SHARED STAGES
//=============================================================================

/// Affine → ReLU, appended to `cache`
fn push_affine_relu(x: &Tensor, w: &Tensor, b: &Tensor, cache: &mut BlockCache) -> Result<Tensor> {
    let (a, fc_cache) = affine_forward(x, w, b)?;
    let (out, relu_cache) = relu_forward(&a)?;
    cache.push(fc_cache);
    cache.push(relu_cache);
    Ok(out)
}

/// ReLU' → Affine', popped from `cache`
fn pop_affine_relu(dout: &Tensor, cache: &mut BlockCache) -> Result<ParamGradients> {
    let relu_cache = cache.pop::<ReluCache>()?;
    let fc_cache = cache.pop::<AffineCache>()?;
    let da = relu_backward(dout, relu_cache)?;
    affine_backward(&da, fc_cache)
}

/// BatchNorm with γ = 1, β = 0 over the feature width of `x`
fn push_fixed_batchnorm(x: &Tensor, bn_param: &mut BatchNormParam, cache: &mut BlockCache) -> Result<Tensor> {
    let width = x.shape.get(1).copied().unwrap_or(0);
    let gamma = Tensor::ones(vec![width]);
    let beta = Tensor::zeros(vec![width]);
    let (out, bn_cache) = batchnorm_forward(x, &gamma, &beta, bn_param)?;
    cache.push(bn_cache);
    Ok(out)
}

/// BatchNorm', keeping only the input gradient
fn pop_fixed_batchnorm(dout: &Tensor, cache: &mut BlockCache) -> Result<Tensor> {
    let bn_cache = cache.pop::<BatchNormCache>()?;
    // dgamma/dbeta belong to constants here
    let grads = batchnorm_backward(dout, bn_cache)?;
    Ok(grads.x)
}

fn trace_backward(kind: BlockKind, grads: &ParamGradients) {
    tracing::trace!(
        "{} backward: dx {:?}, |dw, db| = {:.6e}",
        kind,
        grads.x.shape,
        grads.param_norm()
    );
}

//=============================================================================
// AFFINE BLOCKS
//=============================================================================

/// Affine → ReLU forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, ...]`, flattened per example by the affine stage
/// * `w` - Weight `[D, M]`
/// * `b` - Bias `[M]`
///
/// # Returns
///
/// Tuple of (output `[N, M]`, cache)
///
/// # Example
///
/// ```rust
/// use layerkit::{affine_relu_backward, affine_relu_forward, Tensor};
///
/// let x = Tensor::new(vec![1.0, -2.0, 3.0, 0.5, 0.5, -1.0], vec![2, 3]);
/// let w = Tensor::new(vec![0.1; 12], vec![3, 4]);
/// let b = Tensor::zeros(vec![4]);
///
/// let (out, cache) = affine_relu_forward(&x, &w, &b).unwrap();
/// assert_eq!(out.shape, vec![2, 4]);
///
/// let grads = affine_relu_backward(&Tensor::ones(vec![2, 4]), cache).unwrap();
/// assert_eq!(grads.x.shape, vec![2, 3]);
/// ```
pub fn affine_relu_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, BlockCache)> {
    let mut cache = BlockCache::new(BlockKind::AffineRelu);
    let out = push_affine_relu(x, w, b, &mut cache)?;
    tracing::trace!("affine_relu forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Affine → ReLU backward pass
///
/// # Returns
///
/// Gradients for input, affine weight and affine bias
pub fn affine_relu_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::AffineRelu)?;
    let grads = pop_affine_relu(dout, &mut cache)?;
    cache.finish()?;
    trace_backward(BlockKind::AffineRelu, &grads);
    Ok(grads)
}

/// Affine → ReLU → BatchNorm forward pass
///
/// Batch norm runs with γ = 1, β = 0. `bn_param` carries mode, eps,
/// momentum and the running statistics batch norm maintains.
pub fn affine_relu_batchnorm_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    bn_param: &mut BatchNormParam,
) -> Result<(Tensor, BlockCache)> {
    let mut cache = BlockCache::new(BlockKind::AffineReluBatchNorm);
    let h = push_affine_relu(x, w, b, &mut cache)?;
    let out = push_fixed_batchnorm(&h, bn_param, &mut cache)?;
    tracing::trace!("affine_relu_batchnorm forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Affine → ReLU → BatchNorm backward pass
///
/// Batch norm's γ/β gradients are discarded.
pub fn affine_relu_batchnorm_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::AffineReluBatchNorm)?;
    let dh = pop_fixed_batchnorm(dout, &mut cache)?;
    let grads = pop_affine_relu(&dh, &mut cache)?;
    cache.finish()?;
    trace_backward(BlockKind::AffineReluBatchNorm, &grads);
    Ok(grads)
}

/// Affine → ReLU → BatchNorm → Dropout forward pass
///
/// `dropout_param` is validated before any stage runs, so an invalid drop
/// probability leaves `bn_param` untouched.
pub fn affine_relu_batchnorm_dropout_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    bn_param: &mut BatchNormParam,
    dropout_param: &DropoutParam,
) -> Result<(Tensor, BlockCache)> {
    // A bad drop probability must not leave running statistics half-updated
    dropout::check_param(dropout_param)?;

    let mut cache = BlockCache::new(BlockKind::AffineReluBatchNormDropout);
    let h = push_affine_relu(x, w, b, &mut cache)?;
    let normed = push_fixed_batchnorm(&h, bn_param, &mut cache)?;
    let (out, drop_cache) = dropout_forward(&normed, dropout_param)?;
    cache.push(drop_cache);
    tracing::trace!("affine_relu_batchnorm_dropout forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Affine → ReLU → BatchNorm → Dropout backward pass
pub fn affine_relu_batchnorm_dropout_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::AffineReluBatchNormDropout)?;
    let drop_cache = cache.pop::<DropoutCache>()?;
    let dnormed = dropout_backward(dout, drop_cache)?;
    let dh = pop_fixed_batchnorm(&dnormed, &mut cache)?;
    let grads = pop_affine_relu(&dh, &mut cache)?;
    cache.finish()?;
    trace_backward(BlockKind::AffineReluBatchNormDropout, &grads);
    Ok(grads)
}

/// Affine → ReLU → Dropout forward pass
pub fn affine_relu_dropout_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    dropout_param: &DropoutParam,
) -> Result<(Tensor, BlockCache)> {
    let mut cache = BlockCache::new(BlockKind::AffineReluDropout);
    let h = push_affine_relu(x, w, b, &mut cache)?;
    let (out, drop_cache) = dropout_forward(&h, dropout_param)?;
    cache.push(drop_cache);
    tracing::trace!("affine_relu_dropout forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Affine → ReLU → Dropout backward pass
pub fn affine_relu_dropout_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::AffineReluDropout)?;
    let drop_cache = cache.pop::<DropoutCache>()?;
    let dh = dropout_backward(dout, drop_cache)?;
    let grads = pop_affine_relu(&dh, &mut cache)?;
    cache.finish()?;
    trace_backward(BlockKind::AffineReluDropout, &grads);
    Ok(grads)
}

//=============================================================================
// CONVOLUTION BLOCKS
//=============================================================================

/// Conv → ReLU forward pass
///
/// # Arguments
///
/// * `x` - Images `[N, C, H, W]`
/// * `w` - Filters `[F, C, HH, WW]`
/// * `b` - Biases `[F]`
/// * `conv_param` - Stride and padding
pub fn conv_relu_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
) -> Result<(Tensor, BlockCache)> {
    let mut cache = BlockCache::new(BlockKind::ConvRelu);
    let (a, conv_cache) = conv_forward(x, w, b, conv_param)?;
    let (out, relu_cache) = relu_forward(&a)?;
    cache.push(conv_cache);
    cache.push(relu_cache);
    tracing::trace!("conv_relu forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Conv → ReLU backward pass
pub fn conv_relu_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::ConvRelu)?;
    let relu_cache = cache.pop::<ReluCache>()?;
    let conv_cache = cache.pop::<ConvCache>()?;
    cache.finish()?;

    let da = relu_backward(dout, relu_cache)?;
    let grads = conv_backward(&da, conv_cache)?;
    trace_backward(BlockKind::ConvRelu, &grads);
    Ok(grads)
}

/// Conv → ReLU → MaxPool forward pass
pub fn conv_relu_pool_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
    pool_param: &PoolParam,
) -> Result<(Tensor, BlockCache)> {
    let mut cache = BlockCache::new(BlockKind::ConvReluPool);
    let (a, conv_cache) = conv_forward(x, w, b, conv_param)?;
    let (s, relu_cache) = relu_forward(&a)?;
    let (out, pool_cache) = max_pool_forward(&s, pool_param)?;
    cache.push(conv_cache);
    cache.push(relu_cache);
    cache.push(pool_cache);
    tracing::trace!("conv_relu_pool forward: {:?} -> {:?}", x.shape, out.shape);
    Ok((out, cache))
}

/// Conv → ReLU → MaxPool backward pass
pub fn conv_relu_pool_backward(dout: &Tensor, mut cache: BlockCache) -> Result<ParamGradients> {
    cache.expect_kind(BlockKind::ConvReluPool)?;
    let pool_cache = cache.pop::<MaxPoolCache>()?;
    let relu_cache = cache.pop::<ReluCache>()?;
    let conv_cache = cache.pop::<ConvCache>()?;
    cache.finish()?;

    let ds = max_pool_backward(dout, pool_cache)?;
    let da = relu_backward(&ds, relu_cache)?;
    let grads = conv_backward(&da, conv_cache)?;
    trace_backward(BlockKind::ConvReluPool, &grads);
    Ok(grads)
}
