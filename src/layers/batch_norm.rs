//! Batch Normalization
//!
//! Normalizes every feature column of a `[N, D]` batch to zero mean and unit
//! variance, then applies scale (gamma) and shift (beta).
//!
//! ## Forward Pass (train mode)
//!
//! ```text
//! 1. μ  = mean(x, axis=0)
//! 2. σ² = mean((x - μ)², axis=0)          (biased)
//! 3. x̂  = (x - μ) / √(σ² + ε)
//! 4. y  = γ * x̂ + β
//! 5. running = momentum * running + (1 - momentum) * batch
//! ```
//!
//! In test mode steps 1-2 use the running statistics and nothing is updated.
//!
//! ## Backward Pass
//!
//! ```text
//! grad_γ = sum(grad_y * x̂, axis=0)
//! grad_β = sum(grad_y, axis=0)
//! grad_x̂ = grad_y * γ
//! grad_x = (1 / (N √(σ² + ε))) * (N grad_x̂ - sum(grad_x̂) - x̂ * sum(grad_x̂ * x̂))
//! ```
//!
//! In test mode μ and σ² are constants, so `grad_x = grad_x̂ / √(σ²_run + ε)`.
//!
//! ## Running Statistics
//!
//! The running mean/variance live in [`BatchNormParam`] and are created on
//! the first forward call (zeros, sized to D). Callers keep the same
//! `BatchNormParam` across calls to accumulate them.

use crate::error::{LayerError, Result};
use crate::params::{BatchNormParam, Mode, RunningStats};
use crate::tensor::Tensor;

/// Cache for batch norm backward pass
#[derive(Clone, Debug)]
pub struct BatchNormCache {
    pub x_norm: Tensor,
    /// 1 / √(σ² + ε) per feature `[D]`
    pub inv_std: Tensor,
    pub gamma: Tensor,
    pub mode: Mode,
}

/// Gradients for batch norm
#[derive(Clone, Debug)]
pub struct BatchNormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

fn check_param(bn_param: &BatchNormParam) -> Result<()> {
    if !(bn_param.eps > 0.0 && bn_param.eps.is_finite()) {
        return Err(LayerError::param(
            "batchnorm_forward",
            format!("eps must be positive and finite, got {}", bn_param.eps),
        ));
    }
    if !(0.0..=1.0).contains(&bn_param.momentum) {
        return Err(LayerError::param(
            "batchnorm_forward",
            format!("momentum must be in [0, 1], got {}", bn_param.momentum),
        ));
    }
    Ok(())
}

/// Batch norm forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, D]`
/// * `gamma` - Scale `[D]`
/// * `beta` - Shift `[D]`
/// * `bn_param` - Mode, eps, momentum and the running statistics, which this
///   call initializes and (in train mode) updates
///
/// # Returns
///
/// Tuple of (output `[N, D]`, cache)
pub fn batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    bn_param: &mut BatchNormParam,
) -> Result<(Tensor, BatchNormCache)> {
    if x.ndim() != 2 {
        return Err(LayerError::shape("batchnorm_forward", "x of rank 2 [N, D]", &x.shape));
    }
    let n = x.shape[0];
    let d = x.shape[1];
    if n == 0 {
        return Err(LayerError::shape("batchnorm_forward", "a non-empty batch", &x.shape));
    }
    if gamma.shape != [d] {
        return Err(LayerError::shape("batchnorm_forward", format!("gamma of shape [{}]", d), &gamma.shape));
    }
    if beta.shape != [d] {
        return Err(LayerError::shape("batchnorm_forward", format!("beta of shape [{}]", d), &beta.shape));
    }
    check_param(bn_param)?;

    let running = bn_param.running.get_or_insert_with(|| {
        tracing::debug!("batchnorm: initializing running statistics for {} features", d);
        RunningStats::zeros(d)
    });
    if running.mean.len() != d || running.var.len() != d {
        return Err(LayerError::shape(
            "batchnorm_forward",
            format!("running statistics of width {}", d),
            &[running.mean.len()],
        ));
    }

    let (mean, var) = match bn_param.mode {
        Mode::Train => {
            let mean = x.mean_rows();
            let var = x.var_rows();

            let momentum = bn_param.momentum;
            for j in 0..d {
                running.mean[j] = momentum * running.mean[j] + (1.0 - momentum) * mean.data[j];
                running.var[j] = momentum * running.var[j] + (1.0 - momentum) * var.data[j];
            }
            (mean, var)
        }
        Mode::Test => (
            Tensor::new(running.mean.clone(), vec![d]),
            Tensor::new(running.var.clone(), vec![d]),
        ),
    };

    let eps = bn_param.eps;
    let inv_std = var.map(|v| 1.0 / (v + eps).sqrt());
    let x_norm = x.sub(&mean).mul(&inv_std);
    let out = x_norm.mul(gamma).add(beta);

    let cache = BatchNormCache {
        x_norm,
        inv_std,
        gamma: gamma.clone(),
        mode: bn_param.mode,
    };

    Ok((out, cache))
}

/// Batch norm backward pass
///
/// # Returns
///
/// Gradients for input, gamma and beta
pub fn batchnorm_backward(dout: &Tensor, cache: BatchNormCache) -> Result<BatchNormGradients> {
    if dout.shape != cache.x_norm.shape {
        return Err(LayerError::shape(
            "batchnorm_backward",
            format!("dout of shape {:?}", cache.x_norm.shape),
            &dout.shape,
        ));
    }

    let grad_beta = dout.sum_rows();
    let grad_gamma = dout.mul(&cache.x_norm).sum_rows();
    let grad_x_norm = dout.mul(&cache.gamma);

    let grad_x = match cache.mode {
        Mode::Train => {
            // Accounts for every element feeding the batch mean and variance
            let n = dout.shape[0] as f64;
            let sum_grad = grad_x_norm.sum_rows();
            let sum_grad_x_norm = grad_x_norm.mul(&cache.x_norm).sum_rows();

            grad_x_norm
                .mul_scalar(n)
                .sub(&sum_grad)
                .sub(&cache.x_norm.mul(&sum_grad_x_norm))
                .mul(&cache.inv_std)
                .mul_scalar(1.0 / n)
        }
        Mode::Test => grad_x_norm.mul(&cache.inv_std),
    };

    Ok(BatchNormGradients {
        x: grad_x,
        gamma: grad_gamma,
        beta: grad_beta,
    })
}
