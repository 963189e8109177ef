//! ReLU Activation
//!
//! ```text
//! ReLU(x)  = max(0, x)
//! ReLU'(x) = 1 if x > 0 else 0
//! ```
//!
//! The subgradient at exactly zero is taken as 0. NaN inputs pass through
//! the forward pass unchanged.

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Cache for ReLU backward pass
#[derive(Clone, Debug)]
pub struct ReluCache {
    /// Pre-activation input
    pub x: Tensor,
}

/// ReLU forward pass
///
/// Works on tensors of any shape. Never fails; the `Result` keeps the
/// signature uniform with the other primitives.
pub fn relu_forward(x: &Tensor) -> Result<(Tensor, ReluCache)> {
    // f64::max would turn NaN into 0.0
    let out = x.map(|v| if v < 0.0 { 0.0 } else { v });
    Ok((out, ReluCache { x: x.clone() }))
}

/// ReLU backward pass
///
/// Passes `dout` through where the forward input was positive.
pub fn relu_backward(dout: &Tensor, cache: ReluCache) -> Result<Tensor> {
    if dout.shape != cache.x.shape {
        return Err(LayerError::shape(
            "relu_backward",
            format!("dout of shape {:?}", cache.x.shape),
            &dout.shape,
        ));
    }

    let grad: Vec<f64> = cache
        .x
        .data
        .par_iter()
        .zip(&dout.data)
        .map(|(&x, &g)| if x > 0.0 { g } else { 0.0 })
        .collect();

    Ok(Tensor::new(grad, cache.x.shape))
}
