//! Gradient Containers
//!
//! [`ParamGradients`] is what the affine and convolution primitives, and every
//! composite block built on them, hand back from their backward pass: the
//! gradient with respect to the input plus the gradients for the weight and
//! bias the stage consumed.
//!
//! ## Gradient Norm
//!
//! ```text
//! norm = √(Σ gradient²)
//! ```
//!
//! The norm is mostly used for trace logging and for quick sanity checks in
//! tests (an all-zero or exploding gradient shows up immediately).

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Gradients for a stage (or block) with a weight and a bias
#[derive(Clone, Debug, PartialEq)]
pub struct ParamGradients {
    /// Gradient to pass to the previous layer, same shape as the input
    pub x: Tensor,
    pub weight: Tensor,
    pub bias: Tensor,
}

impl ParamGradients {
    /// L2 norm over the weight and bias gradients
    ///
    /// The input gradient is excluded: it belongs to the previous layer.
    pub fn param_norm(&self) -> f64 {
        let sum_sq = |data: &Vec<f64>| -> f64 { data.par_iter().map(|&v| v * v).sum() };
        (sum_sq(&self.weight.data) + sum_sq(&self.bias.data)).sqrt()
    }
}
