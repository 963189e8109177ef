//! Affine Layer (Fully Connected)
//!
//! Performs the affine transformation `out = x @ W + b`.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, d1, ..., dk]   (reshaped to [N, D], D = d1 * ... * dk)
//! Weight: W [D, M]
//! Bias:   b [M]
//! Output: out = x @ W + b [N, M]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W = x^T @ grad_out
//! grad_b = sum(grad_out, axis=0)
//! grad_x = grad_out @ W^T        (reshaped back to x's shape)
//! ```

use crate::error::{LayerError, Result};
use crate::gradients::ParamGradients;
use crate::tensor::Tensor;

/// Cache for affine backward pass
#[derive(Clone, Debug)]
pub struct AffineCache {
    /// Input flattened to `[N, D]`
    pub x_flat: Tensor,
    /// Original input shape, restored on `grad_x`
    pub x_shape: Vec<usize>,
    pub weight: Tensor,
}

/// Affine forward pass
///
/// # Arguments
///
/// * `x` - Input tensor `[N, ...]`; every example is flattened to a row
/// * `w` - Weight `[D, M]` where D is the per-example element count
/// * `b` - Bias `[M]`
///
/// # Returns
///
/// Tuple of (output `[N, M]`, cache)
///
/// # Errors
///
/// `ShapeMismatch` if the ranks or sizes do not line up.
pub fn affine_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, AffineCache)> {
    if x.ndim() < 1 {
        return Err(LayerError::shape("affine_forward", "x with a batch dimension", &x.shape));
    }
    if w.ndim() != 2 {
        return Err(LayerError::shape("affine_forward", "w of rank 2 [D, M]", &w.shape));
    }

    let n = x.shape[0];
    let d: usize = x.shape[1..].iter().product();
    let m = w.shape[1];

    if w.shape[0] != d {
        return Err(LayerError::shape(
            "affine_forward",
            format!("w with {} rows (one per input feature)", d),
            &w.shape,
        ));
    }
    if b.shape != [m] {
        return Err(LayerError::shape("affine_forward", format!("b of shape [{}]", m), &b.shape));
    }

    let x_flat = x.reshape(&[n, d]);
    let out = x_flat.matmul(w).add(b);

    let cache = AffineCache {
        x_flat,
        x_shape: x.shape.clone(),
        weight: w.clone(),
    };

    Ok((out, cache))
}

/// Affine backward pass
///
/// # Arguments
///
/// * `dout` - Upstream gradient `[N, M]`
/// * `cache` - Cache from the matching forward call
///
/// # Returns
///
/// Gradients for input (in x's original shape), weight and bias
pub fn affine_backward(dout: &Tensor, cache: AffineCache) -> Result<ParamGradients> {
    let n = cache.x_flat.shape[0];
    let m = cache.weight.shape[1];
    if dout.shape != [n, m] {
        return Err(LayerError::shape(
            "affine_backward",
            format!("dout of shape [{}, {}]", n, m),
            &dout.shape,
        ));
    }

    // grad_W = x^T @ grad_out
    let grad_weight = cache.x_flat.t().matmul(dout);

    // grad_b = sum over the batch
    let grad_bias = dout.sum_rows();

    // grad_x = grad_out @ W^T
    let grad_x = dout.matmul(&cache.weight.t()).reshape(&cache.x_shape);

    Ok(ParamGradients {
        x: grad_x,
        weight: grad_weight,
        bias: grad_bias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient_check::{numerical_gradient, rel_error};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_affine_forward_known_values() {
        // Two examples of shape [2, 2] flatten to 4 features each
        let x = Tensor::new((0..8).map(|v| v as f64).collect(), vec![2, 2, 2]);
        let w = Tensor::new(
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            vec![4, 2],
        );
        let b = Tensor::new(vec![0.5, -0.5], vec![2]);

        let (out, _) = affine_forward(&x, &w, &b).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        // row 0: [0,1,2,3] -> [0+2, 1+3] + b
        assert_eq!(out.data, vec![2.5, 3.5, 10.5, 11.5]);
    }

    #[test]
    fn test_affine_rejects_bad_weight() {
        let x = Tensor::zeros(vec![2, 3]);
        let w = Tensor::zeros(vec![4, 5]);
        let b = Tensor::zeros(vec![5]);
        let err = affine_forward(&x, &w, &b).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { op: "affine_forward", .. }));
    }

    #[test]
    fn test_affine_backward_matches_numerical() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Tensor::randn(vec![3, 2, 3], 1.0, &mut rng);
        let w = Tensor::randn(vec![6, 4], 1.0, &mut rng);
        let b = Tensor::randn(vec![4], 1.0, &mut rng);
        let dout = Tensor::randn(vec![3, 4], 1.0, &mut rng);

        let (_, cache) = affine_forward(&x, &w, &b).unwrap();
        let grads = affine_backward(&dout, cache).unwrap();
        assert_eq!(grads.x.shape, x.shape);

        let dx_num = numerical_gradient(|x| affine_forward(x, &w, &b).map(|r| r.0), &x, &dout).unwrap();
        let dw_num = numerical_gradient(|w| affine_forward(&x, w, &b).map(|r| r.0), &w, &dout).unwrap();
        let db_num = numerical_gradient(|b| affine_forward(&x, &w, b).map(|r| r.0), &b, &dout).unwrap();

        assert!(rel_error(&grads.x, &dx_num) < 1e-7);
        assert!(rel_error(&grads.weight, &dw_num) < 1e-7);
        assert!(rel_error(&grads.bias, &db_num) < 1e-7);
    }
}
