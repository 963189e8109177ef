//! Numerical Gradient Checking
//!
//! Analytic backward passes are verified against centered finite differences
//! of the scalar loss `L = sum(f(x) * dout)`:
//!
//! ```text
//! dL/dx[i] ≈ (L(x + h e_i) - L(x - h e_i)) / 2h
//! ```
//!
//! Agreement is measured with the relative error
//!
//! ```text
//! rel_error(a, b) = max_i |a_i - b_i| / max(1e-8, |a_i| + |b_i|)
//! ```
//!
//! With `f64` tensors and `h = 1e-5`, correct gradients typically land below
//! 1e-7; anything above 1e-2 is almost certainly a bug.
//!
//! The element-wise ratio is harsh on entries far smaller than the rest of
//! the gradient: an absolute error of 1e-10 on an entry of 1e-5 already reads
//! as 1e-5. [`scaled_error`] measures every entry against the largest
//! magnitude instead:
//!
//! ```text
//! scaled_error(a, b) = max_i |a_i - b_i| / max(1e-8, max_i |a_i| + max_i |b_i|)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use layerkit::gradient_check::{numerical_gradient, rel_error};
//! use layerkit::{relu_backward, relu_forward, Tensor};
//!
//! let x = Tensor::new(vec![-1.5, 0.5, 2.0], vec![3]);
//! let dout = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]);
//!
//! let (_, cache) = relu_forward(&x).unwrap();
//! let dx = relu_backward(&dout, cache).unwrap();
//! let dx_num = numerical_gradient(|x| relu_forward(x).map(|r| r.0), &x, &dout).unwrap();
//! assert!(rel_error(&dx, &dx_num) < 1e-8);
//! ```

use crate::error::Result;
use crate::tensor::Tensor;

/// Default finite-difference step
pub const DEFAULT_STEP: f64 = 1e-5;

/// Numerical gradient of `sum(f(x) * dout)` with respect to `x`
///
/// `f` is evaluated twice per element of `x`; errors from `f` are returned
/// unchanged.
pub fn numerical_gradient<F>(f: F, x: &Tensor, dout: &Tensor) -> Result<Tensor>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    numerical_gradient_with_step(f, x, dout, DEFAULT_STEP)
}

/// [`numerical_gradient`] with an explicit step size
pub fn numerical_gradient_with_step<F>(mut f: F, x: &Tensor, dout: &Tensor, h: f64) -> Result<Tensor>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    let mut probe = x.clone();
    let mut grad = vec![0.0; x.numel()];

    for (i, g) in grad.iter_mut().enumerate() {
        let orig = probe.data[i];

        probe.data[i] = orig + h;
        let pos = f(&probe)?.dot(dout);

        probe.data[i] = orig - h;
        let neg = f(&probe)?.dot(dout);

        probe.data[i] = orig;
        *g = (pos - neg) / (2.0 * h);
    }

    Ok(Tensor::new(grad, x.shape.clone()))
}

/// Maximum element-wise relative error between two same-shaped tensors
///
/// # Panics
///
/// Panics if the shapes differ.
pub fn rel_error(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape, b.shape, "rel_error needs tensors of the same shape");
    a.data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| (x - y).abs() / (x.abs() + y.abs()).max(1e-8))
        .fold(0.0, f64::max)
}

/// Maximum absolute difference relative to the tensors' largest magnitudes
///
/// # Panics
///
/// Panics if the shapes differ.
pub fn scaled_error(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape, b.shape, "scaled_error needs tensors of the same shape");
    let peak = |t: &Tensor| t.data.iter().fold(0.0, |m: f64, &v| m.max(v.abs()));
    let diff = a
        .data
        .iter()
        .zip(&b.data)
        .fold(0.0, |m: f64, (&x, &y)| m.max((x - y).abs()));
    diff / (peak(a) + peak(b)).max(1e-8)
}
