//! Dropout
//!
//! Dropout randomly zeros activations during training to regularize the
//! network. Kept activations are scaled by `1 / (1 - p)` ("inverted
//! dropout") so test mode can pass values through unchanged.
//!
//! The mask is drawn from a `StdRng` seeded with `DropoutParam::seed` when
//! one is set, which makes forward/backward pairs reproducible bit for bit.
//! Without a seed the thread-local RNG is used.

use crate::error::{LayerError, Result};
use crate::params::{DropoutParam, Mode};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Cache for dropout backward pass
#[derive(Clone, Debug)]
pub struct DropoutCache {
    /// Dropout mask (true = kept, false = dropped)
    /// None if dropout was disabled
    pub mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values
    pub scale: f64,
    pub shape: Vec<usize>,
}

/// Reject a drop probability outside `[0, 1]` (NaN included)
pub(crate) fn check_param(dropout_param: &DropoutParam) -> Result<()> {
    let p = dropout_param.p;
    if !(0.0..=1.0).contains(&p) {
        return Err(LayerError::param(
            "dropout_forward",
            format!("drop probability must be in [0, 1], got {}", p),
        ));
    }
    Ok(())
}

fn draw_mask<R: Rng>(rng: &mut R, len: usize, p: f64) -> Vec<bool> {
    (0..len).map(|_| rng.random::<f64>() >= p).collect()
}

/// Dropout forward pass
///
/// # Arguments
///
/// * `x` - Input tensor of any shape
/// * `dropout_param` - Drop probability `p`, mode and optional seed
///
/// # Returns
///
/// Tuple of (output, cache) where cache stores the dropout mask
pub fn dropout_forward(x: &Tensor, dropout_param: &DropoutParam) -> Result<(Tensor, DropoutCache)> {
    check_param(dropout_param)?;
    let p = dropout_param.p;

    if dropout_param.mode == Mode::Test || p == 0.0 {
        // No dropout - just pass through
        let cache = DropoutCache {
            mask: None,
            scale: 1.0,
            shape: x.shape.clone(),
        };
        return Ok((x.clone(), cache));
    }

    if p >= 1.0 {
        // Drop everything
        let cache = DropoutCache {
            mask: Some(vec![false; x.numel()]),
            scale: 1.0,
            shape: x.shape.clone(),
        };
        return Ok((Tensor::zeros(x.shape.clone()), cache));
    }

    let mask = match dropout_param.seed {
        Some(seed) => draw_mask(&mut StdRng::seed_from_u64(seed), x.numel(), p),
        None => draw_mask(&mut rand::rng(), x.numel(), p),
    };

    let scale = 1.0 / (1.0 - p);
    let mut output = Tensor::zeros(x.shape.clone());
    for (i, &keep) in mask.iter().enumerate() {
        if keep {
            output.data[i] = x.data[i] * scale;
        }
    }

    let cache = DropoutCache {
        mask: Some(mask),
        scale,
        shape: x.shape.clone(),
    };

    Ok((output, cache))
}

/// Dropout backward pass
///
/// Applies the forward mask (and scale) to the upstream gradient.
pub fn dropout_backward(dout: &Tensor, cache: DropoutCache) -> Result<Tensor> {
    if dout.shape != cache.shape {
        return Err(LayerError::shape(
            "dropout_backward",
            format!("dout of shape {:?}", cache.shape),
            &dout.shape,
        ));
    }

    match cache.mask {
        Some(mask) => {
            let mut grad_input = Tensor::zeros(dout.shape.clone());
            for (i, keep) in mask.into_iter().enumerate() {
                if keep {
                    grad_input.data[i] = dout.data[i] * cache.scale;
                }
                // else: gradient is zero (value was dropped)
            }
            Ok(grad_input)
        }
        None => Ok(dout.clone()),
    }
}
