//! Max Pooling
//!
//! ```text
//! Input:  x [N, C, H, W]
//! Output: out [N, C, H', W']
//!
//! H' = 1 + (H - pool_height) / stride
//! W' = 1 + (W - pool_width) / stride
//! ```
//!
//! The forward pass records where each window's maximum came from; the
//! backward pass routes every upstream value back to that single position.
//! Ties go to the first position in row-major order. A NaN anywhere in a
//! window is that window's maximum, so it reaches the output.

use crate::error::{LayerError, Result};
use crate::params::PoolParam;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Cache for max-pool backward pass
#[derive(Clone, Debug)]
pub struct MaxPoolCache {
    pub x_shape: Vec<usize>,
    pub out_shape: Vec<usize>,
    /// Flat index into x of each output element's maximum
    pub argmax: Vec<usize>,
}

fn out_extent(size: usize, window: usize, stride: usize, axis: &str) -> Result<usize> {
    if window == 0 || window > size {
        return Err(LayerError::param(
            "max_pool_forward",
            format!("pool {} {} does not fit input {} {}", axis, window, axis, size),
        ));
    }
    if (size - window) % stride != 0 {
        return Err(LayerError::param(
            "max_pool_forward",
            format!("stride {} does not tile {} {} with pool {}", stride, axis, size, window),
        ));
    }
    Ok(1 + (size - window) / stride)
}

/// Max-pool forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `pool_param` - Window height/width and stride
///
/// # Returns
///
/// Tuple of (output `[N, C, H', W']`, cache)
pub fn max_pool_forward(x: &Tensor, pool_param: &PoolParam) -> Result<(Tensor, MaxPoolCache)> {
    if x.ndim() != 4 {
        return Err(LayerError::shape("max_pool_forward", "x of rank 4 [N, C, H, W]", &x.shape));
    }
    if pool_param.stride == 0 {
        return Err(LayerError::param("max_pool_forward", "stride must be at least 1"));
    }

    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let (ph, pw, stride) = (pool_param.pool_height, pool_param.pool_width, pool_param.stride);
    let out_h = out_extent(h, ph, stride, "height")?;
    let out_w = out_extent(w, pw, stride, "width")?;

    let plane = h * w;

    // One (n, c) plane per task
    let (out, argmax): (Vec<f64>, Vec<usize>) = (0..n * c)
        .into_par_iter()
        .flat_map_iter(|p| {
            let base = p * plane;
            let xs = &x.data[base..base + plane];
            (0..out_h * out_w).map(move |o| {
                let (i, j) = (o / out_w, o % out_w);
                let mut best = f64::NEG_INFINITY;
                let mut best_idx = (i * stride) * w + j * stride;
                'window: for kh in 0..ph {
                    for kw in 0..pw {
                        let idx = (i * stride + kh) * w + (j * stride + kw);
                        if xs[idx].is_nan() {
                            // NaN wins the window
                            best = xs[idx];
                            best_idx = idx;
                            break 'window;
                        }
                        if xs[idx] > best {
                            best = xs[idx];
                            best_idx = idx;
                        }
                    }
                }
                (best, base + best_idx)
            })
        })
        .unzip();

    let out_shape = vec![n, c, out_h, out_w];
    let cache = MaxPoolCache {
        x_shape: x.shape.clone(),
        out_shape: out_shape.clone(),
        argmax,
    };

    Ok((Tensor::new(out, out_shape), cache))
}

/// Max-pool backward pass
///
/// Each upstream value lands on its window's argmax; overlapping windows
/// accumulate.
pub fn max_pool_backward(dout: &Tensor, cache: MaxPoolCache) -> Result<Tensor> {
    if dout.shape != cache.out_shape {
        return Err(LayerError::shape(
            "max_pool_backward",
            format!("dout of shape {:?}", cache.out_shape),
            &dout.shape,
        ));
    }

    let mut grad_x = Tensor::zeros(cache.x_shape);
    for (&idx, &g) in cache.argmax.iter().zip(&dout.data) {
        grad_x.data[idx] += g;
    }

    Ok(grad_x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient_check::{numerical_gradient, rel_error};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_forward_known_values() {
        let x = Tensor::new(
            vec![
                1.0, 5.0, 2.0, 0.0, //
                3.0, 4.0, 8.0, 1.0, //
                0.0, 0.0, -1.0, -2.0, //
                9.0, 0.0, -3.0, -4.0,
            ],
            vec![1, 1, 4, 4],
        );
        let (out, cache) = max_pool_forward(&x, &PoolParam::default()).unwrap();
        assert_eq!(out.shape, vec![1, 1, 2, 2]);
        assert_eq!(out.data, vec![5.0, 8.0, 9.0, -1.0]);
        assert_eq!(cache.argmax, vec![1, 6, 12, 10]);
    }

    #[test]
    fn test_backward_routes_to_argmax() {
        let x = Tensor::new(vec![1.0, 2.0, 4.0, 3.0], vec![1, 1, 2, 2]);
        let (_, cache) = max_pool_forward(&x, &PoolParam::new(2, 2, 2)).unwrap();
        let dx = max_pool_backward(&Tensor::new(vec![7.0], vec![1, 1, 1, 1]), cache).unwrap();
        assert_eq!(dx.data, vec![0.0, 0.0, 7.0, 0.0]);
    }

    #[test]
    fn test_overlapping_windows_accumulate() {
        // 1x3 input, window 1x2, stride 1: the middle max is picked twice
        let x = Tensor::new(vec![0.0, 5.0, 1.0], vec![1, 1, 1, 3]);
        let (_, cache) = max_pool_forward(&x, &PoolParam::new(1, 2, 1)).unwrap();
        let dx = max_pool_backward(&Tensor::new(vec![1.0, 2.0], vec![1, 1, 1, 2]), cache).unwrap();
        assert_eq!(dx.data, vec![0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_nan_is_window_maximum() {
        let x = Tensor::new(
            vec![
                f64::NAN, 1.0, 5.0, 6.0, //
                2.0, 3.0, 7.0, f64::NAN,
            ],
            vec![1, 1, 2, 4],
        );
        let (out, cache) = max_pool_forward(&x, &PoolParam::default()).unwrap();
        assert!(out.data[0].is_nan());
        assert!(out.data[1].is_nan());
        assert_eq!(cache.argmax, vec![0, 7]);

        let dx = max_pool_backward(&Tensor::new(vec![1.0, 2.0], vec![1, 1, 1, 2]), cache).unwrap();
        assert_eq!(dx.data, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_all_nan_window_is_nan() {
        let x = Tensor::full(vec![1, 1, 2, 2], f64::NAN);
        let (out, _) = max_pool_forward(&x, &PoolParam::default()).unwrap();
        assert!(out.data[0].is_nan());
    }

    #[test]
    fn test_rejects_untiled_input() {
        let err = max_pool_forward(&Tensor::zeros(vec![1, 1, 5, 5]), &PoolParam::default()).unwrap_err();
        assert!(matches!(err, LayerError::InvalidParam { .. }));
    }

    #[test]
    fn test_backward_matches_numerical() {
        let mut rng = StdRng::seed_from_u64(33);
        let x = Tensor::randn(vec![2, 3, 4, 4], 1.0, &mut rng);
        let param = PoolParam::default();
        let (out, cache) = max_pool_forward(&x, &param).unwrap();
        let dout = Tensor::randn(out.shape.clone(), 1.0, &mut rng);

        let dx = max_pool_backward(&dout, cache).unwrap();
        let dx_num = numerical_gradient(|x| max_pool_forward(x, &param).map(|r| r.0), &x, &dout).unwrap();
        assert!(rel_error(&dx, &dx_num) < 1e-8);
    }
}
