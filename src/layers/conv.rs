//! 2D Convolution
//!
//! Cross-correlation of a batch of images with a bank of filters, with zero
//! padding and a uniform stride.
//!
//! ```text
//! Input:  x [N, C, H, W]
//! Filter: w [F, C, HH, WW]
//! Bias:   b [F]
//! Output: out [N, F, H', W']
//!
//! H' = 1 + (H + 2 * pad - HH) / stride
//! W' = 1 + (W + 2 * pad - WW) / stride
//!
//! out[n, f, i, j] = b[f] + Σ_c Σ_kh Σ_kw x_pad[n, c, i*stride + kh, j*stride + kw] * w[f, c, kh, kw]
//! ```
//!
//! Padding is never materialized: taps that fall into the padded border are
//! skipped. Examples (forward, input gradient) and filters (weight gradient)
//! are processed in parallel with Rayon.

use crate::error::{LayerError, Result};
use crate::gradients::ParamGradients;
use crate::params::ConvParam;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Cache for convolution backward pass
#[derive(Clone, Debug)]
pub struct ConvCache {
    pub x: Tensor,
    pub weight: Tensor,
    geom: ConvGeometry,
}

#[derive(Clone, Copy, Debug)]
struct ConvGeometry {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    f: usize,
    hh: usize,
    ww: usize,
    out_h: usize,
    out_w: usize,
    stride: usize,
    pad: usize,
}

impl ConvGeometry {
    fn new(x: &Tensor, w: &Tensor, b: &Tensor, param: &ConvParam) -> Result<Self> {
        if x.ndim() != 4 {
            return Err(LayerError::shape("conv_forward", "x of rank 4 [N, C, H, W]", &x.shape));
        }
        if w.ndim() != 4 {
            return Err(LayerError::shape("conv_forward", "w of rank 4 [F, C, HH, WW]", &w.shape));
        }
        let (n, c, h, wd) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let (f, wc, hh, ww) = (w.shape[0], w.shape[1], w.shape[2], w.shape[3]);

        if wc != c {
            return Err(LayerError::shape(
                "conv_forward",
                format!("w with {} input channels", c),
                &w.shape,
            ));
        }
        if b.shape != [f] {
            return Err(LayerError::shape("conv_forward", format!("b of shape [{}]", f), &b.shape));
        }
        if param.stride == 0 {
            return Err(LayerError::param("conv_forward", "stride must be at least 1"));
        }

        let out_h = Self::out_extent(h, hh, param, "height")?;
        let out_w = Self::out_extent(wd, ww, param, "width")?;

        Ok(Self {
            n,
            c,
            h,
            w: wd,
            f,
            hh,
            ww,
            out_h,
            out_w,
            stride: param.stride,
            pad: param.pad,
        })
    }

    fn out_extent(size: usize, kernel: usize, param: &ConvParam, axis: &str) -> Result<usize> {
        let padded = size + 2 * param.pad;
        if kernel == 0 || kernel > padded {
            return Err(LayerError::param(
                "conv_forward",
                format!("filter {} {} does not fit padded input {} {}", axis, kernel, axis, padded),
            ));
        }
        if (padded - kernel) % param.stride != 0 {
            return Err(LayerError::param(
                "conv_forward",
                format!(
                    "stride {} does not tile padded {} {} with filter {}",
                    param.stride, axis, padded, kernel
                ),
            ));
        }
        Ok(1 + (padded - kernel) / param.stride)
    }

    /// Input row/column for output position `o` and filter tap `k`,
    /// None when the tap lands in the zero padding
    #[inline]
    fn source(&self, o: usize, k: usize, limit: usize) -> Option<usize> {
        let pos = o * self.stride + k;
        if pos < self.pad || pos - self.pad >= limit {
            None
        } else {
            Some(pos - self.pad)
        }
    }

    fn out_shape(&self) -> Vec<usize> {
        vec![self.n, self.f, self.out_h, self.out_w]
    }
}

/// Convolution forward pass
///
/// # Arguments
///
/// * `x` - Input images `[N, C, H, W]`
/// * `w` - Filters `[F, C, HH, WW]`
/// * `b` - Biases `[F]`
/// * `conv_param` - Stride and zero padding
///
/// # Returns
///
/// Tuple of (output `[N, F, H', W']`, cache)
///
/// # Errors
///
/// `ShapeMismatch` for inconsistent shapes, `InvalidParam` when the stride
/// does not tile the padded input exactly.
pub fn conv_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
) -> Result<(Tensor, ConvCache)> {
    let g = ConvGeometry::new(x, w, b, conv_param)?;

    let x_plane = g.h * g.w;
    let x_image = g.c * x_plane;
    let w_filter = g.c * g.hh * g.ww;
    let out_image = g.f * g.out_h * g.out_w;

    let mut out = vec![0.0; g.n * out_image];

    out.par_chunks_mut(out_image.max(1))
        .enumerate()
        .for_each(|(ni, chunk)| {
            let xs = &x.data[ni * x_image..(ni + 1) * x_image];
            for fi in 0..g.f {
                let filter = &w.data[fi * w_filter..(fi + 1) * w_filter];
                for i in 0..g.out_h {
                    for j in 0..g.out_w {
                        let mut acc = b.data[fi];
                        for ci in 0..g.c {
                            for kh in 0..g.hh {
                                let Some(row) = g.source(i, kh, g.h) else { continue };
                                for kw in 0..g.ww {
                                    let Some(col) = g.source(j, kw, g.w) else { continue };
                                    acc += xs[ci * x_plane + row * g.w + col]
                                        * filter[(ci * g.hh + kh) * g.ww + kw];
                                }
                            }
                        }
                        chunk[(fi * g.out_h + i) * g.out_w + j] = acc;
                    }
                }
            }
        });

    let cache = ConvCache {
        x: x.clone(),
        weight: w.clone(),
        geom: g,
    };

    Ok((Tensor::new(out, g.out_shape()), cache))
}

/// Convolution backward pass
///
/// # Returns
///
/// Gradients for input `[N, C, H, W]`, filters `[F, C, HH, WW]` and biases `[F]`
pub fn conv_backward(dout: &Tensor, cache: ConvCache) -> Result<ParamGradients> {
    let g = cache.geom;
    if dout.shape != g.out_shape() {
        return Err(LayerError::shape(
            "conv_backward",
            format!("dout of shape {:?}", g.out_shape()),
            &dout.shape,
        ));
    }

    let x = &cache.x;
    let w = &cache.weight;
    let x_plane = g.h * g.w;
    let x_image = g.c * x_plane;
    let w_filter = g.c * g.hh * g.ww;
    let out_plane = g.out_h * g.out_w;
    let out_image = g.f * out_plane;

    // grad_b[f] = Σ over batch and positions
    let grad_bias: Vec<f64> = (0..g.f)
        .into_par_iter()
        .map(|fi| {
            (0..g.n)
                .map(|ni| {
                    let start = ni * out_image + fi * out_plane;
                    dout.data[start..start + out_plane].iter().sum::<f64>()
                })
                .sum()
        })
        .collect();

    // grad_w: one filter per task, accumulated over the batch
    let mut grad_weight = vec![0.0; g.f * w_filter];
    grad_weight
        .par_chunks_mut(w_filter.max(1))
        .enumerate()
        .for_each(|(fi, gw)| {
            for ni in 0..g.n {
                let xs = &x.data[ni * x_image..(ni + 1) * x_image];
                let ds = &dout.data[ni * out_image + fi * out_plane..ni * out_image + (fi + 1) * out_plane];
                for i in 0..g.out_h {
                    for j in 0..g.out_w {
                        let d = ds[i * g.out_w + j];
                        for ci in 0..g.c {
                            for kh in 0..g.hh {
                                let Some(row) = g.source(i, kh, g.h) else { continue };
                                for kw in 0..g.ww {
                                    let Some(col) = g.source(j, kw, g.w) else { continue };
                                    gw[(ci * g.hh + kh) * g.ww + kw] += d * xs[ci * x_plane + row * g.w + col];
                                }
                            }
                        }
                    }
                }
            }
        });

    // grad_x: one example per task
    let mut grad_x = vec![0.0; g.n * x_image];
    grad_x
        .par_chunks_mut(x_image.max(1))
        .enumerate()
        .for_each(|(ni, gx)| {
            for fi in 0..g.f {
                let filter = &w.data[fi * w_filter..(fi + 1) * w_filter];
                let ds = &dout.data[ni * out_image + fi * out_plane..ni * out_image + (fi + 1) * out_plane];
                for i in 0..g.out_h {
                    for j in 0..g.out_w {
                        let d = ds[i * g.out_w + j];
                        for ci in 0..g.c {
                            for kh in 0..g.hh {
                                let Some(row) = g.source(i, kh, g.h) else { continue };
                                for kw in 0..g.ww {
                                    let Some(col) = g.source(j, kw, g.w) else { continue };
                                    gx[ci * x_plane + row * g.w + col] += d * filter[(ci * g.hh + kh) * g.ww + kw];
                                }
                            }
                        }
                    }
                }
            }
        });

    Ok(ParamGradients {
        x: Tensor::new(grad_x, x.shape.clone()),
        weight: Tensor::new(grad_weight, w.shape.clone()),
        bias: Tensor::new(grad_bias, vec![g.f]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient_check::{numerical_gradient, rel_error};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_output_size() {
        let x = Tensor::zeros(vec![2, 3, 5, 7]);
        let w = Tensor::zeros(vec![4, 3, 3, 3]);
        let b = Tensor::zeros(vec![4]);

        let (out, _) = conv_forward(&x, &w, &b, &ConvParam::new(1, 1)).unwrap();
        assert_eq!(out.shape, vec![2, 4, 5, 7]);

        let (out, _) = conv_forward(&x, &w, &b, &ConvParam::new(2, 1)).unwrap();
        assert_eq!(out.shape, vec![2, 4, 3, 4]);
    }

    #[test]
    fn test_known_values_with_padding() {
        // Single 2x2 image, one 2x2 filter of ones, pad 1 → 3x3 output of window sums
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 1, 2, 2]);
        let w = Tensor::ones(vec![1, 1, 2, 2]);
        let b = Tensor::new(vec![10.0], vec![1]);

        let (out, _) = conv_forward(&x, &w, &b, &ConvParam::new(1, 1)).unwrap();
        assert_eq!(out.shape, vec![1, 1, 3, 3]);
        assert_eq!(
            out.data,
            vec![11.0, 13.0, 12.0, 14.0, 20.0, 16.0, 13.0, 17.0, 14.0]
        );
    }

    #[test]
    fn test_stride_must_tile_input() {
        let x = Tensor::zeros(vec![1, 1, 4, 4]);
        let w = Tensor::zeros(vec![1, 1, 3, 3]);
        let b = Tensor::zeros(vec![1]);
        let err = conv_forward(&x, &w, &b, &ConvParam::new(2, 0)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidParam { op: "conv_forward", .. }));
    }

    #[test]
    fn test_channel_mismatch() {
        let x = Tensor::zeros(vec![1, 2, 4, 4]);
        let w = Tensor::zeros(vec![1, 3, 3, 3]);
        let b = Tensor::zeros(vec![1]);
        let err = conv_forward(&x, &w, &b, &ConvParam::default()).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_backward_matches_numerical() {
        let mut rng = StdRng::seed_from_u64(21);
        let x = Tensor::randn(vec![2, 3, 5, 5], 1.0, &mut rng);
        let w = Tensor::randn(vec![2, 3, 3, 3], 1.0, &mut rng);
        let b = Tensor::randn(vec![2], 1.0, &mut rng);
        let param = ConvParam::new(2, 1);

        let (out, cache) = conv_forward(&x, &w, &b, &param).unwrap();
        let dout = Tensor::randn(out.shape.clone(), 1.0, &mut rng);
        let grads = conv_backward(&dout, cache).unwrap();

        let dx_num = numerical_gradient(|x| conv_forward(x, &w, &b, &param).map(|r| r.0), &x, &dout).unwrap();
        let dw_num = numerical_gradient(|w| conv_forward(&x, w, &b, &param).map(|r| r.0), &w, &dout).unwrap();
        let db_num = numerical_gradient(|b| conv_forward(&x, &w, b, &param).map(|r| r.0), &b, &dout).unwrap();

        assert!(rel_error(&grads.x, &dx_num) < 1e-7);
        assert!(rel_error(&grads.weight, &dw_num) < 1e-7);
        assert!(rel_error(&grads.bias, &db_num) < 1e-7);
    }
}
