//! Layerkit: Composite Neural Network Blocks
//!
//! Hand-written forward and backward passes for small feed-forward and
//! convolutional networks. Primitive layers (affine, ReLU, batch norm,
//! dropout, convolution, max pooling) are chained into the composite blocks
//! a classifier is usually assembled from, each with a matching backward
//! pass that applies the chain rule stage by stage.
//!
//! # Modules
//!
//! - [`tensor`] - Dense `f64` tensors with the few ops the layers need
//! - [`layers`] - Primitive forward/backward pairs
//! - [`blocks`] - Composite forward/backward pairs
//! - [`cache`] - Labelled caches that carry a block's stages to backward
//! - [`params`] - Batch norm, dropout, conv and pool configuration
//! - [`gradient_check`] - Finite-difference gradient verification
//!
//! # Example
//!
//! ```rust
//! use layerkit::{conv_relu_pool_backward, conv_relu_pool_forward, ConvParam, PoolParam, Tensor};
//!
//! let x = Tensor::ones(vec![1, 1, 4, 4]);
//! let w = Tensor::full(vec![2, 1, 3, 3], 0.1);
//! let b = Tensor::zeros(vec![2]);
//!
//! let (out, cache) = conv_relu_pool_forward(&x, &w, &b, &ConvParam::same(3), &PoolParam::default()).unwrap();
//! assert_eq!(out.shape, vec![1, 2, 2, 2]);
//!
//! let grads = conv_relu_pool_backward(&Tensor::ones(out.shape.clone()), cache).unwrap();
//! assert_eq!(grads.weight.shape, w.shape);
//! ```

pub mod blocks;
pub mod cache;
pub mod error;
pub mod gradient_check;
pub mod gradients;
pub mod layers;
pub mod params;
pub mod tensor;

// Re-export main types for convenience
pub use blocks::{
    affine_relu_backward, affine_relu_batchnorm_backward, affine_relu_batchnorm_dropout_backward,
    affine_relu_batchnorm_dropout_forward, affine_relu_batchnorm_forward, affine_relu_dropout_backward,
    affine_relu_dropout_forward, affine_relu_forward, conv_relu_backward, conv_relu_forward,
    conv_relu_pool_backward, conv_relu_pool_forward,
};
pub use cache::{BlockCache, BlockKind, StageCache, StageKind};
pub use error::{LayerError, Result};
pub use gradients::ParamGradients;
pub use layers::{
    affine_backward, affine_forward, batchnorm_backward, batchnorm_forward, conv_backward, conv_forward,
    dropout_backward, dropout_forward, max_pool_backward, max_pool_forward, relu_backward, relu_forward,
};
pub use params::{BatchNormParam, ConvParam, DropoutParam, Mode, PoolParam, RunningStats};
pub use tensor::Tensor;
