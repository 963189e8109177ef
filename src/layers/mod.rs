//! Primitive Layers
//!
//! The differentiable building blocks the composite blocks are made of.
//! Each primitive is a pair of free functions:
//!
//! ```rust,ignore
//! pub fn primitive_forward(x: &Tensor, /* params */) -> Result<(Tensor, PrimitiveCache)>;
//! pub fn primitive_backward(dout: &Tensor, cache: PrimitiveCache) -> Result<Gradients>;
//! ```
//!
//! The cache is moved into backward, so a forward result can be
//! differentiated exactly once.
//!
//! ## Layers
//!
//! - **affine**: Fully connected `x @ W + b`
//! - **relu**: Rectified linear activation
//! - **batch_norm**: Batch normalization with running statistics
//! - **dropout**: Inverted dropout
//! - **conv**: 2D convolution with stride and zero padding
//! - **pool**: 2D max pooling

pub mod affine;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod pool;
pub mod relu;

pub use affine::{affine_backward, affine_forward, AffineCache};
pub use batch_norm::{batchnorm_backward, batchnorm_forward, BatchNormCache, BatchNormGradients};
pub use conv::{conv_backward, conv_forward, ConvCache};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache};
pub use pool::{max_pool_backward, max_pool_forward, MaxPoolCache};
pub use relu::{relu_backward, relu_forward, ReluCache};
