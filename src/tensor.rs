//! Dense Tensors for Layer Computations
//!
//! This module provides the minimal tensor type the primitive layers are
//! written against. Tensors store multi-dimensional arrays with shape and
//! stride information for indexing.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f64>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, channels, height, width]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! Elements are `f64` so that centered finite differences can be compared
//! against analytic gradients to tight tolerances.
//!
//! ## Example
//!
//! ```rust
//! use layerkit::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::new(data, vec![2, 3]);
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let result = tensor.matmul(&other);
//! assert_eq!(result.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Element-wise operations and large matrix multiplications run in parallel
//! via Rayon. Results do not depend on the number of threads.

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// A multi-dimensional array for layer computations
///
/// Tensors store data in a contiguous `Vec<f64>` with shape and stride
/// information. All operations use row-major (C-style) memory layout.
///
/// For shape `[2, 3]`, data is stored as:
/// `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
/// and strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f64>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// let tensor = Tensor::zeros(vec![3, 4]);
    /// assert_eq!(tensor.data.len(), 12);
    /// assert!(tensor.data.iter().all(|&x| x == 0.0));
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: f64) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Sample a tensor from N(0, std²)
    ///
    /// Used for weight initialization and for random test inputs. Pass a
    /// seeded RNG for reproducible draws.
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let mut rng = StdRng::seed_from_u64(0);
    /// let w = Tensor::randn(vec![3, 4], 0.01, &mut rng);
    /// assert_eq!(w.shape, vec![3, 4]);
    /// ```
    pub fn randn<R: Rng>(shape: Vec<usize>, std: f64, rng: &mut R) -> Self {
        let size: usize = shape.iter().product();
        let data = (0..size)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                z * std
            })
            .collect();
        Self::new(data, shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// SIMD-friendly inner loop for matrix multiplication
    /// Computes: result[j] += a_val * b[j] for all j
    #[inline(always)]
    fn matmul_inner_simd(a_val: f64, b: &[f64], result: &mut [f64]) {
        // Simple loop that LLVM can auto-vectorize
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication of two 2D tensors
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]`.
    ///
    /// # Performance
    ///
    /// - **Small matrices** (< 1K ops): Sequential computation
    /// - **Large matrices** (≥ 1K ops): Parallel cache-blocked algorithm
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ.
    /// Layers check shapes before calling this.
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
    /// let c = a.matmul(&b);
    /// assert_eq!(c.data, vec![1.0, 2.0, 3.0, 4.0]);
    /// ```
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        // Parallel overhead only pays off past ~1K multiply-adds
        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += self.data[i * k + l] * other.data[l * n + j];
                }
                result[i * n + j] = sum;
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks and distributes row blocks across cores.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Transpose a 2D tensor
    pub fn t(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "t() expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Element-wise addition with broadcasting support
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (e.g., adding bias)
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![10.0, 20.0], vec![2]);
    /// assert_eq!(a.add(&b).data, vec![11.0, 22.0, 13.0, 24.0]);
    /// ```
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, "add", |a, b| a + b)
    }

    /// Element-wise multiplication with broadcasting
    ///
    /// See `add()` for broadcasting patterns.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, "mul", |a, b| a * b)
    }

    /// Element-wise subtraction with broadcasting
    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, "sub", |a, b| a - b)
    }

    fn broadcast_zip<F>(&self, other: &Tensor, op: &str, f: F) -> Tensor
    where
        F: Fn(f64, f64) -> f64 + Sync,
    {
        // === EXACT MATCH: Same shape ===
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        // === BROADCAST LAST DIM: [*, n] op [n] ===
        if self.shape.len() > other.shape.len() {
            let last_dim = self.shape.last().copied().unwrap_or(0);
            if other.data.len() == last_dim {
                let result: Vec<f64> = (0..self.data.len())
                    .into_par_iter()
                    .map(|i| f(self.data[i], other.data[i % last_dim]))
                    .collect();
                return Tensor::new(result, self.shape.clone());
            }
        }

        panic!(
            "Unsupported broadcast for {}: {:?} and {:?}",
            op, self.shape, other.shape
        );
    }

    /// Apply `f` to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f64) -> f64 + Sync,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Add scalar to all elements
    pub fn add_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x + scalar)
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.par_iter().sum()
    }

    /// Sum of the element-wise product, `sum(self * other)`
    pub fn dot(&self, other: &Tensor) -> f64 {
        assert_eq!(self.shape, other.shape, "Shapes must match for dot");
        self.data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Column sums of a 2D tensor `[rows, cols]` → `[cols]`
    pub fn sum_rows(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "sum_rows expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let result: Vec<f64> = (0..cols)
            .into_par_iter()
            .map(|j| (0..rows).map(|i| self.data[i * cols + j]).sum())
            .collect();
        Tensor::new(result, vec![cols])
    }

    /// Column means of a 2D tensor `[rows, cols]` → `[cols]`
    pub fn mean_rows(&self) -> Tensor {
        let rows = self.shape.first().copied().unwrap_or(0).max(1);
        self.sum_rows().mul_scalar(1.0 / rows as f64)
    }

    /// Biased column variances of a 2D tensor `[rows, cols]` → `[cols]`
    pub fn var_rows(&self) -> Tensor {
        let mean = self.mean_rows();
        let centered = self.sub(&mean);
        centered.mul(&centered).mean_rows()
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    ///
    /// ```rust
    /// # use layerkit::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let reshaped = tensor.reshape(&[3, 2]);
    /// assert_eq!(reshaped.shape, vec![3, 2]);
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape: element count mismatch"
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }
}
