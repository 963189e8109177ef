//! Layer Configuration
//!
//! Configuration objects consumed by the primitives that own them. Blocks
//! only pass these through; they never read or write a field.
//!
//! All of them serialize with serde, so a `BatchNormParam` (including its
//! running statistics) can be written out with `serde_json` and restored
//! for inference.
//!
//! ## Example
//!
//! ```rust
//! use layerkit::{BatchNormParam, DropoutParam, Mode};
//!
//! let bn = BatchNormParam::new().with_momentum(0.95);
//! let drop = DropoutParam::new(0.25).with_seed(123).with_mode(Mode::Train);
//! assert!(bn.running().is_none());
//! assert_eq!(drop.p, 0.25);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Train/test switch shared by batch norm and dropout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    Test,
}

/// Running mean/variance tracked by batch normalization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
}

impl RunningStats {
    /// Zero-initialized statistics for `features` columns
    pub fn zeros(features: usize) -> Self {
        Self {
            mean: vec![0.0; features],
            var: vec![0.0; features],
        }
    }
}

/// Batch normalization configuration and persistent state
///
/// `running` starts out empty and is created as zeros by the first forward
/// call, sized to the feature width it sees. After that it is updated in
/// place on every train-mode call and read in test mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParam {
    pub mode: Mode,
    pub eps: f64,
    pub momentum: f64,
    #[serde(default)]
    pub(crate) running: Option<RunningStats>,
}

impl Default for BatchNormParam {
    fn default() -> Self {
        Self {
            mode: Mode::Train,
            eps: 1e-5,
            momentum: 0.9,
            running: None,
        }
    }
}

impl BatchNormParam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Seed the running statistics, e.g. when restoring a trained layer
    pub fn with_running(mut self, running: RunningStats) -> Self {
        self.running = Some(running);
        self
    }

    /// Running statistics, if a forward call has created them
    pub fn running(&self) -> Option<&RunningStats> {
        self.running.as_ref()
    }

    /// Save configuration and running statistics to a JSON file
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use layerkit::BatchNormParam;
    /// # let bn = BatchNormParam::new();
    /// bn.save("bn1.json").expect("Failed to save");
    /// ```
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously saved batch norm state
    ///
    /// Typically followed by `.with_mode(Mode::Test)` for inference.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)?;
        let param: BatchNormParam = serde_json::from_str(&json)?;
        Ok(param)
    }
}

/// Dropout configuration
///
/// `p` is the probability of dropping a unit. With `seed` set, every
/// forward call draws the same mask for the same input shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropoutParam {
    pub p: f64,
    pub mode: Mode,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DropoutParam {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            mode: Mode::Train,
            seed: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Convolution stride and zero padding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParam {
    pub stride: usize,
    pub pad: usize,
}

impl Default for ConvParam {
    fn default() -> Self {
        Self { stride: 1, pad: 0 }
    }
}

impl ConvParam {
    pub fn new(stride: usize, pad: usize) -> Self {
        Self { stride, pad }
    }

    /// Stride 1 with enough padding to keep H and W for an odd `kernel`
    pub fn same(kernel: usize) -> Self {
        Self {
            stride: 1,
            pad: (kernel.saturating_sub(1)) / 2,
        }
    }
}

/// Max-pooling window and stride
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParam {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl Default for PoolParam {
    fn default() -> Self {
        Self {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        }
    }
}

impl PoolParam {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Self {
        Self {
            pool_height,
            pool_width,
            stride,
        }
    }
}
