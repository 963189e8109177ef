//! Gradient Check for Every Composite Block
//!
//! Runs each block forward on random inputs, backpropagates a random
//! upstream gradient and compares the analytic gradients with centered
//! finite differences, reporting `scaled_error` per gradient.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --example gradcheck
//! cargo run --release --example gradcheck -- --seed 7 --batch 4 --dropout 0.25
//! cargo run --example gradcheck -- --block conv_relu_pool
//! ```

use clap::Parser;
use layerkit::gradient_check::{numerical_gradient, scaled_error};
use layerkit::*;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Parser)]
#[command(name = "gradcheck", about = "Compare block gradients against finite differences")]
struct Args {
    /// Seed for inputs, weights and dropout masks
    #[arg(long, default_value_t = 231)]
    seed: u64,

    /// Examples per batch
    #[arg(long, default_value_t = 3)]
    batch: usize,

    /// Features in for the affine blocks
    #[arg(long, default_value_t = 6)]
    features: usize,

    /// Hidden units for the affine blocks
    #[arg(long, default_value_t = 5)]
    hidden: usize,

    /// Dropout probability for the dropout blocks
    #[arg(long, default_value_t = 0.5)]
    dropout: f64,

    /// Only check the named block (e.g. affine_relu, conv_relu_pool)
    #[arg(long)]
    block: Option<String>,
}

struct Report {
    dx: f64,
    dw: f64,
    db: f64,
}

/// `forward` re-runs the block for the finite differences; `run` produces
/// the cache that `backward` consumes.
fn check(
    mut forward: impl FnMut(&Tensor, &Tensor, &Tensor) -> Result<Tensor>,
    backward: fn(&Tensor, BlockCache) -> Result<ParamGradients>,
    run: impl FnOnce(&Tensor, &Tensor, &Tensor) -> Result<(Tensor, BlockCache)>,
    inputs: (&Tensor, &Tensor, &Tensor),
    rng: &mut StdRng,
) -> Result<Report> {
    let (x, w, b) = inputs;
    let (out, cache) = run(x, w, b)?;
    let dout = Tensor::randn(out.shape.clone(), 1.0, rng);
    let grads = backward(&dout, cache)?;

    let dx_num = numerical_gradient(|x| forward(x, w, b), x, &dout)?;
    let dw_num = numerical_gradient(|w| forward(x, w, b), w, &dout)?;
    let db_num = numerical_gradient(|b| forward(x, w, b), b, &dout)?;

    Ok(Report {
        dx: scaled_error(&grads.x, &dx_num),
        dw: scaled_error(&grads.weight, &dw_num),
        db: scaled_error(&grads.bias, &db_num),
    })
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    println!("=== Block Gradient Check ===");
    println!(
        "seed {}, batch {}, affine {} -> {}, dropout p = {}\n",
        args.seed, args.batch, args.features, args.hidden, args.dropout
    );

    let x = Tensor::randn(vec![args.batch, args.features], 1.0, &mut rng);
    let w = Tensor::randn(vec![args.features, args.hidden], 1.0, &mut rng);
    let b = Tensor::randn(vec![args.hidden], 1.0, &mut rng);

    let img = Tensor::randn(vec![args.batch, 3, 8, 8], 1.0, &mut rng);
    let filt = Tensor::randn(vec![4, 3, 3, 3], 1.0, &mut rng);
    let fb = Tensor::randn(vec![4], 1.0, &mut rng);

    let drop = DropoutParam::new(args.dropout).with_seed(args.seed);
    let conv = ConvParam::same(3);
    let pool = PoolParam::default();

    let wanted = |kind: BlockKind| args.block.as_deref().map_or(true, |name| name == kind.to_string());
    let mut results = Vec::new();

    if wanted(BlockKind::AffineRelu) {
        let report = check(
            |x, w, b| affine_relu_forward(x, w, b).map(|r| r.0),
            affine_relu_backward,
            affine_relu_forward,
            (&x, &w, &b),
            &mut rng,
        )?;
        results.push((BlockKind::AffineRelu, report));
    }

    if wanted(BlockKind::AffineReluBatchNorm) {
        let mut bn = BatchNormParam::new();
        let mut bn_probe = BatchNormParam::new();
        let report = check(
            |x, w, b| affine_relu_batchnorm_forward(x, w, b, &mut bn_probe).map(|r| r.0),
            affine_relu_batchnorm_backward,
            |x, w, b| affine_relu_batchnorm_forward(x, w, b, &mut bn),
            (&x, &w, &b),
            &mut rng,
        )?;
        results.push((BlockKind::AffineReluBatchNorm, report));
    }

    if wanted(BlockKind::AffineReluBatchNormDropout) {
        let mut bn = BatchNormParam::new();
        let mut bn_probe = BatchNormParam::new();
        let report = check(
            |x, w, b| affine_relu_batchnorm_dropout_forward(x, w, b, &mut bn_probe, &drop).map(|r| r.0),
            affine_relu_batchnorm_dropout_backward,
            |x, w, b| affine_relu_batchnorm_dropout_forward(x, w, b, &mut bn, &drop),
            (&x, &w, &b),
            &mut rng,
        )?;
        results.push((BlockKind::AffineReluBatchNormDropout, report));
    }

    if wanted(BlockKind::AffineReluDropout) {
        let report = check(
            |x, w, b| affine_relu_dropout_forward(x, w, b, &drop).map(|r| r.0),
            affine_relu_dropout_backward,
            |x, w, b| affine_relu_dropout_forward(x, w, b, &drop),
            (&x, &w, &b),
            &mut rng,
        )?;
        results.push((BlockKind::AffineReluDropout, report));
    }

    if wanted(BlockKind::ConvRelu) {
        let report = check(
            |x, w, b| conv_relu_forward(x, w, b, &conv).map(|r| r.0),
            conv_relu_backward,
            |x, w, b| conv_relu_forward(x, w, b, &conv),
            (&img, &filt, &fb),
            &mut rng,
        )?;
        results.push((BlockKind::ConvRelu, report));
    }

    if wanted(BlockKind::ConvReluPool) {
        let report = check(
            |x, w, b| conv_relu_pool_forward(x, w, b, &conv, &pool).map(|r| r.0),
            conv_relu_pool_backward,
            |x, w, b| conv_relu_pool_forward(x, w, b, &conv, &pool),
            (&img, &filt, &fb),
            &mut rng,
        )?;
        results.push((BlockKind::ConvReluPool, report));
    }

    if results.is_empty() {
        return Err(format!("unknown block {:?}", args.block.unwrap_or_default()).into());
    }

    println!("{:<32} {:>12} {:>12} {:>12}", "block", "dx", "dw", "db");
    println!("{}", "-".repeat(71));
    let mut worst = 0.0f64;
    for (kind, r) in &results {
        println!("{:<32} {:>12.3e} {:>12.3e} {:>12.3e}", kind.to_string(), r.dx, r.dw, r.db);
        worst = worst.max(r.dx).max(r.dw).max(r.db);
    }

    println!();
    if worst < 1e-5 {
        println!("✓ All gradients agree (worst scaled error {:.3e})", worst);
    } else {
        println!("✗ Worst scaled error {:.3e}; a backward pass is suspect", worst);
    }

    Ok(())
}
