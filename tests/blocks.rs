//! End-to-end behaviour of the composite blocks through the public API.

use approx::assert_relative_eq;
use layerkit::gradient_check::{numerical_gradient, scaled_error};
use layerkit::*;
use rand::{rngs::StdRng, SeedableRng};

fn affine_fixture() -> (Tensor, Tensor, Tensor) {
    let x = Tensor::new(vec![0.5, -1.0, 2.0, 1.5, 0.25, -0.75], vec![2, 3]);
    let w = Tensor::new(
        vec![
            0.2, -0.1, 0.4, 0.3, //
            -0.5, 0.6, 0.1, -0.2, //
            0.3, 0.2, -0.3, 0.5,
        ],
        vec![3, 4],
    );
    let b = Tensor::new(vec![0.1, -0.2, 0.05, 0.0], vec![4]);
    (x, w, b)
}

#[test]
fn affine_relu_shapes_and_nonnegative_output() {
    let (x, w, b) = affine_fixture();
    let (out, cache) = affine_relu_forward(&x, &w, &b).unwrap();
    assert_eq!(out.shape, vec![2, 4]);
    assert!(out.data.iter().all(|&v| v >= 0.0));
    assert_eq!(cache.kind(), BlockKind::AffineRelu);
    assert_eq!(cache.len(), BlockKind::AffineRelu.stages().len());

    let grads = affine_relu_backward(&Tensor::ones(vec![2, 4]), cache).unwrap();
    assert_eq!(grads.x.shape, vec![2, 3]);
    assert_eq!(grads.weight.shape, vec![3, 4]);
    assert_eq!(grads.bias.shape, vec![4]);
}

#[test]
fn affine_relu_bias_gradient_counts_active_units() {
    let (x, w, b) = affine_fixture();
    let (out, cache) = affine_relu_forward(&x, &w, &b).unwrap();
    let grads = affine_relu_backward(&Tensor::ones(vec![2, 4]), cache).unwrap();

    // With dout = 1, db[j] is the number of examples where unit j fired
    for j in 0..4 {
        let active = (0..2).filter(|&i| out.data[i * 4 + j] > 0.0).count();
        assert_relative_eq!(grads.bias.data[j], active as f64);
    }
}

#[test]
fn every_cache_holds_one_stage_per_primitive() {
    let mut rng = StdRng::seed_from_u64(0);
    let x = Tensor::randn(vec![4, 6], 1.0, &mut rng);
    let w = Tensor::randn(vec![6, 3], 1.0, &mut rng);
    let b = Tensor::zeros(vec![3]);
    let img = Tensor::randn(vec![1, 2, 4, 4], 1.0, &mut rng);
    let filt = Tensor::randn(vec![2, 2, 3, 3], 1.0, &mut rng);
    let fb = Tensor::zeros(vec![2]);
    let drop = DropoutParam::new(0.5).with_seed(1);
    let mut bn = BatchNormParam::new();
    let conv = ConvParam::same(3);
    let pool = PoolParam::default();

    let caches = vec![
        affine_relu_forward(&x, &w, &b).unwrap().1,
        affine_relu_batchnorm_forward(&x, &w, &b, &mut bn).unwrap().1,
        affine_relu_batchnorm_dropout_forward(&x, &w, &b, &mut bn, &drop).unwrap().1,
        affine_relu_dropout_forward(&x, &w, &b, &drop).unwrap().1,
        conv_relu_forward(&img, &filt, &fb, &conv).unwrap().1,
        conv_relu_pool_forward(&img, &filt, &fb, &conv, &pool).unwrap().1,
    ];

    for cache in caches {
        assert_eq!(cache.stage_kinds(), cache.kind().stages());
    }
}

#[test]
fn seeded_dropout_blocks_are_reproducible() {
    let mut rng = StdRng::seed_from_u64(3);
    let x = Tensor::randn(vec![8, 10], 1.0, &mut rng);
    let w = Tensor::randn(vec![10, 16], 1.0, &mut rng);
    let b = Tensor::randn(vec![16], 1.0, &mut rng);
    let drop = DropoutParam::new(0.4).with_seed(2024);
    let dout = Tensor::randn(vec![8, 16], 1.0, &mut rng);

    let (out_a, cache_a) = affine_relu_dropout_forward(&x, &w, &b, &drop).unwrap();
    let (out_b, cache_b) = affine_relu_dropout_forward(&x, &w, &b, &drop).unwrap();
    assert_eq!(out_a.data, out_b.data);

    let grads_a = affine_relu_dropout_backward(&dout, cache_a).unwrap();
    let grads_b = affine_relu_dropout_backward(&dout, cache_b).unwrap();
    assert_eq!(grads_a, grads_b);

    let mut bn_a = BatchNormParam::new();
    let mut bn_b = BatchNormParam::new();
    let (out_a, _) = affine_relu_batchnorm_dropout_forward(&x, &w, &b, &mut bn_a, &drop).unwrap();
    let (out_b, _) = affine_relu_batchnorm_dropout_forward(&x, &w, &b, &mut bn_b, &drop).unwrap();
    assert_eq!(out_a.data, out_b.data);
    assert_eq!(bn_a, bn_b);
}

#[test]
fn test_mode_dropout_block_matches_plain_block() {
    let (x, w, b) = affine_fixture();
    let drop = DropoutParam::new(0.9).with_mode(Mode::Test);
    let (plain, _) = affine_relu_forward(&x, &w, &b).unwrap();
    let (dropped, cache) = affine_relu_dropout_forward(&x, &w, &b, &drop).unwrap();
    assert_eq!(plain.data, dropped.data);

    let dout = Tensor::ones(vec![2, 4]);
    let (_, plain_cache) = affine_relu_forward(&x, &w, &b).unwrap();
    let expected = affine_relu_backward(&dout, plain_cache).unwrap();
    assert_eq!(affine_relu_dropout_backward(&dout, cache).unwrap(), expected);
}

#[test]
fn caches_are_tied_to_their_forward_call() {
    let mut rng = StdRng::seed_from_u64(9);
    let w = Tensor::randn(vec![5, 4], 1.0, &mut rng);
    let b = Tensor::randn(vec![4], 1.0, &mut rng);
    let x1 = Tensor::randn(vec![3, 5], 1.0, &mut rng);
    let x2 = Tensor::randn(vec![3, 5], 1.0, &mut rng);
    let dout = Tensor::ones(vec![3, 4]);

    let (_, c1) = affine_relu_forward(&x1, &w, &b).unwrap();
    let (_, c2) = affine_relu_forward(&x2, &w, &b).unwrap();
    let honest = affine_relu_backward(&dout, c1.clone()).unwrap();

    // Affine stage from call 1, ReLU stage from call 2
    let (kind, mut s1) = c1.into_parts();
    let (_, s2) = c2.into_parts();
    s1[1] = s2[1].clone();
    let mixed = affine_relu_backward(&dout, BlockCache::from_parts(kind, s1)).unwrap();

    assert_ne!(honest.weight, mixed.weight);
}

#[test]
fn reordered_stages_fail_instead_of_returning_garbage() {
    let mut rng = StdRng::seed_from_u64(4);
    let x = Tensor::randn(vec![4, 3], 1.0, &mut rng);
    let w = Tensor::randn(vec![3, 2], 1.0, &mut rng);
    let b = Tensor::zeros(vec![2]);
    let drop = DropoutParam::new(0.2).with_seed(8);

    let (out, cache) = affine_relu_dropout_forward(&x, &w, &b, &drop).unwrap();
    let (kind, mut stages) = cache.into_parts();
    stages.reverse();

    let err = affine_relu_dropout_backward(&Tensor::ones(out.shape), BlockCache::from_parts(kind, stages)).unwrap_err();
    assert!(matches!(
        err,
        LayerError::StageMismatch {
            expected: StageKind::Dropout,
            ..
        }
    ));
    assert!(err.to_string().contains("dropout"));
}

#[test]
fn wrong_block_backward_is_rejected() {
    let mut rng = StdRng::seed_from_u64(5);
    let img = Tensor::randn(vec![1, 1, 4, 4], 1.0, &mut rng);
    let filt = Tensor::randn(vec![1, 1, 3, 3], 1.0, &mut rng);
    let fb = Tensor::zeros(vec![1]);

    let (out, cache) = conv_relu_forward(&img, &filt, &fb, &ConvParam::same(3)).unwrap();
    let err = conv_relu_pool_backward(&Tensor::ones(out.shape), cache).unwrap_err();
    assert_eq!(
        err,
        LayerError::BlockMismatch {
            expected: BlockKind::ConvReluPool,
            found: BlockKind::ConvRelu
        }
    );
}

#[test]
fn conv_relu_pool_matches_numerical_gradient() {
    let mut rng = StdRng::seed_from_u64(12);
    let x = Tensor::randn(vec![2, 2, 6, 6], 1.0, &mut rng);
    let w = Tensor::randn(vec![4, 2, 3, 3], 1.0, &mut rng);
    let b = Tensor::randn(vec![4], 1.0, &mut rng);
    let conv = ConvParam::new(1, 1);
    let pool = PoolParam::new(2, 2, 2);

    let (out, cache) = conv_relu_pool_forward(&x, &w, &b, &conv, &pool).unwrap();
    assert_eq!(out.shape, vec![2, 4, 3, 3]);

    let dout = Tensor::randn(out.shape.clone(), 1.0, &mut rng);
    let grads = conv_relu_pool_backward(&dout, cache).unwrap();
    let dx_num = numerical_gradient(|x| conv_relu_pool_forward(x, &w, &b, &conv, &pool).map(|r| r.0), &x, &dout).unwrap();
    let dw_num = numerical_gradient(|w| conv_relu_pool_forward(&x, w, &b, &conv, &pool).map(|r| r.0), &w, &dout).unwrap();

    assert!(scaled_error(&grads.x, &dx_num) < 1e-6);
    assert!(scaled_error(&grads.weight, &dw_num) < 1e-6);
}

#[test]
fn batchnorm_block_in_test_mode_uses_running_stats() {
    let mut rng = StdRng::seed_from_u64(21);
    let w = Tensor::randn(vec![4, 3], 1.0, &mut rng);
    let b = Tensor::randn(vec![3], 1.0, &mut rng);
    let mut bn = BatchNormParam::new().with_momentum(0.0);

    // Momentum 0 copies the last batch statistics into the running stats
    let train_x = Tensor::randn(vec![16, 4], 1.0, &mut rng);
    affine_relu_batchnorm_forward(&train_x, &w, &b, &mut bn).unwrap();
    let stats = bn.running().cloned().unwrap();

    bn.mode = Mode::Test;
    let x = Tensor::randn(vec![2, 4], 1.0, &mut rng);
    let (out, cache) = affine_relu_batchnorm_forward(&x, &w, &b, &mut bn).unwrap();
    let (h, _) = affine_relu_forward(&x, &w, &b).unwrap();
    for i in 0..2 {
        for j in 0..3 {
            let expected = (h.data[i * 3 + j] - stats.mean[j]) / (stats.var[j] + bn.eps).sqrt();
            assert_relative_eq!(out.data[i * 3 + j], expected, epsilon = 1e-10);
        }
    }

    let dout = Tensor::randn(vec![2, 3], 1.0, &mut rng);
    let grads = affine_relu_batchnorm_backward(&dout, cache).unwrap();
    let dx_num = numerical_gradient(|x| affine_relu_batchnorm_forward(x, &w, &b, &mut bn).map(|r| r.0), &x, &dout).unwrap();
    assert!(scaled_error(&grads.x, &dx_num) < 1e-6);
}
