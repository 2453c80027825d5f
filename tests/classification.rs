use gpda::crossval::{KdaGrid, SubspaceGrid, linspace};
use gpda::subspace::SubspaceParam;
use gpda::{
    ClassifierError, Kda, Kernel, Npgpda, NpgpdaVariant, Pgpda, PgpdaVariant, PredictOutput,
    Samples,
};
use ndarray::{Array1, Array2, array};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Isotropic Gaussian blobs, `sizes[c]` points around `centers[c]`, labels 1-based.
fn blobs(
    centers: &[[f64; 2]],
    sizes: &[usize],
    sd: f64,
    seed: u64,
) -> (Array2<f64>, Array1<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sd).unwrap();
    let n: usize = sizes.iter().sum();
    let mut x = Array2::zeros((n, 2));
    let mut y = Array1::zeros(n);
    let mut row = 0;
    for (class, (center, &size)) in centers.iter().zip(sizes).enumerate() {
        for _ in 0..size {
            x[[row, 0]] = center[0] + noise.sample(&mut rng);
            x[[row, 1]] = center[1] + noise.sample(&mut rng);
            y[row] = class + 1;
            row += 1;
        }
    }
    (x, y)
}

fn small_subspace_grid() -> SubspaceGrid {
    SubspaceGrid {
        kernel_params: vec![0.125, 0.25, 0.5],
        thresholds: linspace(0.85, 0.9999, 4),
        dimensions: vec![2, 3, 5],
    }
}

#[test]
fn pgpda_cross_validation_separates_two_blobs() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [4.0, 4.0]], &[100, 100], 0.5, 7);

    let mut model = Pgpda::new(PgpdaVariant::M0, Kernel::rbf(0.5)).with_dimension(2);
    let outcome = model
        .cross_validation(x.view(), y.view(), 5, &small_subspace_grid())
        .unwrap();

    assert_eq!(outcome.errors.dim(), (3, 4));
    assert!(outcome.best_error() < 0.05, "error grid:\n{}", outcome.errors);
    assert!(outcome.errors.iter().all(|&e| (0.0..=1.0).contains(&e)));
    assert_eq!(model.kernel.param, outcome.kernel_param);
    assert!(matches!(outcome.secondary, SubspaceParam::Threshold(t) if t == model.threshold));
    assert!(!model.is_trained());

    let samples = Samples::features(x.view());
    model.train(&samples, y.view()).unwrap();
    let probes = array![[-0.5, -0.5], [4.5, 4.5], [0.3, -0.2], [3.6, 4.4]];
    let prediction = model
        .predict(&Samples::features(probes.view()), &samples, y.view(), PredictOutput::Posterior)
        .unwrap();
    assert_eq!(prediction.labels, array![1, 2, 1, 2]);

    let decision = prediction.decision.unwrap();
    assert!(decision.iter().all(|&d| d >= 0.0));
    for row in prediction.posterior.unwrap().rows() {
        assert!((row.sum() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn cross_validation_is_reproducible() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [2.0, 1.0], [0.5, 2.5]], &[30, 25, 20], 0.7, 11);
    let grid = small_subspace_grid();

    let mut first = Pgpda::new(PgpdaVariant::M6, Kernel::rbf(0.5));
    let mut second = Pgpda::new(PgpdaVariant::M6, Kernel::rbf(0.5));
    let a = first.cross_validation(x.view(), y.view(), 5, &grid).unwrap();
    let b = second.cross_validation(x.view(), y.view(), 5, &grid).unwrap();

    assert_eq!(a.errors, b.errors);
    assert_eq!(a.best, b.best);
    assert_eq!(first.dc, second.dc);
}

#[test]
fn undersized_class_does_not_break_cross_validation() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [3.0, 3.0], [-3.0, 3.0]], &[25, 25, 2], 0.5, 3);

    let mut model = Pgpda::new(PgpdaVariant::M1, Kernel::rbf(0.5));
    let outcome = model
        .cross_validation(x.view(), y.view(), 5, &small_subspace_grid())
        .unwrap();
    assert_eq!(outcome.errors.dim(), (3, 3));
    assert!(outcome.errors.iter().all(|e| e.is_finite()));

    let mut npgpda = Npgpda::new(NpgpdaVariant::NM0, Kernel::rbf(0.5));
    let outcome = npgpda
        .cross_validation(x.view(), y.view(), 5, &small_subspace_grid())
        .unwrap();
    assert!(outcome.errors.iter().all(|e| e.is_finite()));
}

#[test]
fn every_subspace_variant_classifies_held_out_points() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [4.0, 0.0], [2.0, 3.5]], &[40, 35, 30], 0.5, 21);
    let (xt, yt) = blobs(&[[0.0, 0.0], [4.0, 0.0], [2.0, 3.5]], &[10, 10, 10], 0.5, 22);
    let train = Samples::features(x.view());
    let test = Samples::features(xt.view());

    for variant in PgpdaVariant::ALL {
        let mut model = Pgpda::new(variant, Kernel::rbf(0.25)).with_dimension(5);
        model.train(&train, y.view()).unwrap();
        let labels = model
            .predict(&test, &train, y.view(), PredictOutput::Labels)
            .unwrap()
            .labels;
        let wrong = labels.iter().zip(yt.iter()).filter(|(a, b)| a != b).count();
        assert!(wrong <= 2, "{variant}: {wrong} errors");
    }

    for variant in NpgpdaVariant::ALL {
        let mut model = Npgpda::new(variant, Kernel::rbf(0.25)).with_dimension(5);
        model.train(&train, y.view()).unwrap();
        let labels = model
            .predict(&test, &train, y.view(), PredictOutput::Labels)
            .unwrap()
            .labels;
        let wrong = labels.iter().zip(yt.iter()).filter(|(a, b)| a != b).count();
        assert!(wrong <= 2, "{variant}: {wrong} errors");
    }
}

#[test]
fn kda_cross_validation_selects_from_the_grid() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [3.0, 3.0]], &[30, 30], 0.5, 5);
    let grid = KdaGrid {
        kernel_params: vec![0.25, 0.5],
        mus: vec![1e-6, 1e-3, 1e-1],
    };
    let mut model = Kda::new(Kernel::rbf(0.5));
    let outcome = model.cross_validation(x.view(), y.view(), 3, &grid).unwrap();

    assert_eq!(outcome.errors.dim(), (2, 3));
    assert!(grid.mus.contains(&model.mu));
    assert!(outcome.best_error() < 0.1, "error grid:\n{}", outcome.errors);

    let samples = Samples::features(x.view());
    model.train(&samples, y.view()).unwrap();
    let probes = array![[0.0, 0.1], [3.0, 2.9]];
    let labels = model
        .predict(&Samples::features(probes.view()), &samples, y.view(), PredictOutput::Labels)
        .unwrap()
        .labels;
    assert_eq!(labels, array![1, 2]);
}

#[test]
fn precomputed_kernels_match_feature_vectors() {
    init_logging();
    let (x, y) = blobs(&[[0.0, 0.0], [3.0, 1.0]], &[20, 15], 0.6, 9);
    let (xt, _) = blobs(&[[0.0, 0.0], [3.0, 1.0]], &[5, 5], 0.6, 10);
    let kernel = Kernel::rbf(0.3);

    let gram = kernel.compute(x.view(), None).unwrap().k;
    let diag = kernel.diagonal(x.view());
    let cross = kernel.compute(xt.view(), Some(x.view())).unwrap().k;
    let test_diag = kernel.diagonal(xt.view());
    let train_pre = Samples::precomputed(gram.view(), diag.view()).unwrap();
    let test_pre = Samples::precomputed(cross.view(), test_diag.view()).unwrap();

    let train = Samples::features(x.view());
    let test = Samples::features(xt.view());

    let mut direct = Pgpda::new(PgpdaVariant::M2, kernel);
    direct.train(&train, y.view()).unwrap();
    let mut pre = Pgpda::new(PgpdaVariant::M2, kernel);
    pre.train(&train_pre, y.view()).unwrap();

    let a = direct.predict(&test, &train, y.view(), PredictOutput::Decision).unwrap();
    let b = pre.predict(&test_pre, &train_pre, y.view(), PredictOutput::Decision).unwrap();
    assert_eq!(a.labels, b.labels);
    let (da, db) = (a.decision.unwrap(), b.decision.unwrap());
    for (u, v) in da.iter().zip(db.iter()) {
        assert!((u - v).abs() <= 1e-8 * u.abs().max(1.0));
    }

    assert!(matches!(
        direct.predict(&test_pre, &train, y.view(), PredictOutput::Labels),
        Err(ClassifierError::Kernel(_))
    ));
}

#[test]
fn invalid_labels_are_hard_errors() {
    let x = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
    let samples = Samples::features(x.view());
    let mut model = Pgpda::new(PgpdaVariant::M0, Kernel::default());

    assert!(matches!(
        model.train(&samples, array![1, 0, 2].view()),
        Err(ClassifierError::InvalidLabel { index: 1 })
    ));
    assert!(matches!(
        model.train(&samples, array![1, 3, 3].view()),
        Err(ClassifierError::EmptyClass(2))
    ));
    assert!(matches!(
        model.train(&samples, array![1, 2].view()),
        Err(ClassifierError::LabelCountMismatch { samples: 3, labels: 2 })
    ));

    assert!(matches!(
        model.cross_validation(x.view(), array![1, 2, 1].view(), 1, &SubspaceGrid::default()),
        Err(ClassifierError::Folds(_))
    ));
}
