extern crate raster_kf;

use super::run_filter;
use crate::band_obs;
use approx::assert_abs_diff_eq;
use raster_kf::linalg::{DMatrix, DVector};
use raster_kf::prelude::*;
use rstest::*;

/// Five pixels observed once, the last one with a gross error.
fn outlier_setup() -> (StateGrid, MemoryObservations<i32>, PixelPrior) {
    let grid = StateGrid::new(5, 1);
    let mut obs = MemoryObservations::new(5);
    obs.add_acquisition(
        1,
        vec![band_obs(&[1.05, 1.05, 1.05, 1.05, 5.0], &[true; 5], 0.1, 0)],
    )
    .unwrap();
    let prior =
        PixelPrior::new(DVector::from_element(1, 1.0), DMatrix::from_element(1, 1, 0.01)).unwrap();
    (grid, obs, prior)
}

#[rstest]
#[case(false)]
#[case(true)]
fn outlier_is_rejected(#[case] iter_obs_op: bool) {
    let (grid, obs, prior) = outlier_setup();
    let config = RunConfig::builder()
        .is_robust(true)
        .iter_obs_op(iter_obs_op)
        .build();

    let (result, out) = run_filter(
        &grid,
        config,
        &obs,
        &IdentityOperator::new(0),
        &LinearPropagator::default(),
        &prior,
        &[0, 1],
    );
    let summary = result.unwrap();
    let step = &summary.steps[1];
    assert_eq!(step.outliers, 1);
    assert_eq!(step.valid_pixels, 4);
    assert!(step.converged);
    assert_eq!(summary.outliers(), 1);

    let analysis = &out.last().unwrap().parameters[0];
    for pixel in 0..4 {
        assert_abs_diff_eq!(analysis[pixel], 1.025, epsilon = 1e-12);
    }
    // The rejected pixel keeps its forecast
    assert_abs_diff_eq!(analysis[4], 1.0, epsilon = 1e-12);
}

#[test]
fn outlier_is_kept_when_not_robust() {
    let (grid, obs, prior) = outlier_setup();

    let (result, out) = run_filter(
        &grid,
        RunConfig::default(),
        &obs,
        &IdentityOperator::new(0),
        &LinearPropagator::default(),
        &prior,
        &[0, 1],
    );
    assert_eq!(result.unwrap().outliers(), 0);
    assert_abs_diff_eq!(out.last().unwrap().parameters[0][4], 3.0, epsilon = 1e-12);
}

#[test]
fn remaining_outliers_are_reported() {
    let (grid, obs, prior) = outlier_setup();
    let config = RunConfig::builder()
        .is_robust(true)
        .robust(RejectCriteria {
            num_sigmas: 3.0,
            max_passes: 0,
        })
        .build();

    let (result, out) = run_filter(
        &grid,
        config,
        &obs,
        &IdentityOperator::new(0),
        &LinearPropagator::default(),
        &prior,
        &[0, 1],
    );
    let summary = result.unwrap();
    assert!(!summary.all_converged());
    assert_eq!(summary.outliers(), 0);
    assert_abs_diff_eq!(out.last().unwrap().parameters[0][4], 3.0, epsilon = 1e-12);
}
