extern crate raster_kf;

use crate::{band_obs, init_logger};
use approx::assert_abs_diff_eq;
use raster_kf::linalg::{DMatrix, DVector};
use raster_kf::prelude::*;
use raster_kf::sparse::{diagonal, from_dense, to_dense};
use rstest::*;

fn scalar_estimate(x: f64, matrix: f64, form: MatrixForm) -> Estimate {
    let matrix = block_diag(&[DMatrix::from_element(1, 1, matrix)]).unwrap();
    match form {
        MatrixForm::Covariance => Estimate::from_covariance(DVector::from_element(1, x), matrix),
        MatrixForm::Information => Estimate::from_information(DVector::from_element(1, x), matrix),
    }
    .unwrap()
}

/// Prior of 4 with a unit observation of 5: the gain is 0.8.
#[rstest]
#[case(true, false)]
#[case(true, true)]
#[case(false, false)]
fn scalar_linear_gain(#[case] approx_diagonal: bool, #[case] refine_diag: bool) {
    init_logger();
    let grid = StateGrid::new(1, 1);
    let forecast = scalar_estimate(0.0, 4.0, MatrixForm::Covariance);
    let obs = band_obs(&[5.0], &[true], 1.0, 0);
    let operator = IdentityOperator::new(0);
    let lin = operator.linearize(&grid, &forecast.state, &obs).unwrap();
    let options = LinearOptions::builder()
        .approx_diagonal(approx_diagonal)
        .refine_diag(refine_diag)
        .build();

    let analysis = linear_update(&grid, &forecast, &obs, &lin, options).unwrap();
    assert_abs_diff_eq!(analysis.estimate.state[0], 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(diagonal(&analysis.estimate.matrix)[0], 0.8, epsilon = 1e-12);
    assert_eq!(analysis.innovations[0], DVector::from_element(1, 5.0));
    assert!(analysis.converged);
}

#[test]
fn scalar_information_gain() {
    let grid = StateGrid::new(1, 1);
    let forecast = scalar_estimate(0.0, 0.25, MatrixForm::Information);
    let obs = band_obs(&[5.0], &[true], 1.0, 0);

    let analysis = iterative_update(
        &grid,
        &forecast,
        &[obs],
        &IdentityOperator::new(0),
        IterationOptions::default(),
    )
    .unwrap();
    assert_eq!(analysis.iterations, 1);
    assert!(analysis.converged);
    assert_abs_diff_eq!(analysis.estimate.state[0], 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(diagonal(&analysis.estimate.matrix)[0], 1.25, epsilon = 1e-12);
}

#[test]
fn no_valid_pixel_keeps_forecast() {
    let grid = StateGrid::new(3, 1);
    let forecast = Estimate::from_covariance(
        DVector::from_vec(vec![1.0, 2.0, 3.0]),
        block_diag(&[DMatrix::identity(3, 3)]).unwrap(),
    )
    .unwrap();
    let obs = band_obs(&[f64::NAN; 3], &[false; 3], 1.0, 0);
    let lin = IdentityOperator::new(0)
        .linearize(&grid, &forecast.state, &obs)
        .unwrap();
    let analysis =
        linear_update(&grid, &forecast, &obs, &lin, LinearOptions::default()).unwrap();
    assert_eq!(analysis.estimate.state, forecast.state);
    assert_eq!(analysis.estimate.matrix, forecast.matrix);
    assert_eq!(analysis.observation_count(), 0);
}

/// The covariance between an observed and an unobserved pixel carries the update over.
#[test]
fn correlated_pixels() {
    let grid = StateGrid::new(2, 1);
    let p = from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]));
    let forecast = Estimate::from_covariance(DVector::zeros(2), p).unwrap();
    let obs = band_obs(&[1.0, f64::NAN], &[true, false], 1.0, 0);
    let lin = IdentityOperator::new(0)
        .linearize(&grid, &forecast.state, &obs)
        .unwrap();

    for approx_diagonal in [true, false] {
        let options = LinearOptions::builder()
            .approx_diagonal(approx_diagonal)
            .build();
        let analysis = linear_update(&grid, &forecast, &obs, &lin, options).unwrap();
        assert_abs_diff_eq!(
            analysis.estimate.state,
            DVector::from_vec(vec![0.5, 0.25]),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            to_dense(&analysis.estimate.matrix),
            DMatrix::from_row_slice(2, 2, &[0.5, 0.25, 0.25, 0.875]),
            epsilon = 1e-12
        );
    }
}

#[test]
fn iterated_matches_linear_for_linear_operator() {
    let grid = StateGrid::new(3, 2);
    let operator = LinearOperator::uniform(vec![0.6, 0.3]).with_offsets(vec![0.05]);
    let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
    let prior = PixelPrior::new(DVector::from_vec(vec![0.5, 1.0]), cov).unwrap();
    let obs = band_obs(&[0.7, 0.6, 0.9], &[true, false, true], 0.02, 0);

    let cov_prior = prior
        .process_prior(None::<&usize>, &grid, MatrixForm::Covariance)
        .unwrap();
    let lin = operator.linearize(&grid, &cov_prior.state, &obs).unwrap();
    let exact = LinearOptions::builder().approx_diagonal(false).build();
    let linear = linear_update(&grid, &cov_prior, &obs, &lin, exact).unwrap();

    let info_prior = prior
        .process_prior(None::<&usize>, &grid, MatrixForm::Information)
        .unwrap();
    let iterated = iterative_update(
        &grid,
        &info_prior,
        &[obs],
        &operator,
        IterationOptions::default(),
    )
    .unwrap();

    assert_eq!(iterated.iterations, 1);
    assert_abs_diff_eq!(
        iterated.estimate.state,
        linear.estimate.state,
        epsilon = 1e-9
    );
    let iterated = iterated
        .estimate
        .into_form(MatrixForm::Covariance, &grid)
        .unwrap();
    assert_abs_diff_eq!(
        to_dense(&iterated.matrix),
        to_dense(&linear.estimate.matrix),
        epsilon = 1e-9
    );
}

/// Observing the square of the state: the iterations converge to the square root.
#[test]
fn iterated_nonlinear_operator() {
    init_logger();
    let grid = StateGrid::new(2, 1);
    let operator = PixelOperator::new(FiniteDifference::new(|x: &[f64], _: &Metadata| x[0] * x[0]));
    let forecast = Estimate::from_information(
        DVector::from_vec(vec![1.5, 3.5]),
        block_diag(&[DMatrix::identity(2, 2) * 1e-6]).unwrap(),
    )
    .unwrap();
    let obs = band_obs(&[4.0, 9.0], &[true, true], 0.01, 0);
    let options = IterationOptions::builder()
        .max_iterations(25)
        .tolerance(1e-10)
        .build();

    let analysis = iterative_update(&grid, &forecast, &[obs], &operator, options).unwrap();
    assert!(analysis.converged);
    assert!(analysis.iterations > 1);
    assert_abs_diff_eq!(
        analysis.estimate.state,
        DVector::from_vec(vec![2.0, 3.0]),
        epsilon = 1e-4
    );
}

#[test]
fn iteration_budget_is_reported() {
    let grid = StateGrid::new(1, 1);
    let operator = PixelOperator::new(FiniteDifference::new(|x: &[f64], _: &Metadata| x[0] * x[0]));
    let forecast = scalar_estimate(10.0, 1e-6, MatrixForm::Information);
    let obs = band_obs(&[4.0], &[true], 0.01, 0);
    let options = IterationOptions::builder().max_iterations(2).build();

    let analysis = iterative_update(&grid, &forecast, &[obs], &operator, options).unwrap();
    assert!(!analysis.converged);
    assert_eq!(analysis.iterations, 2);
}

#[test]
fn mismatched_operator_is_rejected() {
    let grid = StateGrid::new(2, 1);
    let forecast = Estimate::from_covariance(
        DVector::zeros(2),
        block_diag(&[DMatrix::identity(2, 2)]).unwrap(),
    )
    .unwrap();
    let obs = band_obs(&[1.0, 2.0], &[true, true], 1.0, 0);
    // Operator built for a single valid pixel
    let lin = Linearization {
        predicted: DVector::zeros(1),
        jacobian: block_diag(&[DMatrix::identity(1, 1)]).unwrap(),
    };
    let err = linear_update(&grid, &forecast, &obs, &lin, LinearOptions::default()).unwrap_err();
    assert!(matches!(err, FilterError::ShapeMismatch { .. }), "{err}");

    let info = Estimate {
        form: MatrixForm::Information,
        ..forecast
    };
    let err = linear_update(&grid, &info, &obs, &lin, LinearOptions::default()).unwrap_err();
    assert_eq!(
        err,
        FilterError::WrongMatrixForm {
            expected: MatrixForm::Covariance,
            got: MatrixForm::Information
        }
    );
}
