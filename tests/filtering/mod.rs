extern crate raster_kf;

use crate::{band_obs, init_logger};
use approx::assert_abs_diff_eq;
use raster_kf::linalg::{DMatrix, DVector};
use raster_kf::prelude::*;
use raster_kf::time::{Epoch, Unit};
use raster_kf::utils::time_grid;
use rstest::*;

mod robust;
mod twin;

/// Runs the filter from the pixel prior and returns the run result with everything it dumped.
fn run_filter(
    grid: &StateGrid,
    config: RunConfig,
    observations: &dyn ObservationProvider<i32>,
    operator: &dyn ObservationOperator,
    propagator: &dyn StatePropagator<i32>,
    prior: &PixelPrior,
    timesteps: &[i32],
) -> (Result<RunSummary<i32>, FilterError>, MemoryOutput<i32>) {
    init_logger();
    let prior = prior
        .process_prior(None::<&i32>, grid, config.matrix_form())
        .unwrap();
    let mut output = MemoryOutput::new(grid.clone());
    let mut kf = FilterProcess::new(
        grid.clone(),
        config,
        observations,
        operator,
        propagator,
        &mut output,
    );
    let result = kf.run(prior, timesteps);
    if matches!(result, Ok(_) | Err(FilterError::Step { .. })) {
        assert_eq!(kf.state(), EngineState::Done);
    }
    (result, output)
}

fn two_param_prior() -> PixelPrior {
    PixelPrior::new(
        DVector::from_vec(vec![1.0, 2.0]),
        DMatrix::from_diagonal(&DVector::from_vec(vec![0.1, 0.2])),
    )
    .unwrap()
}

#[test]
fn without_observations_the_prior_persists() {
    let grid = StateGrid::new(4, 2);
    let obs = MemoryObservations::<i32>::new(4);
    let propagator = LinearPropagator::persistence(ProcessNoise::zero());
    let timesteps = (0..5).collect::<Vec<i32>>();

    let (summary, out) = run_filter(
        &grid,
        RunConfig::default(),
        &obs,
        &IdentityOperator::new(0),
        &propagator,
        &two_param_prior(),
        &timesteps,
    );
    let summary = summary.unwrap();
    assert_eq!(summary.steps.len(), 5);
    assert_eq!(summary.assimilated(), 0);
    assert!(summary.all_converged());

    assert_eq!(out.records.len(), 5);
    for (step, record) in out.records.iter().enumerate() {
        assert_eq!(record.step, step);
        assert_eq!(record.timestep, step as i32);
        assert_eq!(record.parameters[0], DVector::from_element(4, 1.0));
        assert_eq!(record.parameters[1], DVector::from_element(4, 2.0));
        let variances = record.variances.as_ref().unwrap();
        assert_eq!(variances[0], DVector::from_element(4, 0.1));
        assert_eq!(variances[1], DVector::from_element(4, 0.2));
    }
}

#[test]
fn process_noise_inflates_the_variance() {
    let grid = StateGrid::new(3, 2);
    let obs = MemoryObservations::<i32>::new(3);
    let propagator = LinearPropagator::persistence(ProcessNoise::PerParameter(vec![0.01, 0.0]));

    let (summary, out) = run_filter(
        &grid,
        RunConfig::default(),
        &obs,
        &IdentityOperator::new(0),
        &propagator,
        &two_param_prior(),
        &[0, 1, 2, 3, 4],
    );
    summary.unwrap();
    let variances = out.last().unwrap().variances.as_ref().unwrap();
    assert_abs_diff_eq!(variances[0], DVector::from_element(3, 0.14), epsilon = 1e-12);
    assert_abs_diff_eq!(variances[1], DVector::from_element(3, 0.2), epsilon = 1e-12);
}

#[rstest]
#[case(false)]
#[case(true)]
fn trajectory_model_decays_the_state(#[case] iter_obs_op: bool) {
    let grid = StateGrid::new(2, 2);
    let obs = MemoryObservations::<i32>::new(2);
    let decay = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 1.0]);
    let propagator = LinearPropagator::new(TrajectoryModel::PerPixel(decay), ProcessNoise::zero());
    let config = RunConfig::builder().iter_obs_op(iter_obs_op).build();

    let (summary, out) = run_filter(
        &grid,
        config,
        &obs,
        &IdentityOperator::new(0),
        &propagator,
        &two_param_prior(),
        &[0, 1, 2],
    );
    summary.unwrap();
    let series = out.series(1, 0);
    assert_eq!(series.len(), 3);
    for ((timestep, value), expected) in series.iter().zip([1.0, 0.5, 0.25]) {
        assert_abs_diff_eq!(*value, expected, epsilon = 1e-12);
        let variance = out.records[*timestep as usize].variances.as_ref().unwrap()[0][1];
        assert_abs_diff_eq!(variance, 0.1 * expected * expected, epsilon = 1e-12);
    }
    assert_eq!(out.series(0, 1), vec![(0, 2.0), (1, 2.0), (2, 2.0)]);
}

#[test]
fn timesteps_are_validated() {
    let grid = StateGrid::new(2, 2);
    let obs = MemoryObservations::<i32>::new(2);
    let propagator = LinearPropagator::default();
    let operator = IdentityOperator::new(0);
    let prior = two_param_prior();

    let cases: [(&[i32], FilterError); 3] = [
        (&[], FilterError::NoTimesteps),
        (&[0, 2, 1], FilterError::UnorderedTimesteps { index: 2 }),
        (&[3, 3], FilterError::UnorderedTimesteps { index: 1 }),
    ];
    for (timesteps, expected) in cases {
        let (result, out) = run_filter(
            &grid,
            RunConfig::default(),
            &obs,
            &operator,
            &propagator,
            &prior,
            timesteps,
        );
        assert_eq!(result.unwrap_err(), expected);
        assert!(out.records.is_empty());
    }
}

#[test]
fn prior_form_must_match_the_update() {
    let grid = StateGrid::new(2, 2);
    let obs = MemoryObservations::<i32>::new(2);
    let propagator = LinearPropagator::default();
    let operator = IdentityOperator::new(0);
    let prior = two_param_prior()
        .process_prior(None::<&i32>, &grid, MatrixForm::Covariance)
        .unwrap();
    let mut output = MemoryOutput::new(grid.clone());
    let config = RunConfig::builder().iter_obs_op(true).build();
    let mut kf = FilterProcess::new(grid, config, &obs, &operator, &propagator, &mut output);

    assert_eq!(
        kf.run(prior, &[0, 1]).unwrap_err(),
        FilterError::WrongMatrixForm {
            expected: MatrixForm::Information,
            got: MatrixForm::Covariance
        }
    );
    assert_eq!(kf.state(), EngineState::AwaitingTimestep);
}

/// Claims one single band acquisition at timestep 2, which can never be read.
struct CorruptTile;

impl ObservationProvider<i32> for CorruptTile {
    fn acquisitions(&self, timestep: &i32) -> Vec<usize> {
        if *timestep == 2 {
            vec![1]
        } else {
            Vec::new()
        }
    }

    fn get_observations(
        &self,
        _timestep: &i32,
        _acquisition: usize,
        _band: usize,
    ) -> Result<BandObservation, FilterError> {
        Err(FilterError::ExternalSource {
            action: "reading the tile",
            msg: "truncated file".to_string(),
        })
    }
}

#[test]
fn failure_aborts_the_run() {
    let grid = StateGrid::new(2, 2);
    let propagator = LinearPropagator::default();

    let (result, out) = run_filter(
        &grid,
        RunConfig::default(),
        &CorruptTile,
        &IdentityOperator::new(0),
        &propagator,
        &two_param_prior(),
        &[0, 1, 2, 3],
    );
    match result.unwrap_err() {
        FilterError::Step {
            timestep,
            band,
            source,
            ..
        } => {
            assert_eq!(timestep, "2");
            assert_eq!(band, Some(0));
            assert!(matches!(*source, FilterError::ExternalSource { .. }));
        }
        e => panic!("unexpected error {e}"),
    }
    // Only the timesteps before the failure were dumped
    assert_eq!(out.records.len(), 2);
}

/// Forecasts until timestep 2, where the trajectory model cannot be evaluated.
struct BrokenModel;

impl StatePropagator<i32> for BrokenModel {
    fn forecast(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
        timestep: &i32,
    ) -> Result<Estimate, FilterError> {
        if *timestep == 2 {
            Err(FilterError::ExternalSource {
                action: "evaluating the trajectory model",
                msg: "missing driver data".to_string(),
            })
        } else {
            LinearPropagator::default().forecast(grid, analysis, timestep)
        }
    }
}

#[test]
fn forecast_failure_ends_the_run() {
    let grid = StateGrid::new(2, 2);
    let obs = MemoryObservations::<i32>::new(2);

    // Propagation errors are not covered by the failure policy
    let config = RunConfig::builder()
        .on_failure(FailurePolicy::UseForecast)
        .build();
    let (result, out) = run_filter(
        &grid,
        config,
        &obs,
        &IdentityOperator::new(0),
        &BrokenModel,
        &two_param_prior(),
        &[0, 1, 2, 3],
    );
    match result.unwrap_err() {
        FilterError::Step {
            timestep,
            band,
            source,
            ..
        } => {
            assert_eq!(timestep, "2");
            assert_eq!(band, None);
            assert!(matches!(*source, FilterError::ExternalSource { .. }));
        }
        e => panic!("unexpected error {e}"),
    }
    assert_eq!(out.records.len(), 2);
}

#[test]
fn failure_falls_back_to_the_forecast() {
    let grid = StateGrid::new(2, 2);
    let propagator = LinearPropagator::default();
    let config = RunConfig::builder()
        .on_failure(FailurePolicy::UseForecast)
        .build();

    let (result, out) = run_filter(
        &grid,
        config,
        &CorruptTile,
        &IdentityOperator::new(0),
        &propagator,
        &two_param_prior(),
        &[0, 1, 2, 3],
    );
    let summary = result.unwrap();
    assert_eq!(summary.failures().count(), 1);
    let failed = &summary.steps[2];
    assert!(!failed.assimilated);
    assert_eq!(failed.acquisitions, 1);
    assert!(failed.failure.is_some());
    assert_eq!(out.records.len(), 4);
    assert_eq!(out.records[2].parameters, out.records[1].parameters);
}

fn multi_band_observations() -> MemoryObservations<i32> {
    let mut obs = MemoryObservations::new(2);
    obs.add_acquisition(
        1,
        vec![
            band_obs(&[2.0, 2.0], &[true, true], 1.0, 0),
            band_obs(&[4.0, 4.0], &[true, true], 1.0, 1),
        ],
    )
    .unwrap();
    obs.add_acquisition(3, vec![band_obs(&[1.0, 1.0], &[true, true], 1.0, 0)])
        .unwrap();
    obs.add_acquisition(3, vec![band_obs(&[1.0, 1.0], &[true, true], 1.0, 0)])
        .unwrap();
    obs
}

fn unit_prior() -> PixelPrior {
    PixelPrior::new(DVector::zeros(2), DMatrix::identity(2, 2)).unwrap()
}

#[rstest]
#[case(false)]
#[case(true)]
fn bands_and_acquisitions_are_all_assimilated(#[case] iter_obs_op: bool) {
    let grid = StateGrid::new(2, 2);
    let obs = multi_band_observations();
    assert_eq!(obs.len(), 3);
    assert_eq!(obs.timesteps(), vec![1, 3]);
    // Band 0 observes the first parameter, band 1 the second one
    let operator = LinearOperator::per_band(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let propagator = LinearPropagator::default();
    let config = RunConfig::builder().iter_obs_op(iter_obs_op).build();

    let (result, out) = run_filter(
        &grid,
        config,
        &obs,
        &operator,
        &propagator,
        &unit_prior(),
        &[0, 1, 2, 3],
    );
    let summary = result.unwrap();
    assert_eq!(summary.assimilated(), 2);
    assert!(summary.all_converged());
    assert_eq!(summary.steps[1].acquisitions, 1);
    assert_eq!(summary.steps[1].valid_pixels, 4);
    assert!(!summary.steps[2].assimilated);
    assert_eq!(summary.steps[3].acquisitions, 2);
    assert_eq!(summary.steps[3].valid_pixels, 4);

    let after_first = &out.records[1];
    assert_abs_diff_eq!(after_first.parameters[0], DVector::from_element(2, 1.0), epsilon = 1e-12);
    assert_abs_diff_eq!(after_first.parameters[1], DVector::from_element(2, 2.0), epsilon = 1e-12);

    let last = out.last().unwrap();
    assert_abs_diff_eq!(last.parameters[0], DVector::from_element(2, 1.0), epsilon = 1e-12);
    assert_abs_diff_eq!(last.parameters[1], DVector::from_element(2, 2.0), epsilon = 1e-12);
    let variances = last.variances.as_ref().unwrap();
    assert_abs_diff_eq!(variances[0], DVector::from_element(2, 0.25), epsilon = 1e-12);
    assert_abs_diff_eq!(variances[1], DVector::from_element(2, 0.5), epsilon = 1e-12);
}

#[derive(Default)]
struct CountingHooks {
    starts: usize,
    ends: usize,
    bands: usize,
}

impl Diagnostics<i32> for CountingHooks {
    fn iteration_start(&mut self, _: &i32, forecast: &Estimate, observations: &[BandObservation]) {
        assert_eq!(forecast.dim(), 4);
        self.starts += 1;
        self.bands += observations.len();
    }

    fn iteration_end(&mut self, _: &i32, analysis: &Analysis, observations: &[BandObservation]) {
        assert_eq!(analysis.innovations.len(), observations.len());
        self.ends += 1;
    }
}

#[test]
fn diagnostics_see_every_acquisition() {
    init_logger();
    let grid = StateGrid::new(2, 2);
    let obs = multi_band_observations();
    let operator = LinearOperator::per_band(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let propagator = LinearPropagator::default();
    let prior = unit_prior()
        .process_prior(None::<&i32>, &grid, MatrixForm::Covariance)
        .unwrap();

    let mut hooks = CountingHooks::default();
    let mut output = MemoryOutput::new(grid.clone());
    FilterProcess::new(
        grid.clone(),
        RunConfig::default(),
        &obs,
        &operator,
        &propagator,
        &mut output,
    )
    .with_diagnostics(&mut hooks)
    .run(prior.clone(), &[0, 1, 2, 3])
    .unwrap();
    assert_eq!(hooks.starts, 3);
    assert_eq!(hooks.ends, 3);
    assert_eq!(hooks.bands, 4);

    let mut logger = LogDiagnostics;
    let mut output = MemoryOutput::new(grid.clone());
    FilterProcess::new(
        grid,
        RunConfig::default(),
        &obs,
        &operator,
        &propagator,
        &mut output,
    )
    .with_diagnostics(&mut logger)
    .run(prior, &[1, 3])
    .unwrap();
    assert_eq!(output.records.len(), 2);
}

#[test]
fn prior_reset_forgets_the_analysis() {
    let grid = StateGrid::new(2, 2);
    let obs = multi_band_observations();
    let operator = LinearOperator::per_band(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let prior = unit_prior();
    let propagator = PriorReset::<i32>::new(&prior);

    let (result, out) = run_filter(
        &grid,
        RunConfig::default(),
        &obs,
        &operator,
        &propagator,
        &prior,
        &[0, 1, 2],
    );
    result.unwrap();
    assert_abs_diff_eq!(out.records[1].parameters[0], DVector::from_element(2, 1.0), epsilon = 1e-12);
    assert_eq!(out.records[2].parameters[0], DVector::zeros(2));
    assert_eq!(
        out.records[2].variances.as_ref().unwrap()[1],
        DVector::from_element(2, 1.0)
    );
}

#[test]
fn epochs_as_timesteps() {
    init_logger();
    let start = Epoch::from_gregorian_utc_at_midnight(2020, 1, 1);
    let timesteps = time_grid(start, start + 32 * Unit::Day, 16 * Unit::Day);
    assert_eq!(timesteps.len(), 3);

    let grid = StateGrid::new(3, 1);
    let mut obs = MemoryObservations::new(3);
    obs.add_acquisition(
        timesteps[1],
        vec![band_obs(&[0.3, f64::NAN, 0.5], &[true, false, true], 0.05, 0)],
    )
    .unwrap();
    let prior = PixelPrior::new(DVector::from_element(1, 0.4), DMatrix::from_element(1, 1, 0.01))
        .unwrap();
    let operator = IdentityOperator::new(0);
    let propagator = LinearPropagator::persistence(ProcessNoise::Scalar(1e-4));
    let config = RunConfig::loads("approx_diagonal: false\n").unwrap();
    let estimate = prior
        .process_prior(None::<&Epoch>, &grid, config.matrix_form())
        .unwrap();

    let mut output = MemoryOutput::new(grid.clone());
    let summary = FilterProcess::new(grid, config, &obs, &operator, &propagator, &mut output)
        .run(estimate, &timesteps)
        .unwrap();
    assert_eq!(summary.assimilated(), 1);
    assert_eq!(summary.steps[1].timestep, timesteps[1]);

    let analysis = &output.records[1].parameters[0];
    assert!(analysis[0] < 0.4 && analysis[0] > 0.3);
    assert!(analysis[2] > 0.4 && analysis[2] < 0.5);
    assert_abs_diff_eq!(analysis[1], 0.4, epsilon = 1e-12);
}
