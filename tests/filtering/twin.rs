extern crate raster_kf;

use super::run_filter;
use crate::band_obs;
use raster_kf::linalg::{DMatrix, DVector};
use raster_kf::prelude::*;
use raster_kf::utils::rms;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64Mcg;
use rstest::*;

const NUM_PIXELS: usize = 16;
const SIGMA: f64 = 0.005;

/// Saturating canopy response: the amplitude `a` is reached faster with a larger rate `b`, and
/// more so in the longer bands.
fn reflectance(params: &[f64], metadata: &Metadata) -> f64 {
    let g = 0.5 + metadata.band as f64;
    params[0] * (1.0 - (-params[1] * g).exp())
}

struct Saturating;

impl PixelModel for Saturating {
    fn evaluate(&self, params: &[f64], metadata: &Metadata) -> Result<(f64, Vec<f64>), FilterError> {
        let g = 0.5 + metadata.band as f64;
        let decay = (-params[1] * g).exp();
        Ok((
            params[0] * (1.0 - decay),
            vec![1.0 - decay, params[0] * g * decay],
        ))
    }
}

struct Twin {
    grid: StateGrid,
    truth: Vec<DVector<f64>>,
    observations: MemoryObservations<i32>,
}

/// Simulates three cloudy bands at every timestep but the first, over a constant truth.
fn twin_experiment(seed: u64) -> Twin {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let noise = Normal::new(0.0, SIGMA).unwrap();
    let grid = StateGrid::new(NUM_PIXELS, 2);
    let truth = vec![
        DVector::from_fn(NUM_PIXELS, |_, _| rng.gen_range(0.4..0.6)),
        DVector::from_fn(NUM_PIXELS, |_, _| rng.gen_range(0.8..1.2)),
    ];

    let mut observations = MemoryObservations::new(NUM_PIXELS);
    for timestep in 1..10 {
        let bands = (0..3)
            .map(|band| {
                let metadata = Metadata::for_band(band);
                let mask = (0..NUM_PIXELS)
                    .map(|_| rng.gen_bool(0.8))
                    .collect::<Vec<_>>();
                let values = (0..NUM_PIXELS)
                    .map(|p| {
                        if mask[p] {
                            reflectance(&[truth[0][p], truth[1][p]], &metadata)
                                + noise.sample(&mut rng)
                        } else {
                            f64::NAN
                        }
                    })
                    .collect::<Vec<_>>();
                band_obs(&values, &mask, SIGMA, band)
            })
            .collect();
        observations.add_acquisition(timestep, bands).unwrap();
    }

    Twin {
        grid,
        truth,
        observations,
    }
}

fn twin_prior() -> PixelPrior {
    PixelPrior::new(
        DVector::from_vec(vec![0.5, 1.0]),
        DMatrix::from_diagonal(&DVector::from_vec(vec![0.04, 0.25])),
    )
    .unwrap()
}

fn check_retrieval(twin: &Twin, out: &MemoryOutput<i32>, max_rms: [f64; 2], num_sigmas: f64) {
    let last = out.last().unwrap();
    let variances = last.variances.as_ref().unwrap();
    for param in 0..2 {
        let error = &last.parameters[param] - &twin.truth[param];
        println!("parameter {param}: RMS error {:.3e}", rms(&error));
        assert!(rms(&error) < max_rms[param]);
        for (err, var) in error.iter().zip(variances[param].iter()) {
            assert!(
                err.abs() <= num_sigmas * var.sqrt(),
                "{err:.3e} beyond {num_sigmas} sigmas ({:.3e})",
                var.sqrt()
            );
        }
    }
}

#[rstest]
#[case(7)]
#[case(2024)]
fn iterated_retrieval(#[case] seed: u64) {
    let twin = twin_experiment(seed);
    let operator = PixelOperator::new(FiniteDifference::new(reflectance));
    let config = RunConfig::builder()
        .iter_obs_op(true)
        .max_iterations(20)
        .build();
    let timesteps = (0..10).collect::<Vec<i32>>();

    let (result, out) = run_filter(
        &twin.grid,
        config,
        &twin.observations,
        &operator,
        &LinearPropagator::default(),
        &twin_prior(),
        &timesteps,
    );
    let summary = result.unwrap();
    println!("{summary}");
    assert_eq!(summary.assimilated(), 9);
    assert!(summary.all_converged());
    assert!(summary.steps[1].iterations > 1);
    check_retrieval(&twin, &out, [0.01, 0.05], 5.0);
}

#[test]
fn sequential_retrieval() {
    let twin = twin_experiment(7);
    let operator = PixelOperator::new(Saturating);
    let timesteps = (0..10).collect::<Vec<i32>>();

    let (result, out) = run_filter(
        &twin.grid,
        RunConfig::default(),
        &twin.observations,
        &operator,
        &LinearPropagator::persistence(ProcessNoise::PerParameter(vec![1e-6, 1e-5])),
        &twin_prior(),
        &timesteps,
    );
    let summary = result.unwrap();
    assert_eq!(summary.assimilated(), 9);
    check_retrieval(&twin, &out, [0.03, 0.15], f64::INFINITY);
}
