/*
    Raster KF, a fast Kalman filter for raster time series
    Copyright (C) 2018-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::errors::{FilterError, NoTimestepsSnafu, StepSnafu, UnorderedTimestepsSnafu};
use crate::estimate::{Estimate, MatrixForm, StateGrid};
use crate::filter::{iterative_update, linear_update, Analysis};
use crate::io::output::OutputSink;
use crate::observation::{BandObservation, ObservationProvider};
use crate::operator::ObservationOperator;
use crate::propagation::StatePropagator;
use snafu::{ensure, ResultExt};
use std::fmt;

mod conf;
mod diagnostics;
mod report;

pub use conf::{FailurePolicy, RejectCriteria, RunConfig};
pub use diagnostics::{Diagnostics, LogDiagnostics};
pub use report::{RunSummary, StepReport};

/// The states of the filter process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    AwaitingTimestep,
    Forecasting,
    Assimilating,
    Done,
}

/// Outcome of the assimilation of all the acquisitions of one timestep.
struct Assimilated {
    estimate: Estimate,
    valid_pixels: usize,
    iterations: usize,
    converged: bool,
    outliers: usize,
}

/// A sequential filter over raster time series.
///
/// At each requested timestep, the previous analysis is propagated to a forecast (except at the
/// first timestep, where the prior is the forecast), every acquisition of that timestep is
/// assimilated in order, and the analysis is dumped to the output sink. Timesteps without any
/// acquisition use the forecast as the analysis.
///
/// The collaborators are borrowed for the duration of the process, and only ever see the running
/// estimate by reference.
pub struct FilterProcess<'a, T> {
    pub grid: StateGrid,
    pub config: RunConfig,
    observations: &'a dyn ObservationProvider<T>,
    operator: &'a dyn ObservationOperator,
    propagator: &'a dyn StatePropagator<T>,
    output: &'a mut dyn OutputSink<T>,
    diagnostics: Option<&'a mut dyn Diagnostics<T>>,
    state: EngineState,
}

impl<'a, T> FilterProcess<'a, T>
where
    T: Ord + Clone + fmt::Display + fmt::Debug,
{
    pub fn new(
        grid: StateGrid,
        config: RunConfig,
        observations: &'a dyn ObservationProvider<T>,
        operator: &'a dyn ObservationOperator,
        propagator: &'a dyn StatePropagator<T>,
        output: &'a mut dyn OutputSink<T>,
    ) -> Self {
        Self {
            grid,
            config,
            observations,
            operator,
            propagator,
            output,
            diagnostics: None,
            state: EngineState::AwaitingTimestep,
        }
    }

    /// Sets the diagnostics hooks called around each assimilation.
    pub fn with_diagnostics(mut self, diagnostics: &'a mut dyn Diagnostics<T>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, next: EngineState) {
        trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the filter from the prior over the provided timesteps, which must be strictly
    /// increasing. The prior must be in the form of the configured update: covariance for the
    /// linear update, information for the iterated update.
    pub fn run(
        &mut self,
        prior: Estimate,
        timesteps: &[T],
    ) -> Result<RunSummary<T>, FilterError> {
        ensure!(!timesteps.is_empty(), NoTimestepsSnafu);
        for (index, pair) in timesteps.windows(2).enumerate() {
            ensure!(
                pair[0] < pair[1],
                UnorderedTimestepsSnafu { index: index + 1 }
            );
        }
        prior.ensure_form(self.config.matrix_form())?;
        self.grid.check_state(&prior.state)?;
        self.grid.check_matrix(&prior.matrix)?;

        let num_steps = timesteps.len();
        info!(
            "Filtering {num_steps} timesteps ({} to {}) over {} with a {}",
            timesteps[0],
            timesteps[num_steps - 1],
            self.grid,
            self.config
        );

        let mut summary = RunSummary {
            steps: Vec::with_capacity(num_steps),
        };
        let mut reported = [false; 11];
        let mut current = prior;
        self.transition(EngineState::AwaitingTimestep);

        for (step, timestep) in timesteps.iter().enumerate() {
            self.transition(EngineState::Forecasting);
            let forecast = if step == 0 {
                current
            } else {
                debug!("time update {timestep}");
                match self
                    .propagator
                    .forecast(&self.grid, &current, timestep)
                    .context(StepSnafu {
                        timestep: timestep.to_string(),
                        band: None::<usize>,
                    }) {
                    Ok(forecast) => forecast,
                    Err(e) => {
                        error!("{e}");
                        self.transition(EngineState::Done);
                        return Err(e);
                    }
                }
            };

            let acquisitions = self.observations.acquisitions(timestep);
            let (analysis, report) = if acquisitions.is_empty() {
                debug!("no observation at {timestep}, forecast only");
                (forecast, StepReport::forecast_only(step, timestep.clone()))
            } else {
                self.transition(EngineState::Assimilating);
                debug!(
                    "measurement update {timestep}: {} acquisition(s)",
                    acquisitions.len()
                );
                match self.assimilate(timestep, &forecast, &acquisitions) {
                    Ok(done) => {
                        let report = StepReport {
                            index: step,
                            timestep: timestep.clone(),
                            assimilated: true,
                            acquisitions: acquisitions.len(),
                            valid_pixels: done.valid_pixels,
                            iterations: done.iterations,
                            converged: done.converged,
                            outliers: done.outliers,
                            failure: None,
                        };
                        (done.estimate, report)
                    }
                    Err(e) => match self.config.on_failure {
                        FailurePolicy::Abort => {
                            error!("{e}");
                            self.transition(EngineState::Done);
                            return Err(e);
                        }
                        FailurePolicy::UseForecast => {
                            warn!("{e} -- using the forecast as the analysis");
                            let mut report = StepReport::forecast_only(step, timestep.clone());
                            report.acquisitions = acquisitions.len();
                            report.failure = Some(e);
                            (forecast, report)
                        }
                    },
                }
            };

            let (p, p_inv) = match analysis.form {
                MatrixForm::Covariance => (Some(&analysis.matrix), None),
                MatrixForm::Information => (None, Some(&analysis.matrix)),
            };
            self.output.dump(step, timestep, &analysis.state, p, p_inv);
            summary.steps.push(report);

            let step_prct = (10.0 * ((step + 1) as f64) / (num_steps as f64)) as usize;
            if !reported[step_prct] {
                info!(
                    "{:>3}% done ({} timesteps processed, {} with observations)",
                    10 * step_prct,
                    step + 1,
                    summary.assimilated()
                );
                reported[step_prct] = true;
            }

            current = analysis;
            self.transition(EngineState::AwaitingTimestep);
        }

        self.transition(EngineState::Done);
        info!("{summary}");
        Ok(summary)
    }

    /// Assimilates every acquisition of this timestep in turn, starting from the forecast.
    fn assimilate(
        &mut self,
        timestep: &T,
        forecast: &Estimate,
        acquisitions: &[usize],
    ) -> Result<Assimilated, FilterError> {
        let mut outcome = Assimilated {
            estimate: forecast.clone(),
            valid_pixels: 0,
            iterations: 0,
            converged: true,
            outliers: 0,
        };

        for (acquisition, num_bands) in acquisitions.iter().enumerate() {
            let mut observations = (0..*num_bands)
                .map(|band| {
                    self.observations
                        .get_observations(timestep, acquisition, band)
                        .context(StepSnafu {
                            timestep: timestep.to_string(),
                            band: Some(band),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(diag) = self.diagnostics.as_mut() {
                diag.iteration_start(timestep, &outcome.estimate, &observations);
            }

            let mut passes = 0;
            let analysis = loop {
                let analysis = self.update(timestep, &outcome.estimate, &observations)?;
                if !self.config.is_robust {
                    break analysis;
                }
                let (flags, count) = self.flag_outliers(timestep, &analysis.estimate, &observations)?;
                if count == 0 {
                    break analysis;
                }
                if passes == self.config.robust.max_passes {
                    warn!(
                        "{timestep}: {count} outliers remain after {passes} re-assimilation(s)"
                    );
                    outcome.converged = false;
                    break analysis;
                }
                passes += 1;
                warn!("{timestep}: rejecting {count} outliers (pass {passes})");
                outcome.outliers += count;
                observations = observations
                    .iter()
                    .zip(flags.iter())
                    .map(|(obs, flags)| obs.without(flags))
                    .collect::<Result<Vec<_>, _>>()
                    .context(StepSnafu {
                        timestep: timestep.to_string(),
                        band: None::<usize>,
                    })?;
            };

            if let Some(diag) = self.diagnostics.as_mut() {
                diag.iteration_end(timestep, &analysis, &observations);
            }

            outcome.valid_pixels += observations.iter().map(|o| o.valid_count()).sum::<usize>();
            outcome.iterations += analysis.iterations;
            outcome.converged &= analysis.converged;
            outcome.estimate = analysis.estimate;
        }

        Ok(outcome)
    }

    /// Updates the estimate with all the bands of one acquisition.
    fn update(
        &self,
        timestep: &T,
        forecast: &Estimate,
        observations: &[BandObservation],
    ) -> Result<Analysis, FilterError> {
        if self.config.iter_obs_op {
            return iterative_update(
                &self.grid,
                forecast,
                observations,
                self.operator,
                self.config.iteration_options(),
            )
            .context(StepSnafu {
                timestep: timestep.to_string(),
                band: None::<usize>,
            });
        }

        // Bands are assimilated one after the other, each linearized at the latest estimate
        let mut estimate = forecast.clone();
        let mut innovations = Vec::with_capacity(observations.len());
        let mut iterations = 0;
        for obs in observations {
            let context = StepSnafu {
                timestep: timestep.to_string(),
                band: Some(obs.metadata.band),
            };
            let linearization = self
                .operator
                .linearize(&self.grid, &estimate.state, obs)
                .context(context.clone())?;
            let analysis = linear_update(
                &self.grid,
                &estimate,
                obs,
                &linearization,
                self.config.linear_options(),
            )
            .context(context)?;
            iterations = iterations.max(analysis.iterations);
            innovations.extend(analysis.innovations);
            estimate = analysis.estimate;
        }

        Ok(Analysis {
            estimate,
            innovations,
            iterations,
            converged: true,
        })
    }

    /// Flags the valid pixels of each band whose postfit residual ratio exceeds the threshold.
    fn flag_outliers(
        &self,
        timestep: &T,
        analysis: &Estimate,
        observations: &[BandObservation],
    ) -> Result<(Vec<Vec<bool>>, usize), FilterError> {
        let mut all_flags = Vec::with_capacity(observations.len());
        let mut count = 0;
        for obs in observations {
            let context = StepSnafu {
                timestep: timestep.to_string(),
                band: Some(obs.metadata.band),
            };
            let linearization = self
                .operator
                .linearize(&self.grid, &analysis.state, obs)
                .context(context.clone())?;
            let y = obs.reduced_values().context(context.clone())?;
            let sigmas = obs.noise.sigmas(&obs.mask).context(context)?;
            let flags = y
                .iter()
                .zip(linearization.predicted.iter())
                .zip(sigmas.iter())
                .map(|((y, h), sigma)| (y - h).abs() / sigma > self.config.robust.num_sigmas)
                .collect::<Vec<_>>();
            count += flags.iter().filter(|f| **f).count();
            all_flags.push(flags);
        }
        Ok((all_flags, count))
    }
}
