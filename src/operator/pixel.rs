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

use super::{assemble_jacobian, valid_pixels, Linearization, ObservationOperator};
use crate::errors::{FilterError, ShapeMismatchSnafu};
use crate::estimate::StateGrid;
use crate::linalg::DVector;
use crate::observation::{BandObservation, Metadata};
use rayon::prelude::*;
use snafu::ensure;

/// A forward model of a single pixel, such as an emulator of a radiative transfer model.
pub trait PixelModel: Send + Sync {
    /// Returns the predicted observation of a pixel with these parameters, and the gradient of
    /// that prediction with respect to each parameter.
    fn evaluate(&self, params: &[f64], metadata: &Metadata) -> Result<(f64, Vec<f64>), FilterError>;

    fn is_linear(&self) -> bool {
        false
    }
}

/// Observation operator evaluating a pixel model independently on every valid pixel.
///
/// Pixels are evaluated in parallel and the results are assembled in pixel order.
#[derive(Clone, Debug)]
pub struct PixelOperator<M: PixelModel> {
    pub model: M,
}

impl<M: PixelModel> PixelOperator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: PixelModel> ObservationOperator for PixelOperator<M> {
    fn is_linear(&self) -> bool {
        self.model.is_linear()
    }

    fn linearize(
        &self,
        grid: &StateGrid,
        x: &DVector<f64>,
        observation: &BandObservation,
    ) -> Result<Linearization, FilterError> {
        grid.check_state(x)?;
        grid.state_mask(&observation.mask)?;
        let n_params = grid.n_params();
        let pixels = valid_pixels(&observation.mask);
        let evaluations = pixels
            .par_iter()
            .map(|pixel| -> Result<(f64, Vec<f64>), FilterError> {
                let start = grid.index(*pixel, 0);
                let params = &x.as_slice()[start..start + n_params];
                let (value, gradient) = self.model.evaluate(params, &observation.metadata)?;
                ensure!(
                    gradient.len() == n_params,
                    ShapeMismatchSnafu {
                        what: "pixel model gradient length",
                        expected: n_params,
                        got: gradient.len()
                    }
                );
                Ok((value, gradient))
            })
            .collect::<Result<Vec<_>, FilterError>>()?;

        let predicted = DVector::from_iterator(pixels.len(), evaluations.iter().map(|(v, _)| *v));
        let gradients = evaluations
            .into_iter()
            .map(|(_, gradient)| gradient)
            .collect::<Vec<_>>();
        let lin = Linearization {
            predicted,
            jacobian: assemble_jacobian(&gradients, n_params),
        };
        lin.validate(pixels.len(), n_params)?;
        Ok(lin)
    }
}

/// A pixel model from a scalar forward function, whose gradient is computed with central
/// finite differences.
#[derive(Clone)]
pub struct FiniteDifference<F>
where
    F: Fn(&[f64], &Metadata) -> f64 + Send + Sync,
{
    func: F,
    /// Relative step, scaled by the magnitude of each parameter (at least one)
    pub step: f64,
}

impl<F> FiniteDifference<F>
where
    F: Fn(&[f64], &Metadata) -> f64 + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            step: f64::EPSILON.cbrt(),
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }
}

impl<F> PixelModel for FiniteDifference<F>
where
    F: Fn(&[f64], &Metadata) -> f64 + Send + Sync,
{
    fn evaluate(&self, params: &[f64], metadata: &Metadata) -> Result<(f64, Vec<f64>), FilterError> {
        let value = (self.func)(params, metadata);
        let mut perturbed = params.to_vec();
        let mut gradient = Vec::with_capacity(params.len());
        for j in 0..params.len() {
            let h = self.step * params[j].abs().max(1.0);
            perturbed[j] = params[j] + h;
            let plus = (self.func)(&perturbed, metadata);
            perturbed[j] = params[j] - h;
            let minus = (self.func)(&perturbed, metadata);
            perturbed[j] = params[j];
            gradient.push((plus - minus) / (2.0 * h));
        }
        Ok((value, gradient))
    }
}
