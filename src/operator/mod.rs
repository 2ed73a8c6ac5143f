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

use crate::errors::{FilterError, ShapeMismatchSnafu};
use crate::estimate::StateGrid;
use crate::linalg::{CooMatrix, CsrMatrix, DVector};
use crate::observation::BandObservation;
use crate::sparse::first_non_finite;
use crate::utils::check_operator_output;
use snafu::ensure;

mod linear;
mod pixel;

pub use linear::{IdentityOperator, LinearOperator};
pub use pixel::{FiniteDifference, PixelModel, PixelOperator};

/// Output of an observation operator evaluated at a given state, over the valid pixels only.
#[derive(Clone, Debug, PartialEq)]
pub struct Linearization {
    /// Predicted observation `h(x)` of each valid pixel.
    pub predicted: DVector<f64>,
    /// Jacobian `H` of the prediction with respect to the reduced state (the state entries of
    /// the valid pixels, interleaved). Its shape is `valid x (valid * n_params)`.
    pub jacobian: CsrMatrix<f64>,
}

impl Linearization {
    /// Checks the dimensions against the mask, and rejects any non finite value.
    pub fn validate(&self, valid: usize, n_params: usize) -> Result<(), FilterError> {
        ensure!(
            self.predicted.len() == valid,
            ShapeMismatchSnafu {
                what: "predicted observation length",
                expected: valid,
                got: self.predicted.len()
            }
        );
        ensure!(
            self.jacobian.nrows() == valid,
            ShapeMismatchSnafu {
                what: "observation operator rows",
                expected: valid,
                got: self.jacobian.nrows()
            }
        );
        ensure!(
            self.jacobian.ncols() == valid * n_params,
            ShapeMismatchSnafu {
                what: "observation operator columns",
                expected: valid * n_params,
                got: self.jacobian.ncols()
            }
        );
        check_operator_output(&self.predicted)?;
        if let Some((index, value)) = first_non_finite(&self.jacobian) {
            return Err(FilterError::InvalidOperatorOutput { index, value });
        }
        Ok(())
    }
}

/// Maps the per-pixel state to the observation of one band.
///
/// Implementations must be deterministic: the same state and observation metadata always yield
/// the same linearization. The filter calls `linearize` once per band per iteration.
pub trait ObservationOperator: Send + Sync {
    /// Whether the operator is linear in the state, in which case iterating is pointless.
    fn is_linear(&self) -> bool {
        false
    }

    /// Evaluates the operator and its Jacobian at the full state `x`, for the valid pixels of
    /// the observation mask.
    fn linearize(
        &self,
        grid: &StateGrid,
        x: &DVector<f64>,
        observation: &BandObservation,
    ) -> Result<Linearization, FilterError>;
}

/// Indices of the valid pixels of a mask.
pub(crate) fn valid_pixels(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, valid)| valid.then_some(i))
        .collect()
}

/// Assembles the reduced Jacobian from one gradient per valid pixel (block diagonal by rows).
pub(crate) fn assemble_jacobian(gradients: &[Vec<f64>], n_params: usize) -> CsrMatrix<f64> {
    let valid = gradients.len();
    let mut coo = CooMatrix::new(valid, valid * n_params);
    for (row, gradient) in gradients.iter().enumerate() {
        for (param, v) in gradient.iter().enumerate() {
            if *v != 0.0 {
                coo.push(row, row * n_params + param, *v);
            }
        }
    }
    CsrMatrix::from(&coo)
}
