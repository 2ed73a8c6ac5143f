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
use crate::linalg::{CsrMatrix, DVector};
use crate::observation::{BandObservation, Metadata};
use snafu::ensure;

/// Observes one parameter of each pixel directly, e.g. a retrieved LAI product.
///
/// With a single parameter per pixel, this is the identity operator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityOperator {
    pub param: usize,
}

impl IdentityOperator {
    pub fn new(param: usize) -> Self {
        Self { param }
    }

    /// The reduced operator matrix for the valid pixels of this mask.
    pub fn operator_matrix(
        &self,
        grid: &StateGrid,
        mask: &[bool],
    ) -> Result<CsrMatrix<f64>, FilterError> {
        ensure!(
            self.param < grid.n_params(),
            ShapeMismatchSnafu {
                what: "observed parameter index",
                expected: grid.n_params(),
                got: self.param
            }
        );
        let mut gradient = vec![0.0; grid.n_params()];
        gradient[self.param] = 1.0;
        Ok(assemble_jacobian(
            &vec![gradient; valid_pixels(mask).len()],
            grid.n_params(),
        ))
    }
}

impl ObservationOperator for IdentityOperator {
    fn is_linear(&self) -> bool {
        true
    }

    fn linearize(
        &self,
        grid: &StateGrid,
        x: &DVector<f64>,
        observation: &BandObservation,
    ) -> Result<Linearization, FilterError> {
        grid.check_state(x)?;
        grid.state_mask(&observation.mask)?;
        let pixels = valid_pixels(&observation.mask);
        let jacobian = self.operator_matrix(grid, &observation.mask)?;
        let predicted = DVector::from_iterator(
            pixels.len(),
            pixels.iter().map(|p| x[grid.index(*p, self.param)]),
        );
        Ok(Linearization {
            predicted,
            jacobian,
        })
    }
}

/// Linear combination of the parameters of each pixel, plus an offset, e.g. the kernel weights
/// of a BRDF model turned into a band albedo.
///
/// Either one set of weights is used for every band, or one set per band (indexed by the band of
/// the observation metadata).
#[derive(Clone, Debug, PartialEq)]
pub struct LinearOperator {
    weights: Vec<Vec<f64>>,
    offsets: Vec<f64>,
}

impl LinearOperator {
    /// The same weights for all bands.
    pub fn uniform(weights: Vec<f64>) -> Self {
        Self {
            weights: vec![weights],
            offsets: vec![0.0],
        }
    }

    /// One set of weights per band.
    pub fn per_band(weights: Vec<Vec<f64>>) -> Self {
        let offsets = vec![0.0; weights.len()];
        Self { weights, offsets }
    }

    /// Sets the offsets of each band (or the single offset for uniform weights).
    pub fn with_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.offsets = offsets;
        self
    }

    fn band_weights(
        &self,
        grid: &StateGrid,
        metadata: &Metadata,
    ) -> Result<(&[f64], f64), FilterError> {
        let band = if self.weights.len() == 1 {
            0
        } else {
            metadata.band
        };
        ensure!(
            band < self.weights.len(),
            ShapeMismatchSnafu {
                what: "band index of linear operator",
                expected: self.weights.len(),
                got: band
            }
        );
        let weights = &self.weights[band];
        ensure!(
            weights.len() == grid.n_params(),
            ShapeMismatchSnafu {
                what: "linear operator weights",
                expected: grid.n_params(),
                got: weights.len()
            }
        );
        Ok((weights, self.offsets.get(band).copied().unwrap_or(0.0)))
    }

    /// The reduced operator matrix for the valid pixels of this mask.
    pub fn operator_matrix(
        &self,
        grid: &StateGrid,
        metadata: &Metadata,
        mask: &[bool],
    ) -> Result<CsrMatrix<f64>, FilterError> {
        let (weights, _) = self.band_weights(grid, metadata)?;
        Ok(assemble_jacobian(
            &vec![weights.to_vec(); valid_pixels(mask).len()],
            grid.n_params(),
        ))
    }
}

impl ObservationOperator for LinearOperator {
    fn is_linear(&self) -> bool {
        true
    }

    fn linearize(
        &self,
        grid: &StateGrid,
        x: &DVector<f64>,
        observation: &BandObservation,
    ) -> Result<Linearization, FilterError> {
        grid.check_state(x)?;
        grid.state_mask(&observation.mask)?;
        let (weights, offset) = self.band_weights(grid, &observation.metadata)?;
        let pixels = valid_pixels(&observation.mask);
        let predicted = DVector::from_iterator(
            pixels.len(),
            pixels.iter().map(|p| {
                weights
                    .iter()
                    .enumerate()
                    .map(|(j, w)| w * x[grid.index(*p, j)])
                    .sum::<f64>()
                    + offset
            }),
        );
        Ok(Linearization {
            predicted,
            jacobian: self.operator_matrix(grid, &observation.metadata, &observation.mask)?,
        })
    }
}
