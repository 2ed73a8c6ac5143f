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

use crate::errors::{FilterError, NonPositiveVarianceSnafu, ShapeMismatchSnafu};
use crate::estimate::MatrixForm;
use crate::linalg::{CsrMatrix, DVector};
use crate::sparse::{
    count_valid, dense_inverse, diagonal, diagonal_matrix, from_dense, invert_blocks, Squeeze,
};
use serde_derive::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::BTreeMap;
use std::fmt;

mod memory;
pub use memory::MemoryObservations;

/// Sun and view geometry of an acquisition, in degrees.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub sza: f64,
    pub saa: f64,
    pub vza: f64,
    pub vaa: f64,
}

impl Geometry {
    /// Relative azimuth angle
    pub fn raa(&self) -> f64 {
        self.vaa - self.saa
    }
}

/// Opaque context of one band of one acquisition, passed through to the observation operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub band: usize,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    /// Operator specific values (e.g. band pass weights, emulator keys)
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl Metadata {
    pub fn for_band(band: usize) -> Self {
        Self {
            band,
            ..Default::default()
        }
    }
}

/// Uncertainty of an observation, stored as a sparse diagonal (or block diagonal) matrix of
/// variances (covariance form) or inverse variances (information form).
///
/// It is either defined over the full grid (one row per pixel, masked out pixels are ignored) or
/// already reduced to the valid pixels of the observation mask.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationNoise {
    pub matrix: CsrMatrix<f64>,
    pub form: MatrixForm,
}

impl ObservationNoise {
    /// Builds the reduced noise from the per-pixel standard deviation of the full grid.
    pub fn from_sigma(sigma: &DVector<f64>, mask: &[bool]) -> Result<Self, FilterError> {
        ensure!(
            sigma.len() == mask.len(),
            ShapeMismatchSnafu {
                what: "observation sigma length",
                expected: mask.len(),
                got: sigma.len()
            }
        );
        let variances = sigma.component_mul(sigma).squeeze(Some(mask))?;
        Self::from_variances(variances)
    }

    /// Builds the noise from the diagonal of variances.
    pub fn from_variances(variances: DVector<f64>) -> Result<Self, FilterError> {
        check_positive(&variances)?;
        Ok(Self {
            matrix: diagonal_matrix(&variances),
            form: MatrixForm::Covariance,
        })
    }

    /// Builds the noise from the diagonal of inverse variances (e.g. a precision raster).
    pub fn from_inverse_variances(inverse_variances: DVector<f64>) -> Result<Self, FilterError> {
        check_positive(&inverse_variances)?;
        Ok(Self {
            matrix: diagonal_matrix(&inverse_variances),
            form: MatrixForm::Information,
        })
    }

    /// Returns this noise matrix on the reduced space of the mask.
    pub fn reduced(&self, mask: &[bool]) -> Result<CsrMatrix<f64>, FilterError> {
        let valid = count_valid(mask);
        let dim = self.matrix.nrows();
        if dim == valid && self.matrix.ncols() == valid {
            Ok(self.matrix.clone())
        } else if dim == mask.len() {
            self.matrix.squeeze(Some(mask))
        } else {
            ShapeMismatchSnafu {
                what: "observation noise dimension",
                expected: valid,
                got: dim,
            }
            .fail()
        }
    }

    fn reduced_in_form(
        &self,
        mask: &[bool],
        form: MatrixForm,
    ) -> Result<CsrMatrix<f64>, FilterError> {
        let reduced = self.reduced(mask)?;
        if self.form == form {
            return Ok(reduced);
        }
        match invert_blocks(&reduced, 1) {
            Err(FilterError::NotBlockDiagonal { .. }) => {
                Ok(from_dense(&dense_inverse(&reduced)?))
            }
            other => other,
        }
    }

    /// Reduced observation covariance `R`.
    pub fn covariance(&self, mask: &[bool]) -> Result<CsrMatrix<f64>, FilterError> {
        self.reduced_in_form(mask, MatrixForm::Covariance)
    }

    /// Reduced observation information `R^-1`.
    pub fn information(&self, mask: &[bool]) -> Result<CsrMatrix<f64>, FilterError> {
        self.reduced_in_form(mask, MatrixForm::Information)
    }

    /// Reduced standard deviations, one per valid pixel.
    pub fn sigmas(&self, mask: &[bool]) -> Result<DVector<f64>, FilterError> {
        Ok(diagonal(&self.covariance(mask)?).map(|v| v.max(0.0).sqrt()))
    }
}

fn check_positive(values: &DVector<f64>) -> Result<(), FilterError> {
    for (index, value) in values.iter().enumerate() {
        ensure!(
            *value > 0.0 && value.is_finite(),
            NonPositiveVarianceSnafu {
                index,
                value: *value
            }
        );
    }
    Ok(())
}

/// One band of one acquisition over the full grid.
#[derive(Clone, Debug, PartialEq)]
pub struct BandObservation {
    /// One value per pixel, values of masked out pixels are ignored (and may be NaN).
    pub values: DVector<f64>,
    /// One flag per pixel, true when the observation of that pixel is valid.
    pub mask: Vec<bool>,
    pub noise: ObservationNoise,
    pub metadata: Metadata,
}

impl BandObservation {
    pub fn new(
        values: DVector<f64>,
        mask: Vec<bool>,
        noise: ObservationNoise,
        metadata: Metadata,
    ) -> Result<Self, FilterError> {
        ensure!(
            values.len() == mask.len(),
            ShapeMismatchSnafu {
                what: "observation length versus mask",
                expected: mask.len(),
                got: values.len()
            }
        );
        // Ensures that the noise can be reduced with this mask
        noise.reduced(&mask)?;
        for (index, (value, valid)) in values.iter().zip(mask.iter()).enumerate() {
            if *valid && !value.is_finite() {
                return Err(FilterError::InvalidObservation {
                    index,
                    value: *value,
                });
            }
        }
        Ok(Self {
            values,
            mask,
            noise,
            metadata,
        })
    }

    pub fn n_pixels(&self) -> usize {
        self.mask.len()
    }

    /// Number of valid pixels, i.e. the dimension of the reduced space.
    pub fn valid_count(&self) -> usize {
        count_valid(&self.mask)
    }

    /// Observed values of the valid pixels only.
    pub fn reduced_values(&self) -> Result<DVector<f64>, FilterError> {
        self.values.squeeze(Some(&self.mask[..]))
    }

    /// Returns a copy of this observation where the flagged pixels are masked out.
    ///
    /// `outliers` is defined over the valid pixels (reduced space) of the current mask.
    pub fn without(&self, outliers: &[bool]) -> Result<Self, FilterError> {
        ensure!(
            outliers.len() == self.valid_count(),
            ShapeMismatchSnafu {
                what: "outlier flags length",
                expected: self.valid_count(),
                got: outliers.len()
            }
        );
        let keep = outliers.iter().map(|o| !o).collect::<Vec<_>>();
        let mut mask = self.mask.clone();
        let valid_pixels = self
            .mask
            .iter()
            .enumerate()
            .filter_map(|(i, valid)| valid.then_some(i));
        for (pixel, keep) in valid_pixels.zip(keep.iter()) {
            mask[pixel] = *keep;
        }
        let noise = if self.noise.matrix.nrows() == self.n_pixels() {
            self.noise.clone()
        } else {
            ObservationNoise {
                matrix: self.noise.matrix.squeeze(Some(&keep[..]))?,
                form: self.noise.form,
            }
        };
        Ok(Self {
            values: self.values.clone(),
            mask,
            noise,
            metadata: self.metadata.clone(),
        })
    }
}

impl fmt::Display for BandObservation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "band {} with {} valid pixels out of {}",
            self.metadata.band,
            self.valid_count(),
            self.n_pixels()
        )
    }
}

/// Provides the observations of each timestep to the filter.
///
/// A timestep may hold several acquisitions (e.g. two overpasses on the same day), and each
/// acquisition several bands. The filter requests every band of every acquisition in order.
pub trait ObservationProvider<T> {
    /// Number of bands of each acquisition available at this timestep, empty if there are none.
    fn acquisitions(&self, timestep: &T) -> Vec<usize>;

    /// Returns one band of one acquisition of this timestep.
    fn get_observations(
        &self,
        timestep: &T,
        acquisition: usize,
        band: usize,
    ) -> Result<BandObservation, FilterError>;
}
