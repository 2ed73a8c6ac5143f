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

use crate::errors::{FilterError, ShapeMismatchSnafu, SingularMatrixSnafu};
use crate::estimate::{Estimate, MatrixForm, StateGrid};
use crate::io::{ConfigError, ConfigRepr, InvalidConfigSnafu};
use crate::linalg::{DMatrix, DVector};
use crate::sparse::block_diag;
use serde_derive::{Deserialize, Serialize};
use snafu::ensure;

/// Provides the prior estimate of the state, at the start of a run or at a given timestep.
pub trait PriorProvider<T> {
    fn process_prior(
        &self,
        timestep: Option<&T>,
        grid: &StateGrid,
        form: MatrixForm,
    ) -> Result<Estimate, FilterError>;
}

/// A prior shared by every pixel: one mean and one covariance per pixel, without any correlation
/// between pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelPrior {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl PixelPrior {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self, FilterError> {
        ensure!(
            covariance.nrows() == mean.len() && covariance.ncols() == mean.len(),
            ShapeMismatchSnafu {
                what: "pixel prior covariance dimension",
                expected: mean.len(),
                got: covariance.nrows()
            }
        );
        ensure!(
            covariance.clone().cholesky().is_some(),
            SingularMatrixSnafu {
                action: "checking the pixel prior covariance"
            }
        );
        Ok(Self { mean, covariance })
    }

    /// Builds the prior from a configuration of means, standard deviations and correlations.
    pub fn from_config(cfg: &PixelPriorConfig) -> Result<Self, ConfigError> {
        let n = cfg.mean.len();
        ensure!(
            cfg.sigma.len() == n,
            InvalidConfigSnafu {
                msg: format!("{} sigmas for {n} parameters", cfg.sigma.len())
            }
        );
        if let Some(names) = &cfg.names {
            ensure!(
                names.len() == n,
                InvalidConfigSnafu {
                    msg: format!("{} names for {n} parameters", names.len())
                }
            );
        }
        ensure!(
            cfg.sigma.iter().all(|s| *s > 0.0),
            InvalidConfigSnafu {
                msg: "all sigmas must be strictly positive".to_string()
            }
        );
        let mut covariance = DMatrix::from_diagonal(&DVector::from_iterator(
            n,
            cfg.sigma.iter().map(|s| s * s),
        ));
        for (i, j, rho) in &cfg.correlations {
            ensure!(
                *i < n && *j < n && i != j && rho.abs() < 1.0,
                InvalidConfigSnafu {
                    msg: format!("invalid correlation {rho} between {i} and {j}")
                }
            );
            let cov = rho * cfg.sigma[*i] * cfg.sigma[*j];
            covariance[(*i, *j)] = cov;
            covariance[(*j, *i)] = cov;
        }
        Self::new(DVector::from_column_slice(&cfg.mean), covariance).map_err(|e| {
            ConfigError::InvalidConfig {
                msg: e.to_string(),
            }
        })
    }

    pub fn n_params(&self) -> usize {
        self.mean.len()
    }
}

impl<T> PriorProvider<T> for PixelPrior {
    fn process_prior(
        &self,
        _timestep: Option<&T>,
        grid: &StateGrid,
        form: MatrixForm,
    ) -> Result<Estimate, FilterError> {
        ensure!(
            self.n_params() == grid.n_params(),
            ShapeMismatchSnafu {
                what: "pixel prior parameters",
                expected: grid.n_params(),
                got: self.n_params()
            }
        );
        let block = match form {
            MatrixForm::Covariance => self.covariance.clone(),
            MatrixForm::Information => {
                self.covariance
                    .clone()
                    .cholesky()
                    .ok_or(FilterError::SingularMatrix {
                        action: "inverting the pixel prior covariance",
                    })?
                    .inverse()
            }
        };
        let state = DVector::from_iterator(
            grid.dim(),
            self.mean.iter().copied().cycle().take(grid.dim()),
        );
        let matrix = block_diag(&vec![block; grid.n_pixels()])?;
        match form {
            MatrixForm::Covariance => Estimate::from_covariance(state, matrix),
            MatrixForm::Information => Estimate::from_information(state, matrix),
        }
    }
}

/// Serializable representation of a [`PixelPrior`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelPriorConfig {
    /// Optional parameter names, only used for readability of the configuration
    #[serde(default)]
    pub names: Option<Vec<String>>,
    pub mean: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Correlation coefficients as (first parameter, second parameter, coefficient)
    #[serde(default)]
    pub correlations: Vec<(usize, usize, f64)>,
}

impl ConfigRepr for PixelPriorConfig {}
