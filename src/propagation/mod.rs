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
use crate::estimate::{Estimate, MatrixForm, StateGrid};
use crate::linalg::{CsrMatrix, DMatrix, DVector};
use crate::sparse::{block_diag, extract_blocks, map_blocks, mul_vec};
use snafu::ensure;
use std::fmt;

mod noise;
mod prior;

pub use noise::ProcessNoise;
pub use prior::{PixelPrior, PixelPriorConfig, PriorProvider};

/// Computes the forecast at a timestep from the analysis of the previous timestep.
pub trait StatePropagator<T> {
    fn forecast(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
        timestep: &T,
    ) -> Result<Estimate, FilterError>;
}

/// Transition of the state between two timesteps, in the absence of observations.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TrajectoryModel {
    /// Persistence: the state is unchanged
    #[default]
    Identity,
    /// The same `n_params x n_params` transition for every pixel
    PerPixel(DMatrix<f64>),
    /// A transition over the full state
    Matrix(CsrMatrix<f64>),
}

impl TrajectoryModel {
    /// The transition matrix over the full state.
    pub fn matrix(&self, grid: &StateGrid) -> Result<CsrMatrix<f64>, FilterError> {
        match self {
            Self::Identity => Ok(CsrMatrix::identity(grid.dim())),
            Self::PerPixel(m) => {
                self.check(grid)?;
                block_diag(&vec![m.clone(); grid.n_pixels()])
            }
            Self::Matrix(m) => {
                grid.check_matrix(m)?;
                Ok(m.clone())
            }
        }
    }

    fn check(&self, grid: &StateGrid) -> Result<(), FilterError> {
        match self {
            Self::Identity => Ok(()),
            Self::PerPixel(m) => {
                ensure!(
                    m.nrows() == grid.n_params() && m.ncols() == grid.n_params(),
                    ShapeMismatchSnafu {
                        what: "per pixel trajectory model dimension",
                        expected: grid.n_params(),
                        got: m.nrows()
                    }
                );
                Ok(())
            }
            Self::Matrix(m) => grid.check_matrix(m),
        }
    }

    /// The per pixel blocks of the transition, which must then be block diagonal.
    fn blocks(&self, grid: &StateGrid) -> Result<Vec<DMatrix<f64>>, FilterError> {
        let n = grid.n_params();
        match self {
            Self::Identity => Ok(vec![DMatrix::identity(n, n); grid.n_pixels()]),
            Self::PerPixel(m) => {
                self.check(grid)?;
                Ok(vec![m.clone(); grid.n_pixels()])
            }
            Self::Matrix(m) => extract_blocks(m, n),
        }
    }
}

impl fmt::Display for TrajectoryModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity trajectory"),
            Self::PerPixel(m) => write!(f, "per pixel {}x{} trajectory", m.nrows(), m.ncols()),
            Self::Matrix(m) => write!(f, "trajectory matrix with {} non zeros", m.nnz()),
        }
    }
}

/// Linear forecast `x = M x` with additive process noise.
///
/// In covariance form, `P = M P Mᵀ + Q`. In information form the matrix must be block diagonal
/// (as are the trajectory and the process noise), and each pixel block is propagated as
/// `Ĩ = M⁻ᵀ I M⁻¹` then `I' = Ĩ (Id + Q Ĩ)⁻¹`, which never inverts the information matrix itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearPropagator {
    pub model: TrajectoryModel,
    pub noise: ProcessNoise,
}

impl LinearPropagator {
    pub fn new(model: TrajectoryModel, noise: ProcessNoise) -> Self {
        Self { model, noise }
    }

    /// Identity trajectory with this process noise.
    pub fn persistence(noise: ProcessNoise) -> Self {
        Self::new(TrajectoryModel::Identity, noise)
    }

    fn forecast_covariance(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
    ) -> Result<Estimate, FilterError> {
        let (state, propagated) = match &self.model {
            TrajectoryModel::Identity => (analysis.state.clone(), analysis.matrix.clone()),
            model => {
                let m = model.matrix(grid)?;
                let state = mul_vec(&m, &analysis.state)?;
                let propagated = &(&m * &analysis.matrix) * &m.transpose();
                (state, propagated)
            }
        };
        let matrix = if self.noise.is_zero() {
            propagated
        } else {
            &propagated + &self.noise.matrix(grid)?
        };
        Ok(Estimate {
            state,
            matrix,
            form: MatrixForm::Covariance,
            predicted: true,
        })
    }

    fn forecast_information(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
    ) -> Result<Estimate, FilterError> {
        let n = grid.n_params();
        let transitions = self.model.blocks(grid)?;
        let noise = self.noise.blocks(grid)?;

        let mut state = DVector::zeros(grid.dim());
        for (pixel, m) in transitions.iter().enumerate() {
            let x = analysis.state.rows(pixel * n, n);
            state.rows_mut(pixel * n, n).copy_from(&(m * x));
        }

        let matrix = map_blocks(&analysis.matrix, n, |pixel, info| {
            let m_inv = transitions[pixel]
                .clone()
                .try_inverse()
                .ok_or(FilterError::SingularMatrix {
                    action: "inverting the trajectory model",
                })?;
            let info_tilde = m_inv.transpose() * info * &m_inv;
            let q = &noise[pixel];
            let inner = (DMatrix::identity(n, n) + q * &info_tilde)
                .try_inverse()
                .ok_or(FilterError::SingularMatrix {
                    action: "adding process noise to the information matrix",
                })?;
            let propagated = info_tilde * inner;
            Ok((&propagated + propagated.transpose()) * 0.5)
        })?;

        Ok(Estimate {
            state,
            matrix,
            form: MatrixForm::Information,
            predicted: true,
        })
    }
}

impl<T> StatePropagator<T> for LinearPropagator {
    fn forecast(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
        _timestep: &T,
    ) -> Result<Estimate, FilterError> {
        grid.check_state(&analysis.state)?;
        grid.check_matrix(&analysis.matrix)?;
        match analysis.form {
            MatrixForm::Covariance => self.forecast_covariance(grid, analysis),
            MatrixForm::Information => self.forecast_information(grid, analysis),
        }
    }
}

impl fmt::Display for LinearPropagator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} with {}", self.model, self.noise)
    }
}

/// Forecast which discards the previous analysis and restarts from the prior of the timestep.
pub struct PriorReset<'a, T> {
    pub provider: &'a dyn PriorProvider<T>,
}

impl<'a, T> PriorReset<'a, T> {
    pub fn new(provider: &'a dyn PriorProvider<T>) -> Self {
        Self { provider }
    }
}

impl<'a, T> StatePropagator<T> for PriorReset<'a, T> {
    fn forecast(
        &self,
        grid: &StateGrid,
        analysis: &Estimate,
        timestep: &T,
    ) -> Result<Estimate, FilterError> {
        let mut prior = self
            .provider
            .process_prior(Some(timestep), grid, analysis.form)?;
        grid.check_state(&prior.state)?;
        grid.check_matrix(&prior.matrix)?;
        prior.ensure_form(analysis.form)?;
        prior.predicted = true;
        Ok(prior)
    }
}
