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
use crate::estimate::StateGrid;
use crate::linalg::{CsrMatrix, DMatrix, DVector};
use crate::sparse::{diagonal_matrix, extract_blocks, first_non_finite};
use snafu::ensure;
use std::fmt;

/// Additive model uncertainty injected at every forecast.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessNoise {
    /// The same variance for every state entry
    Scalar(f64),
    /// One variance per parameter, repeated over all pixels
    PerParameter(Vec<f64>),
    /// One variance per state entry
    Diagonal(DVector<f64>),
    /// Full sparse covariance over the state
    Matrix(CsrMatrix<f64>),
}

impl ProcessNoise {
    /// No process noise, i.e. a perfect trajectory model.
    pub fn zero() -> Self {
        Self::Scalar(0.0)
    }

    /// Checks the dimensions against the grid and rejects negative or non finite variances.
    pub fn check(&self, grid: &StateGrid) -> Result<(), FilterError> {
        let diag = match self {
            Self::Scalar(q) => vec![*q],
            Self::PerParameter(q) => {
                ensure!(
                    q.len() == grid.n_params(),
                    ShapeMismatchSnafu {
                        what: "per parameter process noise length",
                        expected: grid.n_params(),
                        got: q.len()
                    }
                );
                q.clone()
            }
            Self::Diagonal(q) => {
                ensure!(
                    q.len() == grid.dim(),
                    ShapeMismatchSnafu {
                        what: "diagonal process noise length",
                        expected: grid.dim(),
                        got: q.len()
                    }
                );
                q.iter().copied().collect()
            }
            Self::Matrix(q) => {
                grid.check_matrix(q)?;
                if let Some((index, value)) = first_non_finite(q) {
                    return NonPositiveVarianceSnafu { index, value }.fail();
                }
                Vec::new()
            }
        };
        for (index, value) in diag.into_iter().enumerate() {
            ensure!(
                value >= 0.0 && value.is_finite(),
                NonPositiveVarianceSnafu { index, value }
            );
        }
        Ok(())
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Scalar(q) => *q == 0.0,
            Self::PerParameter(q) => q.iter().all(|v| *v == 0.0),
            Self::Diagonal(q) => q.iter().all(|v| *v == 0.0),
            Self::Matrix(q) => q.values().iter().all(|v| *v == 0.0),
        }
    }

    /// The process noise covariance over the full state.
    pub fn matrix(&self, grid: &StateGrid) -> Result<CsrMatrix<f64>, FilterError> {
        self.check(grid)?;
        Ok(match self {
            Self::Scalar(q) => diagonal_matrix(&DVector::from_element(grid.dim(), *q)),
            Self::PerParameter(q) => diagonal_matrix(&DVector::from_iterator(
                grid.dim(),
                q.iter().copied().cycle().take(grid.dim()),
            )),
            Self::Diagonal(q) => diagonal_matrix(q),
            Self::Matrix(q) => q.clone(),
        })
    }

    /// The per pixel blocks of the process noise. The full matrix form must be block diagonal.
    pub fn blocks(&self, grid: &StateGrid) -> Result<Vec<DMatrix<f64>>, FilterError> {
        self.check(grid)?;
        let n = grid.n_params();
        match self {
            Self::Scalar(q) => Ok(vec![DMatrix::identity(n, n) * *q; grid.n_pixels()]),
            Self::PerParameter(q) => Ok(vec![
                DMatrix::from_diagonal(&DVector::from_column_slice(q));
                grid.n_pixels()
            ]),
            Self::Diagonal(q) => Ok((0..grid.n_pixels())
                .map(|p| DMatrix::from_diagonal(&q.rows(p * n, n).into_owned()))
                .collect()),
            Self::Matrix(q) => extract_blocks(q, n),
        }
    }
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for ProcessNoise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Scalar(q) => write!(f, "process noise {q:.3e}"),
            Self::PerParameter(q) => write!(
                f,
                "process noise diag({})",
                q.iter()
                    .map(|v| format!("{v:.1e}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Diagonal(q) => write!(f, "process noise diagonal over {} entries", q.len()),
            Self::Matrix(q) => write!(f, "process noise matrix with {} non zeros", q.nnz()),
        }
    }
}
