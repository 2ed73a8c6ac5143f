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

use crate::errors::{FilterError, WrongMatrixFormSnafu};
use crate::linalg::{CsrMatrix, DVector};
use crate::sparse::{diagonal, invert_blocks};
use serde_derive::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;

mod grid;
pub use grid::StateGrid;

/// Whether a matrix stores a covariance or its inverse (the information matrix).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixForm {
    Covariance,
    Information,
}

impl MatrixForm {
    /// The other form, obtained by inversion.
    pub fn inverse(self) -> Self {
        match self {
            Self::Covariance => Self::Information,
            Self::Information => Self::Covariance,
        }
    }
}

impl fmt::Display for MatrixForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Covariance => write!(f, "covariance"),
            Self::Information => write!(f, "information"),
        }
    }
}

/// The running state of the filter: a state vector and one matrix over the same dimension,
/// which is either the covariance or the information matrix as stated by `form`.
#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    pub state: DVector<f64>,
    pub matrix: CsrMatrix<f64>,
    pub form: MatrixForm,
    /// Whether this estimate is a forecast (no observation was used since the last propagation)
    pub predicted: bool,
}

impl Estimate {
    fn new(
        state: DVector<f64>,
        matrix: CsrMatrix<f64>,
        form: MatrixForm,
    ) -> Result<Self, FilterError> {
        let me = Self {
            state,
            matrix,
            form,
            predicted: false,
        };
        StateGrid::new(me.state.len(), 1).check_matrix(&me.matrix)?;
        Ok(me)
    }

    pub fn from_covariance(
        state: DVector<f64>,
        covariance: CsrMatrix<f64>,
    ) -> Result<Self, FilterError> {
        Self::new(state, covariance, MatrixForm::Covariance)
    }

    pub fn from_information(
        state: DVector<f64>,
        information: CsrMatrix<f64>,
    ) -> Result<Self, FilterError> {
        Self::new(state, information, MatrixForm::Information)
    }

    pub fn dim(&self) -> usize {
        self.state.len()
    }

    /// The covariance matrix, if held in covariance form.
    pub fn covariance(&self) -> Option<&CsrMatrix<f64>> {
        match self.form {
            MatrixForm::Covariance => Some(&self.matrix),
            MatrixForm::Information => None,
        }
    }

    /// The information matrix, if held in information form.
    pub fn information(&self) -> Option<&CsrMatrix<f64>> {
        match self.form {
            MatrixForm::Information => Some(&self.matrix),
            MatrixForm::Covariance => None,
        }
    }

    /// Returns an error if this estimate is not in the expected form.
    pub fn ensure_form(&self, expected: MatrixForm) -> Result<(), FilterError> {
        ensure!(
            self.form == expected,
            WrongMatrixFormSnafu {
                expected,
                got: self.form
            }
        );
        Ok(())
    }

    /// Converts this estimate to the requested form by inverting each pixel block.
    ///
    /// The matrix must be block diagonal (no cross-pixel correlation), and every block invertible.
    pub fn into_form(self, target: MatrixForm, grid: &StateGrid) -> Result<Self, FilterError> {
        if self.form == target {
            return Ok(self);
        }
        grid.check_state(&self.state)?;
        grid.check_matrix(&self.matrix)?;
        debug!("converting {} estimate to {target} form", self.form);
        Ok(Self {
            matrix: invert_blocks(&self.matrix, grid.n_params())?,
            form: target,
            ..self
        })
    }

    /// Marginal variance of each state entry.
    pub fn variances(&self, grid: &StateGrid) -> Result<DVector<f64>, FilterError> {
        match self.form {
            MatrixForm::Covariance => Ok(diagonal(&self.matrix)),
            MatrixForm::Information => {
                grid.check_matrix(&self.matrix)?;
                Ok(diagonal(&invert_blocks(&self.matrix, grid.n_params())?))
            }
        }
    }

    /// Returns whether each state entry lies within `sigma` standard deviations of the provided truth.
    pub fn within_sigma(
        &self,
        truth: &DVector<f64>,
        sigma: f64,
        grid: &StateGrid,
    ) -> Result<bool, FilterError> {
        grid.check_state(truth)?;
        let variances = self.variances(grid)?;
        Ok(self
            .state
            .iter()
            .zip(truth.iter())
            .zip(variances.iter())
            .all(|((x, t), var)| (x - t).abs() <= sigma * var.max(0.0).sqrt()))
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = if self.predicted {
            "forecast"
        } else {
            "analysis"
        };
        write!(
            f,
            "{kind} of dimension {} in {} form ({} non zeros)",
            self.dim(),
            self.form,
            self.matrix.nnz()
        )
    }
}
