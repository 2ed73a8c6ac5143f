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

use crate::estimate::Estimate;
use crate::linalg::DVector;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use typed_builder::TypedBuilder;

mod iterative;
mod linear;

pub use iterative::iterative_update;
pub use linear::linear_update;

/// Result of an update: the analysis estimate and how it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct Analysis {
    pub estimate: Estimate,
    /// Prefit residuals (observed minus predicted) of each band, over its valid pixels, at the
    /// last linearization point
    pub innovations: Vec<DVector<f64>>,
    pub iterations: usize,
    pub converged: bool,
}

impl Analysis {
    /// The analysis of an update which used no observation at all.
    pub(crate) fn unchanged(forecast: &Estimate, bands: usize) -> Self {
        Self {
            estimate: forecast.clone(),
            innovations: vec![DVector::zeros(0); bands],
            iterations: 0,
            converged: true,
        }
    }

    /// Number of observations used, summed over the bands.
    pub fn observation_count(&self) -> usize {
        self.innovations.iter().map(|i| i.len()).sum()
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} from {} observations in {} iteration(s){}",
            self.estimate,
            self.observation_count(),
            self.iterations,
            if self.converged {
                ""
            } else {
                " (NOT converged)"
            }
        )
    }
}

/// Options of the closed form linear update.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
pub struct LinearOptions {
    /// Only use the diagonal of the innovation covariance, i.e. ignore the cross correlation
    /// between observed pixels.
    #[builder(default = true)]
    pub approx_diagonal: bool,
    /// With the diagonal approximation, compute the state increment with the exact innovation
    /// covariance instead (the covariance update keeps the diagonal approximation).
    #[builder(default = false)]
    pub refine_diag: bool,
}

impl Default for LinearOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Options of the iterated information filter update.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
pub struct IterationOptions {
    #[builder(default = 10)]
    pub max_iterations: usize,
    /// Convergence is declared once the largest absolute change of any state entry between two
    /// iterations falls below this tolerance.
    #[builder(default = 1e-5)]
    pub tolerance: f64,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
