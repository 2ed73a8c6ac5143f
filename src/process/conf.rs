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

use crate::estimate::MatrixForm;
use crate::filter::{IterationOptions, LinearOptions};
use crate::io::ConfigRepr;
use serde_derive::{Deserialize, Serialize};
use std::default::Default;
use std::fmt;
use typed_builder::TypedBuilder;

/// Defines how outliers are rejected after an assimilation, based on their postfit residual ratio,
/// i.e. the absolute postfit residual divided by the observation standard deviation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectCriteria {
    /// Pixels with a residual ratio greater than this value are masked out
    pub num_sigmas: f64,
    /// Maximum number of re-assimilations after masking outliers
    pub max_passes: usize,
}

impl Default for RejectCriteria {
    /// Reject beyond three sigmas, and re-assimilate at most three times.
    fn default() -> Self {
        Self {
            num_sigmas: 3.0,
            max_passes: 3,
        }
    }
}

impl fmt::Display for RejectCriteria {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "reject residual ratios above {:.1} over at most {} passes",
            self.num_sigmas, self.max_passes
        )
    }
}

/// What the filter does when the update of a timestep fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the run and return the error
    #[default]
    Abort,
    /// Use the forecast as the analysis of that timestep, record the failure, and continue
    UseForecast,
}

/// Configuration of a filter run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
#[serde(default)]
pub struct RunConfig {
    /// Use the diagonal of the innovation covariance only (linear update)
    #[builder(default = true)]
    pub approx_diagonal: bool,
    /// Refine the state increment of the diagonal approximation with the exact innovation covariance
    #[builder(default = false)]
    pub refine_diag: bool,
    /// Iterate the linearization of the observation operator, using the information filter update
    #[builder(default = false)]
    pub iter_obs_op: bool,
    /// Mask out outliers after each assimilation and re-assimilate
    #[builder(default = false)]
    pub is_robust: bool,
    #[builder(default = 10)]
    pub max_iterations: usize,
    #[builder(default = 1e-5)]
    pub convergence_tol: f64,
    #[builder(default)]
    pub robust: RejectCriteria,
    #[builder(default)]
    pub on_failure: FailurePolicy,
}

impl RunConfig {
    /// The matrix form the estimate must be in for the configured update.
    pub fn matrix_form(&self) -> MatrixForm {
        if self.iter_obs_op {
            MatrixForm::Information
        } else {
            MatrixForm::Covariance
        }
    }

    pub fn linear_options(&self) -> LinearOptions {
        LinearOptions {
            approx_diagonal: self.approx_diagonal,
            refine_diag: self.refine_diag,
        }
    }

    pub fn iteration_options(&self) -> IterationOptions {
        IterationOptions {
            max_iterations: self.max_iterations,
            tolerance: self.convergence_tol,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConfigRepr for RunConfig {}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.iter_obs_op {
            write!(
                f,
                "iterated information filter (at most {} iterations, tolerance {:.1e})",
                self.max_iterations, self.convergence_tol
            )?;
        } else {
            write!(
                f,
                "linear Kalman filter ({} innovation covariance{})",
                if self.approx_diagonal {
                    "diagonal"
                } else {
                    "full"
                },
                if self.approx_diagonal && self.refine_diag {
                    ", refined increment"
                } else {
                    ""
                }
            )?;
        }
        if self.is_robust {
            write!(f, ", {}", self.robust)?;
        }
        if self.on_failure == FailurePolicy::UseForecast {
            write!(f, ", forecast used on failure")?;
        }
        Ok(())
    }
}
