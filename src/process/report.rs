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

use crate::FilterError;
use std::fmt;

/// What happened at one visited timestep.
#[derive(Clone, Debug, PartialEq)]
pub struct StepReport<T> {
    /// Position of the timestep in the requested list
    pub index: usize,
    pub timestep: T,
    /// Whether any observation was assimilated (false for a pure forecast)
    pub assimilated: bool,
    pub acquisitions: usize,
    /// Valid pixels summed over all bands of all acquisitions, after outlier rejection
    pub valid_pixels: usize,
    pub iterations: usize,
    pub converged: bool,
    pub outliers: usize,
    /// Failure of the update, when the forecast was used in its place
    pub failure: Option<FilterError>,
}

impl<T> StepReport<T> {
    pub(crate) fn forecast_only(index: usize, timestep: T) -> Self {
        Self {
            index,
            timestep,
            assimilated: false,
            acquisitions: 0,
            valid_pixels: 0,
            iterations: 0,
            converged: true,
            outliers: 0,
            failure: None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for StepReport<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(err) = &self.failure {
            write!(f, "#{} {}: FAILED ({err})", self.index, self.timestep)
        } else if self.assimilated {
            write!(
                f,
                "#{} {}: {} acquisition(s), {} valid pixels, {} iteration(s){}{}",
                self.index,
                self.timestep,
                self.acquisitions,
                self.valid_pixels,
                self.iterations,
                if self.outliers > 0 {
                    format!(", {} outliers", self.outliers)
                } else {
                    String::new()
                },
                if self.converged {
                    ""
                } else {
                    " (NOT converged)"
                }
            )
        } else {
            write!(f, "#{} {}: forecast only", self.index, self.timestep)
        }
    }
}

/// Reports of all the visited timesteps of a run, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary<T> {
    pub steps: Vec<StepReport<T>>,
}

impl<T> RunSummary<T> {
    /// Number of timesteps where observations were assimilated.
    pub fn assimilated(&self) -> usize {
        self.steps.iter().filter(|s| s.assimilated).count()
    }

    pub fn all_converged(&self) -> bool {
        self.steps.iter().all(|s| s.converged)
    }

    /// Reports of the timesteps whose update failed and was replaced by the forecast.
    pub fn failures(&self) -> impl Iterator<Item = &StepReport<T>> {
        self.steps.iter().filter(|s| s.failure.is_some())
    }

    pub fn outliers(&self) -> usize {
        self.steps.iter().map(|s| s.outliers).sum()
    }
}

impl<T: fmt::Display> fmt::Display for RunSummary<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} timesteps, {} with observations, {} failed, {} outliers rejected",
            self.steps.len(),
            self.assimilated(),
            self.failures().count(),
            self.outliers()
        )
    }
}
