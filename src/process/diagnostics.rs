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
use crate::filter::Analysis;
use crate::observation::BandObservation;
use crate::utils::rms;
use std::fmt::Display;

/// Hooks called around the assimilation of each acquisition. They only observe the filter.
pub trait Diagnostics<T> {
    fn iteration_start(
        &mut self,
        _timestep: &T,
        _forecast: &Estimate,
        _observations: &[BandObservation],
    ) {
    }

    fn iteration_end(
        &mut self,
        _timestep: &T,
        _analysis: &Analysis,
        _observations: &[BandObservation],
    ) {
    }
}

/// Logs the number of valid pixels and the innovation RMS of each band.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogDiagnostics;

impl<T: Display> Diagnostics<T> for LogDiagnostics {
    fn iteration_start(
        &mut self,
        timestep: &T,
        forecast: &Estimate,
        observations: &[BandObservation],
    ) {
        for obs in observations {
            debug!("{timestep}: assimilating {obs} into {forecast}");
        }
    }

    fn iteration_end(&mut self, timestep: &T, analysis: &Analysis, observations: &[BandObservation]) {
        for (obs, innovation) in observations.iter().zip(analysis.innovations.iter()) {
            info!(
                "{timestep}: band {} innovation RMS {:.4e} over {} pixels",
                obs.metadata.band,
                rms(innovation),
                innovation.len()
            );
        }
    }
}
