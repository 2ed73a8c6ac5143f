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

use super::{BandObservation, ObservationProvider};
use crate::errors::{FilterError, MissingObservationSnafu, ShapeMismatchSnafu};
use snafu::{ensure, OptionExt};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Observations held in memory, grouped by timestep then by acquisition then by band.
#[derive(Clone, Debug, Default)]
pub struct MemoryObservations<T: Ord> {
    n_pixels: usize,
    store: BTreeMap<T, Vec<Vec<BandObservation>>>,
}

impl<T: Ord + Clone> MemoryObservations<T> {
    pub fn new(n_pixels: usize) -> Self {
        Self {
            n_pixels,
            store: BTreeMap::new(),
        }
    }

    /// Adds an acquisition (all of its bands) at this timestep.
    pub fn add_acquisition(
        &mut self,
        timestep: T,
        bands: Vec<BandObservation>,
    ) -> Result<(), FilterError> {
        for band in &bands {
            ensure!(
                band.n_pixels() == self.n_pixels,
                ShapeMismatchSnafu {
                    what: "observation mask length",
                    expected: self.n_pixels,
                    got: band.n_pixels()
                }
            );
        }
        self.store.entry(timestep).or_default().push(bands);
        Ok(())
    }

    /// Timesteps with at least one acquisition, in increasing order.
    pub fn timesteps(&self) -> Vec<T> {
        self.store.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.values().map(|acqs| acqs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl<T: Ord + Display> ObservationProvider<T> for MemoryObservations<T> {
    fn acquisitions(&self, timestep: &T) -> Vec<usize> {
        self.store
            .get(timestep)
            .map(|acqs| acqs.iter().map(|bands| bands.len()).collect())
            .unwrap_or_default()
    }

    fn get_observations(
        &self,
        timestep: &T,
        acquisition: usize,
        band: usize,
    ) -> Result<BandObservation, FilterError> {
        self.store
            .get(timestep)
            .and_then(|acqs| acqs.get(acquisition))
            .and_then(|bands| bands.get(band))
            .cloned()
            .context(MissingObservationSnafu {
                timestep: timestep.to_string(),
                acquisition,
                band,
            })
    }
}
