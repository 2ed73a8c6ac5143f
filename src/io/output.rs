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

use crate::estimate::StateGrid;
use crate::linalg::{CsrMatrix, DVector};
use crate::sparse::{diagonal, invert_blocks};

/// Receives the analysis of every visited timestep.
///
/// Exactly one of the covariance `p` and the information matrix `p_inv` is provided, depending on
/// the form the filter runs in. Persisting the results, and any failure doing so, is the
/// responsibility of the sink.
pub trait OutputSink<T> {
    fn dump(
        &mut self,
        step: usize,
        timestep: &T,
        x: &DVector<f64>,
        p: Option<&CsrMatrix<f64>>,
        p_inv: Option<&CsrMatrix<f64>>,
    );
}

/// One dumped timestep.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRecord<T> {
    pub step: usize,
    pub timestep: T,
    /// One map per parameter
    pub parameters: Vec<DVector<f64>>,
    /// One map of marginal variances per parameter, if they could be computed
    pub variances: Option<Vec<DVector<f64>>>,
}

/// Keeps the parameter and variance maps of each timestep in memory.
#[derive(Clone, Debug)]
pub struct MemoryOutput<T> {
    grid: StateGrid,
    pub records: Vec<OutputRecord<T>>,
}

impl<T: Clone> MemoryOutput<T> {
    pub fn new(grid: StateGrid) -> Self {
        Self {
            grid,
            records: Vec::new(),
        }
    }

    fn split(&self, v: &DVector<f64>) -> Option<Vec<DVector<f64>>> {
        (0..self.grid.n_params())
            .map(|j| self.grid.parameter(v, j).ok())
            .collect()
    }

    pub fn last(&self) -> Option<&OutputRecord<T>> {
        self.records.last()
    }

    /// Time series of one parameter of one pixel, over all dumped timesteps.
    pub fn series(&self, pixel: usize, param: usize) -> Vec<(T, f64)> {
        self.records
            .iter()
            .filter_map(|rec| {
                rec.parameters
                    .get(param)
                    .and_then(|map| map.get(pixel))
                    .map(|v| (rec.timestep.clone(), *v))
            })
            .collect()
    }
}

impl<T: Clone> OutputSink<T> for MemoryOutput<T> {
    fn dump(
        &mut self,
        step: usize,
        timestep: &T,
        x: &DVector<f64>,
        p: Option<&CsrMatrix<f64>>,
        p_inv: Option<&CsrMatrix<f64>>,
    ) {
        let Some(parameters) = self.split(x) else {
            warn!("step {step}: state of length {} does not match {}", x.len(), self.grid);
            return;
        };
        let variances = match (p, p_inv) {
            (Some(p), _) => self.split(&diagonal(p)),
            (None, Some(p_inv)) => match invert_blocks(p_inv, self.grid.n_params()) {
                Ok(p) => self.split(&diagonal(&p)),
                Err(e) => {
                    warn!("step {step}: no variance output: {e}");
                    None
                }
            },
            (None, None) => None,
        };
        self.records.push(OutputRecord {
            step,
            timestep: timestep.clone(),
            parameters,
            variances,
        });
    }
}
