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
use crate::linalg::{CsrMatrix, DVector};
use snafu::ensure;
use std::fmt;

/// Layout of the state vector over the raster.
///
/// The state is interleaved: all the parameters of a pixel are contiguous, so the entry of
/// parameter `j` of pixel `p` is at index `p * n_params + j`. Every covariance or information
/// matrix of the filter is expressed in that same order, and its per-pixel blocks are
/// `n_params x n_params`.
///
/// When built from a raster state mask, only the raster cells flagged in that mask are pixels
/// of the state (e.g. the cells of a field or of a region of interest), in row major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateGrid {
    n_pixels: usize,
    n_params: usize,
    raster: Option<RasterLayout>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RasterLayout {
    width: usize,
    height: usize,
    mask: Vec<bool>,
}

impl StateGrid {
    /// Initializes a grid of `n_pixels` pixels each carrying `n_params` parameters.
    pub fn new(n_pixels: usize, n_params: usize) -> Self {
        Self {
            n_pixels,
            n_params,
            raster: None,
        }
    }

    /// Initializes a grid from a `width x height` raster state mask (row major).
    pub fn from_state_mask(
        width: usize,
        height: usize,
        mask: Vec<bool>,
        n_params: usize,
    ) -> Result<Self, FilterError> {
        ensure!(
            mask.len() == width * height,
            ShapeMismatchSnafu {
                what: "state mask length",
                expected: width * height,
                got: mask.len()
            }
        );
        Ok(Self {
            n_pixels: mask.iter().filter(|m| **m).count(),
            n_params,
            raster: Some(RasterLayout {
                width,
                height,
                mask,
            }),
        })
    }

    pub fn n_pixels(&self) -> usize {
        self.n_pixels
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Dimension of the state vector.
    pub fn dim(&self) -> usize {
        self.n_pixels * self.n_params
    }

    /// Raster size as (width, height), if built from a raster state mask.
    pub fn raster_size(&self) -> Option<(usize, usize)> {
        self.raster.as_ref().map(|r| (r.width, r.height))
    }

    /// Index in the state vector of the parameter `param` of pixel `pixel`.
    pub fn index(&self, pixel: usize, param: usize) -> usize {
        pixel * self.n_params + param
    }

    /// Expands a per-pixel observation mask to a per-state-entry mask.
    pub fn state_mask(&self, pixel_mask: &[bool]) -> Result<Vec<bool>, FilterError> {
        ensure!(
            pixel_mask.len() == self.n_pixels,
            ShapeMismatchSnafu {
                what: "pixel mask length",
                expected: self.n_pixels,
                got: pixel_mask.len()
            }
        );
        Ok(pixel_mask
            .iter()
            .flat_map(|valid| std::iter::repeat(*valid).take(self.n_params))
            .collect())
    }

    /// Extracts the map of the j-th parameter over all pixels.
    pub fn parameter(&self, x: &DVector<f64>, param: usize) -> Result<DVector<f64>, FilterError> {
        self.check_state(x)?;
        ensure!(
            param < self.n_params,
            ShapeMismatchSnafu {
                what: "parameter index",
                expected: self.n_params,
                got: param
            }
        );
        Ok(DVector::from_iterator(
            self.n_pixels,
            x.iter().skip(param).step_by(self.n_params).copied(),
        ))
    }

    /// Builds a state vector from one map per parameter (the inverse of [`Self::parameter`]).
    pub fn interleave(&self, maps: &[DVector<f64>]) -> Result<DVector<f64>, FilterError> {
        ensure!(
            maps.len() == self.n_params,
            ShapeMismatchSnafu {
                what: "number of parameter maps",
                expected: self.n_params,
                got: maps.len()
            }
        );
        let mut x = DVector::zeros(self.dim());
        for (param, map) in maps.iter().enumerate() {
            ensure!(
                map.len() == self.n_pixels,
                ShapeMismatchSnafu {
                    what: "parameter map length",
                    expected: self.n_pixels,
                    got: map.len()
                }
            );
            for (pixel, v) in map.iter().enumerate() {
                x[self.index(pixel, param)] = *v;
            }
        }
        Ok(x)
    }

    /// Selects the state pixels out of a full raster (row major). Without a raster layout, the
    /// input must already be one value per pixel.
    pub fn raster_to_state<V: Copy>(&self, raster: &[V]) -> Result<Vec<V>, FilterError> {
        match &self.raster {
            Some(layout) => {
                ensure!(
                    raster.len() == layout.mask.len(),
                    ShapeMismatchSnafu {
                        what: "raster length",
                        expected: layout.mask.len(),
                        got: raster.len()
                    }
                );
                Ok(raster
                    .iter()
                    .zip(layout.mask.iter())
                    .filter_map(|(v, keep)| keep.then_some(*v))
                    .collect())
            }
            None => {
                ensure!(
                    raster.len() == self.n_pixels,
                    ShapeMismatchSnafu {
                        what: "raster length",
                        expected: self.n_pixels,
                        got: raster.len()
                    }
                );
                Ok(raster.to_vec())
            }
        }
    }

    /// Scatters one value per pixel back onto the raster, using `fill` outside the state mask.
    pub fn state_to_raster(&self, values: &DVector<f64>, fill: f64) -> Result<Vec<f64>, FilterError> {
        ensure!(
            values.len() == self.n_pixels,
            ShapeMismatchSnafu {
                what: "per pixel values length",
                expected: self.n_pixels,
                got: values.len()
            }
        );
        match &self.raster {
            Some(layout) => {
                let mut raster = vec![fill; layout.mask.len()];
                let cells = layout
                    .mask
                    .iter()
                    .enumerate()
                    .filter_map(|(i, keep)| keep.then_some(i));
                for (cell, v) in cells.zip(values.iter()) {
                    raster[cell] = *v;
                }
                Ok(raster)
            }
            None => Ok(values.iter().copied().collect()),
        }
    }

    pub fn check_state(&self, x: &DVector<f64>) -> Result<(), FilterError> {
        ensure!(
            x.len() == self.dim(),
            ShapeMismatchSnafu {
                what: "state vector length",
                expected: self.dim(),
                got: x.len()
            }
        );
        Ok(())
    }

    pub fn check_matrix(&self, m: &CsrMatrix<f64>) -> Result<(), FilterError> {
        ensure!(
            m.nrows() == self.dim(),
            ShapeMismatchSnafu {
                what: "state matrix rows",
                expected: self.dim(),
                got: m.nrows()
            }
        );
        ensure!(
            m.ncols() == self.dim(),
            ShapeMismatchSnafu {
                what: "state matrix columns",
                expected: self.dim(),
                got: m.ncols()
            }
        );
        Ok(())
    }
}

impl fmt::Display for StateGrid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} pixels x {} parameters (dimension {})",
            self.n_pixels,
            self.n_params,
            self.dim()
        )?;
        if let Some((width, height)) = self.raster_size() {
            write!(f, " on a {width}x{height} raster")?;
        }
        Ok(())
    }
}
