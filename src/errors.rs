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
use snafu::prelude::Snafu;

#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FilterError {
    /// Mask, operator, uncertainty or state dimensions disagree
    #[snafu(display("{what}: expected dimension {expected} but got {got}"))]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[snafu(display("matrix is singular or not positive definite when {action}"))]
    SingularMatrix { action: &'static str },
    #[snafu(display("invalid variance {value} at entry {index}"))]
    NonPositiveVariance { index: usize, value: f64 },
    /// The observation operator returned NaN or infinite values
    #[snafu(display("observation operator returned {value} at index {index}"))]
    InvalidOperatorOutput { index: usize, value: f64 },
    #[snafu(display("observation of valid pixel {index} is {value}"))]
    InvalidObservation { index: usize, value: f64 },
    #[snafu(display("expected a matrix in {expected} form but it is in {got} form"))]
    WrongMatrixForm {
        expected: MatrixForm,
        got: MatrixForm,
    },
    #[snafu(display(
        "entry ({row}, {col}) lies outside the {block_size}x{block_size} diagonal blocks"
    ))]
    NotBlockDiagonal {
        row: usize,
        col: usize,
        block_size: usize,
    },
    #[snafu(display("no observation for band {band} of acquisition {acquisition} at {timestep}"))]
    MissingObservation {
        timestep: String,
        acquisition: usize,
        band: usize,
    },
    /// Failure reported by an external collaborator (observation or prior provider)
    #[snafu(display("{action} failed: {msg}"))]
    ExternalSource { action: &'static str, msg: String },
    #[snafu(display("timesteps must be strictly increasing, offending index {index}"))]
    UnorderedTimesteps { index: usize },
    #[snafu(display("no timestep to process"))]
    NoTimesteps,
    #[snafu(display("at timestep {timestep} (band {band:?}) encountered {source}"))]
    Step {
        timestep: String,
        band: Option<usize>,
        #[snafu(source(from(FilterError, Box::new)))]
        source: Box<FilterError>,
    },
}
