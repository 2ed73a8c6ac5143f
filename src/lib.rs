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

/*! # raster-kf

Sequential state estimation over raster time series. Every pixel of the grid carries a small
parameter vector (e.g. leaf area index, soil brightness), and observations of a subset of the
pixels (cloud free, good quality) are fused in time with a linear or iterated extended Kalman
filter operating on sparse, block-diagonal covariance or information matrices.
*/

/// Mask-driven reduction and expansion, block-diagonal assembly, and sparse solves.
pub mod sparse;

/// The state grid (pixel layout) and state estimates in covariance or information form.
pub mod estimate;

/// Observations, their uncertainty, and the contract to provide them to the filter.
pub mod observation;

/// Observation operators mapping the per-pixel state to predicted observations.
pub mod operator;

/// The update solvers: closed-form linear update and iterated information-filter update.
pub mod filter;

/// Forecast strategies (trajectory model and process noise) and prior providers.
pub mod propagation;

/// The sequential filter process, stepping over the requested timesteps.
pub mod process;

/// Configuration loading and output sinks.
pub mod io;

/// Utility functions shared by different modules.
pub mod utils;

mod errors;
/// Raster KF will (almost) never panic and functions which may fail will return an error.
pub use self::errors::FilterError;

#[macro_use]
extern crate log;
extern crate hifitime;
extern crate nalgebra as na;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

/// Re-export nalgebra and the sparse formats used throughout.
pub mod linalg {
    pub use na::base::*;
    pub use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
}

/// Re-export the most used items
pub mod prelude {
    pub use crate::estimate::{Estimate, MatrixForm, StateGrid};
    pub use crate::filter::{
        iterative_update, linear_update, Analysis, IterationOptions, LinearOptions,
    };
    pub use crate::io::output::{MemoryOutput, OutputSink};
    pub use crate::io::{ConfigError, ConfigRepr};
    pub use crate::observation::{
        BandObservation, MemoryObservations, Metadata, ObservationNoise, ObservationProvider,
    };
    pub use crate::operator::{
        FiniteDifference, IdentityOperator, Linearization, LinearOperator, ObservationOperator,
        PixelModel, PixelOperator,
    };
    pub use crate::process::{
        Diagnostics, EngineState, FailurePolicy, FilterProcess, LogDiagnostics, RejectCriteria,
        RunConfig, RunSummary, StepReport,
    };
    pub use crate::propagation::{
        LinearPropagator, PixelPrior, PixelPriorConfig, PriorProvider, PriorReset, ProcessNoise,
        StatePropagator, TrajectoryModel,
    };
    pub use crate::sparse::{block_diag, sparse_solve, Squeeze};
    pub use crate::FilterError;
}
