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

use super::{Analysis, LinearOptions};
use crate::errors::{FilterError, SingularMatrixSnafu};
use crate::estimate::{Estimate, MatrixForm, StateGrid};
use crate::linalg::{CsrMatrix, DVector};
use crate::observation::BandObservation;
use crate::operator::Linearization;
use crate::sparse::{
    dense_inverse, diagonal, from_dense, mul_vec, scale_rows, select_rows, sparse_solve, Squeeze,
};
use snafu::ensure;

/// Closed form Kalman update of a forecast in covariance form with one band of observations.
///
/// The linearization is that of the observation operator at the forecast state, so for a
/// nonlinear operator this is the extended Kalman filter update. All the inversions are
/// computed on the reduced space of the valid pixels:
///
/// + innovation `v = y - h(x)`, innovation covariance `S = H P Hᵀ + R`
/// + `x⁺ = x + (P Hᵀ) S⁻¹ v`
/// + `P⁺ = P - (P Hᵀ) S⁻¹ (H P)`
///
/// where `P Hᵀ` is computed with the full rows of `P`, such that any correlation between
/// observed and unobserved state entries is accounted for.
///
/// With `approx_diagonal`, `S` is replaced by its diagonal. If `refine_diag` is also set, the
/// state increment uses the exact `S` via a sparse solve.
///
/// If no pixel is valid, the forecast is returned unchanged.
pub fn linear_update(
    grid: &StateGrid,
    forecast: &Estimate,
    observation: &BandObservation,
    linearization: &Linearization,
    options: LinearOptions,
) -> Result<Analysis, FilterError> {
    forecast.ensure_form(MatrixForm::Covariance)?;
    grid.check_state(&forecast.state)?;
    grid.check_matrix(&forecast.matrix)?;
    let state_mask = grid.state_mask(&observation.mask)?;

    let valid = observation.valid_count();
    if valid == 0 {
        trace!("no valid pixel in band {}", observation.metadata.band);
        return Ok(Analysis::unchanged(forecast, 1));
    }
    linearization.validate(valid, grid.n_params())?;

    let y = observation.reduced_values()?;
    let r = observation.noise.covariance(&observation.mask)?;
    let h = &linearization.jacobian;
    let innovation = &y - &linearization.predicted;

    // H P (valid x dim) and its restriction to the observed state entries
    let p_obs_rows = select_rows(&forecast.matrix, &state_mask)?;
    let hp = h * &p_obs_rows;
    let p_reduced = forecast.matrix.squeeze(Some(&state_mask[..]))?;
    let s = &(&(h * &p_reduced) * &h.transpose()) + &r;

    let (weights, reduction): (DVector<f64>, CsrMatrix<f64>) = if options.approx_diagonal {
        let s_diag = diagonal(&s);
        ensure!(
            s_diag.iter().all(|v| *v > 0.0 && v.is_finite()),
            SingularMatrixSnafu {
                action: "inverting the diagonal innovation covariance"
            }
        );
        let s_inv_diag = s_diag.map(|v| 1.0 / v);
        let weights = if options.refine_diag {
            sparse_solve(&s, &innovation)?
        } else {
            innovation.component_mul(&s_inv_diag)
        };
        let reduction = &hp.transpose() * &scale_rows(&hp, &s_inv_diag)?;
        (weights, reduction)
    } else {
        let s_inv = from_dense(&dense_inverse(&s)?);
        let weights = mul_vec(&s_inv, &innovation)?;
        let reduction = &hp.transpose() * &(&s_inv * &hp);
        (weights, reduction)
    };

    let increment = mul_vec(&hp.transpose(), &weights)?;
    debug!(
        "band {}: {valid} valid pixels, innovation norm {:.3e}, increment norm {:.3e}",
        observation.metadata.band,
        innovation.norm(),
        increment.norm()
    );

    Ok(Analysis {
        estimate: Estimate {
            state: &forecast.state + increment,
            matrix: &forecast.matrix - &reduction,
            form: MatrixForm::Covariance,
            predicted: false,
        },
        innovations: vec![innovation],
        iterations: 1,
        converged: true,
    })
}
