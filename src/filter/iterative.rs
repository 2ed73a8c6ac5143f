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

use super::{Analysis, IterationOptions};
use crate::errors::FilterError;
use crate::estimate::{Estimate, MatrixForm, StateGrid};
use crate::linalg::{CsrMatrix, DVector};
use crate::observation::BandObservation;
use crate::operator::ObservationOperator;
use crate::sparse::{expand_columns, mul_vec, sparse_solve};

/// Per band quantities which do not depend on the linearization point.
struct BandTerms<'a> {
    /// Position of the band in the acquisition
    index: usize,
    observation: &'a BandObservation,
    state_mask: Vec<bool>,
    y: DVector<f64>,
    r_inv: CsrMatrix<f64>,
}

/// Iterated update of a forecast in information form with all the bands of one acquisition.
///
/// At each iteration, every band is linearized at the current estimate `xₗ` (the state is held
/// fixed across the bands of a same iteration), and the normal equations
///
/// `(P⁻¹ + Σ Hᵀ R⁻¹ H) x = P⁻¹ x_f + Σ Hᵀ R⁻¹ (y - h(xₗ) + H xₗ)`
///
/// are solved with a sparse Cholesky factorization. Iterations stop when the largest absolute
/// change of any state entry is below the tolerance, after the first iteration for a linear
/// operator, or when the iteration budget is exhausted. The latter is reported in the
/// analysis, and the last iterate is used.
///
/// The information matrix of the analysis is the left hand side of the last iteration. The
/// innovations hold one entry per band, empty for bands without any valid pixel.
pub fn iterative_update(
    grid: &StateGrid,
    forecast: &Estimate,
    observations: &[BandObservation],
    operator: &dyn ObservationOperator,
    options: IterationOptions,
) -> Result<Analysis, FilterError> {
    forecast.ensure_form(MatrixForm::Information)?;
    grid.check_state(&forecast.state)?;
    grid.check_matrix(&forecast.matrix)?;

    let mut bands = Vec::with_capacity(observations.len());
    for (index, observation) in observations.iter().enumerate() {
        let state_mask = grid.state_mask(&observation.mask)?;
        if observation.valid_count() == 0 {
            continue;
        }
        bands.push(BandTerms {
            index,
            observation,
            state_mask,
            y: observation.reduced_values()?,
            r_inv: observation.noise.information(&observation.mask)?,
        });
    }
    if bands.is_empty() {
        trace!("no valid pixel in any of the {} bands", observations.len());
        return Ok(Analysis::unchanged(forecast, observations.len()));
    }

    let prior_info = &forecast.matrix;
    let prior_vector = mul_vec(prior_info, &forecast.state)?;
    let dim = grid.dim();
    let max_iterations = options.max_iterations.max(1);

    let mut x_lin = forecast.state.clone();
    let mut info = prior_info.clone();
    let mut innovations = vec![DVector::zeros(0); observations.len()];
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let mut lhs = prior_info.clone();
        let mut rhs = prior_vector.clone();

        for band in &bands {
            let valid = band.observation.valid_count();
            let lin = operator.linearize(grid, &x_lin, band.observation)?;
            lin.validate(valid, grid.n_params())?;
            let h = expand_columns(&lin.jacobian, &band.state_mask, dim)?;
            let innovation = &band.y - &lin.predicted;
            let pseudo_obs = &innovation + mul_vec(&h, &x_lin)?;
            let ht_r_inv = &h.transpose() * &band.r_inv;
            lhs = &lhs + &(&ht_r_inv * &h);
            rhs += mul_vec(&ht_r_inv, &pseudo_obs)?;
            innovations[band.index] = innovation;
        }

        let x_new = sparse_solve(&lhs, &rhs)?;
        let change = (&x_new - &x_lin).amax();
        debug!("[{iterations}/{max_iterations}] state change {change:.3e}");
        x_lin = x_new;
        info = lhs;

        if operator.is_linear() || change < options.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            "iterated update not converged after {iterations} iterations (tolerance {:e})",
            options.tolerance
        );
    }

    Ok(Analysis {
        estimate: Estimate {
            state: x_lin,
            matrix: info,
            form: MatrixForm::Information,
            predicted: false,
        },
        innovations,
        iterations,
        converged,
    })
}
