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

use crate::errors::{FilterError, ShapeMismatchSnafu, SingularMatrixSnafu};
use crate::linalg::{CscMatrix, CsrMatrix, DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use snafu::ensure;

fn factorize(a: &CsrMatrix<f64>) -> Result<CscCholesky<f64>, FilterError> {
    ensure!(
        a.nrows() == a.ncols(),
        ShapeMismatchSnafu {
            what: "sparse system must be square",
            expected: a.nrows(),
            got: a.ncols()
        }
    );
    let csc = CscMatrix::from(a);
    CscCholesky::factor(&csc).map_err(|e| {
        debug!("sparse Cholesky factorization failed: {e}");
        FilterError::SingularMatrix {
            action: "factorizing the sparse system",
        }
    })
}

/// Solves `A x = b` for a sparse symmetric positive definite `A` via a sparse Cholesky factorization.
///
/// Fails with `SingularMatrix` if `A` is not positive definite or if the solution is not finite.
pub fn sparse_solve(a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, FilterError> {
    ensure!(
        a.nrows() == b.len(),
        ShapeMismatchSnafu {
            what: "right hand side length of sparse system",
            expected: a.nrows(),
            got: b.len()
        }
    );
    if b.is_empty() {
        return Ok(DVector::zeros(0));
    }
    let chol = factorize(a)?;
    let rhs = DMatrix::from_column_slice(b.len(), 1, b.as_slice());
    let sol = chol.solve(&rhs);
    ensure!(
        sol.iter().all(|v| v.is_finite()),
        SingularMatrixSnafu {
            action: "solving the sparse system"
        }
    );
    Ok(DVector::from_column_slice(sol.as_slice()))
}

/// Computes the dense inverse of a sparse symmetric positive definite matrix.
///
/// Only used on the reduced (observation) space, where the dimension is the number of valid pixels.
pub fn dense_inverse(a: &CsrMatrix<f64>) -> Result<DMatrix<f64>, FilterError> {
    if a.nrows() == 0 && a.ncols() == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let chol = factorize(a)?;
    let inv = chol.solve(&DMatrix::<f64>::identity(a.nrows(), a.nrows()));
    ensure!(
        inv.iter().all(|v| v.is_finite()),
        SingularMatrixSnafu {
            action: "inverting the sparse system"
        }
    );
    Ok(inv)
}
