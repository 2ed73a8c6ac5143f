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

use crate::errors::{FilterError, NotBlockDiagonalSnafu, ShapeMismatchSnafu, SingularMatrixSnafu};
use crate::linalg::{CooMatrix, CsrMatrix, DMatrix};
use rayon::prelude::*;
use snafu::ensure;

/// Builds the sparse block-diagonal matrix of the provided square blocks, in order.
///
/// Each block may have its own size. An empty list produces a 0x0 matrix.
pub fn block_diag(blocks: &[DMatrix<f64>]) -> Result<CsrMatrix<f64>, FilterError> {
    let mut dim = 0;
    for block in blocks {
        ensure!(
            block.is_square(),
            ShapeMismatchSnafu {
                what: "diagonal blocks must be square",
                expected: block.nrows(),
                got: block.ncols()
            }
        );
        dim += block.nrows();
    }

    let mut coo = CooMatrix::new(dim, dim);
    let mut offset = 0;
    for block in blocks {
        for j in 0..block.ncols() {
            for i in 0..block.nrows() {
                let v = block[(i, j)];
                if v != 0.0 {
                    coo.push(offset + i, offset + j, v);
                }
            }
        }
        offset += block.nrows();
    }
    Ok(CsrMatrix::from(&coo))
}

/// Splits a block-diagonal matrix into its dense square blocks of size `block_size`.
pub fn extract_blocks(
    matrix: &CsrMatrix<f64>,
    block_size: usize,
) -> Result<Vec<DMatrix<f64>>, FilterError> {
    ensure!(
        matrix.nrows() == matrix.ncols(),
        ShapeMismatchSnafu {
            what: "block-diagonal matrix must be square",
            expected: matrix.nrows(),
            got: matrix.ncols()
        }
    );
    ensure!(
        block_size > 0 && matrix.nrows() % block_size == 0,
        ShapeMismatchSnafu {
            what: "matrix dimension is not a multiple of the block size",
            expected: block_size,
            got: matrix.nrows()
        }
    );

    let mut blocks = vec![DMatrix::zeros(block_size, block_size); matrix.nrows() / block_size];
    for (row, col, v) in matrix.triplet_iter() {
        ensure!(
            row / block_size == col / block_size || *v == 0.0,
            NotBlockDiagonalSnafu {
                row,
                col,
                block_size
            }
        );
        blocks[row / block_size][(row % block_size, col % block_size)] += *v;
    }
    Ok(blocks)
}

/// Applies a function to every diagonal block (in parallel) and reassembles the result.
///
/// The closure receives the block (pixel) index and the block itself.
pub fn map_blocks<F>(
    matrix: &CsrMatrix<f64>,
    block_size: usize,
    f: F,
) -> Result<CsrMatrix<f64>, FilterError>
where
    F: Fn(usize, DMatrix<f64>) -> Result<DMatrix<f64>, FilterError> + Send + Sync,
{
    let mapped = extract_blocks(matrix, block_size)?
        .into_par_iter()
        .enumerate()
        .map(|(i, block)| f(i, block))
        .collect::<Result<Vec<_>, _>>()?;
    block_diag(&mapped)
}

/// Inverts a block-diagonal matrix block by block.
pub fn invert_blocks(
    matrix: &CsrMatrix<f64>,
    block_size: usize,
) -> Result<CsrMatrix<f64>, FilterError> {
    map_blocks(matrix, block_size, |_, block| {
        let inv = block.try_inverse().ok_or(FilterError::SingularMatrix {
            action: "inverting a diagonal block",
        })?;
        ensure!(
            inv.iter().all(|v| v.is_finite()),
            SingularMatrixSnafu {
                action: "inverting a diagonal block"
            }
        );
        Ok(inv)
    })
}
