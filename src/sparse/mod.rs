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
use crate::linalg::{CooMatrix, CsrMatrix, DMatrix, DVector};
use snafu::ensure;

mod block;
mod solve;

pub use block::{block_diag, extract_blocks, invert_blocks, map_blocks};
pub use solve::{dense_inverse, sparse_solve};

/// Number of `true` entries of a mask, i.e. the size of the reduced space.
pub fn count_valid(mask: &[bool]) -> usize {
    mask.iter().filter(|valid| **valid).count()
}

/// Maps each full index to its index in the reduced space, if it is kept.
fn reduced_indices(mask: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    mask.iter()
        .map(|valid| {
            if *valid {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect()
}

/// Indices of the full space which are kept by the mask, in increasing order.
fn kept_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, valid)| valid.then_some(i))
        .collect()
}

fn check_mask(mask: &[bool], dim: usize, what: &'static str) -> Result<(), FilterError> {
    ensure!(
        mask.len() == dim,
        ShapeMismatchSnafu {
            what,
            expected: dim,
            got: mask.len()
        }
    );
    Ok(())
}

/// Mask-driven reduction to (and expansion from) the subspace of valid pixels.
///
/// Squeezing a matrix keeps the rows and columns of the valid entries. Without a mask, the
/// index `i` is dropped only when both row `i` and column `i` are entirely zero, so that the
/// result is always square. Expansion scatters the reduced entries back into a zero
/// initialized object of the full size, such that `squeeze(expand(v, mask), mask) == v`.
pub trait Squeeze: Sized {
    fn squeeze(&self, mask: Option<&[bool]>) -> Result<Self, FilterError>;

    fn expand(&self, mask: &[bool], full_size: usize) -> Result<Self, FilterError>;
}

impl Squeeze for DVector<f64> {
    fn squeeze(&self, mask: Option<&[bool]>) -> Result<Self, FilterError> {
        match mask {
            Some(mask) => {
                check_mask(mask, self.len(), "mask length for vector squeeze")?;
                Ok(DVector::from_iterator(
                    count_valid(mask),
                    self.iter()
                        .zip(mask.iter())
                        .filter_map(|(v, valid)| valid.then_some(*v)),
                ))
            }
            None => {
                let kept = self.iter().copied().filter(|v| *v != 0.0).collect::<Vec<_>>();
                Ok(DVector::from_vec(kept))
            }
        }
    }

    fn expand(&self, mask: &[bool], full_size: usize) -> Result<Self, FilterError> {
        check_mask(mask, full_size, "mask length for vector expansion")?;
        ensure!(
            self.len() == count_valid(mask),
            ShapeMismatchSnafu {
                what: "reduced vector length for expansion",
                expected: count_valid(mask),
                got: self.len()
            }
        );
        let mut full = DVector::zeros(full_size);
        for (reduced, i) in kept_indices(mask).into_iter().enumerate() {
            full[i] = self[reduced];
        }
        Ok(full)
    }
}

impl Squeeze for DMatrix<f64> {
    fn squeeze(&self, mask: Option<&[bool]>) -> Result<Self, FilterError> {
        ensure!(
            self.is_square(),
            ShapeMismatchSnafu {
                what: "squeeze requires a square matrix",
                expected: self.nrows(),
                got: self.ncols()
            }
        );
        let n = self.nrows();
        let keep = match mask {
            Some(mask) => {
                check_mask(mask, n, "mask length for matrix squeeze")?;
                mask.to_vec()
            }
            None => (0..n)
                .map(|i| {
                    self.row(i).iter().any(|v| *v != 0.0)
                        || self.column(i).iter().any(|v| *v != 0.0)
                })
                .collect(),
        };
        let kept = kept_indices(&keep);
        Ok(self.select_rows(kept.iter()).select_columns(kept.iter()))
    }

    fn expand(&self, mask: &[bool], full_size: usize) -> Result<Self, FilterError> {
        check_mask(mask, full_size, "mask length for matrix expansion")?;
        let m = count_valid(mask);
        ensure!(
            self.nrows() == m && self.ncols() == m,
            ShapeMismatchSnafu {
                what: "reduced matrix dimension for expansion",
                expected: m,
                got: self.nrows().max(self.ncols())
            }
        );
        let kept = kept_indices(mask);
        let mut full = DMatrix::zeros(full_size, full_size);
        for (ri, i) in kept.iter().enumerate() {
            for (rj, j) in kept.iter().enumerate() {
                full[(*i, *j)] = self[(ri, rj)];
            }
        }
        Ok(full)
    }
}

impl Squeeze for CsrMatrix<f64> {
    fn squeeze(&self, mask: Option<&[bool]>) -> Result<Self, FilterError> {
        ensure!(
            self.nrows() == self.ncols(),
            ShapeMismatchSnafu {
                what: "squeeze requires a square matrix",
                expected: self.nrows(),
                got: self.ncols()
            }
        );
        let n = self.nrows();
        let keep = match mask {
            Some(mask) => {
                check_mask(mask, n, "mask length for matrix squeeze")?;
                mask.to_vec()
            }
            None => {
                let mut keep = vec![false; n];
                for (i, j, v) in self.triplet_iter() {
                    if *v != 0.0 {
                        keep[i] = true;
                        keep[j] = true;
                    }
                }
                keep
            }
        };
        let index = reduced_indices(&keep);
        let m = count_valid(&keep);
        let mut coo = CooMatrix::new(m, m);
        for (i, j, v) in self.triplet_iter() {
            if let (Some(ri), Some(rj)) = (index[i], index[j]) {
                coo.push(ri, rj, *v);
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    fn expand(&self, mask: &[bool], full_size: usize) -> Result<Self, FilterError> {
        check_mask(mask, full_size, "mask length for matrix expansion")?;
        let m = count_valid(mask);
        ensure!(
            self.nrows() == m && self.ncols() == m,
            ShapeMismatchSnafu {
                what: "reduced matrix dimension for expansion",
                expected: m,
                got: self.nrows().max(self.ncols())
            }
        );
        let kept = kept_indices(mask);
        let mut coo = CooMatrix::new(full_size, full_size);
        for (ri, rj, v) in self.triplet_iter() {
            coo.push(kept[ri], kept[rj], *v);
        }
        Ok(CsrMatrix::from(&coo))
    }
}

/// Keeps only the rows of the valid entries of the mask (all columns are kept).
pub fn select_rows(matrix: &CsrMatrix<f64>, mask: &[bool]) -> Result<CsrMatrix<f64>, FilterError> {
    check_mask(mask, matrix.nrows(), "mask length for row selection")?;
    let index = reduced_indices(mask);
    let mut coo = CooMatrix::new(count_valid(mask), matrix.ncols());
    for (i, j, v) in matrix.triplet_iter() {
        if let Some(ri) = index[i] {
            coo.push(ri, j, *v);
        }
    }
    Ok(CsrMatrix::from(&coo))
}

/// Scatters the columns of a matrix defined over the reduced space onto the full space.
pub fn expand_columns(
    matrix: &CsrMatrix<f64>,
    mask: &[bool],
    full_size: usize,
) -> Result<CsrMatrix<f64>, FilterError> {
    check_mask(mask, full_size, "mask length for column expansion")?;
    ensure!(
        matrix.ncols() == count_valid(mask),
        ShapeMismatchSnafu {
            what: "reduced column count for expansion",
            expected: count_valid(mask),
            got: matrix.ncols()
        }
    );
    let kept = kept_indices(mask);
    let mut coo = CooMatrix::new(matrix.nrows(), full_size);
    for (i, rj, v) in matrix.triplet_iter() {
        coo.push(i, kept[rj], *v);
    }
    Ok(CsrMatrix::from(&coo))
}

/// Returns the main diagonal of a square sparse matrix.
pub fn diagonal(matrix: &CsrMatrix<f64>) -> DVector<f64> {
    let n = matrix.nrows().min(matrix.ncols());
    let mut diag = DVector::zeros(n);
    for (i, row) in matrix.row_iter().enumerate().take(n) {
        for (j, v) in row.col_indices().iter().zip(row.values()) {
            if *j == i {
                diag[i] += *v;
            }
        }
    }
    diag
}

/// Builds a sparse diagonal matrix, skipping the zero entries.
pub fn diagonal_matrix(diag: &DVector<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(diag.len(), diag.len());
    for (i, v) in diag.iter().enumerate() {
        if *v != 0.0 {
            coo.push(i, i, *v);
        }
    }
    CsrMatrix::from(&coo)
}

/// Sparse matrix times dense vector.
pub fn mul_vec(matrix: &CsrMatrix<f64>, vector: &DVector<f64>) -> Result<DVector<f64>, FilterError> {
    ensure!(
        matrix.ncols() == vector.len(),
        ShapeMismatchSnafu {
            what: "vector length for sparse product",
            expected: matrix.ncols(),
            got: vector.len()
        }
    );
    Ok(DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(j, v)| v * vector[*j])
                .sum::<f64>()
        }),
    ))
}

/// Multiplies each row `i` of the matrix by `scale[i]`, i.e. computes `diag(scale) * matrix`.
pub fn scale_rows(
    matrix: &CsrMatrix<f64>,
    scale: &DVector<f64>,
) -> Result<CsrMatrix<f64>, FilterError> {
    ensure!(
        matrix.nrows() == scale.len(),
        ShapeMismatchSnafu {
            what: "row scaling length",
            expected: matrix.nrows(),
            got: scale.len()
        }
    );
    let mut coo = CooMatrix::new(matrix.nrows(), matrix.ncols());
    for (i, j, v) in matrix.triplet_iter() {
        coo.push(i, j, v * scale[i]);
    }
    Ok(CsrMatrix::from(&coo))
}

/// Converts a sparse matrix to a dense one. Only meant for small matrices and for tests.
pub fn to_dense(matrix: &CsrMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(matrix.nrows(), matrix.ncols());
    for (i, j, v) in matrix.triplet_iter() {
        dense[(i, j)] += *v;
    }
    dense
}

/// Converts a dense matrix to a sparse one, dropping the exact zeros.
pub fn from_dense(dense: &DMatrix<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(dense.nrows(), dense.ncols());
    for j in 0..dense.ncols() {
        for i in 0..dense.nrows() {
            let v = dense[(i, j)];
            if v != 0.0 {
                coo.push(i, j, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}

/// Returns the first non finite entry of the sparse matrix, if any.
pub fn first_non_finite(matrix: &CsrMatrix<f64>) -> Option<(usize, f64)> {
    matrix
        .triplet_iter()
        .find(|(_, _, v)| !v.is_finite())
        .map(|(i, _, v)| (i, *v))
}
