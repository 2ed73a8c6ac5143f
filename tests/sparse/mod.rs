extern crate raster_kf;

use approx::assert_abs_diff_eq;
use raster_kf::linalg::{DMatrix, DVector};
use raster_kf::prelude::*;
use raster_kf::sparse::{from_dense, to_dense};

#[test]
fn squeeze_all_valid_is_identity() {
    let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0]);
    let mask: &[bool] = &[true; 3];
    assert_eq!(m.squeeze(Some(mask)).unwrap(), m);
    let sparse = from_dense(&m);
    assert_eq!(to_dense(&sparse.squeeze(Some(mask)).unwrap()), m);
}

#[test]
fn squeeze_drops_empty_rows_and_columns() {
    let m = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 3.0, 0.0, 0.0, 0.0, 7.0, 0.0, 9.0]);
    let expected = DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 7.0, 9.0]);
    assert_eq!(m.squeeze(None).unwrap(), expected);
    assert_eq!(to_dense(&from_dense(&m).squeeze(None).unwrap()), expected);
}

#[test]
fn squeeze_then_expand() {
    let mask: &[bool] = &[false, true, true, false, true];
    let reduced = DVector::from_vec(vec![1.5, -2.0, 4.0]);
    let full = reduced.expand(mask, 5).unwrap();
    assert_eq!(full, DVector::from_vec(vec![0.0, 1.5, -2.0, 0.0, 4.0]));
    assert_eq!(full.squeeze(Some(mask)).unwrap(), reduced);

    let block = from_dense(&DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]));
    let mask: &[bool] = &[true, false, true];
    let expanded = block.expand(mask, 3).unwrap();
    assert_eq!(
        to_dense(&expanded),
        DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 2.0])
    );
    assert_eq!(
        to_dense(&expanded.squeeze(Some(mask)).unwrap()),
        to_dense(&block)
    );
}

#[test]
fn mask_length_is_checked() {
    let v = DVector::from_element(4, 1.0);
    assert!(matches!(
        v.squeeze(Some(&[true, false][..])),
        Err(FilterError::ShapeMismatch { .. })
    ));
}

#[test]
fn block_diagonal_assembly() {
    let a = DMatrix::<f64>::identity(2, 2);
    let b = DMatrix::<f64>::identity(2, 2) * 2.0;
    let m = block_diag(&[a, b]).unwrap();
    assert_eq!((m.nrows(), m.ncols()), (4, 4));
    assert_eq!(
        to_dense(&m),
        DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 2.0, 2.0]))
    );
    assert!(block_diag(&[DMatrix::zeros(2, 3)]).is_err());
}

#[test]
fn solve_spd_system() {
    let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0]);
    let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
    let x = sparse_solve(&from_dense(&a), &b).unwrap();
    assert_abs_diff_eq!(a * x, b, epsilon = 1e-12);

    let not_spd = from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]));
    assert!(matches!(
        sparse_solve(&not_spd, &DVector::from_element(2, 1.0)),
        Err(FilterError::SingularMatrix { .. })
    ));
}
