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

use crate::errors::FilterError;
use crate::linalg::DVector;
use crate::time::{Duration, Epoch, TimeSeries};

/// Returns the epochs from `start` to `end` (inclusive) every `step`, e.g. the 16 day grid of a
/// composite product.
pub fn time_grid(start: Epoch, end: Epoch, step: Duration) -> Vec<Epoch> {
    TimeSeries::inclusive(start, end, step).collect()
}

/// Ensures that all of the values predicted by an observation operator are finite.
pub fn check_operator_output(values: &DVector<f64>) -> Result<(), FilterError> {
    match values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        Some((index, value)) => Err(FilterError::InvalidOperatorOutput {
            index,
            value: *value,
        }),
        None => Ok(()),
    }
}

/// Root mean square of a vector, zero if empty.
pub fn rms(v: &DVector<f64>) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        (v.norm_squared() / v.len() as f64).sqrt()
    }
}

#[test]
fn test_time_grid() {
    use crate::time::Unit;
    let start = Epoch::from_gregorian_utc_at_midnight(2017, 1, 1);
    let grid = time_grid(start, start + Unit::Day * 64, Unit::Day * 16);
    assert_eq!(grid.len(), 5);
    assert_eq!(grid[1], start + Unit::Day * 16);
    assert_eq!(*grid.last().unwrap(), start + Unit::Day * 64);
}

#[test]
fn test_operator_output() {
    assert!(check_operator_output(&DVector::from_vec(vec![1.0, -2.0])).is_ok());
    // NaN never compares equal, so match on the variant
    assert!(matches!(
        check_operator_output(&DVector::from_vec(vec![1.0, f64::NAN])),
        Err(FilterError::InvalidOperatorOutput { index: 1, .. })
    ));
}

#[test]
fn test_rms() {
    assert_eq!(rms(&DVector::zeros(0)), 0.0);
    assert!((rms(&DVector::from_vec(vec![3.0, -3.0])) - 3.0).abs() < f64::EPSILON);
}
