//! # Cross-Efficiency Matrix
//!
//! Scores every unit through every evaluator's eyes in one shot. Stacking
//! the panel's output weights as `U` (p x s) and input weights as `V`
//! (p x m) gives `E = (U . Y) / (V . X)` elementwise: row i is evaluator
//! i's scoring of the whole cohort.

use ndarray::{Array2, ArrayView2};

/// Replacement for non-positive weighted-input entries; guards the
/// division against degenerate weight rows.
const DENOMINATOR_FLOOR: f64 = 1e-9;

/// Computes the p x n cross-efficiency matrix.
///
/// Numerators are reported as-is: accepted weight rows are bounded below
/// by the weight floor and the data matrices are strictly positive, so a
/// negative weighted output cannot arise here.
pub fn cross_efficiency_matrix(
    u_rows: &Array2<f64>,
    v_rows: &Array2<f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
) -> Array2<f64> {
    let weighted_outputs = u_rows.dot(&y);
    let mut weighted_inputs = v_rows.dot(&x);
    weighted_inputs.mapv_inplace(|w| if w <= 0.0 { DENOMINATOR_FLOOR } else { w });
    weighted_outputs / weighted_inputs
}
