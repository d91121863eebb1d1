use super::{check_inputs, empty_side_distance, EmdEngine, EmdError};
use crate::distribution::Distribution2D;

/// Sum of the 1-D EMDs of the column and row marginals.
///
/// Each 1-D EMD is the L1 distance between cumulative sums. Inputs are
/// normalised to unit mass first. Exact for separable distributions and a
/// lower bound on the Manhattan EMD in general.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproxEmd;

fn cumulative_l1(a: &[f64], b: &[f64]) -> f64 {
    let mut cum_a = 0.0;
    let mut cum_b = 0.0;
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b) {
        cum_a += x;
        cum_b += y;
        sum += (cum_a - cum_b).abs();
    }
    sum
}

impl EmdEngine for ApproxEmd {
    fn name(&self) -> &'static str {
        "approx"
    }

    fn distance(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, EmdError> {
        check_inputs(a, b)?;
        if let Some(d) = empty_side_distance(a.total(), b.total()) {
            return Ok(d);
        }
        let a = a.normalized();
        let b = b.normalized();
        let columns = cumulative_l1(&a.column_marginals(), &b.column_marginals());
        let rows = cumulative_l1(&a.row_marginals(), &b.row_marginals());
        Ok(columns + rows)
    }
}
