use super::flow::FlowNetwork;
use super::{check_inputs, empty_side_distance, manhattan, EmdEngine, EmdError};
use crate::distribution::Distribution2D;

/// Integer EMD with ground distance capped at `threshold`.
///
/// `p` are supplies and `q` demands; their totals must match. Source `i` may
/// ship to sink `j` directly for `c_vals[i][k]` where `j = c_inds[i][k]`, or
/// through a shared transshipment node for `threshold`. Returns the minimum
/// total cost.
pub fn thresholded_emd(
    p: &[i64],
    q: &[i64],
    c_inds: &[Vec<usize>],
    c_vals: &[Vec<i64>],
    threshold: i64,
) -> Result<i64, EmdError> {
    if threshold < 0 {
        return Err(EmdError::InvalidThreshold(threshold));
    }
    if p.iter().chain(q).any(|&v| v < 0) {
        return Err(EmdError::InvalidMass);
    }
    for rows in [c_inds.len(), c_vals.len()] {
        if rows != p.len() {
            return Err(EmdError::CostShapeMismatch {
                expected: p.len(),
                actual: rows,
            });
        }
    }
    let supply: i64 = p.iter().sum();
    let demand: i64 = q.iter().sum();
    if supply != demand {
        return Err(EmdError::UnbalancedMass { supply, demand });
    }
    if supply == 0 {
        return Ok(0);
    }

    // Nodes: sources 0..n, sinks n..n+m, then transshipment, super source, super sink.
    let n = p.len();
    let m = q.len();
    let trans = n + m;
    let source = trans + 1;
    let sink = trans + 2;
    let mut net = FlowNetwork::<i64>::new(n + m + 3);

    for (i, &pi) in p.iter().enumerate() {
        if pi == 0 {
            continue;
        }
        net.add_edge(source, i, pi, 0);
        net.add_edge(i, trans, pi, threshold);
        if c_inds[i].len() != c_vals[i].len() {
            return Err(EmdError::InvalidCostEntry {
                source_idx: i,
                target: c_inds[i].len().min(c_vals[i].len()),
            });
        }
        for (&j, &cost) in c_inds[i].iter().zip(&c_vals[i]) {
            if j >= m || cost < 0 {
                return Err(EmdError::InvalidCostEntry {
                    source_idx: i,
                    target: j,
                });
            }
            let cap = pi.min(q[j]);
            if cap > 0 {
                net.add_edge(i, n + j, cap, cost);
            }
        }
    }
    for (j, &qj) in q.iter().enumerate() {
        if qj == 0 {
            continue;
        }
        net.add_edge(trans, n + j, qj, 0);
        net.add_edge(n + j, sink, qj, 0);
    }

    let result = net.min_cost_max_flow(source, sink);
    if result.flow != supply {
        return Err(EmdError::Infeasible {
            shipped: result.flow,
            required: supply,
        });
    }
    Ok(result.cost)
}

/// Scale `d` to integer cells summing to `mass`.
///
/// Floors every cell, then hands the remaining units to the cells with the
/// largest fractional parts, earlier cells first on ties.
pub fn scale_to_mass(d: &Distribution2D, mass: i64) -> Vec<i64> {
    let total = d.total();
    if !(total > 0.0) || mass <= 0 {
        return vec![0; d.len()];
    }
    let exact: Vec<f64> = d
        .cells()
        .iter()
        .map(|v| v / total * mass as f64)
        .collect();
    let mut scaled: Vec<i64> = exact.iter().map(|v| v.floor() as i64).collect();
    let remainder = mass - scaled.iter().sum::<i64>();
    if remainder > 0 {
        let mut order: Vec<usize> = (0..exact.len()).collect();
        order.sort_by(|&i, &j| {
            let fi = exact[i] - exact[i].floor();
            let fj = exact[j] - exact[j].floor();
            fj.total_cmp(&fi).then(i.cmp(&j))
        });
        for &idx in order.iter().take(remainder as usize) {
            scaled[idx] += 1;
        }
    }
    scaled
}

/// Heatmap-facing wrapper around [`thresholded_emd`].
///
/// Both inputs are normalised and scaled to `multiplier` integer units, or to
/// one unit per cell when the grid has more cells than that. The ground
/// distance is Manhattan in cells, capped at `threshold`, or at the
/// grid diameter `(nx-1)+(ny-1)` when `threshold` is zero.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdedEmd {
    multiplier: u32,
    threshold: i64,
}

impl ThresholdedEmd {
    pub fn new(multiplier: u32, threshold: i64) -> Self {
        Self {
            multiplier: multiplier.max(1),
            threshold: threshold.max(0),
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Integer mass both sides are scaled to on an `nx` by `ny` grid.
    pub fn mass_for(&self, nx: usize, ny: usize) -> i64 {
        (self.multiplier as i64).max(nx.saturating_mul(ny) as i64)
    }

    pub fn threshold_for(&self, nx: usize, ny: usize) -> i64 {
        if self.threshold > 0 {
            self.threshold
        } else {
            (nx.saturating_sub(1) + ny.saturating_sub(1)) as i64
        }
    }
}

impl EmdEngine for ThresholdedEmd {
    fn name(&self) -> &'static str {
        "thresholded"
    }

    fn distance(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, EmdError> {
        check_inputs(a, b)?;
        if let Some(d) = empty_side_distance(a.total(), b.total()) {
            return Ok(d);
        }
        let (nx, ny) = a.dims();
        let mass = self.mass_for(nx, ny);
        let threshold = self.threshold_for(nx, ny);
        let mut pa = scale_to_mass(a, mass);
        let mut qb = scale_to_mass(b, mass);

        // The capped distance is still a metric, so shared mass stays put.
        for (x, y) in pa.iter_mut().zip(qb.iter_mut()) {
            let common = (*x).min(*y);
            *x -= common;
            *y -= common;
        }

        let sources: Vec<usize> = (0..pa.len()).filter(|&i| pa[i] > 0).collect();
        let sinks: Vec<usize> = (0..qb.len()).filter(|&j| qb[j] > 0).collect();
        if sources.is_empty() {
            return Ok(0.0);
        }

        let p: Vec<i64> = sources.iter().map(|&i| pa[i]).collect();
        let q: Vec<i64> = sinks.iter().map(|&j| qb[j]).collect();
        let mut c_inds = Vec::with_capacity(sources.len());
        let mut c_vals = Vec::with_capacity(sources.len());
        for &i in &sources {
            let from = a.coords(i);
            let mut inds = Vec::new();
            let mut vals = Vec::new();
            for (k, &j) in sinks.iter().enumerate() {
                let cost = manhattan(from, b.coords(j)) as i64;
                if cost < threshold {
                    inds.push(k);
                    vals.push(cost);
                }
            }
            c_inds.push(inds);
            c_vals.push(vals);
        }

        let cost = thresholded_emd(&p, &q, &c_inds, &c_vals, threshold)?;
        Ok(cost as f64 / mass as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_arcs_beat_transshipment() {
        let cost = thresholded_emd(&[3, 1], &[1, 3], &[vec![0, 1], vec![1]], &[vec![0, 1], vec![0]], 5)
            .unwrap();
        // One unit stays, two move at cost 1, one stays at the second source.
        assert_eq!(cost, 2);
    }

    #[test]
    fn missing_arcs_fall_back_to_threshold() {
        let cost = thresholded_emd(&[2], &[2], &[vec![]], &[vec![]], 4).unwrap();
        assert_eq!(cost, 8);
    }

    #[test]
    fn rejects_unbalanced_and_negative_input() {
        assert_eq!(
            thresholded_emd(&[2], &[1], &[vec![]], &[vec![]], 1),
            Err(EmdError::UnbalancedMass { supply: 2, demand: 1 })
        );
        assert_eq!(
            thresholded_emd(&[-1, 1], &[0], &[vec![], vec![]], &[vec![], vec![]], 1),
            Err(EmdError::InvalidMass)
        );
        assert!(matches!(
            thresholded_emd(&[1], &[1], &[vec![3]], &[vec![0]], 1),
            Err(EmdError::InvalidCostEntry { .. })
        ));
        assert!(matches!(
            thresholded_emd(&[1], &[1], &[], &[], 1),
            Err(EmdError::CostShapeMismatch { .. })
        ));
    }

    #[test]
    fn largest_remainder_scaling_is_exact_and_deterministic() {
        let d = Distribution2D::from_cells(3, 1, vec![1.0, 1.0, 1.0]).unwrap();
        let scaled = scale_to_mass(&d, 10);
        assert_eq!(scaled.iter().sum::<i64>(), 10);
        assert_eq!(scaled, vec![4, 3, 3]);
    }

    #[test]
    fn threshold_caps_long_moves() {
        let a = Distribution2D::point_mass(10, 1, 0, 0);
        let b = Distribution2D::point_mass(10, 1, 9, 0);
        let capped = ThresholdedEmd::new(100, 3).distance(&a, &b).unwrap();
        assert!((capped - 3.0).abs() < 1e-12);
        let full = ThresholdedEmd::new(100, 0).distance(&a, &b).unwrap();
        assert!((full - 9.0).abs() < 1e-12);
    }

    #[test]
    fn grids_larger_than_the_multiplier_keep_one_unit_per_cell() {
        let tm = ThresholdedEmd::new(1000, 0);
        assert_eq!(tm.mass_for(45, 25), 1125);
        assert_eq!(tm.mass_for(10, 10), 1000);
        let uniform = Distribution2D::uniform(45, 25);
        let corner = Distribution2D::point_mass(45, 25, 0, 0);
        // Mean of x + y over the grid: 22 + 12.
        let d = tm.distance(&uniform, &corner).unwrap();
        assert!((d - 34.0).abs() < 1e-9, "{d}");
        let approx = crate::emd::ApproxEmd.distance(&uniform, &corner).unwrap();
        assert!((d - approx).abs() < 1e-9);
    }
}
