use super::flow::FlowNetwork;
use super::{check_inputs, empty_side_distance, manhattan, EmdEngine, EmdError, EMPTY_CELL};
use crate::distribution::Distribution2D;

/// Full-signature EMD solved as a transportation problem.
///
/// Every non-empty cell of `a` is a supply and every non-empty cell of `b` a
/// demand, all pairs connected. With unequal totals the smaller total is
/// shipped and the cost is divided by the shipped flow.
///
/// O(n^3) in the number of non-empty cells; meant for small grids and
/// reference checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactEmd;

struct Signature {
    weight: f64,
    cell: (usize, usize),
}

fn signature(d: &Distribution2D, cells: impl Iterator<Item = (usize, f64)>) -> Vec<Signature> {
    cells
        .filter(|&(_, w)| w > EMPTY_CELL)
        .map(|(idx, weight)| Signature {
            weight,
            cell: d.coords(idx),
        })
        .collect()
}

impl EmdEngine for ExactEmd {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn distance(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, EmdError> {
        check_inputs(a, b)?;
        let (a_total, b_total) = (a.total(), b.total());
        if let Some(d) = empty_side_distance(a_total, b_total) {
            return Ok(d);
        }

        // With balanced totals, mass shared by a cell stays put at zero cost
        // under any metric ground distance.
        let balanced = (a_total - b_total).abs() <= EMPTY_CELL * a_total.max(b_total);
        let mut settled = 0.0;
        let (supply, demand) = if balanced {
            let mut ra = Vec::with_capacity(a.len());
            let mut rb = Vec::with_capacity(b.len());
            for (&x, &y) in a.cells().iter().zip(b.cells()) {
                let common = x.min(y);
                settled += common;
                ra.push(x - common);
                rb.push(y - common);
            }
            (
                signature(a, ra.into_iter().enumerate()),
                signature(b, rb.into_iter().enumerate()),
            )
        } else {
            (
                signature(a, a.cells().iter().copied().enumerate()),
                signature(b, b.cells().iter().copied().enumerate()),
            )
        };

        if supply.is_empty() || demand.is_empty() {
            return Ok(0.0);
        }

        let n = supply.len();
        let m = demand.len();
        let source = n + m;
        let sink = source + 1;
        let mut net = FlowNetwork::<f64>::new(n + m + 2);
        for (i, s) in supply.iter().enumerate() {
            net.add_edge(source, i, s.weight, 0.0);
            for (j, d) in demand.iter().enumerate() {
                let cost = manhattan(s.cell, d.cell) as f64;
                net.add_edge(i, n + j, s.weight.min(d.weight), cost);
            }
        }
        for (j, d) in demand.iter().enumerate() {
            net.add_edge(n + j, sink, d.weight, 0.0);
        }

        let result = net.min_cost_max_flow(source, sink);
        let shipped = result.flow + settled;
        if shipped <= EMPTY_CELL {
            return Ok(0.0);
        }
        Ok(result.cost / shipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_point_mass_costs_manhattan_distance() {
        let a = Distribution2D::point_mass(6, 6, 0, 5);
        let b = Distribution2D::point_mass(6, 6, 3, 1);
        assert!((ExactEmd.distance(&a, &b).unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn splits_mass_to_nearest_targets() {
        let a = Distribution2D::from_cells(3, 1, vec![0.0, 1.0, 0.0]).unwrap();
        let b = Distribution2D::from_cells(3, 1, vec![0.5, 0.0, 0.5]).unwrap();
        assert!((ExactEmd.distance(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unequal_totals_ship_the_smaller_mass() {
        // Half a unit moves one cell; the surplus at the far end is ignored.
        let a = Distribution2D::from_cells(3, 1, vec![0.5, 0.0, 0.0]).unwrap();
        let b = Distribution2D::from_cells(3, 1, vec![0.0, 1.0, 0.0]).unwrap();
        assert!((ExactEmd.distance(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn matches_diagonal_swap() {
        let a = Distribution2D::from_cells(2, 2, vec![0.5, 0.0, 0.0, 0.5]).unwrap();
        let b = Distribution2D::from_cells(2, 2, vec![0.0, 0.5, 0.5, 0.0]).unwrap();
        assert!((ExactEmd.distance(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }
}
