//! Earth Mover's Distance engines over [`Distribution2D`] grids.
//!
//! Ground distance is Manhattan distance in cell units throughout.

pub mod approx;
pub mod exact;
pub mod flow;
pub mod thresholded;

pub use approx::ApproxEmd;
pub use exact::ExactEmd;
pub use thresholded::{thresholded_emd, ThresholdedEmd};

use crate::config::{EmdBackend, SimConfig};
use crate::distribution::Distribution2D;
use thiserror::Error;

/// Mass at or below this is treated as an empty cell.
pub const EMPTY_CELL: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmdError {
    #[error("distribution sizes differ: {a:?} vs {b:?}")]
    DimensionMismatch { a: (usize, usize), b: (usize, usize) },
    #[error("distributions must contain finite, non-negative mass")]
    InvalidMass,
    #[error("supply total ({supply}) differs from demand total ({demand})")]
    UnbalancedMass { supply: i64, demand: i64 },
    #[error("cost table has {actual} rows for {expected} sources")]
    CostShapeMismatch { expected: usize, actual: usize },
    #[error("cost entry {source_idx}->{target} is negative or out of range")]
    InvalidCostEntry { source_idx: usize, target: usize },
    #[error("threshold must be non-negative (got {0})")]
    InvalidThreshold(i64),
    #[error("flow solver shipped {shipped} of {required} units")]
    Infeasible { shipped: i64, required: i64 },
}

/// Distance between two mass distributions of equal grid size.
pub trait EmdEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn distance(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, EmdError>;
}

/// Build the engine selected by `backend`.
pub fn engine_for(backend: EmdBackend, multiplier: u32, threshold: i64) -> Box<dyn EmdEngine> {
    match backend {
        EmdBackend::Approx => Box::new(ApproxEmd),
        EmdBackend::Exact => Box::new(ExactEmd),
        EmdBackend::Thresholded => Box::new(ThresholdedEmd::new(multiplier, threshold)),
    }
}

pub fn engine_from_config(config: &SimConfig) -> Box<dyn EmdEngine> {
    engine_for(config.emd_backend, config.emd_multiplier, config.emd_threshold)
}

pub(crate) fn check_inputs(a: &Distribution2D, b: &Distribution2D) -> Result<(), EmdError> {
    if a.dims() != b.dims() {
        return Err(EmdError::DimensionMismatch {
            a: a.dims(),
            b: b.dims(),
        });
    }
    if !(a.is_non_negative() && b.is_non_negative()) {
        return Err(EmdError::InvalidMass);
    }
    Ok(())
}

/// Result for the cases where at least one side carries no mass: zero when
/// both are empty, otherwise the total of the non-empty side.
pub(crate) fn empty_side_distance(a_total: f64, b_total: f64) -> Option<f64> {
    match (a_total <= EMPTY_CELL, b_total <= EMPTY_CELL) {
        (true, true) => Some(0.0),
        (true, false) => Some(b_total),
        (false, true) => Some(a_total),
        (false, false) => None,
    }
}

#[inline]
pub(crate) fn manhattan(a: (usize, usize), b: (usize, usize)) -> usize {
    a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<Box<dyn EmdEngine>> {
        vec![
            engine_for(EmdBackend::Approx, 1000, 0),
            engine_for(EmdBackend::Exact, 1000, 0),
            engine_for(EmdBackend::Thresholded, 1000, 0),
        ]
    }

    fn lumpy(nx: usize, ny: usize, seed: usize) -> Distribution2D {
        let cells = (0..nx * ny)
            .map(|i| ((i * 7 + seed * 13) % 11) as f64)
            .collect();
        Distribution2D::from_cells(nx, ny, cells).unwrap().normalized()
    }

    #[test]
    fn identical_inputs_have_zero_distance() {
        let u = Distribution2D::uniform(6, 4);
        let l = lumpy(6, 4, 1);
        for engine in engines() {
            assert!(engine.distance(&u, &u).unwrap() <= 1e-5, "{}", engine.name());
            assert!(engine.distance(&l, &l).unwrap() <= 1e-5, "{}", engine.name());
        }
    }

    #[test]
    fn distance_is_symmetric_and_non_negative() {
        let a = lumpy(5, 4, 2);
        let b = lumpy(5, 4, 5);
        for engine in engines() {
            let ab = engine.distance(&a, &b).unwrap();
            let ba = engine.distance(&b, &a).unwrap();
            assert!(ab >= 0.0);
            assert!((ab - ba).abs() < 1e-6, "{}: {ab} vs {ba}", engine.name());
        }
    }

    #[test]
    fn triangle_inequality_holds() {
        let a = lumpy(4, 4, 1);
        let b = lumpy(4, 4, 3);
        let c = Distribution2D::point_mass(4, 4, 3, 0);
        for engine in engines() {
            let ab = engine.distance(&a, &b).unwrap();
            let bc = engine.distance(&b, &c).unwrap();
            let ac = engine.distance(&a, &c).unwrap();
            assert!(ac <= ab + bc + 0.1, "{}", engine.name());
        }
    }

    #[test]
    fn uniform_against_corner_mass() {
        let u = Distribution2D::uniform(10, 10);
        let corner = Distribution2D::point_mass(10, 10, 0, 0);
        let exact = ExactEmd.distance(&u, &corner).unwrap();
        let thresholded = ThresholdedEmd::new(1000, 0).distance(&u, &corner).unwrap();
        let approx = ApproxEmd.distance(&u, &corner).unwrap();
        assert!((exact - 9.0).abs() < 1e-9);
        assert!((thresholded - 9.0).abs() < 1e-9);
        assert!((approx - exact).abs() <= 0.05 * exact);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = Distribution2D::uniform(3, 3);
        let b = Distribution2D::uniform(3, 4);
        for engine in engines() {
            assert!(matches!(
                engine.distance(&a, &b),
                Err(EmdError::DimensionMismatch { .. })
            ));
        }
    }

    #[test]
    fn empty_sides() {
        let z = Distribution2D::zeros(3, 3);
        let u = Distribution2D::uniform(3, 3);
        for engine in engines() {
            assert_eq!(engine.distance(&z, &z).unwrap(), 0.0);
            assert!((engine.distance(&z, &u).unwrap() - 1.0).abs() < 1e-12);
        }
    }
}
