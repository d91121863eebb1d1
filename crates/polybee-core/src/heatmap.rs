use crate::distribution::Distribution2D;
use crate::emd::{EmdEngine, EmdError};
use crate::geometry::Pos2D;
use crate::spatial::clamp_index;
use std::io::{self, Write};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeatmapError {
    #[error("heatmap needs a positive environment and cell size (got {width} x {height}, cell {cell_size})")]
    InvalidDimensions {
        width: f64,
        height: f64,
        cell_size: f64,
    },
    #[error("bee at ({x}, {y}) is outside the environment ({width} x {height})")]
    OutOfBounds {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    #[error("target is {actual:?} cells but the heatmap is {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error(transparent)]
    Emd(#[from] EmdError),
}

/// Occupancy counts of bee positions over a grid covering the environment.
pub struct Heatmap {
    env_width: f64,
    env_height: f64,
    cell_size: f64,
    nx: usize,
    ny: usize,
    /// Column-major, `x * ny + y`.
    counts: Vec<u64>,
    samples: u64,
    normalized: Distribution2D,
    uniform: Distribution2D,
    anti_target: Distribution2D,
    /// Filled on first use; the exact engine is slow on large grids.
    high_emd: OnceLock<f64>,
    engine: Box<dyn EmdEngine>,
}

impl Heatmap {
    pub fn new(
        env_width: f64,
        env_height: f64,
        cell_size: f64,
        engine: Box<dyn EmdEngine>,
    ) -> Result<Self, HeatmapError> {
        let valid = [env_width, env_height, cell_size]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if !valid {
            return Err(HeatmapError::InvalidDimensions {
                width: env_width,
                height: env_height,
                cell_size,
            });
        }
        let nx = (env_width / cell_size).ceil() as usize;
        let ny = (env_height / cell_size).ceil() as usize;
        if nx as f64 * cell_size != env_width || ny as f64 * cell_size != env_height {
            tracing::warn!(
                env_width,
                env_height,
                cell_size,
                nx,
                ny,
                "environment size is not a multiple of the heatmap cell size; edge cells are partial"
            );
        }

        let uniform = Distribution2D::uniform(nx, ny);
        let anti_target = Distribution2D::point_mass(nx, ny, 0, 0);
        tracing::debug!(nx, ny, engine = engine.name(), "heatmap initialised");

        Ok(Self {
            env_width,
            env_height,
            cell_size,
            nx,
            ny,
            counts: vec![0; nx * ny],
            samples: 0,
            normalized: Distribution2D::zeros(nx, ny),
            uniform,
            anti_target,
            high_emd: OnceLock::new(),
            engine,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn count(&self, x: usize, y: usize) -> u64 {
        self.counts[x * self.ny + y]
    }

    /// Sum of all counts; equals ticks times bees.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Counts scaled to unit mass, or all zeros before the first sample.
    pub fn normalized(&self) -> &Distribution2D {
        &self.normalized
    }

    pub fn uniform(&self) -> &Distribution2D {
        &self.uniform
    }

    /// Unit mass in the top-left cell.
    pub fn anti_target(&self) -> &Distribution2D {
        &self.anti_target
    }

    /// EMD between the uniform and anti-target fixtures; a reference upper value.
    /// Computed on the first call and cached.
    pub fn high_emd(&self) -> Result<f64, HeatmapError> {
        if let Some(v) = self.high_emd.get() {
            return Ok(*v);
        }
        let v = self.engine.distance(&self.uniform, &self.anti_target)?;
        tracing::debug!(high_emd = v, engine = self.engine.name(), "computed reference emd");
        Ok(*self.high_emd.get_or_init(|| v))
    }

    pub fn engine(&self) -> &dyn EmdEngine {
        self.engine.as_ref()
    }

    fn cell_of(&self, pos: Pos2D) -> Result<usize, HeatmapError> {
        let inside = (0.0..=self.env_width).contains(&pos.x) && (0.0..=self.env_height).contains(&pos.y);
        if !inside {
            return Err(HeatmapError::OutOfBounds {
                x: pos.x,
                y: pos.y,
                width: self.env_width,
                height: self.env_height,
            });
        }
        let x = clamp_index(pos.x / self.cell_size, self.nx);
        let y = clamp_index(pos.y / self.cell_size, self.ny);
        Ok(x * self.ny + y)
    }

    /// Add one count per position. Nothing is recorded if any position is
    /// outside the environment.
    pub fn update<I>(&mut self, positions: I) -> Result<(), HeatmapError>
    where
        I: IntoIterator<Item = Pos2D>,
    {
        let cells = positions
            .into_iter()
            .map(|p| self.cell_of(p))
            .collect::<Result<Vec<_>, _>>()?;
        for idx in cells {
            self.counts[idx] += 1;
            self.samples += 1;
        }
        self.recompute_normalized();
        Ok(())
    }

    fn recompute_normalized(&mut self) {
        let cells = if self.samples == 0 {
            vec![0.0; self.counts.len()]
        } else {
            let total = self.samples as f64;
            self.counts.iter().map(|&c| c as f64 / total).collect()
        };
        self.normalized = Distribution2D::from_cells(self.nx, self.ny, cells)
            .unwrap_or_else(|| Distribution2D::zeros(self.nx, self.ny));
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.samples = 0;
        self.recompute_normalized();
    }

    /// EMD between the normalised heatmap and `target`.
    pub fn emd_to(&self, target: &Distribution2D) -> Result<f64, HeatmapError> {
        if target.dims() != self.dims() {
            return Err(HeatmapError::DimensionMismatch {
                expected: self.dims(),
                actual: target.dims(),
            });
        }
        Ok(self.engine.distance(&self.normalized, target)?)
    }

    pub fn emd_between(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, HeatmapError> {
        Ok(self.engine.distance(a, b)?)
    }

    /// One line per `y`, comma separated over `x`.
    pub fn write_counts_csv<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for y in 0..self.ny {
            let row: Vec<String> = (0..self.nx).map(|x| self.count(x, y).to_string()).collect();
            writeln!(out, "{}", row.join(","))?;
        }
        Ok(())
    }

    pub fn write_normalized_csv<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write_distribution_csv(&self.normalized, out)
    }
}

/// Row-per-`y` CSV of a distribution, the layout target files use.
pub fn write_distribution_csv<W: Write>(d: &Distribution2D, out: &mut W) -> io::Result<()> {
    let (nx, ny) = d.dims();
    for y in 0..ny {
        let row: Vec<String> = (0..nx).map(|x| d.get(x, y).to_string()).collect();
        writeln!(out, "{}", row.join(","))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emd::{ApproxEmd, ExactEmd};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn heatmap(w: f64, h: f64, cell: f64) -> Heatmap {
        Heatmap::new(w, h, cell, Box::new(ExactEmd)).unwrap()
    }

    #[test]
    fn dimensions_round_up() {
        let hm = Heatmap::new(95.0, 40.0, 10.0, Box::new(ApproxEmd)).unwrap();
        assert_eq!(hm.dims(), (10, 4));
        assert_eq!(hm.counts().len(), 40);
    }

    #[test]
    fn rejects_zero_cell_size() {
        assert!(matches!(
            Heatmap::new(10.0, 10.0, 0.0, Box::new(ApproxEmd)),
            Err(HeatmapError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn update_counts_positions_and_normalises() {
        let mut hm = heatmap(100.0, 100.0, 10.0);
        hm.update([Pos2D::new(5.0, 5.0), Pos2D::new(15.0, 5.0), Pos2D::new(100.0, 100.0)])
            .unwrap();
        assert_eq!(hm.samples(), 3);
        assert_eq!(hm.count(0, 0), 1);
        assert_eq!(hm.count(1, 0), 1);
        assert_eq!(hm.count(9, 9), 1);
        assert!((hm.normalized().total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_bounds_bee_is_rejected_without_partial_update() {
        let mut hm = heatmap(100.0, 100.0, 10.0);
        let err = hm
            .update([Pos2D::new(5.0, 5.0), Pos2D::new(-0.5, 5.0)])
            .unwrap_err();
        assert!(matches!(err, HeatmapError::OutOfBounds { .. }));
        assert_eq!(hm.samples(), 0);
        assert!(hm.counts().iter().all(|&c| c == 0));
    }

    #[test]
    fn fixtures_and_high_emd() {
        let hm = heatmap(100.0, 100.0, 10.0);
        assert!((hm.uniform().total() - 1.0).abs() < 1e-12);
        assert_eq!(hm.anti_target().get(0, 0), 1.0);
        assert!((hm.high_emd().unwrap() - 9.0).abs() < 1e-9);
    }

    struct CountingEngine(Arc<AtomicUsize>);

    impl EmdEngine for CountingEngine {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn distance(&self, a: &Distribution2D, b: &Distribution2D) -> Result<f64, EmdError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            ApproxEmd.distance(a, b)
        }
    }

    #[test]
    fn high_emd_is_computed_once_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hm = Heatmap::new(450.0, 250.0, 10.0, Box::new(CountingEngine(calls.clone()))).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        let first = hm.high_emd().unwrap();
        let second = hm.high_emd().unwrap();
        assert_eq!(first, second);
        assert!((first - 34.0).abs() < 1e-9);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reset_clears_counts() {
        let mut hm = heatmap(20.0, 20.0, 10.0);
        hm.update([Pos2D::new(1.0, 1.0)]).unwrap();
        hm.reset();
        assert_eq!(hm.samples(), 0);
        assert_eq!(hm.normalized().total(), 0.0);
    }

    #[test]
    fn emd_to_checks_dimensions() {
        let hm = heatmap(20.0, 20.0, 10.0);
        let wrong = Distribution2D::uniform(3, 2);
        assert!(matches!(
            hm.emd_to(&wrong),
            Err(HeatmapError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn csv_rows_follow_y() {
        let mut hm = heatmap(30.0, 20.0, 10.0);
        hm.update([Pos2D::new(25.0, 5.0), Pos2D::new(5.0, 15.0)]).unwrap();
        let mut out = Vec::new();
        hm.write_counts_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0,0,1\n1,0,0\n");
        let mut out = Vec::new();
        hm.write_normalized_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0,0,0.5\n0.5,0,0\n");
    }
}
