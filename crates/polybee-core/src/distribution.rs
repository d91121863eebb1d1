use serde::{Deserialize, Serialize};

/// Non-negative mass over an `nx` by `ny` grid of cells.
///
/// Cells are stored column-major: `cells[x * ny + y]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distribution2D {
    nx: usize,
    ny: usize,
    cells: Vec<f64>,
}

impl Distribution2D {
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            cells: vec![0.0; nx * ny],
        }
    }

    /// Wrap column-major cells. Returns `None` when the length does not match.
    pub fn from_cells(nx: usize, ny: usize, cells: Vec<f64>) -> Option<Self> {
        (cells.len() == nx * ny).then_some(Self { nx, ny, cells })
    }

    /// `1 / (nx * ny)` in every cell.
    pub fn uniform(nx: usize, ny: usize) -> Self {
        let n = nx * ny;
        let v = if n == 0 { 0.0 } else { 1.0 / n as f64 };
        Self {
            nx,
            ny,
            cells: vec![v; n],
        }
    }

    /// Unit mass in cell `(x, y)`.
    pub fn point_mass(nx: usize, ny: usize, x: usize, y: usize) -> Self {
        let mut d = Self::zeros(nx, ny);
        d.set(x, y, 1.0);
        d
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        x * self.ny + y
    }

    /// `(x, y)` of a flat index.
    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx / self.ny, idx % self.ny)
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, v: f64) {
        let idx = self.index(x, y);
        self.cells[idx] = v;
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    pub fn is_non_negative(&self) -> bool {
        self.cells.iter().all(|v| v.is_finite() && *v >= 0.0)
    }

    /// Copy scaled to unit mass; all zeros when the total is zero.
    pub fn normalized(&self) -> Self {
        let total = self.total();
        let cells = if total > 0.0 {
            self.cells.iter().map(|v| v / total).collect()
        } else {
            vec![0.0; self.cells.len()]
        };
        Self {
            nx: self.nx,
            ny: self.ny,
            cells,
        }
    }

    /// Mass summed over each column (one entry per `x`).
    pub fn column_marginals(&self) -> Vec<f64> {
        if self.ny == 0 {
            return vec![0.0; self.nx];
        }
        self.cells.chunks(self.ny).map(|col| col.iter().sum()).collect()
    }

    /// Mass summed over each row (one entry per `y`).
    pub fn row_marginals(&self) -> Vec<f64> {
        let mut rows = vec![0.0; self.ny];
        for (idx, v) in self.cells.iter().enumerate() {
            rows[idx % self.ny] += v;
        }
        rows
    }
}
