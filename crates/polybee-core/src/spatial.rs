use crate::geometry::Pos2D;
use crate::plant::{Plant, PlantId};

/// Uniform bucket grid over plant positions.
///
/// The cell size equals the bee visual range, so the 3x3 window around a
/// query cell always covers the full visual disc.
#[derive(Clone, Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    cols: usize,
    rows: usize,
    buckets: Vec<Vec<PlantId>>,
}

impl SpatialGrid {
    pub fn new(width: f64, height: f64, cell_size: f64) -> Self {
        assert!(
            cell_size.is_finite() && cell_size > 0.0,
            "cell_size must be positive and finite"
        );
        let cols = ((width / cell_size).ceil() as usize).max(1);
        let rows = ((height / cell_size).ceil() as usize).max(1);
        Self {
            cell_size,
            cols,
            rows,
            buckets: vec![Vec::new(); cols * rows],
        }
    }

    /// Build a grid holding every plant in `plants`, in slice order.
    pub fn build(plants: &[Plant], width: f64, height: f64, cell_size: f64) -> Self {
        let mut grid = Self::new(width, height, cell_size);
        for (idx, plant) in plants.iter().enumerate() {
            grid.insert(PlantId(idx as u32), plant.pos);
        }
        grid
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    fn cell_of(&self, pos: Pos2D) -> (usize, usize) {
        (
            clamp_index(pos.x / self.cell_size, self.cols),
            clamp_index(pos.y / self.cell_size, self.rows),
        )
    }

    pub fn insert(&mut self, id: PlantId, pos: Pos2D) {
        let (cx, cy) = self.cell_of(pos);
        self.buckets[cy * self.cols + cx].push(id);
    }

    /// Plants in the 3x3 block of cells around `pos`, clipped at the edges.
    ///
    /// Row-major over the window, then bucket insertion order. Callers filter
    /// by exact distance.
    pub fn neighbors(&self, pos: Pos2D) -> Vec<PlantId> {
        let mut out = Vec::new();
        self.for_each_neighbor(pos, |id| out.push(id));
        out
    }

    pub fn for_each_neighbor(&self, pos: Pos2D, mut visitor: impl FnMut(PlantId)) {
        let (cx, cy) = self.cell_of(pos);
        let y_lo = cy.saturating_sub(1);
        let y_hi = (cy + 1).min(self.rows - 1);
        let x_lo = cx.saturating_sub(1);
        let x_hi = (cx + 1).min(self.cols - 1);
        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                for &id in &self.buckets[y * self.cols + x] {
                    visitor(id);
                }
            }
        }
    }
}

/// Floor `v` into a cell index clamped to `[0, n-1]`.
pub(crate) fn clamp_index(v: f64, n: usize) -> usize {
    if !(v > 0.0) {
        return 0;
    }
    (v.floor() as usize).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plants_at(points: &[(f64, f64)]) -> Vec<Plant> {
        points
            .iter()
            .map(|&(x, y)| Plant::new(Pos2D::new(x, y), 1, 1.0))
            .collect()
    }

    #[test]
    fn every_plant_lands_in_exactly_one_bucket() {
        let plants = plants_at(&[(0.0, 0.0), (99.9, 99.9), (100.0, 100.0), (42.0, 17.0)]);
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        assert_eq!(grid.len(), plants.len());
    }

    #[test]
    fn neighbors_contains_all_plants_within_cell_size() {
        let plants = plants_at(&[(15.0, 15.0), (24.0, 24.0), (5.0, 25.0), (60.0, 60.0)]);
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        let near = grid.neighbors(Pos2D::new(15.0, 15.0));
        assert!(near.contains(&PlantId(0)));
        assert!(near.contains(&PlantId(1)));
        assert!(near.contains(&PlantId(2)));
        assert!(!near.contains(&PlantId(3)));
    }

    #[test]
    fn every_plant_reachable_from_its_own_position() {
        let plants = plants_at(&[(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0), (50.0, 50.0)]);
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 7.0);
        for (idx, plant) in plants.iter().enumerate() {
            assert!(grid.neighbors(plant.pos).contains(&PlantId(idx as u32)));
        }
    }

    #[test]
    fn neighbor_order_is_row_major_then_insertion() {
        let plants = plants_at(&[(25.0, 25.0), (15.0, 15.0), (16.0, 16.0), (35.0, 15.0)]);
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        let near = grid.neighbors(Pos2D::new(25.0, 25.0));
        assert_eq!(near, vec![PlantId(1), PlantId(2), PlantId(3), PlantId(0)]);
    }

    #[test]
    fn positions_outside_grid_are_clamped() {
        let plants = plants_at(&[(99.0, 99.0)]);
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        assert_eq!(grid.neighbors(Pos2D::new(250.0, 250.0)), vec![PlantId(0)]);
        assert!(grid.neighbors(Pos2D::new(-5.0, -5.0)).is_empty());
    }
}
