use crate::geometry::Pos2D;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Stable handle to a plant owned by the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlantId(pub u32);

impl PlantId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plant {
    pub pos: Pos2D,
    pub species_id: u32,
    nectar: f64,
    visit_count: u32,
}

impl Plant {
    pub fn new(pos: Pos2D, species_id: u32, nectar: f64) -> Self {
        Self {
            pos,
            species_id,
            nectar: nectar.max(0.0),
            visit_count: 0,
        }
    }

    pub fn nectar(&self) -> f64 {
        self.nectar
    }

    pub fn visit_count(&self) -> u32 {
        self.visit_count
    }

    /// Remove up to `amount` nectar and return what was actually taken.
    pub fn extract(&mut self, amount: f64) -> f64 {
        if !(amount > 0.0) {
            return 0.0;
        }
        let taken = amount.min(self.nectar);
        self.nectar -= taken;
        taken
    }

    pub fn record_visit(&mut self) {
        self.visit_count = self.visit_count.saturating_add(1);
    }
}

/// Rectangular layout of plants: `x,y,w,h:spacing[:jitter[:species[:repeats:dx,dy]]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSpec {
    /// Top-left corner of the patch in environment coordinates.
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Distance between neighbouring plants; zero places a single plant.
    pub spacing: f64,
    /// Standard deviation of the positional jitter applied to every plant.
    pub jitter: f64,
    pub species_id: u32,
    pub repeats: u32,
    /// Offset between consecutive repeats of the patch.
    pub dx: f64,
    pub dy: f64,
}

impl Default for PatchSpec {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.0,
            spacing: 0.0,
            jitter: 0.0,
            species_id: 1,
            repeats: 1,
            dx: 200.0,
            dy: 0.0,
        }
    }
}

impl PatchSpec {
    /// Number of plants along each axis of one repeat.
    pub fn grid_counts(&self) -> (usize, usize) {
        if self.spacing <= 0.0 {
            return (1, 1);
        }
        (
            ((self.w.max(0.0) / self.spacing).floor() as usize).saturating_add(1),
            ((self.h.max(0.0) / self.spacing).floor() as usize).saturating_add(1),
        )
    }

    /// Plants [`PatchSpec::layout`] produces over all repeats, saturating.
    pub fn plant_count(&self) -> usize {
        let (nx, ny) = self.grid_counts();
        nx.saturating_mul(ny).saturating_mul(self.repeats as usize)
    }

    /// Lay out plants for this patch. Positions are clamped to the environment.
    pub fn layout<R: Rng + ?Sized>(
        &self,
        env_w: f64,
        env_h: f64,
        nectar: f64,
        rng: &mut R,
    ) -> Vec<Plant> {
        let (nx, ny) = self.grid_counts();
        let jitter = if self.jitter > 0.0 {
            Normal::new(0.0, self.jitter).ok()
        } else {
            None
        };
        let mut plants = Vec::with_capacity(self.plant_count());
        for r in 0..self.repeats {
            let ox = self.x + self.dx * r as f64;
            let oy = self.y + self.dy * r as f64;
            for j in 0..ny {
                for i in 0..nx {
                    let mut px = ox + i as f64 * self.spacing;
                    let mut py = oy + j as f64 * self.spacing;
                    if let Some(normal) = &jitter {
                        px += normal.sample(rng);
                        py += normal.sample(rng);
                    }
                    let pos = Pos2D::new(px.clamp(0.0, env_w), py.clamp(0.0, env_h));
                    plants.push(Plant::new(pos, self.species_id, nectar));
                }
            }
        }
        plants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn plant_count_saturates_for_tiny_spacing() {
        let patch = PatchSpec {
            w: 400.0,
            h: 200.0,
            spacing: 10.0,
            repeats: 2,
            ..PatchSpec::default()
        };
        assert_eq!(patch.plant_count(), 41 * 21 * 2);
        let dense = PatchSpec {
            spacing: 1e-300,
            ..patch
        };
        assert_eq!(dense.plant_count(), usize::MAX);
    }

    #[test]
    fn extract_never_drives_nectar_negative() {
        let mut plant = Plant::new(Pos2D::new(1.0, 1.0), 1, 1.5);
        assert_eq!(plant.extract(1.0), 1.0);
        assert_eq!(plant.extract(1.0), 0.5);
        assert_eq!(plant.extract(1.0), 0.0);
        assert_eq!(plant.nectar(), 0.0);
    }

    #[test]
    fn extract_rejects_non_positive_requests() {
        let mut plant = Plant::new(Pos2D::default(), 1, 2.0);
        assert_eq!(plant.extract(-1.0), 0.0);
        assert_eq!(plant.extract(f64::NAN), 0.0);
        assert_eq!(plant.nectar(), 2.0);
    }

    #[test]
    fn patch_layout_counts_and_repeats() {
        let patch = PatchSpec {
            x: 10.0,
            y: 10.0,
            w: 20.0,
            h: 10.0,
            spacing: 10.0,
            repeats: 2,
            dx: 50.0,
            ..PatchSpec::default()
        };
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let plants = patch.layout(200.0, 200.0, 3.0, &mut rng);
        assert_eq!(patch.grid_counts(), (3, 2));
        assert_eq!(plants.len(), 12);
        assert_eq!(plants[0].pos, Pos2D::new(10.0, 10.0));
        assert_eq!(plants[6].pos, Pos2D::new(60.0, 10.0));
        assert!(plants.iter().all(|p| p.nectar() == 3.0 && p.visit_count() == 0));
    }

    #[test]
    fn jittered_plants_stay_inside_environment() {
        let patch = PatchSpec {
            w: 5.0,
            h: 5.0,
            spacing: 1.0,
            jitter: 50.0,
            ..PatchSpec::default()
        };
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        for plant in patch.layout(10.0, 10.0, 1.0, &mut rng) {
            assert!((0.0..=10.0).contains(&plant.pos.x));
            assert!((0.0..=10.0).contains(&plant.pos.y));
        }
    }
}
