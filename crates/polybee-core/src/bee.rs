use crate::config::SimConfig;
use crate::geometry::Pos2D;
use crate::hive::{Hive, HiveId};
use crate::plant::{Plant, PlantId};
use crate::spatial::SpatialGrid;
use crate::tunnel::{Tunnel, TunnelError};
use rand::Rng;
use std::collections::VecDeque;
use std::f64::consts::TAU;

/// Per-bee movement and foraging parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeeParams {
    pub step_size: f64,
    pub max_dir_delta: f64,
    pub visual_range: f64,
    pub nectar_demand: f64,
    pub path_record_len: usize,
    pub visit_memory_length: usize,
}

impl BeeParams {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            step_size: config.bee_step_size,
            max_dir_delta: config.bee_max_dir_delta,
            visual_range: config.bee_visual_range,
            nectar_demand: config.bee_nectar_demand,
            path_record_len: config.bee_path_record_len,
            visit_memory_length: config.bee_visit_memory_length,
        }
    }
}

/// Borrowed view of the world a bee needs for one tick.
pub struct ForageContext<'a, R: Rng + ?Sized> {
    pub tunnel: Option<&'a Tunnel>,
    pub grid: &'a SpatialGrid,
    pub plants: &'a mut [Plant],
    pub rng: &'a mut R,
    pub params: &'a BeeParams,
    pub env_width: f64,
    pub env_height: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Free move, no tunnel boundary crossed.
    Moved,
    /// Crossed the tunnel boundary through the entrance with this index.
    Crossed { entrance: usize },
    /// Hit a solid tunnel wall; the move was dropped.
    Blocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub movement: MoveOutcome,
    /// Plant a positive amount of nectar was taken from this tick.
    pub visited: Option<PlantId>,
}

#[derive(Clone, Debug)]
pub struct Bee {
    pos: Pos2D,
    heading: f64,
    hive: HiveId,
    in_tunnel: bool,
    trail: VecDeque<Pos2D>,
    recently_visited: VecDeque<PlantId>,
}

impl Bee {
    pub fn new(hive_id: HiveId, hive: &Hive, params: &BeeParams) -> Self {
        let mut bee = Self {
            pos: hive.pos(),
            heading: hive.direction().heading(),
            hive: hive_id,
            in_tunnel: hive.inside_tunnel(),
            trail: VecDeque::with_capacity(params.path_record_len),
            recently_visited: VecDeque::with_capacity(params.visit_memory_length),
        };
        bee.record_position(params.path_record_len);
        bee
    }

    pub fn pos(&self) -> Pos2D {
        self.pos
    }

    /// Heading in radians, in `[0, 2π)`.
    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn hive(&self) -> HiveId {
        self.hive
    }

    pub fn in_tunnel(&self) -> bool {
        self.in_tunnel
    }

    /// Most recent positions, oldest first.
    pub fn trail(&self) -> &VecDeque<Pos2D> {
        &self.trail
    }

    pub fn recently_visited(&self) -> &VecDeque<PlantId> {
        &self.recently_visited
    }

    /// Move, gate against the tunnel, then forage at the resulting position.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut ForageContext<'_, R>,
    ) -> Result<StepReport, TunnelError> {
        let params = *ctx.params;
        let delta = ctx
            .rng
            .random_range(-params.max_dir_delta..=params.max_dir_delta);
        self.heading = wrap_heading(self.heading + delta);

        let proposed = Pos2D::new(
            (self.pos.x + params.step_size * self.heading.cos()).clamp(0.0, ctx.env_width),
            (self.pos.y + params.step_size * self.heading.sin()).clamp(0.0, ctx.env_height),
        );

        let movement = match ctx.tunnel {
            None => MoveOutcome::Moved,
            Some(tunnel) => {
                let info = tunnel.intersects_entrance(self.pos, proposed)?;
                match (info.intersects, info.entrance) {
                    (false, _) => MoveOutcome::Moved,
                    (true, Some(entrance)) if info.within_limits => {
                        MoveOutcome::Crossed { entrance }
                    }
                    _ => MoveOutcome::Blocked,
                }
            }
        };
        match movement {
            MoveOutcome::Moved => self.pos = proposed,
            MoveOutcome::Crossed { .. } => {
                self.pos = proposed;
                self.in_tunnel = !self.in_tunnel;
            }
            MoveOutcome::Blocked => {}
        }

        let visited = self.forage(ctx);
        self.record_position(params.path_record_len);
        Ok(StepReport { movement, visited })
    }

    fn forage<R: Rng + ?Sized>(&mut self, ctx: &mut ForageContext<'_, R>) -> Option<PlantId> {
        let id = select_nearby_unvisited_plant(
            self.pos,
            &self.recently_visited,
            ctx.grid,
            ctx.plants,
            ctx.params.visual_range,
            ctx.rng,
        )?;
        let plant = &mut ctx.plants[id.index()];
        if plant.extract(ctx.params.nectar_demand) > 0.0 {
            plant.record_visit();
            self.remember_visit(id, ctx.params.visit_memory_length);
            Some(id)
        } else {
            None
        }
    }

    fn remember_visit(&mut self, id: PlantId, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.recently_visited.len() >= capacity {
            self.recently_visited.pop_front();
        }
        self.recently_visited.push_back(id);
    }

    fn record_position(&mut self, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.trail.len() >= capacity {
            self.trail.pop_front();
        }
        self.trail.push_back(self.pos);
    }
}

fn wrap_heading(h: f64) -> f64 {
    let wrapped = h.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Pick a visible plant not in `recently_visited`.
///
/// Candidates come from the 3x3 grid neighbourhood and are filtered to the
/// visual range. With several candidates, closer plants are favoured with
/// weight `1.1 * range - distance`, which stays positive for every candidate.
pub fn select_nearby_unvisited_plant<R: Rng + ?Sized>(
    pos: Pos2D,
    recently_visited: &VecDeque<PlantId>,
    grid: &SpatialGrid,
    plants: &[Plant],
    visual_range: f64,
    rng: &mut R,
) -> Option<PlantId> {
    let range_sq = visual_range * visual_range;
    let mut candidates: Vec<(PlantId, f64)> = Vec::new();
    grid.for_each_neighbor(pos, |id| {
        if recently_visited.contains(&id) {
            return;
        }
        let d_sq = pos.distance_sq(plants[id.index()].pos);
        if d_sq <= range_sq {
            candidates.push((id, d_sq.sqrt()));
        }
    });

    match candidates.len() {
        0 => None,
        1 => Some(candidates[0].0),
        _ => {
            let buffer = visual_range * 1.1;
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&(_, d)| (buffer - d).max(0.0))
                .collect();
            let total: f64 = weights.iter().sum();
            if !(total > 0.0) {
                return Some(candidates[0].0);
            }
            let target = rng.random_range(0.0..total);
            let mut cumulative = 0.0;
            for (&(id, _), w) in candidates.iter().zip(&weights) {
                cumulative += w;
                if target < cumulative {
                    return Some(id);
                }
            }
            candidates.last().map(|&(id, _)| id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::{Direction, HiveSpec};
    use crate::tunnel::EntranceSpec;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn params() -> BeeParams {
        BeeParams {
            step_size: 4.0,
            max_dir_delta: 0.0,
            visual_range: 10.0,
            nectar_demand: 1.0,
            path_record_len: 3,
            visit_memory_length: 2,
        }
    }

    fn bee_at(x: f64, y: f64, direction: Direction, params: &BeeParams) -> Bee {
        let hive = Hive::new(&HiveSpec { x, y, direction }, false);
        Bee::new(HiveId(0), &hive, params)
    }

    fn north_gate_tunnel() -> Tunnel {
        let gate = EntranceSpec {
            side: Direction::North,
            e1: 25.0,
            e2: 35.0,
        };
        Tunnel::new(20.0, 20.0, 60.0, 60.0, &[gate]).unwrap()
    }

    #[test]
    fn new_bee_starts_at_hive_with_hive_heading() {
        let p = params();
        let bee = bee_at(5.0, 6.0, Direction::South, &p);
        assert_eq!(bee.pos(), Pos2D::new(5.0, 6.0));
        assert!((bee.heading() - Direction::South.heading()).abs() < 1e-12);
        assert_eq!(bee.trail().len(), 1);
    }

    #[test]
    fn straight_move_without_tunnel() {
        let p = params();
        let mut bee = bee_at(50.0, 50.0, Direction::East, &p);
        let grid = SpatialGrid::new(100.0, 100.0, p.visual_range);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut ctx = ForageContext {
            tunnel: None,
            grid: &grid,
            plants: &mut [],
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        let report = bee.advance(&mut ctx).unwrap();
        assert_eq!(report.movement, MoveOutcome::Moved);
        assert!((bee.pos().x - 54.0).abs() < 1e-9);
        assert!((bee.pos().y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn moves_are_clamped_to_environment() {
        let p = params();
        let mut bee = bee_at(99.0, 50.0, Direction::East, &p);
        let grid = SpatialGrid::new(100.0, 100.0, p.visual_range);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut ctx = ForageContext {
            tunnel: None,
            grid: &grid,
            plants: &mut [],
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        bee.advance(&mut ctx).unwrap();
        assert_eq!(bee.pos().x, 100.0);
    }

    #[test]
    fn solid_wall_blocks_move_and_keeps_heading() {
        let p = params();
        let tunnel = north_gate_tunnel();
        let mut bee = bee_at(30.0, 22.0, Direction::North, &p);
        bee.in_tunnel = true;
        let grid = SpatialGrid::new(100.0, 100.0, p.visual_range);
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut ctx = ForageContext {
            tunnel: Some(&tunnel),
            grid: &grid,
            plants: &mut [],
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        let report = bee.advance(&mut ctx).unwrap();
        assert_eq!(report.movement, MoveOutcome::Blocked);
        assert_eq!(bee.pos(), Pos2D::new(30.0, 22.0));
        assert!((bee.heading() - Direction::North.heading()).abs() < 1e-12);
        assert!(bee.in_tunnel());
    }

    #[test]
    fn entrance_crossing_toggles_in_tunnel() {
        let p = params();
        let tunnel = north_gate_tunnel();
        let mut bee = bee_at(50.0, 22.0, Direction::North, &p);
        bee.in_tunnel = true;
        let grid = SpatialGrid::new(100.0, 100.0, p.visual_range);
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut ctx = ForageContext {
            tunnel: Some(&tunnel),
            grid: &grid,
            plants: &mut [],
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        let report = bee.advance(&mut ctx).unwrap();
        assert_eq!(report.movement, MoveOutcome::Crossed { entrance: 0 });
        assert!((bee.pos().y - 18.0).abs() < 1e-9);
        assert!(!bee.in_tunnel());
    }

    #[test]
    fn visiting_extracts_nectar_and_remembers_plant() {
        let p = BeeParams {
            step_size: 0.0,
            ..params()
        };
        let mut plants = vec![Plant::new(Pos2D::new(52.0, 50.0), 1, 1.5)];
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, p.visual_range);
        let mut bee = bee_at(50.0, 50.0, Direction::East, &p);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut ctx = ForageContext {
            tunnel: None,
            grid: &grid,
            plants: &mut plants,
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        let first = bee.advance(&mut ctx).unwrap();
        assert_eq!(first.visited, Some(PlantId(0)));
        // Remembered plants are skipped on the next tick.
        let second = bee.advance(&mut ctx).unwrap();
        assert_eq!(second.visited, None);
        assert_eq!(plants[0].visit_count(), 1);
        assert!((plants[0].nectar() - 0.5).abs() < 1e-12);
        assert_eq!(bee.recently_visited().len(), 1);
    }

    #[test]
    fn empty_plant_is_not_a_visit() {
        let p = BeeParams {
            step_size: 0.0,
            ..params()
        };
        let mut plants = vec![Plant::new(Pos2D::new(50.0, 50.0), 1, 0.0)];
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, p.visual_range);
        let mut bee = bee_at(50.0, 50.0, Direction::East, &p);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut ctx = ForageContext {
            tunnel: None,
            grid: &grid,
            plants: &mut plants,
            rng: &mut rng,
            params: &p,
            env_width: 100.0,
            env_height: 100.0,
        };
        assert_eq!(bee.advance(&mut ctx).unwrap().visited, None);
        assert_eq!(plants[0].visit_count(), 0);
        assert!(bee.recently_visited().is_empty());
    }

    #[test]
    fn trail_and_memory_are_bounded() {
        let p = params();
        let mut bee = bee_at(50.0, 50.0, Direction::East, &p);
        for i in 0..5 {
            bee.remember_visit(PlantId(i), p.visit_memory_length);
            bee.record_position(p.path_record_len);
        }
        assert_eq!(bee.trail().len(), 3);
        assert_eq!(
            bee.recently_visited().iter().copied().collect::<Vec<_>>(),
            vec![PlantId(3), PlantId(4)]
        );
    }

    #[test]
    fn selection_filters_range_and_memory() {
        let plants = vec![
            Plant::new(Pos2D::new(55.0, 50.0), 1, 1.0),
            Plant::new(Pos2D::new(65.0, 50.0), 1, 1.0),
            Plant::new(Pos2D::new(50.0, 58.0), 1, 1.0),
        ];
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let memory: VecDeque<PlantId> = [PlantId(0)].into_iter().collect();
        for _ in 0..20 {
            let pick = select_nearby_unvisited_plant(
                Pos2D::new(50.0, 50.0),
                &memory,
                &grid,
                &plants,
                10.0,
                &mut rng,
            );
            assert_eq!(pick, Some(PlantId(2)));
        }
    }

    #[test]
    fn selection_prefers_closer_plants() {
        let plants = vec![
            Plant::new(Pos2D::new(50.5, 50.0), 1, 1.0),
            Plant::new(Pos2D::new(59.5, 50.0), 1, 1.0),
        ];
        let grid = SpatialGrid::build(&plants, 100.0, 100.0, 10.0);
        let mut rng = ChaCha12Rng::seed_from_u64(17);
        let memory = VecDeque::new();
        let near = (0..2000)
            .filter(|_| {
                select_nearby_unvisited_plant(
                    Pos2D::new(50.0, 50.0),
                    &memory,
                    &grid,
                    &plants,
                    10.0,
                    &mut rng,
                ) == Some(PlantId(0))
            })
            .count();
        // Weights are 10.5 and 1.5, so the near plant wins about 87.5% of draws.
        assert!(near > 1600 && near < 1900, "near picked {near} times");
    }

    #[test]
    fn heading_wraps_into_range() {
        assert!((wrap_heading(-0.1) - (TAU - 0.1)).abs() < 1e-12);
        assert!((wrap_heading(TAU + 0.2) - 0.2).abs() < 1e-12);
        assert_eq!(wrap_heading(0.0), 0.0);
    }
}
