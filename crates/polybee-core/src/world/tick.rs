use super::metrics::StepTimings;
use super::{CancelToken, SimError, World};
use crate::bee::{Bee, ForageContext, MoveOutcome};
use std::time::Instant;

impl World {
    fn step_bee_phase(&mut self) -> Result<(), SimError> {
        let mut ctx = ForageContext {
            tunnel: self.tunnel.as_ref(),
            grid: &self.grid,
            plants: &mut self.plants,
            rng: &mut self.rng,
            params: &self.params,
            env_width: self.config.env_width,
            env_height: self.config.env_height,
        };
        let (mut blocked, mut crossings, mut visits) = (0usize, 0usize, 0usize);
        for bee in &mut self.bees {
            let report = bee.advance(&mut ctx)?;
            match report.movement {
                MoveOutcome::Blocked => blocked += 1,
                MoveOutcome::Crossed { .. } => crossings += 1,
                MoveOutcome::Moved => {}
            }
            if report.visited.is_some() {
                visits += 1;
            }
        }

        self.blocked_last_step = blocked;
        self.crossings_last_step = crossings;
        self.visits_last_step = visits;
        self.total_blocked += blocked as u64;
        self.total_crossings += crossings as u64;
        self.total_visits += visits as u64;
        Ok(())
    }

    fn step_heatmap_phase(&mut self) -> Result<(), SimError> {
        self.heatmap.update(self.bees.iter().map(Bee::pos))?;
        Ok(())
    }

    /// Advance every bee once, then record their positions in the heatmap.
    pub fn try_step(&mut self) -> Result<StepTimings, SimError> {
        let total_start = Instant::now();
        self.step_index = self.step_index.saturating_add(1);

        let t0 = Instant::now();
        self.step_bee_phase()?;
        let bee_update_us = t0.elapsed().as_micros() as u64;

        let t1 = Instant::now();
        self.step_heatmap_phase()?;
        let heatmap_update_us = t1.elapsed().as_micros() as u64;

        Ok(StepTimings {
            bee_update_us,
            heatmap_update_us,
            total_us: total_start.elapsed().as_micros() as u64,
        })
    }

    pub fn step(&mut self) -> StepTimings {
        self.try_step().unwrap_or_else(|e| panic!("{e}"))
    }

    /// Step up to `iterations` times, stopping early once `cancel` is set.
    /// Returns the number of ticks completed.
    pub fn run(&mut self, iterations: usize, cancel: &CancelToken) -> Result<usize, SimError> {
        for done in 0..iterations {
            if cancel.is_cancelled() {
                tracing::info!(done, iterations, "run cancelled");
                return Ok(done);
            }
            self.try_step()?;
        }
        Ok(iterations)
    }
}
