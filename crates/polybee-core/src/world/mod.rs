pub mod metrics;
mod tick;

pub use metrics::*;

use crate::bee::{Bee, BeeParams};
use crate::config::{SimConfig, SimConfigError};
use crate::distribution::Distribution2D;
use crate::emd::engine_from_config;
use crate::geometry::Pos2D;
use crate::heatmap::{Heatmap, HeatmapError};
use crate::hive::{Hive, HiveId};
use crate::plant::Plant;
use crate::rng::{create_rng, derive_stream, generate_seed_string, seed_from_str};
use crate::spatial::SpatialGrid;
use crate::tunnel::{Tunnel, TunnelError};
use rand_chacha::ChaCha12Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Substream used for plant layout so it never shifts the movement stream.
const LAYOUT_STREAM: u64 = 1;

/// Shared flag checked at tick and generation boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct World {
    pub(crate) config: SimConfig,
    pub(crate) seed: String,
    pub(crate) rng: ChaCha12Rng,
    pub(crate) params: BeeParams,
    pub(crate) tunnel: Option<Tunnel>,
    pub(crate) hives: Vec<Hive>,
    pub(crate) plants: Vec<Plant>,
    pub(crate) grid: SpatialGrid,
    pub(crate) bees: Vec<Bee>,
    pub(crate) heatmap: Heatmap,
    pub(crate) target: Option<Arc<Distribution2D>>,
    pub(crate) step_index: usize,
    pub(crate) blocked_last_step: usize,
    pub(crate) crossings_last_step: usize,
    pub(crate) visits_last_step: usize,
    pub(crate) total_blocked: u64,
    pub(crate) total_crossings: u64,
    pub(crate) total_visits: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorldInitError {
    #[error(transparent)]
    Config(#[from] SimConfigError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Heatmap(#[from] HeatmapError),
    #[error("hive count ({actual}) exceeds supported maximum ({max})")]
    TooManyHives { max: usize, actual: usize },
    #[error("target is {actual:?} cells but the heatmap is {expected:?}")]
    TargetDimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Invariant violations raised during a tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("heatmap update failed: {0}")]
    Heatmap(#[from] HeatmapError),
    #[error("tunnel gating failed: {0}")]
    Tunnel(#[from] TunnelError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExperimentError {
    #[error("sample_every must be positive")]
    InvalidSampleEvery,
    #[error("steps ({actual}) exceed supported maximum ({max})")]
    TooManySteps { max: usize, actual: usize },
    #[error("sample count ({actual}) exceeds supported maximum ({max})")]
    TooManySamples { max: usize, actual: usize },
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// Use `raw` as the seed, or generate and log one when it is empty.
pub(crate) fn resolve_seed(raw: &str) -> Result<String, SimConfigError> {
    if raw.is_empty() {
        let seed = generate_seed_string();
        tracing::info!(seed = %seed, "generated rng seed");
        return Ok(seed);
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SimConfigError::InvalidSeed(raw.to_string()));
    }
    Ok(raw.to_string())
}

impl World {
    pub const MAX_EXPERIMENT_STEPS: usize = 10_000_000;
    pub const MAX_EXPERIMENT_SAMPLES: usize = 50_000;

    pub fn new(config: SimConfig, target: Option<Arc<Distribution2D>>) -> Self {
        Self::try_new(config, target).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_new(
        mut config: SimConfig,
        target: Option<Arc<Distribution2D>>,
    ) -> Result<Self, WorldInitError> {
        config.validate()?;
        if config.hives.len() > u16::MAX as usize {
            return Err(WorldInitError::TooManyHives {
                max: u16::MAX as usize,
                actual: config.hives.len(),
            });
        }
        let seed = resolve_seed(&config.rng_seed)?;
        config.rng_seed = seed.clone();

        let tunnel = if config.has_tunnel() {
            Some(Tunnel::new(
                config.tunnel_x,
                config.tunnel_y,
                config.tunnel_w,
                config.tunnel_h,
                &config.tunnel_entrances,
            )?)
        } else {
            if !config.tunnel_entrances.is_empty() {
                tracing::warn!(
                    entrances = config.tunnel_entrances.len(),
                    "tunnel entrances given without a tunnel; ignoring them"
                );
            }
            None
        };
        let hives: Vec<Hive> = config
            .hives
            .iter()
            .map(|spec| {
                let inside = tunnel
                    .as_ref()
                    .is_some_and(|t| t.contains(Pos2D::new(spec.x, spec.y)));
                Hive::new(spec, inside)
            })
            .collect();

        let dropped = config.num_bees - config.bees_per_hive() * hives.len();
        if dropped > 0 {
            tracing::warn!(
                num_bees = config.num_bees,
                hives = hives.len(),
                dropped,
                "num-bees is not a multiple of the hive count; dropping the remainder"
            );
        }

        let heatmap = Heatmap::new(
            config.env_width,
            config.env_height,
            config.heatmap_cell_size,
            engine_from_config(&config),
        )?;
        if let Some(t) = &target {
            if t.dims() != heatmap.dims() {
                return Err(WorldInitError::TargetDimensionMismatch {
                    expected: heatmap.dims(),
                    actual: t.dims(),
                });
            }
        }

        let params = BeeParams::from_config(&config);
        let grid = SpatialGrid::new(config.env_width, config.env_height, params.visual_range);
        let mut world = Self {
            rng: create_rng(&seed),
            seed,
            params,
            tunnel,
            hives,
            plants: Vec::new(),
            grid,
            bees: Vec::new(),
            heatmap,
            target,
            config,
            step_index: 0,
            blocked_last_step: 0,
            crossings_last_step: 0,
            visits_last_step: 0,
            total_blocked: 0,
            total_crossings: 0,
            total_visits: 0,
        };
        world.populate();
        tracing::debug!(
            seed = %world.seed,
            bees = world.bees.len(),
            plants = world.plants.len(),
            tunnel = world.tunnel.is_some(),
            "world initialised"
        );
        Ok(world)
    }

    /// Lay out plants, rebuild the grid and respawn bees from the current seed.
    fn populate(&mut self) {
        let cfg = &self.config;
        let mut layout_rng = derive_stream(seed_from_str(&self.seed), LAYOUT_STREAM);
        self.plants = cfg
            .patches
            .iter()
            .flat_map(|patch| {
                patch.layout(
                    cfg.env_width,
                    cfg.env_height,
                    cfg.flower_initial_nectar,
                    &mut layout_rng,
                )
            })
            .collect();
        self.grid = SpatialGrid::build(
            &self.plants,
            cfg.env_width,
            cfg.env_height,
            self.params.visual_range,
        );

        let per_hive = cfg.bees_per_hive();
        self.bees = self
            .hives
            .iter()
            .enumerate()
            .flat_map(|(idx, hive)| {
                let params = &self.params;
                (0..per_hive).map(move |_| Bee::new(HiveId(idx as u16), hive, params))
            })
            .collect();
    }

    /// Restore plants, bees, heatmap and tick count, and reseed from the world seed.
    pub fn reset(&mut self) {
        self.rng = create_rng(&self.seed);
        self.populate();
        self.heatmap.reset();
        self.step_index = 0;
        self.blocked_last_step = 0;
        self.crossings_last_step = 0;
        self.visits_last_step = 0;
        self.total_blocked = 0;
        self.total_crossings = 0;
        self.total_visits = 0;
    }

    /// Like [`World::reset`] but with a new seed. An empty seed is generated.
    pub fn reset_with_seed(&mut self, seed: &str) -> Result<(), SimConfigError> {
        self.seed = resolve_seed(seed)?;
        self.config.rng_seed = self.seed.clone();
        self.reset();
        Ok(())
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn bees(&self) -> &[Bee] {
        &self.bees
    }

    pub fn plants(&self) -> &[Plant] {
        &self.plants
    }

    pub fn hives(&self) -> &[Hive] {
        &self.hives
    }

    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.tunnel.as_ref()
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn heatmap(&self) -> &Heatmap {
        &self.heatmap
    }

    pub fn target(&self) -> Option<&Distribution2D> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: Arc<Distribution2D>) -> Result<(), WorldInitError> {
        if target.dims() != self.heatmap.dims() {
            return Err(WorldInitError::TargetDimensionMismatch {
                expected: self.heatmap.dims(),
                actual: target.dims(),
            });
        }
        self.target = Some(target);
        Ok(())
    }

    /// Fraction of plants whose visit count lies in the configured success window.
    pub fn successful_visit_fraction(&self) -> f64 {
        if self.plants.is_empty() {
            return 0.0;
        }
        let window = self.config.min_visit_count_success..=self.config.max_visit_count_success;
        let hits = self
            .plants
            .iter()
            .filter(|p| window.contains(&p.visit_count()))
            .count();
        hits as f64 / self.plants.len() as f64
    }

    /// EMD between the normalised heatmap and the target, if one is set.
    pub fn emd_to_target(&self) -> Result<Option<f64>, HeatmapError> {
        match &self.target {
            Some(target) => self.heatmap.emd_to(target).map(Some),
            None => Ok(None),
        }
    }

    pub fn run_experiment(&mut self, steps: usize, sample_every: usize) -> RunSummary {
        self.try_run_experiment(steps, sample_every)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Step `steps` times, sampling metrics every `sample_every` ticks and at the end.
    pub fn try_run_experiment(
        &mut self,
        steps: usize,
        sample_every: usize,
    ) -> Result<RunSummary, ExperimentError> {
        self.try_run_experiment_with_cancel(steps, sample_every, &CancelToken::new())
    }

    /// Like [`World::try_run_experiment`], but stops at the first tick boundary
    /// after `cancel` fires. The summary then covers the ticks completed so
    /// far, with a final sample at the stop.
    pub fn try_run_experiment_with_cancel(
        &mut self,
        steps: usize,
        sample_every: usize,
        cancel: &CancelToken,
    ) -> Result<RunSummary, ExperimentError> {
        if sample_every == 0 {
            return Err(ExperimentError::InvalidSampleEvery);
        }
        if steps > Self::MAX_EXPERIMENT_STEPS {
            return Err(ExperimentError::TooManySteps {
                max: Self::MAX_EXPERIMENT_STEPS,
                actual: steps,
            });
        }
        let estimated_samples = if steps == 0 {
            0
        } else {
            ((steps - 1) / sample_every) + 1
        };
        if estimated_samples > Self::MAX_EXPERIMENT_SAMPLES {
            return Err(ExperimentError::TooManySamples {
                max: Self::MAX_EXPERIMENT_SAMPLES,
                actual: estimated_samples,
            });
        }

        let mut samples = Vec::with_capacity(estimated_samples);
        let mut completed = 0;
        let mut cancelled = false;
        for step in 1..=steps {
            if cancel.is_cancelled() {
                tracing::info!(completed, steps, "experiment cancelled");
                cancelled = true;
                break;
            }
            self.try_step()?;
            completed = step;
            if step % sample_every == 0 || step == steps {
                let metrics = self.collect_step_metrics(step).map_err(SimError::from)?;
                samples.push(metrics);
            }
        }
        if cancelled && completed > 0 && completed % sample_every != 0 {
            let metrics = self.collect_step_metrics(completed).map_err(SimError::from)?;
            samples.push(metrics);
        }
        let mut summary = self
            .summarize(completed, sample_every, samples)
            .map_err(SimError::from)?;
        summary.cancelled = cancelled;
        Ok(summary)
    }
}
