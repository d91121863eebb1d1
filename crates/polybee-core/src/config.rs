use crate::hive::{Direction, HiveSpec};
use crate::plant::PatchSpec;
use crate::tunnel::EntranceSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which EMD engine compares heatmaps.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmdBackend {
    /// Marginal cumulative sweep, O(nx * ny).
    #[default]
    Approx,
    /// Full-signature min-cost flow with Manhattan ground distance.
    Exact,
    /// Min-cost flow with a transshipment node capping every move at the threshold.
    Thresholded,
}

/// What the optimizer minimises.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvolveObjective {
    /// EMD between the run heatmap and the target heatmap.
    #[default]
    Emd,
    /// Negated fraction of plants whose visit count lies in the success window.
    Visits,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimConfig {
    /// Alphanumeric seed string; empty draws a fresh one at world creation.
    pub rng_seed: String,
    pub num_iterations: usize,
    pub env_width: f64,
    pub env_height: f64,
    /// Top-left corner of the tunnel. A tunnel exists when width and height are both positive.
    pub tunnel_x: f64,
    pub tunnel_y: f64,
    #[serde(alias = "tunnel-width")]
    pub tunnel_w: f64,
    #[serde(alias = "tunnel-height")]
    pub tunnel_h: f64,
    #[serde(rename = "tunnel-entrance")]
    pub tunnel_entrances: Vec<EntranceSpec>,
    #[serde(rename = "hive")]
    pub hives: Vec<HiveSpec>,
    #[serde(rename = "patch")]
    pub patches: Vec<PatchSpec>,
    /// Total bees, divided evenly between hives.
    pub num_bees: usize,
    /// Plant detection radius; also the spatial grid cell size.
    pub bee_visual_range: f64,
    #[serde(alias = "bee-step-length")]
    pub bee_step_size: f64,
    /// Maximum heading change per tick, in radians.
    pub bee_max_dir_delta: f64,
    pub bee_path_record_len: usize,
    pub bee_visit_memory_length: usize,
    pub bee_nectar_demand: f64,
    pub flower_initial_nectar: f64,
    pub min_visit_count_success: u32,
    pub max_visit_count_success: u32,
    pub heatmap_cell_size: f64,
    pub sample_every: usize,
    pub emd_backend: EmdBackend,
    /// Integer mass each distribution is scaled to for the thresholded engine;
    /// raised to one unit per heatmap cell on larger grids.
    pub emd_multiplier: u32,
    /// Ground-distance cap for the thresholded engine, in cells. Zero selects `(nx-1)+(ny-1)`.
    pub emd_threshold: i64,
    pub target_heatmap_filename: String,
    pub evolve: bool,
    pub num_generations: usize,
    #[serde(alias = "num-trials-per-gen")]
    pub num_configs_per_gen: usize,
    pub num_trials_per_config: usize,
    pub evolve_objective: EvolveObjective,
    pub evolve_entrances: bool,
    pub evolve_hive_positions: bool,
    pub evolve_entrance_width: f64,
    /// Hives the optimizer places inside the tunnel, outside it, or anywhere
    /// in the environment. All zero places every configured hive anywhere.
    pub evolve_hives_inside_tunnel: usize,
    pub evolve_hives_outside_tunnel: usize,
    pub evolve_hives_free: usize,
    /// Independent populations; more than one enables ring migration.
    pub num_islands: usize,
    /// Generations between migrations.
    pub migration_period: usize,
    pub migration_num_select: usize,
    pub migration_num_replace: usize,
    pub logging: bool,
    pub log_dir: String,
    pub log_filename_prefix: String,
    pub command_line_quiet: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rng_seed: String::new(),
            num_iterations: 100,
            env_width: 450.0,
            env_height: 250.0,
            tunnel_x: 0.0,
            tunnel_y: 0.0,
            tunnel_w: 0.0,
            tunnel_h: 0.0,
            tunnel_entrances: Vec::new(),
            hives: vec![HiveSpec {
                x: 225.0,
                y: 125.0,
                direction: Direction::East,
            }],
            patches: vec![PatchSpec {
                x: 25.0,
                y: 25.0,
                w: 400.0,
                h: 200.0,
                spacing: 25.0,
                ..PatchSpec::default()
            }],
            num_bees: 50,
            bee_visual_range: 20.0,
            bee_step_size: 5.0,
            bee_max_dir_delta: 0.4,
            bee_path_record_len: 250,
            bee_visit_memory_length: 5,
            bee_nectar_demand: 1.0,
            flower_initial_nectar: 5.0,
            min_visit_count_success: 1,
            max_visit_count_success: 5,
            heatmap_cell_size: 10.0,
            sample_every: 10,
            emd_backend: EmdBackend::Approx,
            emd_multiplier: 1000,
            emd_threshold: 0,
            target_heatmap_filename: String::new(),
            evolve: false,
            num_generations: 50,
            num_configs_per_gen: 50,
            num_trials_per_config: 1,
            evolve_objective: EvolveObjective::Emd,
            evolve_entrances: true,
            evolve_hive_positions: false,
            evolve_entrance_width: 10.0,
            evolve_hives_inside_tunnel: 0,
            evolve_hives_outside_tunnel: 0,
            evolve_hives_free: 0,
            num_islands: 1,
            migration_period: 10,
            migration_num_select: 2,
            migration_num_replace: 2,
            logging: true,
            log_dir: ".".to_string(),
            log_filename_prefix: "polybee".to_string(),
            command_line_quiet: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimConfigError {
    #[error("env-width and env-height must be positive and finite")]
    InvalidEnvironmentSize,
    #[error("heatmap-cell-size must be positive and finite")]
    InvalidHeatmapCellSize,
    #[error("bee-visual-range must be positive and finite")]
    InvalidVisualRange,
    #[error("bee-step-size must be finite and non-negative")]
    InvalidStepSize,
    #[error("bee-max-dir-delta must be finite and non-negative")]
    InvalidMaxDirDelta,
    #[error("bee-nectar-demand must be finite and non-negative")]
    InvalidNectarDemand,
    #[error("flower-initial-nectar must be finite and non-negative")]
    InvalidInitialNectar,
    #[error("min-visit-count-success ({min}) must not exceed max-visit-count-success ({max})")]
    InvalidVisitWindow { min: u32, max: u32 },
    #[error("rng-seed must be alphanumeric (got '{0}')")]
    InvalidSeed(String),
    #[error("at least one hive is required")]
    NoHives,
    #[error("hive {index} at ({x}, {y}) lies outside the environment")]
    HiveOutsideEnvironment { index: usize, x: f64, y: f64 },
    #[error("num-bees ({actual}) exceeds supported maximum ({max})")]
    TooManyBees { max: usize, actual: usize },
    #[error("patches lay out {actual} plants, more than the supported maximum ({max})")]
    TooManyPlants { max: usize, actual: usize },
    #[error("tunnel rectangle must be finite and lie inside the environment")]
    TunnelOutsideEnvironment,
    #[error("tunnel entrance {index} ({e1}..{e2} on side {side}) lies outside its wall")]
    EntranceOutsideWall {
        index: usize,
        side: Direction,
        e1: f64,
        e2: f64,
    },
    #[error("patch {index} has a non-finite or negative size, spacing or jitter")]
    InvalidPatch { index: usize },
    #[error("sample-every must be positive")]
    InvalidSampleEvery,
    #[error("emd-multiplier must be positive")]
    InvalidEmdMultiplier,
    #[error("emd-threshold must be non-negative")]
    InvalidEmdThreshold,
    #[error("evolve requires target-heatmap-filename")]
    MissingTargetFile,
    #[error("num-generations must be positive")]
    InvalidNumGenerations,
    #[error("num-configs-per-gen must be at least 2 (got {0})")]
    InvalidConfigsPerGen(usize),
    #[error("num-trials-per-config must be positive")]
    InvalidTrialsPerConfig,
    #[error("evolve is set but there is nothing to evolve (no tunnel entrances and hive evolution off)")]
    NothingToEvolve,
    #[error("evolve-entrance-width ({width}) must be positive and no larger than the shortest tunnel wall ({max})")]
    InvalidEntranceWidth { width: f64, max: f64 },
    #[error("evolve-hives-* counts are set but evolve-hive-positions is off")]
    HiveClassesWithoutHiveEvolution,
    #[error("evolve-hives-inside-tunnel and evolve-hives-outside-tunnel need a tunnel")]
    HiveClassNeedsTunnel,
    #[error("evolved hive count ({actual}) exceeds supported maximum ({max})")]
    TooManyEvolvedHives { max: usize, actual: usize },
    #[error("num-islands must be positive")]
    InvalidNumIslands,
    #[error("migration-period must be positive")]
    InvalidMigrationPeriod,
}

impl SimConfig {
    pub const MAX_TOTAL_BEES: usize = 250_000;
    pub const MAX_TOTAL_PLANTS: usize = 1_000_000;

    pub fn has_tunnel(&self) -> bool {
        self.tunnel_w > 0.0 && self.tunnel_h > 0.0
    }

    /// Bees spawned at each hive; the remainder of the division is dropped.
    pub fn bees_per_hive(&self) -> usize {
        if self.hives.is_empty() {
            0
        } else {
            self.num_bees / self.hives.len()
        }
    }

    pub fn validate(&self) -> Result<(), SimConfigError> {
        self.validate_environment()?;
        self.validate_bees()?;
        self.validate_hives()?;
        self.validate_tunnel()?;
        self.validate_patches()?;
        self.validate_output()?;
        self.validate_evolve()?;
        Ok(())
    }

    fn validate_environment(&self) -> Result<(), SimConfigError> {
        if !(self.env_width.is_finite()
            && self.env_width > 0.0
            && self.env_height.is_finite()
            && self.env_height > 0.0)
        {
            return Err(SimConfigError::InvalidEnvironmentSize);
        }
        if !(self.heatmap_cell_size.is_finite() && self.heatmap_cell_size > 0.0) {
            return Err(SimConfigError::InvalidHeatmapCellSize);
        }
        if !self.rng_seed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SimConfigError::InvalidSeed(self.rng_seed.clone()));
        }
        Ok(())
    }

    fn validate_bees(&self) -> Result<(), SimConfigError> {
        if self.num_bees > Self::MAX_TOTAL_BEES {
            return Err(SimConfigError::TooManyBees {
                max: Self::MAX_TOTAL_BEES,
                actual: self.num_bees,
            });
        }
        if !(self.bee_visual_range.is_finite() && self.bee_visual_range > 0.0) {
            return Err(SimConfigError::InvalidVisualRange);
        }
        if !(self.bee_step_size.is_finite() && self.bee_step_size >= 0.0) {
            return Err(SimConfigError::InvalidStepSize);
        }
        if !(self.bee_max_dir_delta.is_finite() && self.bee_max_dir_delta >= 0.0) {
            return Err(SimConfigError::InvalidMaxDirDelta);
        }
        if !(self.bee_nectar_demand.is_finite() && self.bee_nectar_demand >= 0.0) {
            return Err(SimConfigError::InvalidNectarDemand);
        }
        if !(self.flower_initial_nectar.is_finite() && self.flower_initial_nectar >= 0.0) {
            return Err(SimConfigError::InvalidInitialNectar);
        }
        if self.min_visit_count_success > self.max_visit_count_success {
            return Err(SimConfigError::InvalidVisitWindow {
                min: self.min_visit_count_success,
                max: self.max_visit_count_success,
            });
        }
        Ok(())
    }

    fn validate_hives(&self) -> Result<(), SimConfigError> {
        if self.hives.is_empty() {
            return Err(SimConfigError::NoHives);
        }
        for (index, hive) in self.hives.iter().enumerate() {
            let inside = (0.0..=self.env_width).contains(&hive.x)
                && (0.0..=self.env_height).contains(&hive.y);
            if !inside {
                return Err(SimConfigError::HiveOutsideEnvironment {
                    index,
                    x: hive.x,
                    y: hive.y,
                });
            }
        }
        Ok(())
    }

    fn validate_tunnel(&self) -> Result<(), SimConfigError> {
        if !self.has_tunnel() {
            return Ok(());
        }
        let fits = [self.tunnel_x, self.tunnel_y, self.tunnel_w, self.tunnel_h]
            .iter()
            .all(|v| v.is_finite())
            && self.tunnel_x >= 0.0
            && self.tunnel_y >= 0.0
            && self.tunnel_x + self.tunnel_w <= self.env_width
            && self.tunnel_y + self.tunnel_h <= self.env_height;
        if !fits {
            return Err(SimConfigError::TunnelOutsideEnvironment);
        }
        for (index, spec) in self.tunnel_entrances.iter().enumerate() {
            let spec = spec.normalized();
            let wall_len = match spec.side {
                Direction::North | Direction::South => self.tunnel_w,
                Direction::East | Direction::West => self.tunnel_h,
            };
            if !(spec.e1.is_finite() && spec.e2.is_finite() && spec.e1 >= 0.0 && spec.e2 <= wall_len)
            {
                return Err(SimConfigError::EntranceOutsideWall {
                    index,
                    side: spec.side,
                    e1: spec.e1,
                    e2: spec.e2,
                });
            }
        }
        Ok(())
    }

    fn validate_patches(&self) -> Result<(), SimConfigError> {
        for (index, patch) in self.patches.iter().enumerate() {
            let finite = [
                patch.x,
                patch.y,
                patch.w,
                patch.h,
                patch.spacing,
                patch.jitter,
                patch.dx,
                patch.dy,
            ]
            .iter()
            .all(|v| v.is_finite());
            if !finite || patch.w < 0.0 || patch.h < 0.0 || patch.spacing < 0.0 || patch.jitter < 0.0
            {
                return Err(SimConfigError::InvalidPatch { index });
            }
        }
        let total = self
            .patches
            .iter()
            .fold(0usize, |acc, patch| acc.saturating_add(patch.plant_count()));
        if total > Self::MAX_TOTAL_PLANTS {
            return Err(SimConfigError::TooManyPlants {
                max: Self::MAX_TOTAL_PLANTS,
                actual: total,
            });
        }
        Ok(())
    }

    fn validate_output(&self) -> Result<(), SimConfigError> {
        if self.sample_every == 0 {
            return Err(SimConfigError::InvalidSampleEvery);
        }
        if self.emd_multiplier == 0 {
            return Err(SimConfigError::InvalidEmdMultiplier);
        }
        if self.emd_threshold < 0 {
            return Err(SimConfigError::InvalidEmdThreshold);
        }
        Ok(())
    }

    fn validate_evolve(&self) -> Result<(), SimConfigError> {
        if !self.evolve {
            return Ok(());
        }
        if self.target_heatmap_filename.trim().is_empty()
            && self.evolve_objective == EvolveObjective::Emd
        {
            return Err(SimConfigError::MissingTargetFile);
        }
        self.validate_evolve_settings()
    }

    /// Optimizer settings, checked whether or not `evolve` is set.
    pub fn validate_evolve_settings(&self) -> Result<(), SimConfigError> {
        if self.num_generations == 0 {
            return Err(SimConfigError::InvalidNumGenerations);
        }
        if self.num_configs_per_gen < 2 {
            return Err(SimConfigError::InvalidConfigsPerGen(self.num_configs_per_gen));
        }
        if self.num_trials_per_config == 0 {
            return Err(SimConfigError::InvalidTrialsPerConfig);
        }
        let evolves_entrances = self.evolves_entrances();
        if !evolves_entrances && !self.evolve_hive_positions {
            return Err(SimConfigError::NothingToEvolve);
        }
        if evolves_entrances {
            let max = self.tunnel_w.min(self.tunnel_h);
            let width = self.evolve_entrance_width;
            if !(width.is_finite() && width > 0.0 && width <= max) {
                return Err(SimConfigError::InvalidEntranceWidth { width, max });
            }
        }
        let classed = self
            .evolve_hives_inside_tunnel
            .saturating_add(self.evolve_hives_outside_tunnel)
            .saturating_add(self.evolve_hives_free);
        if classed > 0 && !self.evolve_hive_positions {
            return Err(SimConfigError::HiveClassesWithoutHiveEvolution);
        }
        if (self.evolve_hives_inside_tunnel > 0 || self.evolve_hives_outside_tunnel > 0)
            && !self.has_tunnel()
        {
            return Err(SimConfigError::HiveClassNeedsTunnel);
        }
        if classed > u16::MAX as usize {
            return Err(SimConfigError::TooManyEvolvedHives {
                max: u16::MAX as usize,
                actual: classed,
            });
        }
        if self.num_islands == 0 {
            return Err(SimConfigError::InvalidNumIslands);
        }
        if self.migration_period == 0 {
            return Err(SimConfigError::InvalidMigrationPeriod);
        }
        Ok(())
    }

    /// Entrance genes are present only when there is a tunnel with entrances to move.
    pub fn evolves_entrances(&self) -> bool {
        self.evolve_entrances && self.has_tunnel() && !self.tunnel_entrances.is_empty()
    }
}
