use super::World;
use crate::heatmap::HeatmapError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default)]
pub struct StepTimings {
    pub bee_update_us: u64,
    pub heatmap_update_us: u64,
    pub total_us: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StepMetrics {
    pub step: usize,
    pub bees_in_tunnel: usize,
    pub moves_blocked: usize,
    pub entrance_crossings: usize,
    pub visits: usize,
    pub total_visits: u64,
    /// Plants with at least one visit.
    pub plants_visited: usize,
    pub successful_visit_fraction: f64,
    pub nectar_remaining: f64,
    pub heatmap_samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emd_to_target: Option<f64>,
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub seed: String,
    pub steps: usize,
    pub sample_every: usize,
    pub num_bees: usize,
    pub num_plants: usize,
    pub samples: Vec<StepMetrics>,
    #[serde(default)]
    pub total_visits: u64,
    #[serde(default)]
    pub total_moves_blocked: u64,
    #[serde(default)]
    pub total_entrance_crossings: u64,
    #[serde(default)]
    pub final_successful_visit_fraction: f64,
    #[serde(default)]
    pub high_emd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_emd_to_target: Option<f64>,
    /// The run stopped early; `steps` counts the ticks that completed.
    #[serde(default)]
    pub cancelled: bool,
}

impl World {
    pub(crate) fn collect_step_metrics(&self, step: usize) -> Result<StepMetrics, HeatmapError> {
        Ok(StepMetrics {
            step,
            bees_in_tunnel: self.bees.iter().filter(|b| b.in_tunnel()).count(),
            moves_blocked: self.blocked_last_step,
            entrance_crossings: self.crossings_last_step,
            visits: self.visits_last_step,
            total_visits: self.total_visits,
            plants_visited: self.plants.iter().filter(|p| p.visit_count() > 0).count(),
            successful_visit_fraction: self.successful_visit_fraction(),
            nectar_remaining: self.plants.iter().map(|p| p.nectar()).sum(),
            heatmap_samples: self.heatmap.samples(),
            emd_to_target: self.emd_to_target()?,
        })
    }

    pub(crate) fn summarize(
        &self,
        steps: usize,
        sample_every: usize,
        samples: Vec<StepMetrics>,
    ) -> Result<RunSummary, HeatmapError> {
        Ok(RunSummary {
            schema_version: default_schema_version(),
            seed: self.seed.clone(),
            steps,
            sample_every,
            num_bees: self.bees.len(),
            num_plants: self.plants.len(),
            samples,
            total_visits: self.total_visits,
            total_moves_blocked: self.total_blocked,
            total_entrance_crossings: self.total_crossings,
            final_successful_visit_fraction: self.successful_visit_fraction(),
            high_emd: self.heatmap.high_emd()?,
            final_emd_to_target: self.emd_to_target()?,
            cancelled: false,
        })
    }
}
