pub mod bee;
pub mod config;
pub mod distribution;
pub mod emd;
pub mod evolve;
pub mod geometry;
pub mod heatmap;
pub mod hive;
pub mod params;
pub mod plant;
pub mod rng;
pub mod spatial;
pub mod target;
pub mod tunnel;
pub mod world;

pub use bee::{Bee, BeeParams, MoveOutcome};
pub use config::{EmdBackend, EvolveObjective, SimConfig, SimConfigError};
pub use distribution::Distribution2D;
pub use emd::{engine_for, EmdEngine, EmdError};
pub use evolve::{EvolveError, EvolveSummary, Evolver};
pub use geometry::Pos2D;
pub use heatmap::{Heatmap, HeatmapError};
pub use hive::{Direction, HiveSpec};
pub use params::{ParamError, ParamValue};
pub use plant::{PatchSpec, Plant, PlantId};
pub use target::{load_target_csv, TargetError};
pub use tunnel::{EntranceSpec, Tunnel, TunnelError};
pub use world::{
    CancelToken, ExperimentError, RunSummary, SimError, StepMetrics, World, WorldInitError,
};
