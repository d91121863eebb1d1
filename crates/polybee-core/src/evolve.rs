//! Generational genetic algorithm over tunnel entrance and hive placement.
//!
//! Every gene lives in `[0, 1]`. Per entrance the genome holds
//! `(position, side)`. Hives come in three classes, laid out in this order:
//! inside the tunnel `(x, y, direction)`, outside the tunnel
//! `(x, y, direction, side)` and free `(x, y, direction)`. Lower fitness is
//! better.
//!
//! With more than one island, each island evolves its own population and
//! every `migration-period` generations sends a random sample of its
//! candidates to the next island in a ring.

use crate::config::{EvolveObjective, SimConfig, SimConfigError};
use crate::distribution::Distribution2D;
use crate::heatmap::HeatmapError;
use crate::hive::{Direction, HiveSpec};
use crate::rng::{create_rng, derive_seed, derive_stream, seed_from_str};
use crate::tunnel::EntranceSpec;
use crate::world::{resolve_seed, CancelToken, SimError, World, WorldInitError};
use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Probability that two selected parents are recombined rather than copied.
pub const CROSSOVER_RATE: f64 = 0.9;
/// Standard deviation of the per-gene Gaussian mutation.
pub const MUTATION_SIGMA: f64 = 0.1;
/// Fraction of each axis kept clear at the region border when placing hives.
const HIVE_MARGIN: f64 = 0.01;
const HIVE_SPAN: f64 = 1.0 - 2.0 * HIVE_MARGIN;
/// Substream of the optimizer seed that drives migration.
const MIGRATION_STREAM: u64 = 3;

#[derive(Debug, Error)]
pub enum EvolveError {
    #[error(transparent)]
    Config(#[from] SimConfigError),
    #[error("failed to build a trial world: {0}")]
    World(#[from] WorldInitError),
    #[error("trial run failed: {0}")]
    Sim(#[from] SimError),
    #[error(transparent)]
    Heatmap(#[from] HeatmapError),
    #[error("the emd objective needs a target heatmap")]
    MissingTarget,
    #[error("a candidate needs at least one trial")]
    NoTrials,
    #[error("evaluation was cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    genes: Vec<f64>,
}

impl Genome {
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        Self {
            genes: (0..len).map(|_| rng.random::<f64>()).collect(),
        }
    }

    /// Genes are clamped to `[0, 1]`.
    pub fn from_genes(genes: Vec<f64>) -> Self {
        Self {
            genes: genes.into_iter().map(|g| g.clamp(0.0, 1.0)).collect(),
        }
    }

    pub fn genes(&self) -> &[f64] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, rates: &MutationRates) {
        let Ok(normal) = Normal::new(0.0, rates.sigma) else {
            return;
        };
        for g in &mut self.genes {
            if rng.random::<f64>() < rates.gene_rate {
                *g = (*g + normal.sample(rng)).clamp(0.0, 1.0);
            }
        }
    }

    /// Uniform crossover: each gene comes from either parent with equal odds.
    pub fn crossover<R: Rng + ?Sized>(&self, other: &Genome, rng: &mut R) -> Genome {
        let genes = self
            .genes
            .iter()
            .zip(&other.genes)
            .map(|(&a, &b)| if rng.random::<bool>() { a } else { b })
            .collect();
        Genome { genes }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MutationRates {
    /// Per-gene mutation probability.
    pub gene_rate: f64,
    pub sigma: f64,
}

impl MutationRates {
    /// One expected mutation per genome.
    pub fn for_genome_len(len: usize) -> Self {
        Self {
            gene_rate: 1.0 / len.max(1) as f64,
            sigma: MUTATION_SIGMA,
        }
    }
}

/// How many entrances and hives of each class the genome encodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneLayout {
    pub entrances: usize,
    pub inside_hives: usize,
    pub outside_hives: usize,
    pub free_hives: usize,
}

impl GeneLayout {
    pub const GENES_PER_ENTRANCE: usize = 2;
    pub const GENES_PER_HIVE: usize = 3;
    /// An outside hive also picks the side of the tunnel it sits on.
    pub const GENES_PER_OUTSIDE_HIVE: usize = 4;

    pub fn from_config(config: &SimConfig) -> Self {
        let entrances = if config.evolves_entrances() {
            config.tunnel_entrances.len()
        } else {
            0
        };
        if !config.evolve_hive_positions {
            return Self {
                entrances,
                ..Self::default()
            };
        }
        let classed = config
            .evolve_hives_inside_tunnel
            .saturating_add(config.evolve_hives_outside_tunnel)
            .saturating_add(config.evolve_hives_free);
        if classed == 0 {
            return Self {
                entrances,
                free_hives: config.hives.len(),
                ..Self::default()
            };
        }
        Self {
            entrances,
            inside_hives: config.evolve_hives_inside_tunnel,
            outside_hives: config.evolve_hives_outside_tunnel,
            free_hives: config.evolve_hives_free,
        }
    }

    pub fn hives(&self) -> usize {
        self.inside_hives + self.outside_hives + self.free_hives
    }

    pub fn len(&self) -> usize {
        self.entrances * Self::GENES_PER_ENTRANCE
            + (self.inside_hives + self.free_hives) * Self::GENES_PER_HIVE
            + self.outside_hives * Self::GENES_PER_OUTSIDE_HIVE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the placements encoded by `genome` to a copy of `base`.
    pub fn decode(&self, genome: &Genome, base: &SimConfig) -> SimConfig {
        let mut config = base.clone();
        let mut rest = genome.genes();
        let entrance_genes = take_genes(&mut rest, self.entrances * Self::GENES_PER_ENTRANCE);
        let inside_genes = take_genes(&mut rest, self.inside_hives * Self::GENES_PER_HIVE);
        let outside_genes = take_genes(&mut rest, self.outside_hives * Self::GENES_PER_OUTSIDE_HIVE);
        let free_genes = take_genes(&mut rest, self.free_hives * Self::GENES_PER_HIVE);

        if self.entrances > 0 {
            let width = base.evolve_entrance_width;
            config.tunnel_entrances = entrance_genes
                .chunks_exact(Self::GENES_PER_ENTRANCE)
                .map(|g| {
                    let side = direction_gene(g[1]);
                    let wall_len = match side {
                        Direction::North | Direction::South => base.tunnel_w,
                        Direction::East | Direction::West => base.tunnel_h,
                    };
                    let e1 = g[0] * (wall_len - width).max(0.0);
                    EntranceSpec {
                        side,
                        e1,
                        e2: e1 + width,
                    }
                })
                .collect();
        }
        if self.hives() > 0 {
            let inside = inside_genes
                .chunks_exact(Self::GENES_PER_HIVE)
                .map(|g| inside_hive(g, base));
            let outside = outside_genes
                .chunks_exact(Self::GENES_PER_OUTSIDE_HIVE)
                .map(|g| outside_hive(g, base));
            let free = free_genes.chunks_exact(Self::GENES_PER_HIVE).map(|g| HiveSpec {
                x: place(0.0, base.env_width, g[0]),
                y: place(0.0, base.env_height, g[1]),
                direction: direction_gene(g[2]),
            });
            config.hives = inside.chain(outside).chain(free).collect();
        }
        config
    }
}

fn take_genes<'a>(rest: &mut &'a [f64], n: usize) -> &'a [f64] {
    let (head, tail) = rest.split_at(n.min(rest.len()));
    *rest = tail;
    head
}

/// Map `g` into `[start, start + len]`, keeping clear of both ends.
fn place(start: f64, len: f64, g: f64) -> f64 {
    start + HIVE_MARGIN * len + g * HIVE_SPAN * len
}

fn inside_hive(g: &[f64], base: &SimConfig) -> HiveSpec {
    HiveSpec {
        x: place(base.tunnel_x, base.tunnel_w, g[0]),
        y: place(base.tunnel_y, base.tunnel_h, g[1]),
        direction: direction_gene(g[2]),
    }
}

/// North and south bands span the environment width; east and west bands
/// span the tunnel height.
fn outside_hive(g: &[f64], base: &SimConfig) -> HiveSpec {
    let right = base.tunnel_x + base.tunnel_w;
    let bottom = base.tunnel_y + base.tunnel_h;
    let (x, y) = match direction_gene(g[3]) {
        Direction::North => (
            place(0.0, base.env_width, g[0]),
            place(0.0, base.tunnel_y, g[1]),
        ),
        Direction::East => (
            place(right, base.env_width - right, g[0]),
            place(base.tunnel_y, base.tunnel_h, g[1]),
        ),
        Direction::South => (
            place(0.0, base.env_width, g[0]),
            place(bottom, base.env_height - bottom, g[1]),
        ),
        Direction::West => (
            place(0.0, base.tunnel_x, g[0]),
            place(base.tunnel_y, base.tunnel_h, g[1]),
        ),
    };
    HiveSpec {
        x,
        y,
        direction: direction_gene(g[2]),
    }
}

fn direction_gene(g: f64) -> Direction {
    let code = ((g * 4.0).floor() as i64).clamp(0, 3);
    Direction::from_code(code).unwrap_or(Direction::North)
}

/// Median of `values`; the mean of the middle pair for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Run one trial per seed of `config` and return the median objective.
///
/// Returns [`EvolveError::Cancelled`] if `cancel` fires before the last trial
/// finishes.
pub fn evaluate_config(
    config: &SimConfig,
    target: Option<&Arc<Distribution2D>>,
    seeds: &[u64],
    cancel: &CancelToken,
) -> Result<f64, EvolveError> {
    let mut scores = Vec::with_capacity(seeds.len());
    for &seed in seeds {
        if cancel.is_cancelled() {
            return Err(EvolveError::Cancelled);
        }
        let mut trial = config.clone();
        trial.rng_seed = format!("{seed:016x}");
        let mut world = World::try_new(trial, target.cloned())?;
        if world.run(config.num_iterations, cancel)? < config.num_iterations {
            return Err(EvolveError::Cancelled);
        }
        let score = match config.evolve_objective {
            EvolveObjective::Emd => world.emd_to_target()?.ok_or(EvolveError::MissingTarget)?,
            EvolveObjective::Visits => -world.successful_visit_fraction(),
        };
        scores.push(score);
    }
    median(&scores).ok_or(EvolveError::NoTrials)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    #[serde(default)]
    pub island: usize,
    pub best: f64,
    pub median: f64,
    pub mean: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Champion {
    pub generation: usize,
    #[serde(default)]
    pub island: usize,
    pub fitness: f64,
    pub genome: Genome,
    pub entrances: Vec<EntranceSpec>,
    pub hives: Vec<HiveSpec>,
}

fn default_islands() -> usize {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvolveSummary {
    pub schema_version: u32,
    pub seed: String,
    pub objective: EvolveObjective,
    #[serde(default = "default_islands")]
    pub islands: usize,
    pub population_size: usize,
    pub trials_per_config: usize,
    pub generations: Vec<GenerationStats>,
    pub cancelled: bool,
    pub champion: Option<Champion>,
}

/// One population and the generator that breeds it.
struct Island {
    rng: ChaCha12Rng,
    population: Vec<Genome>,
}

impl Island {
    /// Island 0 is seeded with the optimizer seed; island `i` with the seed followed by `i`.
    fn new(seed: &str, index: usize) -> Self {
        let rng = if index == 0 {
            create_rng(seed)
        } else {
            create_rng(&format!("{seed}{index}"))
        };
        Self {
            rng,
            population: Vec::new(),
        }
    }

    /// Keep the best candidate, fill the rest by tournament, crossover and mutation.
    fn next_generation(&mut self, fitness: &[f64], rates: &MutationRates) {
        let population = &self.population;
        let mut next = Vec::with_capacity(population.len());
        next.push(population[argmin(fitness)].clone());
        while next.len() < population.len() {
            let a = tournament(fitness, &mut self.rng);
            let b = tournament(fitness, &mut self.rng);
            let mut child = if self.rng.random::<f64>() < CROSSOVER_RATE {
                population[a].crossover(&population[b], &mut self.rng)
            } else {
                population[a].clone()
            };
            child.mutate(&mut self.rng, rates);
            next.push(child);
        }
        self.population = next;
    }
}

pub struct Evolver {
    base: SimConfig,
    layout: GeneLayout,
    target: Option<Arc<Distribution2D>>,
    seed: String,
    islands: Vec<Island>,
    migration_rng: ChaCha12Rng,
    rates: MutationRates,
}

impl Evolver {
    pub fn new(
        mut config: SimConfig,
        target: Option<Arc<Distribution2D>>,
    ) -> Result<Self, EvolveError> {
        config.validate()?;
        config.validate_evolve_settings()?;
        if config.evolve_objective == EvolveObjective::Emd && target.is_none() {
            return Err(EvolveError::MissingTarget);
        }
        let seed = resolve_seed(&config.rng_seed)?;
        config.rng_seed = seed.clone();
        let layout = GeneLayout::from_config(&config);
        Ok(Self {
            islands: (0..config.num_islands)
                .map(|index| Island::new(&seed, index))
                .collect(),
            migration_rng: derive_stream(seed_from_str(&seed), MIGRATION_STREAM),
            seed,
            rates: MutationRates::for_genome_len(layout.len()),
            layout,
            target,
            base: config,
        })
    }

    pub fn layout(&self) -> GeneLayout {
        self.layout
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Evolve for the configured number of generations. Once `cancel` is set
    /// the run stops at the next generation boundary, or abandons the
    /// generation being evaluated.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<EvolveSummary, EvolveError> {
        let pop_size = self.base.num_configs_per_gen;
        let trials = self.base.num_trials_per_config;
        let genes = self.layout.len();
        for island in &mut self.islands {
            island.population = (0..pop_size)
                .map(|_| Genome::random(genes, &mut island.rng))
                .collect();
        }
        let mut generations = Vec::with_capacity(self.base.num_generations * self.islands.len());
        let mut champion: Option<Champion> = None;
        let mut cancelled = false;

        tracing::info!(
            seed = %self.seed,
            population = pop_size,
            islands = self.islands.len(),
            genes,
            generations = self.base.num_generations,
            "starting evolution"
        );

        for generation in 0..self.base.num_generations {
            if cancel.is_cancelled() {
                tracing::info!(generation, "evolution cancelled");
                cancelled = true;
                break;
            }

            // Trial seeds are drawn in population order, before the parallel evaluation.
            let seeds: Vec<Vec<Vec<u64>>> = self
                .islands
                .iter_mut()
                .map(|island| {
                    (0..island.population.len())
                        .map(|_| {
                            (0..trials)
                                .map(|_| derive_seed(&mut island.rng))
                                .collect::<Vec<u64>>()
                        })
                        .collect()
                })
                .collect();
            let mut fitness = match self.evaluate_islands(&seeds, cancel) {
                Ok(fitness) => fitness,
                Err(EvolveError::Cancelled) => {
                    tracing::info!(generation, "evolution cancelled mid-generation");
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            for (index, (island, island_fitness)) in self.islands.iter().zip(&fitness).enumerate() {
                let stats = generation_stats(generation, index, island_fitness);
                tracing::info!(
                    generation,
                    island = index,
                    best = stats.best,
                    median = stats.median,
                    "generation evaluated"
                );
                generations.push(stats);

                let best_idx = argmin(island_fitness);
                if champion
                    .as_ref()
                    .map_or(true, |c| island_fitness[best_idx] < c.fitness)
                {
                    let decoded = self.layout.decode(&island.population[best_idx], &self.base);
                    champion = Some(Champion {
                        generation,
                        island: index,
                        fitness: island_fitness[best_idx],
                        genome: island.population[best_idx].clone(),
                        entrances: decoded.tunnel_entrances,
                        hives: decoded.hives,
                    });
                }
            }

            if generation + 1 < self.base.num_generations {
                if self.islands.len() > 1 && (generation + 1) % self.base.migration_period == 0 {
                    self.migrate(&mut fitness);
                }
                for (island, island_fitness) in self.islands.iter_mut().zip(&fitness) {
                    island.next_generation(island_fitness, &self.rates);
                }
            }
        }

        Ok(EvolveSummary {
            schema_version: 1,
            seed: self.seed.clone(),
            objective: self.base.evolve_objective,
            islands: self.islands.len(),
            population_size: pop_size,
            trials_per_config: trials,
            generations,
            cancelled,
            champion,
        })
    }

    fn evaluate_islands(
        &self,
        seeds: &[Vec<Vec<u64>>],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f64>>, EvolveError> {
        self.islands
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(island, island_seeds)| {
                island
                    .population
                    .par_iter()
                    .zip(island_seeds.par_iter())
                    .map(|(genome, trial_seeds)| {
                        let config = self.layout.decode(genome, &self.base);
                        evaluate_config(&config, self.target.as_ref(), trial_seeds, cancel)
                    })
                    .collect::<Result<Vec<f64>, _>>()
            })
            .collect()
    }

    /// Ring migration: island `i` sends a random sample of its candidates to
    /// island `i + 1`, where they overwrite random members. Migrants keep
    /// their fitness.
    fn migrate(&mut self, fitness: &mut [Vec<f64>]) {
        let n = self.islands.len();
        let select = self.base.migration_num_select;
        let replace = self.base.migration_num_replace;
        let rng = &mut self.migration_rng;

        let mut outgoing: Vec<Vec<(Genome, f64)>> = Vec::with_capacity(n);
        for (island, island_fitness) in self.islands.iter().zip(fitness.iter()) {
            let pop = island.population.len();
            let picked = sample(&mut *rng, pop, select.min(pop))
                .into_iter()
                .map(|i| (island.population[i].clone(), island_fitness[i]))
                .collect();
            outgoing.push(picked);
        }
        for (from, migrants) in outgoing.into_iter().enumerate() {
            let to = (from + 1) % n;
            let pop = self.islands[to].population.len();
            let count = replace.min(migrants.len()).min(pop);
            let slots = sample(&mut *rng, pop, count);
            for (slot, (genome, fit)) in slots.into_iter().zip(migrants) {
                self.islands[to].population[slot] = genome;
                fitness[to][slot] = fit;
            }
        }
        tracing::debug!(islands = n, select, replace, "migrated candidates");
    }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(idx, _)| idx)
}

/// Binary tournament; returns the index of the fitter of two random picks.
fn tournament<R: Rng + ?Sized>(fitness: &[f64], rng: &mut R) -> usize {
    let a = rng.random_range(0..fitness.len());
    let b = rng.random_range(0..fitness.len());
    if fitness[b] < fitness[a] {
        b
    } else {
        a
    }
}

fn generation_stats(generation: usize, island: usize, fitness: &[f64]) -> GenerationStats {
    let best = fitness.iter().copied().fold(f64::INFINITY, f64::min);
    let mean = fitness.iter().sum::<f64>() / fitness.len().max(1) as f64;
    GenerationStats {
        generation,
        island,
        best,
        median: median(fitness).unwrap_or(best),
        mean,
    }
}
