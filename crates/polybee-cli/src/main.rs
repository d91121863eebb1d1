use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use polybee_core::emd::engine_from_config;
use polybee_core::params::{format_entrance, format_hive, parse_pair, registry};
use polybee_core::rng::{derive_stream, seed_from_str};
use polybee_core::target::parse_target_csv;
use polybee_core::{
    load_target_csv, CancelToken, Distribution2D, Evolver, RunSummary, SimConfig, World,
};
use rand::Rng;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const WARMUP_STEPS: usize = 10;
/// Substream for output-file suffixes, distinct from plant layout.
const STAMP_STREAM: u64 = 2;

#[derive(Parser)]
#[command(name = "polybee")]
#[command(about = "Bee foraging simulation with tunnel entrances and heatmap optimisation")]
struct Cli {
    /// Config file: `.json`, or `key = value` lines
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override a parameter (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation, or an evolution when `evolve` is set
    Run,
    /// List every parameter with its default and description
    Params,
    /// Dump the default configuration to stdout
    DumpDefaultConfig {
        /// Emit JSON instead of `key = value` lines
        #[arg(long)]
        json: bool,
    },
    /// Earth mover's distance between two heatmap CSV files
    Emd {
        a: PathBuf,
        b: PathBuf,
        /// EMD engine: approx, exact or thresholded (default: the config's)
        #[arg(long)]
        backend: Option<String>,
    },
    /// Time the tick phases on the configured world
    Benchmark {
        #[arg(long, default_value_t = 200)]
        steps: usize,
    },
}

fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<SimConfig> {
    let mut config = match path {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    let pairs = overrides
        .iter()
        .map(|raw| parse_pair(raw))
        .collect::<Result<Vec<_>, _>>()
        .context("malformed --set override, expected KEY=VALUE")?;
    config
        .apply_pairs(pairs)
        .context("invalid --set override")?;
    Ok(config)
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn heatmap_dims(config: &SimConfig) -> (usize, usize) {
    (
        (config.env_width / config.heatmap_cell_size).ceil() as usize,
        (config.env_height / config.heatmap_cell_size).ceil() as usize,
    )
}

fn load_target(config: &SimConfig) -> Result<Option<Arc<Distribution2D>>> {
    if config.target_heatmap_filename.is_empty() {
        return Ok(None);
    }
    let path = Path::new(&config.target_heatmap_filename);
    let target = load_target_csv(path, heatmap_dims(config))
        .with_context(|| format!("failed to load target heatmap {}", path.display()))?;
    Ok(Some(Arc::new(target)))
}

/// Output files share `<log-dir>/<prefix>-<kind>-<stamp>.<ext>`.
struct OutputFiles {
    dir: PathBuf,
    prefix: String,
    stamp: String,
}

impl OutputFiles {
    fn new(config: &SimConfig, seed: &str) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let mut rng = derive_stream(seed_from_str(seed), STAMP_STREAM);
        let suffix: u32 = rng.random::<u32>() & 0x00ff_ffff;
        Ok(Self {
            dir,
            prefix: config.log_filename_prefix.clone(),
            stamp: format!("{}-{suffix:06x}", Local::now().format("%Y%m%d-%H%M%S")),
        })
    }

    fn path(&self, kind: &str, ext: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{kind}-{}.{ext}", self.prefix, self.stamp))
    }

    fn create(&self, kind: &str, ext: &str) -> Result<(PathBuf, BufWriter<File>)> {
        let path = self.path(kind, ext);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok((path, BufWriter::new(file)))
    }

    fn write_json<T: serde::Serialize>(&self, kind: &str, value: &T) -> Result<PathBuf> {
        let (path, mut out) = self.create(kind, "json")?;
        serde_json::to_writer_pretty(&mut out, value)
            .with_context(|| format!("failed to write {}", path.display()))?;
        out.flush()?;
        Ok(path)
    }
}

fn write_run_outputs(world: &World, summary: &RunSummary) -> Result<()> {
    let files = OutputFiles::new(world.config(), world.seed())?;

    let (path, mut out) = files.create("heatmap", "csv")?;
    world
        .heatmap()
        .write_counts_csv(&mut out)
        .and_then(|_| out.flush())
        .with_context(|| format!("failed to write {}", path.display()))?;

    let (path, mut out) = files.create("heatmap-normalised", "csv")?;
    world
        .heatmap()
        .write_normalized_csv(&mut out)
        .and_then(|_| out.flush())
        .with_context(|| format!("failed to write {}", path.display()))?;

    files.write_json("summary", summary)?;
    let config_path = files.write_json("config", world.config())?;
    tracing::info!(dir = %files.dir.display(), stamp = %files.stamp, "wrote run outputs");
    tracing::debug!(path = %config_path.display(), "effective config saved");
    Ok(())
}

/// Cancel `cancel` on the first Ctrl-C; a second Ctrl-C exits immediately.
fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the signal runtime")?;
    let cancel = cancel.clone();
    std::thread::Builder::new()
        .name("polybee-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("could not listen for Ctrl-C; runs cannot be interrupted");
                    return;
                }
                tracing::warn!("interrupted; stopping at the next step (Ctrl-C again to abort)");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        })
        .context("failed to spawn the signal thread")?;
    Ok(())
}

fn run_simulation(
    config: SimConfig,
    target: Option<Arc<Distribution2D>>,
    cancel: &CancelToken,
) -> Result<()> {
    let iterations = config.num_iterations;
    let sample_every = config.sample_every;
    let mut world = World::try_new(config, target).context("failed to initialise world")?;
    tracing::info!(
        seed = %world.seed(),
        bees = world.bees().len(),
        plants = world.plants().len(),
        iterations,
        "simulating"
    );

    let summary = world
        .try_run_experiment_with_cancel(iterations, sample_every, cancel)
        .context("simulation failed")?;
    if summary.cancelled {
        tracing::warn!(completed = summary.steps, iterations, "simulation interrupted");
    }

    println!("seed:                     {}", summary.seed);
    println!("iterations:               {}", summary.steps);
    println!("total visits:             {}", summary.total_visits);
    println!("blocked moves:            {}", summary.total_moves_blocked);
    println!("entrance crossings:       {}", summary.total_entrance_crossings);
    println!(
        "successful visit frac:    {:.4}",
        summary.final_successful_visit_fraction
    );
    if let Some(emd) = summary.final_emd_to_target {
        println!(
            "emd to target:            {emd:.4} (high {:.4})",
            summary.high_emd
        );
    }

    if world.config().logging {
        write_run_outputs(&world, &summary)?;
    }
    Ok(())
}

fn run_evolution(
    config: SimConfig,
    target: Option<Arc<Distribution2D>>,
    cancel: &CancelToken,
) -> Result<()> {
    let logging = config.logging;
    let mut evolver = Evolver::new(config.clone(), target).context("failed to set up evolution")?;
    let summary = evolver.run(cancel).context("evolution failed")?;
    if summary.cancelled {
        tracing::warn!(
            generations = summary.generations.len() / summary.islands.max(1),
            "evolution interrupted"
        );
    }

    match &summary.champion {
        Some(champion) => {
            println!(
                "champion: generation {} island {} fitness {:.6}",
                champion.generation, champion.island, champion.fitness
            );
            for entrance in &champion.entrances {
                println!("  tunnel-entrance = {}", format_entrance(entrance));
            }
            for hive in &champion.hives {
                println!("  hive = {}", format_hive(hive));
            }
        }
        None => println!("evolution stopped before the first generation completed"),
    }

    if logging {
        let files = OutputFiles::new(&config, evolver.seed())?;
        let path = files.write_json("evolve", &summary)?;
        tracing::info!(path = %path.display(), "wrote evolution summary");
    }
    Ok(())
}

fn run_benchmark(config: SimConfig, steps: usize) -> Result<()> {
    if steps == 0 {
        bail!("benchmark needs at least one step");
    }
    let target = load_target(&config)?;
    let mut world = World::try_new(config, target).context("failed to initialise world")?;

    for _ in 0..WARMUP_STEPS {
        world.try_step().context("warmup step failed")?;
    }

    let mut total_bees = 0u64;
    let mut total_heatmap = 0u64;
    let mut total_time = 0u64;
    for _ in 0..steps {
        let timings = world.try_step().context("benchmark step failed")?;
        total_bees += timings.bee_update_us;
        total_heatmap += timings.heatmap_update_us;
        total_time += timings.total_us;
    }

    let avg_step_us = total_time as f64 / steps as f64;
    let steps_per_sec = if avg_step_us > 0.0 {
        1_000_000.0 / avg_step_us
    } else {
        f64::INFINITY
    };
    println!(
        "--- {} bees, {} plants, {} steps ---",
        world.bees().len(),
        world.plants().len(),
        steps
    );
    println!("  Avg step:      {avg_step_us:.1} us ({steps_per_sec:.1} steps/sec)");
    println!(
        "  Breakdown:     bees={:.1} us, heatmap={:.1} us",
        total_bees as f64 / steps as f64,
        total_heatmap as f64 / steps as f64,
    );

    let start = std::time::Instant::now();
    let emd = world.emd_to_target().context("emd to target failed")?;
    if let Some(emd) = emd {
        println!(
            "  EMD ({}):  {emd:.4} in {:?}",
            world.heatmap().engine().name(),
            start.elapsed()
        );
    }
    Ok(())
}

fn read_heatmap(path: &Path) -> Result<Distribution2D> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_target_csv(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn run_emd(mut config: SimConfig, a: &Path, b: &Path, backend: Option<&str>) -> Result<()> {
    if let Some(backend) = backend {
        config
            .set_param("emd-backend", backend)
            .context("invalid --backend")?;
    }
    let da = read_heatmap(a)?;
    let db = read_heatmap(b)?;
    if da.dims() != db.dims() {
        bail!(
            "heatmaps differ in size: {:?} vs {:?}",
            da.dims(),
            db.dims()
        );
    }
    let engine = engine_from_config(&config);
    let distance = engine.distance(&da, &db).context("emd computation failed")?;
    println!("{distance}");
    tracing::debug!(engine = engine.name(), nx = da.dims().0, ny = da.dims().1, "emd");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), &cli.overrides)?;
    init_tracing(config.command_line_quiet);

    match cli.command {
        Commands::Params => {
            for entry in registry() {
                println!("{:<28} {:<16} {}", entry.name, entry.default, entry.description);
            }
        }
        Commands::DumpDefaultConfig { json } => {
            let defaults = SimConfig::default();
            if json {
                println!("{}", serde_json::to_string_pretty(&defaults)?);
            } else {
                print!("{}", defaults.to_cfg_string());
            }
        }
        Commands::Emd { a, b, backend } => {
            run_emd(config, &a, &b, backend.as_deref())?;
        }
        Commands::Benchmark { steps } => {
            if cfg!(debug_assertions) {
                eprintln!("WARNING: running in debug mode. Results are not representative.");
                eprintln!("         Use: cargo run -p polybee-cli --release -- benchmark");
                eprintln!();
            }
            config.validate().context("config validation error")?;
            run_benchmark(config, steps)?;
        }
        Commands::Run => {
            config.validate().context("config validation error")?;
            let target = load_target(&config)?;
            let cancel = CancelToken::new();
            install_interrupt_handler(&cancel)?;
            if config.evolve {
                run_evolution(config, target, &cancel)?;
            } else {
                run_simulation(config, target, &cancel)?;
            }
        }
    }
    Ok(())
}
