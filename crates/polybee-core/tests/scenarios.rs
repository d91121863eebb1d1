use polybee_core::emd::{engine_for, ApproxEmd, ExactEmd, ThresholdedEmd};
use polybee_core::{
    CancelToken, Direction, Distribution2D, EmdBackend, EmdEngine, EntranceSpec, HiveSpec, Pos2D,
    SimConfig, Tunnel, World,
};
use std::sync::Arc;

fn single_bee_config() -> SimConfig {
    SimConfig {
        rng_seed: "AAA".to_string(),
        env_width: 100.0,
        env_height: 100.0,
        heatmap_cell_size: 10.0,
        hives: vec![HiveSpec {
            x: 50.0,
            y: 50.0,
            direction: Direction::East,
        }],
        num_bees: 1,
        patches: Vec::new(),
        ..SimConfig::default()
    }
}

fn north_gate() -> EntranceSpec {
    EntranceSpec {
        side: Direction::North,
        e1: 25.0,
        e2: 35.0,
    }
}

#[test]
fn zero_iterations_leave_heatmap_empty() {
    let world = World::new(single_bee_config(), None);
    assert_eq!(world.bees().len(), 1);
    assert!(world.heatmap().counts().iter().all(|&c| c == 0));
    assert_eq!(world.heatmap().normalized().total(), 0.0);
    assert!(world.heatmap().high_emd().unwrap() > 0.0);
}

#[test]
fn one_iteration_is_reproducible() {
    let run_once = || {
        let mut world = World::new(single_bee_config(), None);
        world.step();
        (world.bees()[0].pos(), world.heatmap().counts().to_vec())
    };
    let (pos_a, counts_a) = run_once();
    let (pos_b, counts_b) = run_once();
    assert_eq!(counts_a.iter().sum::<u64>(), 1);
    assert_eq!(pos_a, pos_b);
    assert_eq!(counts_a, counts_b);
    // One step of length 5 from the hive.
    let moved = ((pos_a.x - 50.0).powi(2) + (pos_a.y - 50.0).powi(2)).sqrt();
    assert!((moved - 5.0).abs() < 1e-9);
}

#[test]
fn solid_north_wall_blocks_a_bee_heading_out() {
    let cfg = SimConfig {
        tunnel_x: 20.0,
        tunnel_y: 20.0,
        tunnel_w: 60.0,
        tunnel_h: 60.0,
        tunnel_entrances: vec![north_gate()],
        hives: vec![HiveSpec {
            x: 30.0,
            y: 22.0,
            direction: Direction::North,
        }],
        bee_max_dir_delta: 0.0,
        ..single_bee_config()
    };
    let mut world = World::new(cfg, None);
    let summary = world.run_experiment(10, 1);
    let bee = &world.bees()[0];
    assert!(bee.pos().y >= 20.0);
    assert_eq!(bee.pos(), Pos2D::new(30.0, 22.0));
    assert!((bee.heading() - Direction::North.heading()).abs() < 1e-12);
    assert!(bee.in_tunnel());
    assert_eq!(summary.total_moves_blocked, 10);
}

#[test]
fn bee_under_the_gate_leaves_the_tunnel() {
    let cfg = SimConfig {
        tunnel_x: 20.0,
        tunnel_y: 20.0,
        tunnel_w: 60.0,
        tunnel_h: 60.0,
        tunnel_entrances: vec![north_gate()],
        hives: vec![HiveSpec {
            x: 50.0,
            y: 22.0,
            direction: Direction::North,
        }],
        bee_max_dir_delta: 0.0,
        ..single_bee_config()
    };
    let mut world = World::new(cfg, None);
    world.step();
    let bee = &world.bees()[0];
    assert!((bee.pos().y - 17.0).abs() < 1e-9);
    assert!(!bee.in_tunnel());
}

#[test]
fn gate_crossing_point_is_reported() {
    let tunnel = Tunnel::new(20.0, 20.0, 60.0, 60.0, &[north_gate()]).unwrap();
    let info = tunnel
        .intersects_entrance(Pos2D::new(50.0, 22.0), Pos2D::new(50.0, 18.0))
        .unwrap();
    assert!(info.intersects);
    assert!(info.within_limits);
    assert_eq!(info.entrance, Some(0));
    assert!((info.point.x - 50.0).abs() < 1e-9);
    assert!((info.point.y - 20.0).abs() < 1e-9);

    let wall = tunnel
        .intersects_entrance(Pos2D::new(30.0, 22.0), Pos2D::new(30.0, 18.0))
        .unwrap();
    assert!(wall.intersects);
    assert!(!wall.within_limits);
}

#[test]
fn uniform_to_uniform_is_zero_on_every_backend() {
    let u = Distribution2D::uniform(45, 25);
    for backend in [EmdBackend::Approx, EmdBackend::Exact, EmdBackend::Thresholded] {
        let engine = engine_for(backend, 1000, 0);
        assert!(engine.distance(&u, &u).unwrap() <= 1e-5, "{}", engine.name());
    }
}

#[test]
fn uniform_against_corner_on_ten_by_ten() {
    let u = Distribution2D::uniform(10, 10);
    let corner = Distribution2D::point_mass(10, 10, 0, 0);
    let exact = ExactEmd.distance(&u, &corner).unwrap();
    let thresholded = ThresholdedEmd::new(1000, 0).distance(&u, &corner).unwrap();
    let approx = ApproxEmd.distance(&u, &corner).unwrap();
    assert!((exact - 9.0).abs() < 1e-9);
    assert!((thresholded - 9.0).abs() < 1e-9);
    assert!((approx - exact).abs() <= 0.05 * exact);
}

#[test]
fn emd_to_uniform_target_is_bounded_by_high_emd() {
    for backend in [EmdBackend::Approx, EmdBackend::Exact, EmdBackend::Thresholded] {
        let cfg = SimConfig {
            num_bees: 5,
            emd_backend: backend,
            ..single_bee_config()
        };
        let target = Arc::new(Distribution2D::uniform(10, 10));
        let mut world = World::new(cfg, Some(target));
        world.run(40, &CancelToken::new()).unwrap();
        let emd = world.emd_to_target().unwrap().unwrap();
        assert!(emd > 0.0, "{backend:?}");
        assert!(emd <= world.heatmap().high_emd().unwrap() + 1e-9, "{backend:?}");
    }
}

#[test]
fn cfg_text_drives_a_full_run() {
    let text = "\
# small tunnel world
rng-seed = cfgRun1
env-width = 200
env-height = 100
heatmap-cell-size = 10
tunnel-x = 50
tunnel-y = 20
tunnel-w = 100
tunnel-h = 60
tunnel-entrance = 0,40,60
tunnel-entrance = 2,40,60
hive = 100,50,N
hive = 10,10:E
patch = 20,20,160,60:20
num-bees = 20
num-iterations = 60
sample-every = 20
";
    let cfg = SimConfig::from_cfg_str(text).unwrap();
    assert_eq!(cfg.hives.len(), 2);
    assert_eq!(cfg.tunnel_entrances.len(), 2);

    let mut world = World::new(cfg.clone(), None);
    assert!(world.hives()[0].inside_tunnel());
    assert!(!world.hives()[1].inside_tunnel());
    let summary = world.run_experiment(cfg.num_iterations, cfg.sample_every);
    assert_eq!(summary.samples.len(), 3);
    assert_eq!(world.heatmap().samples(), 60 * 20);
    assert!(summary.total_visits > 0);

    let mut again = World::new(cfg.clone(), None);
    let repeat = again.run_experiment(cfg.num_iterations, cfg.sample_every);
    assert_eq!(summary.total_visits, repeat.total_visits);
    assert_eq!(world.heatmap().counts(), again.heatmap().counts());
}
