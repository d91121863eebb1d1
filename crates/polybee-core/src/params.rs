//! Declarative parameter registry over [`SimConfig`].
//!
//! Every user-facing key has a name, a description and a typed value. The
//! registry drives help text, flat `key = value` config files and
//! `--set key=value` overrides. Repeated keys (`hive`, `tunnel-entrance`,
//! `patch`) append to their list, and the first occurrence in a batch of
//! pairs replaces the default list.

use crate::config::{EmdBackend, EvolveObjective, SimConfig};
use crate::hive::{Direction, HiveSpec};
use crate::plant::PatchSpec;
use crate::tunnel::EntranceSpec;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Registry entry with the default value filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamEntry {
    pub name: &'static str,
    pub default: ParamValue,
    pub description: &'static str,
}

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("unknown parameter '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("line {line}: expected 'key = value', got '{text}'")]
    MalformedLine { line: usize, text: String },
    #[error("failed to read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Scalar types that can be set from a raw string and shown in help text.
pub trait ParamField: Sized {
    fn parse_param(raw: &str) -> Result<Self, String>;
    fn to_param_value(&self) -> ParamValue;
}

impl ParamField for bool {
    fn parse_param(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got '{other}'")),
        }
    }

    fn to_param_value(&self) -> ParamValue {
        ParamValue::Bool(*self)
    }
}

macro_rules! int_param_field {
    ($($ty:ty),*) => {
        $(
            impl ParamField for $ty {
                fn parse_param(raw: &str) -> Result<Self, String> {
                    raw.trim().parse::<$ty>().map_err(|e| e.to_string())
                }

                fn to_param_value(&self) -> ParamValue {
                    ParamValue::Int(*self as i64)
                }
            }
        )*
    };
}

int_param_field!(usize, u32, i64);

impl ParamField for f64 {
    fn parse_param(raw: &str) -> Result<Self, String> {
        let v = raw.trim().parse::<f64>().map_err(|e| e.to_string())?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err("value must be finite".to_string())
        }
    }

    fn to_param_value(&self) -> ParamValue {
        ParamValue::Float(*self)
    }
}

impl ParamField for String {
    fn parse_param(raw: &str) -> Result<Self, String> {
        Ok(raw.trim().to_string())
    }

    fn to_param_value(&self) -> ParamValue {
        ParamValue::Str(self.clone())
    }
}

impl ParamField for EmdBackend {
    fn parse_param(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approx" => Ok(EmdBackend::Approx),
            "exact" => Ok(EmdBackend::Exact),
            "thresholded" => Ok(EmdBackend::Thresholded),
            other => Err(format!("expected approx, exact or thresholded, got '{other}'")),
        }
    }

    fn to_param_value(&self) -> ParamValue {
        let name = match self {
            EmdBackend::Approx => "approx",
            EmdBackend::Exact => "exact",
            EmdBackend::Thresholded => "thresholded",
        };
        ParamValue::Str(name.to_string())
    }
}

impl ParamField for EvolveObjective {
    fn parse_param(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "emd" => Ok(EvolveObjective::Emd),
            "visits" => Ok(EvolveObjective::Visits),
            other => Err(format!("expected emd or visits, got '{other}'")),
        }
    }

    fn to_param_value(&self) -> ParamValue {
        let name = match self {
            EvolveObjective::Emd => "emd",
            EvolveObjective::Visits => "visits",
        };
        ParamValue::Str(name.to_string())
    }
}

fn assign<T: ParamField>(slot: &mut T, raw: &str) -> Result<(), String> {
    *slot = T::parse_param(raw)?;
    Ok(())
}

macro_rules! define_params {
    (
        scalars { $( $name:literal => $field:ident : $desc:literal; )* }
        lists { $( $lname:literal => $lfield:ident, $parse:path, $format:path : $ldesc:literal; )* }
    ) => {
        /// Every recognised key, in help-text order.
        pub const PARAMS: &[ParamInfo] = &[
            $( ParamInfo { name: $name, description: $desc }, )*
            $( ParamInfo { name: $lname, description: $ldesc }, )*
        ];

        const LIST_KEYS: &[&str] = &[ $( $lname ),* ];

        impl SimConfig {
            fn set_scalar(&mut self, name: &str, raw: &str) -> Option<Result<(), String>> {
                match name {
                    $( $name => Some(assign(&mut self.$field, raw)), )*
                    _ => None,
                }
            }

            fn push_list_item(&mut self, name: &str, raw: &str) -> Option<Result<(), String>> {
                match name {
                    $( $lname => Some($parse(raw).map(|item| self.$lfield.push(item))), )*
                    _ => None,
                }
            }

            fn clear_list(&mut self, name: &str) {
                match name {
                    $( $lname => self.$lfield.clear(), )*
                    _ => {}
                }
            }

            fn list_items(&self, name: &str) -> Option<Vec<String>> {
                match name {
                    $( $lname => Some(self.$lfield.iter().map($format).collect()), )*
                    _ => None,
                }
            }

            /// Current value of `name` in registry form.
            pub fn get_param(&self, name: &str) -> Option<ParamValue> {
                let name = canonical_name(name);
                match name {
                    $( $name => Some(self.$field.to_param_value()), )*
                    _ => self.list_items(name).map(|items| ParamValue::Str(items.join("; "))),
                }
            }
        }
    };
}

define_params! {
    scalars {
        "rng-seed" => rng_seed: "Seed (an alphanumeric string) for the random number generator; empty draws one";
        "num-iterations" => num_iterations: "Number of ticks to run the simulation";
        "env-width" => env_width: "Width of the environment";
        "env-height" => env_height: "Height of the environment";
        "tunnel-x" => tunnel_x: "X position of the left edge of the tunnel";
        "tunnel-y" => tunnel_y: "Y position of the top edge of the tunnel";
        "tunnel-w" => tunnel_w: "Width of the tunnel (0 disables the tunnel)";
        "tunnel-h" => tunnel_h: "Height of the tunnel (0 disables the tunnel)";
        "num-bees" => num_bees: "Number of bees, divided evenly between hives";
        "bee-visual-range" => bee_visual_range: "Maximum distance over which a bee detects a plant";
        "bee-step-size" => bee_step_size: "Distance a bee moves forward each tick";
        "bee-max-dir-delta" => bee_max_dir_delta: "Maximum change in heading (radians) per tick";
        "bee-path-record-len" => bee_path_record_len: "Maximum number of positions kept in a bee's trail";
        "bee-visit-memory-length" => bee_visit_memory_length: "Number of recently visited plants a bee avoids";
        "bee-nectar-demand" => bee_nectar_demand: "Nectar a bee tries to extract per visit";
        "flower-initial-nectar" => flower_initial_nectar: "Nectar each plant starts with";
        "min-visit-count-success" => min_visit_count_success: "Lower bound (inclusive) of the successful visit window";
        "max-visit-count-success" => max_visit_count_success: "Upper bound (inclusive) of the successful visit window";
        "heatmap-cell-size" => heatmap_cell_size: "Size of each heatmap cell";
        "sample-every" => sample_every: "Ticks between recorded metric samples";
        "emd-backend" => emd_backend: "EMD engine: approx, exact or thresholded";
        "emd-multiplier" => emd_multiplier: "Minimum integer mass distributions are scaled to for the thresholded EMD";
        "emd-threshold" => emd_threshold: "Ground distance cap (cells) for the thresholded EMD; 0 is automatic";
        "target-heatmap-filename" => target_heatmap_filename: "CSV file containing the target heatmap";
        "evolve" => evolve: "Run the optimizer against the target heatmap";
        "num-generations" => num_generations: "Number of optimizer generations";
        "num-configs-per-gen" => num_configs_per_gen: "Candidate configurations per generation";
        "num-trials-per-config" => num_trials_per_config: "Trials run for each candidate configuration";
        "evolve-objective" => evolve_objective: "Optimizer objective: emd or visits";
        "evolve-entrances" => evolve_entrances: "Let the optimizer move tunnel entrances";
        "evolve-hive-positions" => evolve_hive_positions: "Let the optimizer move hives";
        "evolve-entrance-width" => evolve_entrance_width: "Width of entrances placed by the optimizer";
        "evolve-hives-inside-tunnel" => evolve_hives_inside_tunnel: "Evolved hives placed inside the tunnel";
        "evolve-hives-outside-tunnel" => evolve_hives_outside_tunnel: "Evolved hives placed outside the tunnel";
        "evolve-hives-free" => evolve_hives_free: "Evolved hives placed anywhere in the environment";
        "num-islands" => num_islands: "Optimizer populations evolved side by side";
        "migration-period" => migration_period: "Generations between migrations across islands";
        "migration-num-select" => migration_num_select: "Candidates each island sends per migration";
        "migration-num-replace" => migration_num_replace: "Candidates each island replaces per migration";
        "logging" => logging: "Write output files at the end of a run";
        "log-dir" => log_dir: "Directory for output files";
        "log-filename-prefix" => log_filename_prefix: "Prefix for output file names";
        "command-line-quiet" => command_line_quiet: "Silence informational messages";
    }
    lists {
        "hive" => hives, parse_hive, format_hive: "Hive as x,y,direction (direction 0-3 or N/E/S/W); repeatable";
        "tunnel-entrance" => tunnel_entrances, parse_entrance, format_entrance: "Tunnel entrance as side,e1,e2 in tunnel coordinates; repeatable";
        "patch" => patches, parse_patch, format_patch: "Plant patch as x,y,w,h:spacing[:jitter[:species[:repeats:dx,dy]]]; repeatable";
    }
}

fn canonical_name(name: &str) -> &str {
    match name {
        "num-trials-per-gen" => "num-configs-per-gen",
        "tunnel-width" => "tunnel-w",
        "tunnel-height" => "tunnel-h",
        "bee-step-length" => "bee-step-size",
        other => other,
    }
}

/// Registry with defaults taken from [`SimConfig::default`].
pub fn registry() -> Vec<ParamEntry> {
    let defaults = SimConfig::default();
    PARAMS
        .iter()
        .map(|info| ParamEntry {
            name: info.name,
            default: defaults
                .get_param(info.name)
                .unwrap_or(ParamValue::Str(String::new())),
            description: info.description,
        })
        .collect()
}

fn parse_floats<const N: usize>(raw: &str) -> Result<[f64; N], String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers"));
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = f64::parse_param(part)?;
    }
    Ok(out)
}

/// `x,y,direction` or `x,y:direction`.
pub fn parse_hive(raw: &str) -> Result<HiveSpec, String> {
    let raw = raw.trim();
    let (coords, dir) = match raw.split_once(':') {
        Some((coords, dir)) => (coords, dir),
        None => raw
            .rsplit_once(',')
            .ok_or_else(|| "expected x,y,direction".to_string())?,
    };
    let [x, y] = parse_floats::<2>(coords)?;
    let direction = dir.parse::<Direction>()?;
    Ok(HiveSpec { x, y, direction })
}

pub fn format_hive(hive: &HiveSpec) -> String {
    format!("{},{},{}", hive.x, hive.y, hive.direction)
}

/// `side,e1,e2` or `e1,e2:side`.
pub fn parse_entrance(raw: &str) -> Result<EntranceSpec, String> {
    let raw = raw.trim();
    let (side, edges) = match raw.split_once(':') {
        Some((edges, side)) => (side, edges),
        None => raw
            .split_once(',')
            .ok_or_else(|| "expected side,e1,e2".to_string())?,
    };
    let side = side.parse::<Direction>()?;
    let [e1, e2] = parse_floats::<2>(edges)?;
    Ok(EntranceSpec { side, e1, e2 })
}

pub fn format_entrance(spec: &EntranceSpec) -> String {
    format!("{},{},{}", spec.side, spec.e1, spec.e2)
}

/// `x,y,w,h:spacing[:jitter[:species[:repeats:dx,dy]]]`.
pub fn parse_patch(raw: &str) -> Result<PatchSpec, String> {
    let parts: Vec<&str> = raw.trim().split(':').map(str::trim).collect();
    if !matches!(parts.len(), 2 | 3 | 4 | 6) {
        return Err("expected x,y,w,h:spacing[:jitter[:species[:repeats:dx,dy]]]".to_string());
    }
    let [x, y, w, h] = parse_floats::<4>(parts[0])?;
    let mut patch = PatchSpec {
        x,
        y,
        w,
        h,
        spacing: f64::parse_param(parts[1])?,
        ..PatchSpec::default()
    };
    if let Some(jitter) = parts.get(2) {
        patch.jitter = f64::parse_param(jitter)?;
    }
    if let Some(species) = parts.get(3) {
        patch.species_id = u32::parse_param(species)?;
    }
    if parts.len() == 6 {
        patch.repeats = u32::parse_param(parts[4])?;
        let [dx, dy] = parse_floats::<2>(parts[5])?;
        patch.dx = dx;
        patch.dy = dy;
    }
    Ok(patch)
}

pub fn format_patch(p: &PatchSpec) -> String {
    format!(
        "{},{},{},{}:{}:{}:{}:{}:{},{}",
        p.x, p.y, p.w, p.h, p.spacing, p.jitter, p.species_id, p.repeats, p.dx, p.dy
    )
}

/// Split a `key=value` override.
pub fn parse_pair(raw: &str) -> Result<(String, String), ParamError> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| ParamError::MalformedLine {
            line: 0,
            text: raw.to_string(),
        })
}

/// Parse `key = value` lines. `#` starts a comment; blank lines are skipped.
pub fn parse_cfg_str(text: &str) -> Result<Vec<(String, String)>, ParamError> {
    let mut pairs = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let pair = parse_pair(content).map_err(|_| ParamError::MalformedLine {
            line: idx + 1,
            text: line.to_string(),
        })?;
        pairs.push(pair);
    }
    Ok(pairs)
}

impl SimConfig {
    /// Set a single key. List keys append.
    pub fn set_param(&mut self, key: &str, value: &str) -> Result<(), ParamError> {
        let name = canonical_name(key.trim());
        let outcome = self
            .set_scalar(name, value)
            .or_else(|| self.push_list_item(name, value))
            .ok_or_else(|| ParamError::UnknownKey(key.to_string()))?;
        outcome.map_err(|reason| ParamError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        })
    }

    /// Apply pairs in order. The first occurrence of a list key replaces its list.
    pub fn apply_pairs<I, K, V>(&mut self, pairs: I) -> Result<(), ParamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut replaced: HashSet<&'static str> = HashSet::new();
        for (key, value) in pairs {
            let name = canonical_name(key.as_ref().trim());
            if let Some(list) = LIST_KEYS.iter().copied().find(|k| *k == name) {
                if replaced.insert(list) {
                    self.clear_list(list);
                }
            }
            self.set_param(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    pub fn from_cfg_str(text: &str) -> Result<Self, ParamError> {
        let mut config = SimConfig::default();
        config.apply_pairs(parse_cfg_str(text)?)?;
        Ok(config)
    }

    /// Load a config file: `.json` as JSON, anything else as `key = value` lines.
    pub fn load(path: &Path) -> Result<Self, ParamError> {
        let text = std::fs::read_to_string(path).map_err(|source| ParamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&text)?)
        } else {
            Self::from_cfg_str(&text)
        }
    }

    /// Render as a config file that [`SimConfig::from_cfg_str`] reads back.
    pub fn to_cfg_string(&self) -> String {
        let mut out = String::new();
        for info in PARAMS {
            out.push_str(&format!("# {}\n", info.description));
            if let Some(items) = self.list_items(info.name) {
                for item in items {
                    out.push_str(&format!("{} = {}\n", info.name, item));
                }
            } else if let Some(value) = self.get_param(info.name) {
                out.push_str(&format!("{} = {}\n", info.name, value));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique_and_resolvable() {
        let defaults = SimConfig::default();
        let mut seen = HashSet::new();
        for info in PARAMS {
            assert!(seen.insert(info.name), "duplicate key {}", info.name);
            assert!(defaults.get_param(info.name).is_some(), "{}", info.name);
        }
        assert_eq!(registry().len(), PARAMS.len());
    }

    #[test]
    fn registry_reports_typed_defaults() {
        let entries = registry();
        let width = entries.iter().find(|e| e.name == "env-width").unwrap();
        assert_eq!(width.default, ParamValue::Float(450.0));
        let bees = entries.iter().find(|e| e.name == "num-bees").unwrap();
        assert_eq!(bees.default, ParamValue::Int(50));
        let evolve = entries.iter().find(|e| e.name == "evolve").unwrap();
        assert_eq!(evolve.default, ParamValue::Bool(false));
    }

    #[test]
    fn set_param_parses_typed_values() {
        let mut cfg = SimConfig::default();
        cfg.set_param("env-width", "100").unwrap();
        cfg.set_param("evolve", "true").unwrap();
        cfg.set_param("emd-backend", "Exact").unwrap();
        cfg.set_param("num-trials-per-gen", "8").unwrap();
        assert_eq!(cfg.env_width, 100.0);
        assert!(cfg.evolve);
        assert_eq!(cfg.emd_backend, EmdBackend::Exact);
        assert_eq!(cfg.num_configs_per_gen, 8);
    }

    #[test]
    fn set_param_rejects_unknown_and_malformed() {
        let mut cfg = SimConfig::default();
        assert!(matches!(
            cfg.set_param("no-such-key", "1"),
            Err(ParamError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set_param("num-bees", "many"),
            Err(ParamError::InvalidValue { .. })
        ));
        assert!(matches!(
            cfg.set_param("hive", "1,2,9"),
            Err(ParamError::InvalidValue { .. })
        ));
    }

    #[test]
    fn hive_and_entrance_formats() {
        assert_eq!(
            parse_hive("50,50,E").unwrap(),
            HiveSpec { x: 50.0, y: 50.0, direction: Direction::East }
        );
        assert_eq!(parse_hive("10.5,20:3").unwrap().direction, Direction::West);
        let e = parse_entrance("0,25,35").unwrap();
        assert_eq!(e, EntranceSpec { side: Direction::North, e1: 25.0, e2: 35.0 });
        assert_eq!(parse_entrance("25,35:2").unwrap().side, Direction::South);
        assert!(parse_entrance("4,1,2").is_err());
    }

    #[test]
    fn patch_optional_sections() {
        let p = parse_patch("10,20,30,40:5").unwrap();
        assert_eq!((p.x, p.y, p.w, p.h, p.spacing), (10.0, 20.0, 30.0, 40.0, 5.0));
        assert_eq!((p.jitter, p.species_id, p.repeats), (0.0, 1, 1));
        let p = parse_patch("0,0,10,10:2:0.5:3:4:50,25").unwrap();
        assert_eq!((p.jitter, p.species_id, p.repeats, p.dx, p.dy), (0.5, 3, 4, 50.0, 25.0));
        assert!(parse_patch("0,0,10,10:2:0.5:3:4").is_err());
        assert!(parse_patch("0,0,10:2").is_err());
    }

    #[test]
    fn first_list_key_replaces_default_list() {
        let cfg = SimConfig::from_cfg_str(
            "# two hives\n\nhive = 10,10,N\nhive = 20,20,S # second\nnum-bees = 4\n",
        )
        .unwrap();
        assert_eq!(cfg.hives.len(), 2);
        assert_eq!(cfg.hives[1].direction, Direction::South);
        assert_eq!(cfg.num_bees, 4);
    }

    #[test]
    fn malformed_cfg_line_reports_line_number() {
        let err = SimConfig::from_cfg_str("num-bees = 3\nnot a pair\n").unwrap_err();
        assert!(matches!(err, ParamError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn cfg_dump_reads_back_identically() {
        let mut cfg = SimConfig::default();
        cfg.apply_pairs([
            ("tunnel-w", "60"),
            ("tunnel-h", "40"),
            ("tunnel-entrance", "N,5,15"),
            ("patch", "5,5,10,10:2.5:0.5:2:3:20,0"),
            ("rng-seed", "AAA"),
        ])
        .unwrap();
        let back = SimConfig::from_cfg_str(&cfg.to_cfg_string()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn parse_pair_requires_key() {
        assert_eq!(
            parse_pair(" num-bees = 5 ").unwrap(),
            ("num-bees".to_string(), "5".to_string())
        );
        assert!(parse_pair("=5").is_err());
        assert!(parse_pair("num-bees").is_err());
    }
}
