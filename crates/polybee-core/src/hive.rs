use crate::geometry::Pos2D;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::str::FromStr;

/// Cardinal direction. The y axis grows southwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "N")]
    North,
    #[serde(rename = "E")]
    East,
    #[serde(rename = "S")]
    South,
    #[serde(rename = "W")]
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Direction::North),
            1 => Some(Direction::East),
            2 => Some(Direction::South),
            3 => Some(Direction::West),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }

    /// Heading in `[0, 2π)`.
    pub fn heading(self) -> f64 {
        match self {
            Direction::North => 3.0 * FRAC_PI_2,
            Direction::East => 0.0,
            Direction::South => FRAC_PI_2,
            Direction::West => PI,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::North => "N",
            Direction::East => "E",
            Direction::South => "S",
            Direction::West => "W",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "N" | "NORTH" => Ok(Direction::North),
            "E" | "EAST" => Ok(Direction::East),
            "S" | "SOUTH" => Ok(Direction::South),
            "W" | "WEST" => Ok(Direction::West),
            _ => s
                .parse::<i64>()
                .ok()
                .and_then(Direction::from_code)
                .ok_or_else(|| format!("invalid direction '{s}' (expected 0-3 or N/E/S/W)")),
        }
    }
}

/// Index of a hive in the world's hive list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HiveId(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HiveSpec {
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
}

#[derive(Clone, Debug)]
pub struct Hive {
    pos: Pos2D,
    direction: Direction,
    inside_tunnel: bool,
}

impl Hive {
    pub fn new(spec: &HiveSpec, inside_tunnel: bool) -> Self {
        Self {
            pos: Pos2D::new(spec.x, spec.y),
            direction: spec.direction,
            inside_tunnel,
        }
    }

    pub fn pos(&self) -> Pos2D {
        self.pos
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn inside_tunnel(&self) -> bool {
        self.inside_tunnel
    }
}
