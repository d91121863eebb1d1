use crate::geometry::{intersect, Pos2D, Segment};
use crate::hive::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entrance position along one side of the tunnel, in tunnel-relative units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntranceSpec {
    pub side: Direction,
    pub e1: f64,
    pub e2: f64,
}

impl EntranceSpec {
    /// Copy with `e1 <= e2`.
    pub fn normalized(&self) -> Self {
        Self {
            side: self.side,
            e1: self.e1.min(self.e2),
            e2: self.e1.max(self.e2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entrance {
    pub side: Direction,
    pub segment: Segment,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunnelError {
    #[error("tunnel rectangle must have finite, positive size (got {width} x {height})")]
    InvalidRect { width: f64, height: f64 },
    #[error("entrance {e1}..{e2} on side {side} lies outside its wall (length {wall_len})")]
    EntranceOutsideWall {
        side: Direction,
        e1: f64,
        e2: f64,
        wall_len: f64,
    },
    #[error("move from ({:.3}, {:.3}) to ({:.3}, {:.3}) crosses the tunnel boundary without hitting a wall", .from.x, .from.y, .to.x, .to.y)]
    MissingWallCrossing { from: Pos2D, to: Pos2D },
}

/// Outcome of testing a move against the tunnel boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IntersectInfo {
    /// The move crosses the tunnel boundary.
    pub intersects: bool,
    /// The crossing happens through an entrance gap.
    pub within_limits: bool,
    pub point: Pos2D,
    /// Index into [`Tunnel::entrances`] of the entrance used.
    pub entrance: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Tunnel {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    /// Top, right, bottom, left.
    walls: [Segment; 4],
    entrances: Vec<Entrance>,
}

impl Tunnel {
    pub fn new(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        specs: &[EntranceSpec],
    ) -> Result<Self, TunnelError> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(TunnelError::InvalidRect { width, height });
        }
        let tl = Pos2D::new(x, y);
        let tr = Pos2D::new(x + width, y);
        let br = Pos2D::new(x + width, y + height);
        let bl = Pos2D::new(x, y + height);
        let mut tunnel = Self {
            x,
            y,
            width,
            height,
            walls: [
                Segment::new(tl, tr),
                Segment::new(tr, br),
                Segment::new(bl, br),
                Segment::new(tl, bl),
            ],
            entrances: Vec::with_capacity(specs.len()),
        };
        for spec in specs {
            tunnel.add_entrance(spec)?;
        }
        Ok(tunnel)
    }

    pub fn wall_length(&self, side: Direction) -> f64 {
        match side {
            Direction::North | Direction::South => self.width,
            Direction::East | Direction::West => self.height,
        }
    }

    fn add_entrance(&mut self, spec: &EntranceSpec) -> Result<(), TunnelError> {
        let spec = spec.normalized();
        let wall_len = self.wall_length(spec.side);
        if !(spec.e1.is_finite() && spec.e2.is_finite()) || spec.e1 < 0.0 || spec.e2 > wall_len {
            return Err(TunnelError::EntranceOutsideWall {
                side: spec.side,
                e1: spec.e1,
                e2: spec.e2,
                wall_len,
            });
        }
        let (left, top) = (self.x, self.y);
        let (right, bottom) = (self.x + self.width, self.y + self.height);
        let segment = match spec.side {
            Direction::North => Segment::new(
                Pos2D::new(left + spec.e1, top),
                Pos2D::new(left + spec.e2, top),
            ),
            Direction::East => Segment::new(
                Pos2D::new(right, top + spec.e1),
                Pos2D::new(right, top + spec.e2),
            ),
            Direction::South => Segment::new(
                Pos2D::new(left + spec.e1, bottom),
                Pos2D::new(left + spec.e2, bottom),
            ),
            Direction::West => Segment::new(
                Pos2D::new(left, top + spec.e1),
                Pos2D::new(left, top + spec.e2),
            ),
        };
        self.entrances.push(Entrance {
            side: spec.side,
            segment,
        });
        Ok(())
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn walls(&self) -> &[Segment; 4] {
        &self.walls
    }

    pub fn entrances(&self) -> &[Entrance] {
        &self.entrances
    }

    /// Closed-interval containment.
    pub fn contains(&self, p: Pos2D) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Classify the move `p1 -> p2` against the tunnel boundary.
    pub fn intersects_entrance(&self, p1: Pos2D, p2: Pos2D) -> Result<IntersectInfo, TunnelError> {
        if self.contains(p1) == self.contains(p2) {
            return Ok(IntersectInfo::default());
        }

        let path = Segment::new(p1, p2);
        for (idx, entrance) in self.entrances.iter().enumerate() {
            let hit = intersect(&path, &entrance.segment);
            if hit.within_both {
                return Ok(IntersectInfo {
                    intersects: true,
                    within_limits: true,
                    point: hit.point,
                    entrance: Some(idx),
                });
            }
        }

        for wall in &self.walls {
            let hit = intersect(&path, wall);
            if hit.within_both {
                return Ok(IntersectInfo {
                    intersects: true,
                    within_limits: false,
                    point: hit.point,
                    entrance: None,
                });
            }
        }

        Err(TunnelError::MissingWallCrossing { from: p1, to: p2 })
    }
}
