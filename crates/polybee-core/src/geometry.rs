use serde::{Deserialize, Serialize};

/// Denominators smaller than this are treated as parallel lines.
const PARALLEL_EPSILON: f64 = 1e-10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pos2D {
    pub x: f64,
    pub y: f64,
}

impl Pos2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(self, other: Pos2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Length of this position interpreted as a vector from the origin.
    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Rescale to `len`. A zero-length vector is returned unchanged.
    pub fn scaled_to_length(self, len: f64) -> Pos2D {
        let current = self.length();
        if current == 0.0 {
            return self;
        }
        let k = len / current;
        Pos2D::new(self.x * k, self.y * k)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Pos2D,
    pub end: Pos2D,
}

impl Segment {
    pub const fn new(start: Pos2D, end: Pos2D) -> Self {
        Self { start, end }
    }
}

/// Result of a line-line intersection test between two segments.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentIntersection {
    /// False when the supporting lines are parallel (or coincident).
    pub intersects: bool,
    /// True when the crossing point lies on both segments, endpoints included.
    pub within_both: bool,
    pub point: Pos2D,
}

/// Intersect the infinite lines through `a` and `b` and report whether the
/// crossing lies within both segments.
pub fn intersect(a: &Segment, b: &Segment) -> SegmentIntersection {
    let (a1, a2) = (a.start, a.end);
    let (b1, b2) = (b.start, b.end);

    let denom = (a1.x - a2.x) * (b1.y - b2.y) - (a1.y - a2.y) * (b1.x - b2.x);
    if denom.abs() < PARALLEL_EPSILON {
        return SegmentIntersection::default();
    }

    let t = ((a1.x - b1.x) * (b1.y - b2.y) - (a1.y - b1.y) * (b1.x - b2.x)) / denom;
    let u = -((a1.x - a2.x) * (a1.y - b1.y) - (a1.y - a2.y) * (a1.x - b1.x)) / denom;

    SegmentIntersection {
        intersects: true,
        within_both: (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u),
        point: Pos2D::new(a1.x + t * (a2.x - a1.x), a1.y + t * (a2.y - a1.y)),
    }
}
