use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned grid rectangle. Unlike a Win32 `RECT`, `right` and `bottom` are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}
impl Rect {
    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self { left, top, right, bottom }
    }
    pub fn valid(&self) -> bool {
        self.left <= self.right && self.top <= self.bottom
    }
    pub fn contains(&self, x: i16, y: i16) -> bool {
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }
    fn corners(&self) -> [(i16, i16); 4] {
        [
            (self.left, self.top),
            (self.right, self.top),
            (self.left, self.bottom),
            (self.right, self.bottom),
        ]
    }
    /// Corner containment: true when a corner of either rect lies inside the other.
    ///
    /// Two thin rects crossing like a `+` share no corners and are *not* reported.
    /// Clients depend on this exact answer, so it is not a separating-axis test.
    pub fn intersects(&self, other: &Rect) -> bool {
        other.corners().iter().any(|&(x, y)| self.contains(x, y))
            || self.corners().iter().any(|&(x, y)| other.contains(x, y))
    }
}
impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.left, self.top, self.right, self.bottom)
    }
}

/// A granted lock. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub rect: Rect,
    pub owner: String,
    pub description: String,
    /// Seconds since the UNIX epoch.
    pub time: f64,
}

/// Wall clock in seconds since the UNIX epoch.
pub fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
