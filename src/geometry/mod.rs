//! Geometry engine
//!
//! Pure functions over 2D world coordinates: the segment intersection test
//! used for line-of-sound, and per-map static obstruction lookup.
//!
//! The intersection test compares orientation signs with exact floating
//! point. Colinear or touching segments are not special-cased and report
//! no intersection; the wall data is authored so that this never matters
//! in practice.

pub mod walls;

pub use walls::{walls_for_map, MapId};

/// A point in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A static line segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

impl Segment {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            a: Point::new(x1, y1),
            b: Point::new(x2, y2),
        }
    }
}

/// True when A, B, C are in strict counter-clockwise order
#[inline]
fn ccw(a: Point, b: Point, c: Point) -> bool {
    (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
}

/// Whether segment AB crosses segment CD
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}

/// Whether any static wall of `map` blocks the straight line between two
/// players.
pub fn any_obstruction_between(map: u8, me: Point, other: Point) -> bool {
    walls_for_map(map)
        .iter()
        .any(|wall| segments_intersect(wall.a, wall.b, me, other))
}

/// Squared euclidean distance
#[inline]
pub fn distance_squared(a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    dx * dx + dy * dy
}
