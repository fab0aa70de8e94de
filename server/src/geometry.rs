//! Collision geometry on the integer field.
//!
//! Collisions are outline-against-outline: two squares only touch when their
//! one-pixel borders share a point, so a square entirely inside another does
//! not register. That gives the game its near-miss tolerance.

use shared::{PLAYER_SIZE, SEGMENT_SIZE};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Outline of a `size × size` square anchored at `anchor`.
///
/// The square spans `[x, x + size]` horizontally and `[y - size, y]`
/// vertically. Corners belong to the top and bottom rows.
pub fn perimeter_of(anchor: Point, size: i32) -> Vec<Point> {
    let mut points = Vec::with_capacity((4 * size).max(1) as usize);

    for ix in 0..=size {
        points.push(Point::new(anchor.x + ix, anchor.y));
        if size > 0 {
            points.push(Point::new(anchor.x + ix, anchor.y - size));
        }
    }

    for iy in 1..size {
        points.push(Point::new(anchor.x, anchor.y - iy));
        points.push(Point::new(anchor.x + size, anchor.y - iy));
    }

    points
}

pub fn head_perimeter(anchor: Point) -> Vec<Point> {
    perimeter_of(anchor, PLAYER_SIZE)
}

pub fn segment_perimeter(anchor: Point) -> Vec<Point> {
    perimeter_of(anchor, SEGMENT_SIZE)
}

/// True if the two outlines share at least one point.
pub fn perimeters_touch(a: &[Point], b: &[Point]) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let lookup: HashSet<Point> = small.iter().copied().collect();
    large.iter().any(|p| lookup.contains(p))
}

/// True if boxes around the two anchors, inflated by `reach`, cannot
/// intersect. Exact perimeter tests can then be skipped for this pair.
pub fn quick_reject(a: Point, b: Point, reach: i32) -> bool {
    (a.x - b.x).abs() > reach || (a.y - b.y).abs() > reach
}
