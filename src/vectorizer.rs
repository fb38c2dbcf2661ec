//! Region boundaries to SVG path data.
//!
//! Each labelled region is traced along pixel cracks, so adjacent regions
//! share their boundary exactly. Loops are smoothed, simplified with
//! Douglas-Peucker and, above the lowest smoothing level, fitted with cubic
//! Béziers. Holes are emitted as extra subpaths and rely on even-odd fill.

use crate::bezier_fitter::{bezier_to_svg_path, fmt_num, BezierFitter};
use crate::config::{SmoothingLevel, VectorizationConfig};
use crate::edge_detector::EdgeMap;
use crate::error::Result;
use crate::image_processor::{Color, PixelBuffer};
use crate::progress::Deadline;
use crate::quantizer::Palette;
use crate::region_extractor::{label_regions, Region, RegionMap};
use rayon::prelude::*;
use std::fmt::Write;
use std::ops::{Add, Mul, Sub};

/// Decimal places kept in path data; the SVG writer rounds further.
const PATH_PRECISION: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Point) -> f64 {
        (self - other).length()
    }

    /// Distance to the segment `start..end`.
    pub fn distance_to_line(self, start: Point, end: Point) -> f64 {
        let d = end - start;
        let len_sq = d.dot(d);
        if len_sq < 1e-10 {
            return self.distance(start);
        }
        let t = ((self - start).dot(d) / len_sq).clamp(0.0, 1.0);
        self.distance(start + d * t)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, o: Point) -> Point {
        Point::new(self.x + o.x, self.y + o.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, o: Point) -> Point {
        Point::new(self.x - o.x, self.y - o.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, s: f64) -> Point {
        Point::new(self.x * s, self.y * s)
    }
}

/// One filled region of the output.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPath {
    /// SVG path data, one closed subpath per boundary loop.
    pub path_data: String,
    pub fill: Color,
    /// Points left after simplification, summed over all loops.
    pub complexity: f64,
    /// Region area in pixels.
    pub area: usize,
}

/// Traces every region of the edge-driven labelling and returns one path per
/// surviving region, in region discovery order.
pub fn vectorize_edges(
    edges: &EdgeMap,
    colors: &PixelBuffer,
    palette: &Palette,
    config: &VectorizationConfig,
    min_region_area: usize,
    deadline: &Deadline,
) -> Result<Vec<VectorPath>> {
    let map = label_regions(edges, colors, min_region_area.max(1), deadline)?;
    log::debug!(
        "{} regions from {} edge pixels ({}x{})",
        map.regions.len(),
        edges.edge_count(),
        map.width,
        map.height
    );

    let traced: Vec<Option<VectorPath>> = map
        .regions
        .par_iter()
        .map(|region| vectorize_region(&map, region, palette, config, deadline))
        .collect::<Result<_>>()?;

    Ok(traced.into_iter().flatten().collect())
}

fn vectorize_region(
    map: &RegionMap,
    region: &Region,
    palette: &Palette,
    config: &VectorizationConfig,
    deadline: &Deadline,
) -> Result<Option<VectorPath>> {
    deadline.check()?;
    if config.preserve_transparency && region.is_transparent() {
        return Ok(None);
    }

    let b = region.bounds;
    let (bw, bh) = (b.width(), b.height());
    let mut mask = Vec::with_capacity(bw * bh);
    for y in b.min_y..=b.max_y {
        for x in b.min_x..=b.max_x {
            mask.push(map.label(x, y) == region.id);
        }
    }

    let offset = Point::new(b.min_x as f64, b.min_y as f64);
    let (width, height) = (map.width as f64, map.height as f64);
    let on_border = |p: Point| p.x == 0.0 || p.y == 0.0 || p.x == width || p.y == height;
    let passes = match config.smoothing_level {
        SmoothingLevel::Low => 0,
        SmoothingLevel::Medium => 1,
        SmoothingLevel::High => 2,
    };

    let mut path_data = String::new();
    let mut complexity = 0usize;
    for ring in trace_loops(&mask, bw, bh) {
        let ring: Vec<Point> = ring.into_iter().map(|p| p + offset).collect();
        let smoothed = smooth_closed(&ring, passes, on_border);
        let simplified = simplify_closed(&smoothed, config.path_simplification);
        if simplified.len() < 3 {
            continue;
        }
        complexity += simplified.len();
        path_data.push_str(&loop_path(&simplified, config));
    }

    if path_data.is_empty() {
        return Ok(None);
    }

    let mean = region.mean_color();
    let mean = Color::new(mean.r, mean.g, mean.b);
    Ok(Some(VectorPath {
        path_data,
        fill: palette.nearest(mean).unwrap_or(mean),
        complexity: complexity as f64,
        area: region.area,
    }))
}

fn loop_path(points: &[Point], config: &VectorizationConfig) -> String {
    let tolerance = match config.smoothing_level {
        SmoothingLevel::Low => return polygon_path(points),
        SmoothingLevel::Medium => config.path_simplification.max(0.5),
        SmoothingLevel::High => config.path_simplification.max(0.5) * 1.5,
    };
    let curves = BezierFitter::new(tolerance).fit_closed(points);
    if curves.is_empty() {
        polygon_path(points)
    } else {
        bezier_to_svg_path(&curves, PATH_PRECISION)
    }
}

fn polygon_path(points: &[Point]) -> String {
    let mut d = String::new();
    for (i, p) in points.iter().enumerate() {
        let cmd = if i == 0 { 'M' } else { 'L' };
        let _ = write!(d, "{cmd}{},{}", fmt_num(p.x, PATH_PRECISION), fmt_num(p.y, PATH_PRECISION));
    }
    d.push('Z');
    d
}

const STEPS: [(isize, isize); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Follows the cracks between inside and outside pixels of `mask`
/// (`w * h`, row-major) and returns every boundary loop as a list of pixel
/// corner vertices.
///
/// Boundary edges are directed with the inside on the right, so outer loops
/// run clockwise on screen and holes counter-clockwise. Where two inside
/// pixels touch only diagonally the tracer turns right, keeping them apart,
/// which matches the 4-connected labelling.
pub fn trace_loops(mask: &[bool], w: usize, h: usize) -> Vec<Vec<Point>> {
    let inside = |x: isize, y: isize| {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && mask[y as usize * w + x as usize]
    };

    // Outgoing boundary edges per vertex, one bit per direction.
    let vw = w + 1;
    let mut outgoing = vec![0u8; vw * (h + 1)];
    for y in 0..h as isize {
        for x in 0..w as isize {
            if !inside(x, y) {
                continue;
            }
            let v = |vx: isize, vy: isize| vy as usize * vw + vx as usize;
            if !inside(x, y - 1) {
                outgoing[v(x, y)] |= 1 << 0;
            }
            if !inside(x + 1, y) {
                outgoing[v(x + 1, y)] |= 1 << 1;
            }
            if !inside(x, y + 1) {
                outgoing[v(x + 1, y + 1)] |= 1 << 2;
            }
            if !inside(x - 1, y) {
                outgoing[v(x, y + 1)] |= 1 << 3;
            }
        }
    }

    let mut used = vec![0u8; outgoing.len()];
    let mut loops = Vec::new();
    for start in 0..outgoing.len() {
        while outgoing[start] & !used[start] != 0 {
            let free = outgoing[start] & !used[start];
            let start_dir = free.trailing_zeros() as u8;
            let mut ring = Vec::new();
            let (mut v, mut dir) = (start, start_dir);
            loop {
                ring.push(Point::new((v % vw) as f64, (v / vw) as f64));
                used[v] |= 1 << dir;
                let (dx, dy) = STEPS[dir as usize];
                let next = ((v / vw) as isize + dy) as usize * vw + ((v % vw) as isize + dx) as usize;
                let Some(next_dir) = pick_turn(outgoing[next], dir) else {
                    break;
                };
                if next == start && next_dir == start_dir {
                    break;
                }
                v = next;
                dir = next_dir;
            }
            loops.push(ring);
        }
    }
    debug_assert!(outgoing.iter().zip(&used).all(|(o, u)| o == u));
    loops
}

/// Right turn first, then straight, then left.
fn pick_turn(available: u8, heading: u8) -> Option<u8> {
    [(heading + 1) % 4, heading, (heading + 3) % 4]
        .into_iter()
        .find(|&d| available & (1 << d) != 0)
}

/// Weighted 0.25/0.5/0.25 averaging around a closed loop. Points for which
/// `pinned` holds stay put, which keeps the image frame square.
pub fn smooth_closed(points: &[Point], passes: usize, pinned: impl Fn(Point) -> bool) -> Vec<Point> {
    if passes == 0 || points.len() < 3 {
        return points.to_vec();
    }
    let fixed: Vec<bool> = points.iter().map(|&p| pinned(p)).collect();
    let mut current = points.to_vec();
    let n = current.len();
    for _ in 0..passes {
        current = (0..n)
            .map(|i| {
                if fixed[i] {
                    return current[i];
                }
                let prev = current[(i + n - 1) % n];
                let next = current[(i + 1) % n];
                prev * 0.25 + current[i] * 0.5 + next * 0.25
            })
            .collect();
    }
    current
}

/// Douglas-Peucker for closed loops.
///
/// The loop is anchored at its first point, the point farthest from it, and
/// the point farthest from that chord; each arc between anchors is then
/// simplified independently. Anchors do not depend on `tolerance`, so a
/// larger tolerance never keeps more points than a smaller one.
pub fn simplify_closed(points: &[Point], tolerance: f64) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let far = farthest(points, |p| p.distance(first));
    if points[far].distance(first) == 0.0 {
        return vec![first];
    }
    let third = farthest(points, |p| p.distance_to_line(first, points[far]));
    let mut anchors = vec![0, far];
    if third != 0 && third != far && points[third].distance_to_line(first, points[far]) > 0.0 {
        anchors.push(third);
    }
    anchors.sort_unstable();

    let mut out = Vec::new();
    for (i, &a) in anchors.iter().enumerate() {
        let arc: Vec<Point> = match anchors.get(i + 1) {
            Some(&b) => points[a..=b].to_vec(),
            None => points[a..].iter().chain(std::iter::once(&points[0])).copied().collect(),
        };
        let mut part = rdp_simplify(&arc, tolerance);
        part.pop();
        out.extend(part);
    }
    out
}

fn farthest(points: &[Point], metric: impl Fn(Point) -> f64) -> usize {
    let mut best = (0, f64::MIN);
    for (i, &p) in points.iter().enumerate() {
        let d = metric(p);
        if d > best.1 {
            best = (i, d);
        }
    }
    best.0
}

/// Ramer-Douglas-Peucker path simplification of an open polyline.
pub fn rdp_simplify(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = p.distance_to_line(first, last);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        let mut left = rdp_simplify(&points[..=max_idx], epsilon);
        let right = rdp_simplify(&points[max_idx..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

#[cfg(test)]
mod tests {
    include!("vectorizer_tests.rs");
}
