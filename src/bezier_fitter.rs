//! Least-squares cubic Bézier fitting with Newton-Raphson reparameterization.
//!
//! Closed boundary loops are split at sharp corners and each run between
//! corners is fitted recursively until the error drops below the tolerance.
//! Every fit is constrained to the tangent at its end points, so neighbouring
//! curves meet smoothly everywhere except at the corners.

use crate::vectorizer::Point;
use std::fmt::Write;

/// A cubic Bézier curve segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierCurve {
    pub start: Point,
    pub control1: Point,
    pub control2: Point,
    pub end: Point,
}

impl BezierCurve {
    pub fn line(start: Point, end: Point) -> Self {
        let d = end - start;
        Self {
            start,
            control1: start + d * (1.0 / 3.0),
            control2: start + d * (2.0 / 3.0),
            end,
        }
    }

    pub fn evaluate(&self, t: f64) -> Point {
        let mt = 1.0 - t;
        self.start * (mt * mt * mt)
            + self.control1 * (3.0 * mt * mt * t)
            + self.control2 * (3.0 * mt * t * t)
            + self.end * (t * t * t)
    }

    fn derivative(&self, t: f64) -> Point {
        let mt = 1.0 - t;
        (self.control1 - self.start) * (3.0 * mt * mt)
            + (self.control2 - self.control1) * (6.0 * mt * t)
            + (self.end - self.control2) * (3.0 * t * t)
    }

    fn second_derivative(&self, t: f64) -> Point {
        let mt = 1.0 - t;
        (self.control2 - self.control1 * 2.0 + self.start) * (6.0 * mt)
            + (self.end - self.control2 * 2.0 + self.control1) * (6.0 * t)
    }

    /// Control points lie within `slack` of the chord.
    fn is_linear(&self, slack: f64) -> bool {
        let len = self.start.distance(self.end);
        if len < 0.5 {
            return true;
        }
        self.control1.distance_to_line(self.start, self.end) < slack
            && self.control2.distance_to_line(self.start, self.end) < slack
    }
}

pub struct BezierFitter {
    tolerance: f64,
    max_iterations: usize,
    /// Turn angle (radians) above which a vertex is kept as a hard corner.
    corner_angle: f64,
}

impl BezierFitter {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            max_iterations: 12,
            corner_angle: 60f64.to_radians(),
        }
    }

    pub fn with_corner_angle(mut self, degrees: f64) -> Self {
        self.corner_angle = degrees.to_radians();
        self
    }

    /// Fits a closed loop. The returned curves start and end at the same
    /// point; an empty result means the loop had fewer than two points.
    pub fn fit_closed(&self, points: &[Point]) -> Vec<BezierCurve> {
        let n = points.len();
        if n < 2 {
            return Vec::new();
        }

        let corners: Vec<usize> = (0..n)
            .filter(|&i| turn_angle(points[(i + n - 1) % n], points[i], points[(i + 1) % n]) > self.corner_angle)
            .collect();

        // Start on a corner so no curve has to bend through one.
        let offset = corners.first().copied().unwrap_or(0);
        let mut ring: Vec<Point> = points[offset..].iter().chain(&points[..offset]).copied().collect();
        ring.push(ring[0]);

        let mut splits: Vec<usize> = corners.iter().map(|&c| (c + n - offset) % n).collect();
        splits.sort_unstable();
        splits.push(n);
        if splits[0] != 0 {
            splits.insert(0, 0);
        }

        let mut curves = Vec::new();
        for pair in splits.windows(2) {
            let run = &ring[pair[0]..=pair[1]];
            let last = run.len() - 1;
            let (t_start, t_end) = if corners.is_empty() {
                // One run around the whole loop; it closes through ring[0].
                let through = unit(ring[1] - ring[n - 1]);
                (through, through * -1.0)
            } else {
                (unit(run[1] - run[0]), unit(run[last - 1] - run[last]))
            };
            self.fit_segment(run, t_start, t_end, &mut curves);
        }
        self.clamp_controls(points, &mut curves);
        curves
    }

    /// Fits `points` with curves leaving along `t_start` and arriving
    /// against `t_end`, splitting at the worst point until within tolerance.
    fn fit_segment(&self, points: &[Point], t_start: Point, t_end: Point, curves: &mut Vec<BezierCurve>) {
        let n = points.len();
        if n < 2 {
            return;
        }
        let (start, end) = (points[0], points[n - 1]);
        let chord = unit(end - start);
        let t_start = if t_start.length() > 0.0 { t_start } else { chord };
        let t_end = if t_end.length() > 0.0 { t_end } else { chord * -1.0 };
        // Straight runs still leave and arrive along the tangents; between
        // corners those are the chord itself.
        if n == 2 || self.is_nearly_linear(points) {
            let reach = start.distance(end) / 3.0;
            curves.push(BezierCurve {
                start,
                control1: start + t_start * reach,
                control2: end + t_end * reach,
                end,
            });
            return;
        }

        let mut t_values = chord_length_parameterize(points);
        let mut best = tangent_fit(points, &t_values, t_start, t_end);
        let (mut best_err, mut split) = max_error(&best, points, &t_values);

        for _ in 0..self.max_iterations {
            if best_err <= self.tolerance {
                curves.push(best);
                return;
            }
            t_values = reparameterize(&best, points, &t_values);
            let candidate = tangent_fit(points, &t_values, t_start, t_end);
            let (err, idx) = max_error(&candidate, points, &t_values);
            if err >= best_err {
                break;
            }
            best = candidate;
            best_err = err;
            split = idx;
        }
        if best_err <= self.tolerance {
            curves.push(best);
            return;
        }

        let split = split.clamp(1, n - 2);
        let through = unit(points[split + 1] - points[split - 1]);
        self.fit_segment(&points[..=split], t_start, through * -1.0, curves);
        self.fit_segment(&points[split..], through, t_end, curves);
    }

    fn is_nearly_linear(&self, points: &[Point]) -> bool {
        let (start, end) = (points[0], points[points.len() - 1]);
        let len = start.distance(end);
        if len < 1e-6 {
            return false;
        }
        let threshold = (self.tolerance * 0.5).max(len * 0.01);
        points[1..points.len() - 1]
            .iter()
            .all(|p| p.distance_to_line(start, end) <= threshold)
    }

    /// Keeps control points near the loop's bounding box so fitting noise
    /// cannot throw spikes across the image. Controls are pulled back along
    /// their tangent, so joins stay smooth.
    fn clamp_controls(&self, points: &[Point], curves: &mut [BezierCurve]) {
        let (mut lo, mut hi) = (points[0], points[0]);
        for p in points {
            lo = Point::new(lo.x.min(p.x), lo.y.min(p.y));
            hi = Point::new(hi.x.max(p.x), hi.y.max(p.y));
        }
        let margin = ((hi.x - lo.x).max(hi.y - lo.y) * 0.15).max(2.0);
        let (lo, hi) = (lo - Point::new(margin, margin), hi + Point::new(margin, margin));
        for curve in curves {
            curve.control1 = pull_inside(curve.start, curve.control1, lo, hi);
            curve.control2 = pull_inside(curve.end, curve.control2, lo, hi);
        }
    }
}

/// Moves `control` towards `anchor` until it lies inside the box. The
/// anchor is a loop point and therefore already inside.
fn pull_inside(anchor: Point, control: Point, lo: Point, hi: Point) -> Point {
    let d = control - anchor;
    let mut scale: f64 = 1.0;
    for (a, v, min, max) in [(anchor.x, d.x, lo.x, hi.x), (anchor.y, d.y, lo.y, hi.y)] {
        if a + v * scale > max {
            scale = scale.min((max - a) / v);
        } else if a + v * scale < min {
            scale = scale.min((min - a) / v);
        }
    }
    anchor + d * scale.max(0.0)
}

/// 0 for straight on, PI for a U-turn.
fn turn_angle(prev: Point, at: Point, next: Point) -> f64 {
    let (a, b) = (at - prev, next - at);
    let (la, lb) = (a.length(), b.length());
    if la < 1e-9 || lb < 1e-9 {
        return 0.0;
    }
    (a.dot(b) / (la * lb)).clamp(-1.0, 1.0).acos()
}

fn chord_length_parameterize(points: &[Point]) -> Vec<f64> {
    let mut t = Vec::with_capacity(points.len());
    let mut total = 0.0;
    t.push(0.0);
    for w in points.windows(2) {
        total += w[0].distance(w[1]);
        t.push(total);
    }
    if total > 0.0 {
        t.iter_mut().for_each(|v| *v /= total);
    }
    if let Some(last) = t.last_mut() {
        *last = 1.0;
    }
    t
}

fn unit(v: Point) -> Point {
    let len = v.length();
    if len < 1e-12 { Point::new(0.0, 0.0) } else { v * (1.0 / len) }
}

/// Least-squares control point distances along fixed end tangents.
fn tangent_fit(points: &[Point], t_values: &[f64], t_start: Point, t_end: Point) -> BezierCurve {
    let start = points[0];
    let end = points[points.len() - 1];

    let (mut c00, mut c01, mut c11) = (0.0, 0.0, 0.0);
    let (mut x0, mut x1) = (0.0, 0.0);
    for (p, &t) in points.iter().zip(t_values) {
        let mt = 1.0 - t;
        let b0 = mt * mt * mt;
        let b1 = 3.0 * mt * mt * t;
        let b2 = 3.0 * mt * t * t;
        let b3 = t * t * t;
        let a1 = t_start * b1;
        let a2 = t_end * b2;
        c00 += a1.dot(a1);
        c01 += a1.dot(a2);
        c11 += a2.dot(a2);
        let r = *p - start * (b0 + b1) - end * (b2 + b3);
        x0 += a1.dot(r);
        x1 += a2.dot(r);
    }

    let chord = start.distance(end);
    let det = c00 * c11 - c01 * c01;
    let (mut alpha1, mut alpha2) = (chord / 3.0, chord / 3.0);
    if det.abs() > 1e-12 {
        let a1 = (x0 * c11 - x1 * c01) / det;
        let a2 = (c00 * x1 - c01 * x0) / det;
        // Negative or vanishing distances flip the curve into a loop.
        let floor = 1e-6 * chord;
        if a1 > floor && a2 > floor {
            alpha1 = a1;
            alpha2 = a2;
        }
    }
    BezierCurve {
        start,
        control1: start + t_start * alpha1,
        control2: end + t_end * alpha2,
        end,
    }
}

fn max_error(curve: &BezierCurve, points: &[Point], t_values: &[f64]) -> (f64, usize) {
    let mut worst = (0.0, points.len() / 2);
    for i in 1..points.len() - 1 {
        let err = curve.evaluate(t_values[i]).distance(points[i]);
        if err > worst.0 {
            worst = (err, i);
        }
    }
    worst
}

/// One Newton-Raphson step on |B(t) - P|^2 per interior point, keeping the
/// parameters strictly increasing.
fn reparameterize(curve: &BezierCurve, points: &[Point], t_values: &[f64]) -> Vec<f64> {
    let mut next = t_values.to_vec();
    for i in 1..points.len() - 1 {
        let t = t_values[i];
        let diff = curve.evaluate(t) - points[i];
        let d1 = curve.derivative(t);
        let d2 = curve.second_derivative(t);
        let denom = d1.dot(d1) + diff.dot(d2);
        if denom.abs() > 1e-12 {
            next[i] = (t - diff.dot(d1) / denom).clamp(0.0, 1.0);
        }
    }
    for i in 1..next.len() {
        if next[i] <= next[i - 1] {
            next[i] = next[i - 1] + 1e-10;
        }
    }
    next[0] = 0.0;
    if let Some(last) = next.last_mut() {
        *last = 1.0;
    }
    next
}

/// Serialises curves as one closed subpath. Near-linear curves become `L`
/// commands and runs of them along one line are merged.
pub fn bezier_to_svg_path(curves: &[BezierCurve], precision: usize) -> String {
    let Some(first) = curves.first() else {
        return String::new();
    };
    let mut path = format!("M{},{}", fmt_num(first.start.x, precision), fmt_num(first.start.y, precision));

    let mut i = 0;
    while i < curves.len() {
        let curve = &curves[i];
        if curve.is_linear(0.5) {
            let start = curve.start;
            let mut end = curve.end;
            let mut j = i + 1;
            while j < curves.len() && curves[j].is_linear(0.5) && end.distance_to_line(start, curves[j].end) < 0.25 {
                end = curves[j].end;
                j += 1;
            }
            let _ = write!(path, "L{},{}", fmt_num(end.x, precision), fmt_num(end.y, precision));
            i = j;
        } else {
            let _ = write!(
                path,
                "C{},{} {},{} {},{}",
                fmt_num(curve.control1.x, precision),
                fmt_num(curve.control1.y, precision),
                fmt_num(curve.control2.x, precision),
                fmt_num(curve.control2.y, precision),
                fmt_num(curve.end.x, precision),
                fmt_num(curve.end.y, precision),
            );
            i += 1;
        }
    }
    path.push('Z');
    path
}

/// Formats a float compactly: integer if close to whole, else `precision`
/// decimals with trailing zeros trimmed.
pub fn fmt_num(v: f64, precision: usize) -> String {
    let scale = 10f64.powi(precision as i32);
    let rounded = (v * scale).round() / scale;
    if (rounded - rounded.round()).abs() < 1e-9 {
        let whole = rounded.round() as i64;
        // Avoid "-0".
        return if whole == 0 { "0".to_string() } else { whole.to_string() };
    }
    let s = format!("{:.*}", precision, rounded);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
