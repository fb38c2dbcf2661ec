//! Edge-driven region labelling.
//!
//! Seeds are the 4-connected runs of same-colored, non-edge pixels. Edge
//! pixels and seeds below the minimum area are then absorbed in three
//! passes: growth into same-colored neighbours, promotion of leftover
//! same-colored runs that are large enough, and finally unconstrained
//! growth. Every pixel ends up in exactly one region, so the traced
//! regions tile the image.

use crate::edge_detector::EdgeMap;
use crate::error::{ConversionError, Result};
use crate::image_processor::PixelBuffer;
use crate::progress::Deadline;
use rgb::RGBA8;
use std::collections::VecDeque;

const UNLABELED: u32 = u32::MAX;

/// Alpha below which pixels count as transparent for labelling.
pub const TRANSPARENT_ALPHA: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

impl Bounds {
    fn at(x: usize, y: usize) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y }
    }

    fn include(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: u32,
    pub area: usize,
    pub bounds: Bounds,
    /// Mean RGBA over the region's pixels.
    pub mean: [f64; 4],
}

impl Region {
    pub fn mean_color(&self) -> RGBA8 {
        let c = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        RGBA8::new(c(self.mean[0]), c(self.mean[1]), c(self.mean[2]), c(self.mean[3]))
    }

    pub fn is_transparent(&self) -> bool {
        self.mean[3] < TRANSPARENT_ALPHA as f64
    }
}

#[derive(Debug, Clone)]
pub struct RegionMap {
    pub width: u32,
    pub height: u32,
    /// Region id per pixel, ids are indices into `regions`.
    pub labels: Vec<u32>,
    /// Ordered by the raster position of each region's first pixel.
    pub regions: Vec<Region>,
}

impl RegionMap {
    #[inline]
    pub fn label(&self, x: usize, y: usize) -> u32 {
        self.labels[y * self.width as usize + x]
    }
}

/// Transparent pixels share one key regardless of their RGB.
#[inline]
fn color_key(p: RGBA8) -> u32 {
    if p.a < TRANSPARENT_ALPHA {
        u32::MAX
    } else {
        u32::from_be_bytes([p.r, p.g, p.b, p.a])
    }
}

pub fn label_regions(
    edges: &EdgeMap,
    colors: &PixelBuffer,
    min_region_area: usize,
    deadline: &Deadline,
) -> Result<RegionMap> {
    if edges.width != colors.width || edges.height != colors.height {
        return Err(ConversionError::Unknown(format!(
            "edge map {}x{} does not match color map {}x{}",
            edges.width, edges.height, colors.width, colors.height
        )));
    }
    let w = colors.width as usize;
    let h = colors.height as usize;
    let keys: Vec<u32> = colors.pixels.iter().map(|&p| color_key(p)).collect();
    let mut labels = vec![UNLABELED; w * h];
    let mut next_label = 0u32;

    // Seeds: same-colored non-edge components of sufficient size.
    for start in 0..w * h {
        if start % w == 0 {
            deadline.check()?;
        }
        if labels[start] != UNLABELED || edges.mask[start] {
            continue;
        }
        let component = flood(start, w, h, &mut labels, next_label, |i| {
            !edges.mask[i] && keys[i] == keys[start]
        });
        if component.len() >= min_region_area {
            next_label += 1;
        } else {
            for i in component {
                labels[i] = UNLABELED;
            }
        }
    }
    deadline.check()?;

    grow(w, h, &mut labels, |from, to| keys[from] == keys[to]);
    deadline.check()?;

    // Leftover same-colored runs (mostly thin strokes made entirely of edge
    // pixels) become regions of their own when large enough.
    let mut visited = vec![false; w * h];
    for start in 0..w * h {
        if labels[start] != UNLABELED || visited[start] {
            continue;
        }
        let component = flood_visit(start, w, h, &mut visited, |i| {
            labels[i] == UNLABELED && keys[i] == keys[start]
        });
        if component.len() >= min_region_area {
            for i in component {
                labels[i] = next_label;
            }
            next_label += 1;
        }
    }
    deadline.check()?;

    if next_label == 0 {
        labels.fill(0);
    } else {
        grow(w, h, &mut labels, |_, _| true);
    }
    deadline.check()?;

    Ok(renumber(colors, labels))
}

/// BFS over 4-neighbours accepted by `accept`, writing `label` as it goes.
fn flood(
    start: usize,
    w: usize,
    h: usize,
    labels: &mut [u32],
    label: u32,
    accept: impl Fn(usize) -> bool,
) -> Vec<usize> {
    let mut component = vec![start];
    let mut queue = VecDeque::from([start]);
    labels[start] = label;
    while let Some(i) = queue.pop_front() {
        for n in neighbours4(i, w, h) {
            if labels[n] == UNLABELED && accept(n) {
                labels[n] = label;
                component.push(n);
                queue.push_back(n);
            }
        }
    }
    component
}

fn flood_visit(start: usize, w: usize, h: usize, visited: &mut [bool], accept: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut component = vec![start];
    let mut queue = VecDeque::from([start]);
    visited[start] = true;
    while let Some(i) = queue.pop_front() {
        for n in neighbours4(i, w, h) {
            if !visited[n] && accept(n) {
                visited[n] = true;
                component.push(n);
                queue.push_back(n);
            }
        }
    }
    component
}

/// Multi-source BFS from every labelled pixel into unlabelled neighbours
/// that `may_join(from, to)` allows. Sources are queued in raster order so
/// contested pixels resolve deterministically.
fn grow(w: usize, h: usize, labels: &mut [u32], may_join: impl Fn(usize, usize) -> bool) {
    let mut queue: VecDeque<usize> = (0..w * h).filter(|&i| labels[i] != UNLABELED).collect();
    while let Some(i) = queue.pop_front() {
        for n in neighbours4(i, w, h) {
            if labels[n] == UNLABELED && may_join(i, n) {
                labels[n] = labels[i];
                queue.push_back(n);
            }
        }
    }
}

fn neighbours4(i: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let (x, y) = (i % w, i / w);
    [
        (y > 0).then(|| i - w),
        (x > 0).then(|| i - 1),
        (x + 1 < w).then(|| i + 1),
        (y + 1 < h).then(|| i + w),
    ]
    .into_iter()
    .flatten()
}

/// Relabels in raster order of first appearance and gathers per-region stats.
fn renumber(colors: &PixelBuffer, labels: Vec<u32>) -> RegionMap {
    let w = colors.width as usize;
    let mut remap: Vec<u32> = Vec::new();
    let mut regions: Vec<Region> = Vec::new();
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut out = labels;

    for (i, label) in out.iter_mut().enumerate() {
        let old = *label as usize;
        if old >= remap.len() {
            remap.resize(old + 1, UNLABELED);
        }
        let (x, y) = (i % w, i / w);
        if remap[old] == UNLABELED {
            let id = regions.len() as u32;
            remap[old] = id;
            regions.push(Region { id, area: 0, bounds: Bounds::at(x, y), mean: [0.0; 4] });
            sums.push([0.0; 4]);
        }
        let id = remap[old];
        let region = &mut regions[id as usize];
        region.area += 1;
        region.bounds.include(x, y);
        let p = colors.pixels[i];
        let s = &mut sums[id as usize];
        s[0] += p.r as f64;
        s[1] += p.g as f64;
        s[2] += p.b as f64;
        s[3] += p.a as f64;
        *label = id;
    }

    for (region, sum) in regions.iter_mut().zip(sums) {
        let n = region.area as f64;
        region.mean = sum.map(|v| v / n);
    }

    RegionMap {
        width: colors.width,
        height: colors.height,
        labels: out,
        regions,
    }
}
