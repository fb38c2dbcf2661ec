//! Color quantization: k-means++ seeding, k-means refinement and palette
//! mapping, all under a perceptually weighted RGB distance.
//!
//! Seeding uses a fixed-seed RNG and assignment ties go to the lowest
//! palette index, so the same input always yields the same palette.

use crate::error::{ConversionError, Result};
use crate::image_processor::{Color, PixelBuffer};
use crate::progress::Deadline;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rgb::RGBA8;
use std::collections::HashSet;

/// Perceptual color distance squared (weighted RGB, approximates human vision).
/// Weights: R=2, G=4, B=3 (green most sensitive).
#[inline]
pub fn perceptual_dist_sq(a: Color, b: Color) -> i32 {
    let dr = a.r as i32 - b.r as i32;
    let dg = a.g as i32 - b.g as i32;
    let db = a.b as i32 - b.b as i32;
    2 * dr * dr + 4 * dg * dg + 3 * db * db
}

#[inline]
fn weighted_dist_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    2.0 * dr * dr + 4.0 * dg * dg + 3.0 * db * db
}

/// Ordered, duplicate-free set of representative colors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    /// Builds a palette, dropping repeated colors but keeping first-seen order.
    pub fn new(colors: impl IntoIterator<Item = Color>) -> Self {
        let mut seen = HashSet::new();
        let colors = colors.into_iter().filter(|c| seen.insert(*c)).collect();
        Self { colors }
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied()
    }

    /// Index of the nearest entry; the lowest index wins ties.
    pub fn nearest_index(&self, color: Color) -> usize {
        let mut best_idx = 0usize;
        let mut best_dist = i32::MAX;
        for (idx, c) in self.colors.iter().enumerate() {
            let d = perceptual_dist_sq(color, *c);
            if d < best_dist {
                best_dist = d;
                best_idx = idx;
            }
        }
        best_idx
    }

    pub fn nearest(&self, color: Color) -> Option<Color> {
        self.get(self.nearest_index(color))
    }
}

#[derive(Debug, Clone)]
pub struct QuantizeSettings {
    /// Upper bound on k regardless of the requested color count.
    pub color_cap: u16,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this (RGB units).
    pub tolerance: f64,
    pub sample_limit: usize,
    pub seed: u64,
}

impl Default for QuantizeSettings {
    fn default() -> Self {
        Self {
            color_cap: 32,
            max_iterations: 16,
            tolerance: 0.5,
            sample_limit: 100_000,
            seed: 0x5eed_c0105,
        }
    }
}

/// Clamps the requested palette size to `[2, min(requested, cap)]`.
///
/// Quantizing large images to hundreds of clusters is unbounded in practice,
/// so the cap trades palette precision for predictable run time.
pub fn effective_k(requested: u16, cap: u16) -> usize {
    requested.min(cap).max(2) as usize
}

/// Rough bytes the quantize stage holds live: the mapped copy of the image,
/// the borrowed source, and per-sample clustering state including one
/// distance per cluster.
pub fn estimate_working_set(pixel_count: usize, requested: u16, settings: &QuantizeSettings) -> u64 {
    let samples = pixel_count.min(settings.sample_limit) as u64;
    let k = effective_k(requested, settings.color_cap) as u64;
    pixel_count as u64 * 8 + samples * (24 + 4 * k)
}

/// Clusters the buffer's colors into at most `effective_k` entries.
pub fn quantize(
    buffer: &PixelBuffer,
    requested: u16,
    settings: &QuantizeSettings,
    deadline: &Deadline,
) -> Result<Palette> {
    let k = effective_k(requested, settings.color_cap);
    let samples = sample_colors(buffer, settings.sample_limit);
    if samples.is_empty() {
        return Err(ConversionError::Unknown("cannot quantize an empty image".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut centroids = kmeans_plusplus_init(&samples, k, &mut rng);
    deadline.check()?;

    let mut assignments = vec![0usize; samples.len()];
    for iteration in 0..settings.max_iterations {
        deadline.check()?;
        for (slot, s) in assignments.iter_mut().zip(&samples) {
            *slot = nearest_centroid(*s, &centroids);
        }

        let mut sums = vec![[0f64; 3]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (s, &a) in samples.iter().zip(&assignments) {
            sums[a][0] += s[0];
            sums[a][1] += s[1];
            sums[a][2] += s[2];
            counts[a] += 1;
        }

        let mut max_shift = 0.0f64;
        for (j, c) in centroids.iter_mut().enumerate() {
            if counts[j] == 0 {
                continue;
            }
            let n = counts[j] as f64;
            let next = [sums[j][0] / n, sums[j][1] / n, sums[j][2] / n];
            let shift = ((next[0] - c[0]).powi(2) + (next[1] - c[1]).powi(2) + (next[2] - c[2]).powi(2)).sqrt();
            max_shift = max_shift.max(shift);
            *c = next;
        }

        if max_shift < settings.tolerance {
            log::debug!("k-means converged after {} iterations", iteration + 1);
            break;
        }
    }

    let palette = Palette::new(centroids.iter().map(|c| {
        Color::new(
            c[0].round().clamp(0.0, 255.0) as u8,
            c[1].round().clamp(0.0, 255.0) as u8,
            c[2].round().clamp(0.0, 255.0) as u8,
        )
    }));
    log::debug!("quantized to {} colors (requested {}, k {})", palette.len(), requested, k);
    Ok(palette)
}

/// Replaces every pixel with its nearest palette color, keeping alpha.
pub fn map_to_palette(buffer: &PixelBuffer, palette: &Palette) -> Result<PixelBuffer> {
    if palette.is_empty() {
        return Err(ConversionError::Unknown("cannot map onto an empty palette".to_string()));
    }
    let pixels: Vec<RGBA8> = buffer
        .pixels
        .par_iter()
        .map(|p| palette.colors[palette.nearest_index(Color::from(*p))].with_alpha(p.a))
        .collect();
    PixelBuffer::new(buffer.width, buffer.height, pixels)
}

/// Counts distinct RGB values, stopping early once `stop_after` is passed.
pub fn count_distinct_colors(buffer: &PixelBuffer, stop_after: usize) -> usize {
    let mut seen = HashSet::new();
    for p in &buffer.pixels {
        seen.insert((p.r, p.g, p.b));
        if seen.len() > stop_after {
            break;
        }
    }
    seen.len()
}

/// Downsamples to at most `limit` colors, skipping fully transparent pixels
/// whose RGB carries no meaning (unless nothing else is left).
fn sample_colors(buffer: &PixelBuffer, limit: usize) -> Vec<[f64; 3]> {
    let step = (buffer.pixels.len() / limit.max(1)).max(1);
    let to_sample = |p: &RGBA8| [p.r as f64, p.g as f64, p.b as f64];
    let visible: Vec<[f64; 3]> = buffer
        .pixels
        .iter()
        .step_by(step)
        .filter(|p| p.a > 0)
        .map(to_sample)
        .collect();
    if !visible.is_empty() {
        return visible;
    }
    buffer.pixels.iter().step_by(step).map(to_sample).collect()
}

/// K-means++ initialization: choose centroids with probability proportional
/// to squared distance from nearest existing centroid.
fn kmeans_plusplus_init(samples: &[[f64; 3]], k: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    let n = samples.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }

    let mut centroids = Vec::with_capacity(k);
    centroids.push(samples[rng.gen_range(0..n)]);
    let mut distances = vec![f64::MAX; n];

    while centroids.len() < k {
        let newest = centroids[centroids.len() - 1];
        let mut total = 0.0f64;
        for (d, s) in distances.iter_mut().zip(samples) {
            *d = d.min(weighted_dist_sq(*s, newest));
            total += *d;
        }
        // Every sample already sits on a centroid.
        if total == 0.0 {
            break;
        }

        let mut target = rng.r#gen::<f64>() * total;
        let mut chosen = n - 1;
        for (i, &d) in distances.iter().enumerate() {
            target -= d;
            if target <= 0.0 && d > 0.0 {
                chosen = i;
                break;
            }
        }
        if distances[chosen] == 0.0 {
            match distances.iter().position(|&d| d > 0.0) {
                Some(i) => chosen = i,
                None => break,
            }
        }
        centroids.push(samples[chosen]);
    }

    centroids
}

#[inline]
fn nearest_centroid(sample: [f64; 3], centroids: &[[f64; 3]]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::MAX;
    for (j, c) in centroids.iter().enumerate() {
        let d = weighted_dist_sq(sample, *c);
        if d < best_dist {
            best_dist = d;
            best_idx = j;
        }
    }
    best_idx
}
