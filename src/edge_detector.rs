//! Sobel and Canny edge detection over the quantized buffer.
//!
//! Gradients are taken per RGBA channel and the strongest channel wins, so
//! two palette colors of equal luminance still produce an edge, and so do
//! opaque/transparent boundaries. Magnitudes are normalised to 0.0..=1.0.

use crate::config::{Algorithm, VectorizationConfig};
use crate::error::Result;
use crate::image_processor::PixelBuffer;
use crate::progress::Deadline;

/// Largest per-channel Sobel magnitude: |gx| = |gy| = 4 * 255.
const MAX_SOBEL: f32 = 1442.5;

#[derive(Debug, Clone)]
pub struct EdgeMap {
    pub width: u32,
    pub height: u32,
    /// Gradient magnitude per pixel, 0.0..=1.0.
    pub magnitude: Vec<f32>,
    /// Gradient direction per pixel in radians, -PI..=PI.
    pub direction: Vec<f32>,
    pub mask: Vec<bool>,
}

impl EdgeMap {
    pub fn edge_count(&self) -> usize {
        self.mask.iter().filter(|&&e| e).count()
    }

    #[inline]
    pub fn is_edge(&self, x: usize, y: usize) -> bool {
        self.mask[y * self.width as usize + x]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeMethod {
    Sobel { threshold: f32 },
    Canny { low: f32, high: f32, kernel_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSettings {
    pub method: EdgeMethod,
}

impl EdgeSettings {
    /// Photos and high-detail settings get Canny, which copes with gradients
    /// and noise; flat artwork gets the cheaper Sobel pass.
    pub fn for_config(config: &VectorizationConfig, photo_like: bool) -> Self {
        let method = match config.algorithm {
            Algorithm::Photo => EdgeMethod::Canny { low: 0.05, high: 0.15, kernel_size: 5 },
            Algorithm::Lineart => EdgeMethod::Sobel { threshold: 0.05 },
            Algorithm::Auto if photo_like || config.is_high_detail() => {
                EdgeMethod::Canny { low: 0.04, high: 0.12, kernel_size: 3 }
            }
            Algorithm::Auto | Algorithm::Shapes => EdgeMethod::Sobel { threshold: 0.1 },
        };
        Self { method }
    }

    pub fn detect(&self, buffer: &PixelBuffer, deadline: &Deadline) -> Result<EdgeMap> {
        match self.method {
            EdgeMethod::Sobel { threshold } => detect_sobel(buffer, threshold, deadline),
            EdgeMethod::Canny { low, high, kernel_size } => detect_canny(buffer, low, high, kernel_size, deadline),
        }
    }
}

/// Sobel gradient with a single binarisation threshold.
pub fn detect_sobel(buffer: &PixelBuffer, threshold: f32, deadline: &Deadline) -> Result<EdgeMap> {
    let planes = channel_planes(buffer);
    let (magnitude, direction) = sobel_gradient(&planes, buffer.width as usize, buffer.height as usize, deadline)?;
    let mask = magnitude.iter().map(|&m| m > 0.0 && m >= threshold).collect();
    Ok(EdgeMap {
        width: buffer.width,
        height: buffer.height,
        magnitude,
        direction,
        mask,
    })
}

/// Canny: Gaussian blur, Sobel gradient, non-maximum suppression, then
/// double-threshold hysteresis with 8-connectivity.
pub fn detect_canny(
    buffer: &PixelBuffer,
    low: f32,
    high: f32,
    kernel_size: usize,
    deadline: &Deadline,
) -> Result<EdgeMap> {
    let w = buffer.width as usize;
    let h = buffer.height as usize;
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    // A zero low threshold would mark every pixel as a weak edge.
    let low = low.max(1e-4);

    let kernel = gaussian_kernel(kernel_size);
    let mut planes = channel_planes(buffer);
    for plane in planes.iter_mut() {
        *plane = blur(plane, w, h, &kernel, deadline)?;
    }
    let (magnitude, direction) = sobel_gradient(&planes, w, h, deadline)?;

    // Non-maximum suppression along the quantised gradient direction.
    let mut thin = vec![0f32; w * h];
    for y in 0..h {
        deadline.check()?;
        for x in 0..w {
            let i = y * w + x;
            let m = magnitude[i];
            if m == 0.0 {
                continue;
            }
            let (dx, dy) = direction_step(direction[i]);
            let a = sample(&magnitude, w, h, x as isize + dx, y as isize + dy);
            let b = sample(&magnitude, w, h, x as isize - dx, y as isize - dy);
            if m >= a && m >= b {
                thin[i] = m;
            }
        }
    }

    // Hysteresis: grow strong edges through connected weak ones.
    let mut mask = vec![false; w * h];
    let mut stack: Vec<usize> = Vec::new();
    for (i, &m) in thin.iter().enumerate() {
        if m >= high && !mask[i] {
            mask[i] = true;
            stack.push(i);
            while let Some(j) = stack.pop() {
                let (jx, jy) = ((j % w) as isize, (j / w) as isize);
                for (nx, ny) in neighbours8(jx, jy, w, h) {
                    let n = ny * w + nx;
                    if !mask[n] && thin[n] >= low {
                        mask[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
    }
    deadline.check()?;

    Ok(EdgeMap {
        width: buffer.width,
        height: buffer.height,
        magnitude: thin,
        direction,
        mask,
    })
}

fn channel_planes(buffer: &PixelBuffer) -> [Vec<f32>; 4] {
    let n = buffer.pixels.len();
    let mut planes = [
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
    ];
    for p in &buffer.pixels {
        planes[0].push(p.r as f32);
        planes[1].push(p.g as f32);
        planes[2].push(p.b as f32);
        planes[3].push(p.a as f32);
    }
    planes
}

/// Per-pixel Sobel over all planes with replicated borders; the plane with
/// the largest magnitude supplies both magnitude and direction.
fn sobel_gradient(planes: &[Vec<f32>; 4], w: usize, h: usize, deadline: &Deadline) -> Result<(Vec<f32>, Vec<f32>)> {
    const SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
    const SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

    let mut magnitude = vec![0f32; w * h];
    let mut direction = vec![0f32; w * h];
    for y in 0..h {
        deadline.check()?;
        for x in 0..w {
            let mut best = (0f32, 0f32);
            for plane in planes {
                let mut gx = 0f32;
                let mut gy = 0f32;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let v = sample(plane, w, h, x as isize + kx as isize - 1, y as isize + ky as isize - 1);
                        gx += v * SOBEL_X[ky * 3 + kx];
                        gy += v * SOBEL_Y[ky * 3 + kx];
                    }
                }
                let m = (gx * gx + gy * gy).sqrt();
                if m > best.0 {
                    best = (m, gy.atan2(gx));
                }
            }
            magnitude[y * w + x] = (best.0 / MAX_SOBEL).min(1.0);
            direction[y * w + x] = best.1;
        }
    }
    Ok((magnitude, direction))
}

#[inline]
fn sample(plane: &[f32], w: usize, h: usize, x: isize, y: isize) -> f32 {
    let cx = x.clamp(0, w as isize - 1) as usize;
    let cy = y.clamp(0, h as isize - 1) as usize;
    plane[cy * w + cx]
}

/// Neighbour offset along the gradient, quantised to 0/45/90/135 degrees.
fn direction_step(angle: f32) -> (isize, isize) {
    let mut deg = angle.to_degrees();
    if deg < 0.0 {
        deg += 180.0;
    }
    if !(22.5..157.5).contains(&deg) {
        (1, 0)
    } else if deg < 67.5 {
        (1, 1)
    } else if deg < 112.5 {
        (0, 1)
    } else {
        (-1, 1)
    }
}

fn neighbours8(x: isize, y: isize, w: usize, h: usize) -> impl Iterator<Item = (usize, usize)> {
    (-1..=1isize)
        .flat_map(move |dy| (-1..=1isize).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < w as isize && ny < h as isize)
        .map(|(nx, ny)| (nx as usize, ny as usize))
}

/// Normalised 1-D Gaussian; `size` is forced odd within 3..=7.
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let size = size.clamp(3, 7) | 1;
    let half = (size / 2) as isize;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|v| v / sum).collect()
}

/// Separable blur with replicated borders.
fn blur(plane: &[f32], w: usize, h: usize, kernel: &[f32], deadline: &Deadline) -> Result<Vec<f32>> {
    let half = (kernel.len() / 2) as isize;
    let mut tmp = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            tmp[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| weight * sample(plane, w, h, x as isize + k as isize - half, y as isize))
                .sum();
        }
    }
    deadline.check()?;
    let mut out = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| weight * sample(&tmp, w, h, x as isize, y as isize + k as isize - half))
                .sum();
        }
    }
    deadline.check()?;
    Ok(out)
}
