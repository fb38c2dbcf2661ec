//! Preprocess stage: transparency handling and optional denoising.
//!
//! Runs between decode and quantization. Photos get an edge-preserving
//! bilateral pass so k-means sees fewer noise colors; flat artwork is left
//! untouched.

use crate::config::VectorizationConfig;
use crate::error::Result;
use crate::image_processor::{Color, PixelBuffer};
use crate::progress::Deadline;
use rgb::RGBA8;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    /// Composite onto this color and drop alpha when set.
    pub flatten_onto: Option<Color>,
    /// Bilateral filter passes, 0 disables the filter.
    pub denoise_iterations: u32,
    pub denoise_radius: usize,
    /// Range sigma of the bilateral filter, in RGB units.
    pub color_sigma: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            flatten_onto: None,
            denoise_iterations: 0,
            denoise_radius: 2,
            color_sigma: 30.0,
        }
    }
}

impl PreprocessOptions {
    /// Photo-like input gets one wider bilateral pass; everything else
    /// keeps the filter off.
    pub fn for_config(config: &VectorizationConfig, photo_like: bool) -> Self {
        let defaults = Self::default();
        Self {
            flatten_onto: (!config.preserve_transparency).then_some(Color::new(255, 255, 255)),
            denoise_iterations: if photo_like { 1 } else { 0 },
            color_sigma: if photo_like { 40.0 } else { defaults.color_sigma },
            ..defaults
        }
    }
}

pub fn preprocess(buffer: &PixelBuffer, options: &PreprocessOptions, deadline: &Deadline) -> Result<PixelBuffer> {
    let mut pixels = match options.flatten_onto {
        Some(bg) => flatten(&buffer.pixels, bg),
        None => buffer.pixels.clone(),
    };

    for _ in 0..options.denoise_iterations {
        pixels = bilateral_filter(
            &pixels,
            buffer.width as usize,
            buffer.height as usize,
            options.denoise_radius,
            options.color_sigma,
            deadline,
        )?;
    }

    PixelBuffer::new(buffer.width, buffer.height, pixels)
}

/// Alpha-composites every pixel over `bg`, leaving a fully opaque buffer.
fn flatten(pixels: &[RGBA8], bg: Color) -> Vec<RGBA8> {
    pixels
        .iter()
        .map(|p| {
            let a = p.a as u32;
            let mix = |c: u8, b: u8| ((c as u32 * a + b as u32 * (255 - a) + 127) / 255) as u8;
            RGBA8::new(mix(p.r, bg.r), mix(p.g, bg.g), mix(p.b, bg.b), 255)
        })
        .collect()
}

/// LUT-based bilateral filter with fixed-point weights.
fn bilateral_filter(
    pixels: &[RGBA8],
    w: usize,
    h: usize,
    radius: usize,
    color_sigma: f32,
    deadline: &Deadline,
) -> Result<Vec<RGBA8>> {
    // 195075 = 3 * 255^2, the largest squared RGB distance.
    const MAX_DIST_SQ: usize = 195_075;
    const LUT_SIZE: usize = 256;

    let range_denom = 2.0 * (color_sigma as f64).powi(2);
    let bin_scale = MAX_DIST_SQ as f64 / LUT_SIZE as f64;
    let range_lut: Vec<u64> = (0..LUT_SIZE)
        .map(|i| ((-(i as f64 * bin_scale) / range_denom).exp() * 1024.0) as u64)
        .collect();

    let mut output = Vec::with_capacity(pixels.len());
    for y in 0..h {
        deadline.check()?;
        let y_range = y.saturating_sub(radius)..(y + radius + 1).min(h);
        for x in 0..w {
            let center = pixels[y * w + x];
            let x_range = x.saturating_sub(radius)..(x + radius + 1).min(w);

            let (mut sr, mut sg, mut sb, mut sw) = (0u64, 0u64, 0u64, 0u64);
            for ny in y_range.clone() {
                for nx in x_range.clone() {
                    let n = pixels[ny * w + nx];
                    let dr = n.r as i32 - center.r as i32;
                    let dg = n.g as i32 - center.g as i32;
                    let db = n.b as i32 - center.b as i32;
                    let dist_sq = (dr * dr + dg * dg + db * db) as usize;
                    let weight = range_lut[(dist_sq * LUT_SIZE / (MAX_DIST_SQ + 1)).min(LUT_SIZE - 1)];
                    sr += n.r as u64 * weight;
                    sg += n.g as u64 * weight;
                    sb += n.b as u64 * weight;
                    sw += weight;
                }
            }

            output.push(if sw > 0 {
                RGBA8::new((sr / sw) as u8, (sg / sw) as u8, (sb / sw) as u8, center.a)
            } else {
                center
            });
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Stage;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::unbounded(Stage::Preprocess)
    }

    #[test]
    fn test_flatten_over_white() {
        let pixels = vec![
            RGBA8::new(0, 0, 0, 0),
            RGBA8::new(0, 0, 0, 255),
            RGBA8::new(0, 0, 0, 128),
        ];
        let out = flatten(&pixels, Color::new(255, 255, 255));
        assert_eq!(out[0], RGBA8::new(255, 255, 255, 255));
        assert_eq!(out[1], RGBA8::new(0, 0, 0, 255));
        assert!(out[2].r > 120 && out[2].r < 135);
        assert!(out.iter().all(|p| p.a == 255));
    }

    #[test]
    fn test_options_for_config() {
        let cfg = VectorizationConfig { preserve_transparency: false, ..Default::default() };
        let opts = PreprocessOptions::for_config(&cfg, true);
        assert_eq!(opts.flatten_onto, Some(Color::new(255, 255, 255)));
        assert_eq!(opts.denoise_iterations, 1);
        assert_eq!(opts.color_sigma, 40.0);

        let opts = PreprocessOptions::for_config(&cfg, false);
        assert_eq!(opts.denoise_iterations, 0);
        assert_eq!(opts.color_sigma, PreprocessOptions::default().color_sigma);

        let opts = PreprocessOptions::for_config(&VectorizationConfig::default(), false);
        assert_eq!(opts, PreprocessOptions::default());
    }

    #[test]
    fn test_preprocess_default_is_identity() {
        let buf = PixelBuffer::filled(3, 3, RGBA8::new(10, 20, 30, 40));
        let out = preprocess(&buf, &PreprocessOptions::default(), &deadline()).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn test_bilateral_filter_preserves_alpha() {
        let pixels = vec![
            RGBA8::new(128, 128, 128, 255),
            RGBA8::new(128, 128, 128, 128),
            RGBA8::new(128, 128, 128, 0),
        ];
        let result = bilateral_filter(&pixels, 3, 1, 2, 30.0, &deadline()).unwrap();
        assert_eq!(result[0].a, 255);
        assert_eq!(result[1].a, 128);
        assert_eq!(result[2].a, 0);
    }

    #[test]
    fn test_bilateral_filter_keeps_hard_edge() {
        let mut pixels = vec![RGBA8::new(0, 0, 0, 255); 5];
        pixels.extend(vec![RGBA8::new(255, 255, 255, 255); 5]);
        let result = bilateral_filter(&pixels, 10, 1, 2, 20.0, &deadline()).unwrap();
        assert!(result[4].r < 10);
        assert!(result[5].r > 245);
    }

    #[test]
    fn test_bilateral_filter_times_out() {
        let pixels = vec![RGBA8::new(1, 1, 1, 255); 4];
        let expired = Deadline::new(Stage::Preprocess, Duration::ZERO);
        assert!(bilateral_filter(&pixels, 2, 2, 1, 30.0, &expired).is_err());
    }
}
