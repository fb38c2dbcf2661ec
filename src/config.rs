//! Conversion settings and resource limits.
//!
//! `VectorizationConfig` is what a user adjusts; `PipelineLimits` and
//! `BatchLimits` are operator-level budgets. All three deserialize from JSON
//! so the CLI can load them from a file.

use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_COLORS: u16 = 2;
pub const MAX_COLORS: u16 = 256;
pub const MIN_SIMPLIFICATION: f64 = 0.1;
pub const MAX_SIMPLIFICATION: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Pick shapes or photo handling from the image's color statistics.
    Auto,
    Shapes,
    Photo,
    Lineart,
}

/// Named starting points for [`VectorizationConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Logo,
    Illustration,
    Photo,
    Lineart,
    HighDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VectorizationConfig {
    /// Requested palette size, 2..=256. The quantizer caps it further.
    pub color_count: u16,
    pub smoothing_level: SmoothingLevel,
    /// Douglas-Peucker tolerance in pixels, 0.1..=10.0.
    pub path_simplification: f64,
    pub preserve_transparency: bool,
    pub algorithm: Algorithm,
}

impl Default for VectorizationConfig {
    fn default() -> Self {
        Self {
            color_count: 16,
            smoothing_level: SmoothingLevel::Medium,
            path_simplification: 1.0,
            preserve_transparency: true,
            algorithm: Algorithm::Auto,
        }
    }
}

impl VectorizationConfig {
    pub fn preset(preset: Preset) -> Self {
        let base = Self::default();
        match preset {
            Preset::Logo => Self {
                color_count: 8,
                smoothing_level: SmoothingLevel::Medium,
                path_simplification: 1.5,
                algorithm: Algorithm::Shapes,
                ..base
            },
            Preset::Illustration => Self {
                color_count: 24,
                smoothing_level: SmoothingLevel::High,
                path_simplification: 1.0,
                algorithm: Algorithm::Shapes,
                ..base
            },
            Preset::Photo => Self {
                color_count: 32,
                smoothing_level: SmoothingLevel::High,
                path_simplification: 2.0,
                preserve_transparency: false,
                algorithm: Algorithm::Photo,
            },
            Preset::Lineart => Self {
                color_count: 2,
                smoothing_level: SmoothingLevel::Medium,
                path_simplification: 0.8,
                algorithm: Algorithm::Lineart,
                ..base
            },
            Preset::HighDetail => Self {
                color_count: 64,
                smoothing_level: SmoothingLevel::Low,
                path_simplification: 0.3,
                algorithm: Algorithm::Auto,
                ..base
            },
        }
    }

    /// Rejects any field outside its domain.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_COLORS..=MAX_COLORS).contains(&self.color_count) {
            return Err(ConversionError::Validation(format!(
                "colorCount must be between {MIN_COLORS} and {MAX_COLORS}, got {}",
                self.color_count
            )));
        }
        if !self.path_simplification.is_finite()
            || !(MIN_SIMPLIFICATION..=MAX_SIMPLIFICATION).contains(&self.path_simplification)
        {
            return Err(ConversionError::Validation(format!(
                "pathSimplification must be between {MIN_SIMPLIFICATION} and {MAX_SIMPLIFICATION}, got {}",
                self.path_simplification
            )));
        }
        Ok(())
    }

    /// Pulls out-of-range fields back into their domain.
    pub fn clamped(mut self) -> Self {
        self.color_count = self.color_count.clamp(MIN_COLORS, MAX_COLORS);
        self.path_simplification = if self.path_simplification.is_finite() {
            self.path_simplification.clamp(MIN_SIMPLIFICATION, MAX_SIMPLIFICATION)
        } else {
            VectorizationConfig::default().path_simplification
        };
        self
    }

    /// Settings for the single reduced-effort retry: a quarter of the
    /// colors, triple the simplification tolerance, lowest smoothing.
    pub fn reduced(&self) -> Self {
        Self {
            color_count: (self.color_count / 4).max(MIN_COLORS),
            smoothing_level: SmoothingLevel::Low,
            path_simplification: (self.path_simplification * 3.0).min(MAX_SIMPLIFICATION),
            ..self.clone()
        }
    }

    /// Detailed settings route photo-like edge detection even under `Auto`.
    pub fn is_high_detail(&self) -> bool {
        self.color_count >= 24 && self.path_simplification <= 0.5
    }
}

/// Per-stage time budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    #[serde(with = "millis")]
    pub decode: Duration,
    #[serde(with = "millis")]
    pub preprocess: Duration,
    #[serde(with = "millis")]
    pub quantize: Duration,
    #[serde(with = "millis")]
    pub vectorize: Duration,
    #[serde(with = "millis")]
    pub generate: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            decode: Duration::from_secs(30),
            preprocess: Duration::from_secs(10),
            quantize: Duration::from_secs(30),
            vectorize: Duration::from_secs(30),
            generate: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineLimits {
    /// Per-file ceiling checked at upload. Batch tiers apply tighter caps
    /// at admission.
    pub max_file_size: u64,
    pub max_dimension: u32,
    /// Largest raster the fallback will embed as a data URI.
    pub max_embed_size: u64,
    /// Effective k-means cluster cap regardless of the requested palette.
    pub color_cap: u16,
    /// Estimated quantize working-set ceiling in bytes.
    pub quantize_memory_budget: u64,
    pub timeouts: StageTimeouts,
    pub kmeans_max_iterations: usize,
    pub kmeans_sample_limit: usize,
    /// Regions smaller than this many pixels are merged into neighbours.
    pub min_region_area: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            max_dimension: 4096,
            max_embed_size: 50 * 1024 * 1024,
            color_cap: 32,
            quantize_memory_budget: 150 * 1024 * 1024,
            timeouts: StageTimeouts::default(),
            kmeans_max_iterations: 16,
            kmeans_sample_limit: 100_000,
            min_region_area: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub max_files: usize,
    pub max_file_size: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

impl BatchLimits {
    /// Larger per-file cap used by the professional tier.
    pub fn professional() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            ..Self::default()
        }
    }
}

/// Everything the CLI can read from a `--config` JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vectorization: VectorizationConfig,
    pub pipeline: PipelineLimits,
    pub batch: BatchLimits,
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ConversionError::Validation(format!("invalid settings file: {e}")))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VectorizationConfig::default().validate().is_ok());
        for preset in [
            Preset::Logo,
            Preset::Illustration,
            Preset::Photo,
            Preset::Lineart,
            Preset::HighDetail,
        ] {
            assert!(VectorizationConfig::preset(preset).validate().is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cfg = VectorizationConfig { color_count: 1, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConversionError::Validation(_))));
        let cfg = VectorizationConfig { color_count: 300, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = VectorizationConfig { path_simplification: 0.0, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = VectorizationConfig { path_simplification: f64::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_clamped() {
        let cfg = VectorizationConfig {
            color_count: 999,
            path_simplification: 50.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(cfg.color_count, 256);
        assert_eq!(cfg.path_simplification, 10.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_reduced_settings() {
        let cfg = VectorizationConfig {
            color_count: 32,
            smoothing_level: SmoothingLevel::High,
            path_simplification: 2.0,
            ..Default::default()
        };
        let reduced = cfg.reduced();
        assert_eq!(reduced.color_count, 8);
        assert_eq!(reduced.path_simplification, 6.0);
        assert_eq!(reduced.smoothing_level, SmoothingLevel::Low);

        let tiny = VectorizationConfig { color_count: 3, path_simplification: 5.0, ..Default::default() };
        let reduced = tiny.reduced();
        assert_eq!(reduced.color_count, 2);
        assert_eq!(reduced.path_simplification, 10.0);
    }

    #[test]
    fn test_settings_from_json() {
        let json = r#"{
            "vectorization": { "colorCount": 12, "smoothingLevel": "high", "algorithm": "photo" },
            "pipeline": { "timeouts": { "quantize": 500 } },
            "batch": { "max_files": 5 }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.vectorization.color_count, 12);
        assert_eq!(settings.vectorization.smoothing_level, SmoothingLevel::High);
        assert_eq!(settings.vectorization.algorithm, Algorithm::Photo);
        assert_eq!(settings.pipeline.timeouts.quantize, Duration::from_millis(500));
        assert_eq!(settings.pipeline.timeouts.decode, Duration::from_secs(30));
        assert_eq!(settings.batch.max_files, 5);
        assert_eq!(settings.batch.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_settings_from_bad_json() {
        assert!(matches!(
            Settings::from_json("{ not json"),
            Err(ConversionError::Validation(_))
        ));
    }
}
