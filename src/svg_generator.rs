//! SVG document generation.
//!
//! Turns traced paths into a document sized to the source image, grouped by
//! palette color, and builds the embedded-raster document used when
//! vectorization is abandoned.

use crate::bezier_fitter::fmt_num;
use crate::config::{SmoothingLevel, VectorizationConfig};
use crate::error::{ConversionError, Result};
use crate::image_processor::{Color, RasterFormat};
use crate::quantizer::Palette;
use crate::vectorizer::VectorPath;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::{HashMap, HashSet};
use svg::{Document, Node};
use svg::node::element::{Group, Image, Path, Rectangle};

/// Serialisation knobs for [`generate_svg`].
#[derive(Debug, Clone, PartialEq)]
pub struct SvgOptions {
    /// One `<g>` per fill color instead of a fill on every path.
    pub group_by_color: bool,
    /// Decimal places kept in coordinates.
    pub precision: usize,
    /// Paint a full-size rect in the dominant color behind the paths.
    pub background: bool,
    /// Stroke each shape in its own color to hide hairline gaps between
    /// neighbouring regions.
    pub gap_fill_stroke: Option<f64>,
}

impl Default for SvgOptions {
    fn default() -> Self {
        Self {
            group_by_color: true,
            precision: 2,
            background: false,
            gap_fill_stroke: None,
        }
    }
}

impl SvgOptions {
    /// Curved outlines of neighbouring regions no longer coincide exactly,
    /// so smoothed output gets a thin same-color stroke.
    pub fn for_config(config: &VectorizationConfig) -> Self {
        Self {
            gap_fill_stroke: (config.smoothing_level != SmoothingLevel::Low).then_some(0.5),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgOutput {
    pub content: String,
    /// Byte length of `content`.
    pub vector_size: u64,
    pub color_count: usize,
    pub path_count: usize,
}

impl SvgOutput {
    fn new(content: String, color_count: usize, path_count: usize) -> Self {
        Self {
            vector_size: content.len() as u64,
            content,
            color_count,
            path_count,
        }
    }
}

pub fn generate_svg(
    paths: &[VectorPath],
    width: u32,
    height: u32,
    palette: &Palette,
    options: &SvgOptions,
) -> Result<SvgOutput> {
    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width, height));
    let color_count;

    if options.background {
        let dominant = paths
            .iter()
            .max_by_key(|p| p.area)
            .map(|p| p.fill)
            .or_else(|| palette.get(0));
        if let Some(color) = dominant {
            document = document.add(
                Rectangle::new()
                    .set("width", width)
                    .set("height", height)
                    .set("fill", color.to_hex()),
            );
        }
    }

    let mut shapes: Vec<(Color, String)> = Vec::with_capacity(paths.len());
    for path in paths {
        let d = normalize_path_data(&path.path_data, options.precision)?;
        if !d.is_empty() {
            shapes.push((path.fill, d));
        }
    }
    let path_count = shapes.len();

    if options.group_by_color {
        // Fill colors in order of first appearance.
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<Color, usize> = HashMap::new();
        for (fill, d) in shapes {
            let slot = *index.entry(fill).or_insert_with(|| {
                groups.push(with_paint(Group::new(), fill, options));
                groups.len() - 1
            });
            groups[slot].append(Path::new().set("d", d));
        }
        color_count = groups.len();
        for group in groups {
            document = document.add(group);
        }
    } else {
        let mut seen = HashSet::new();
        for (fill, d) in shapes {
            seen.insert(fill);
            document = document.add(with_paint(Path::new(), fill, options).set("d", d));
        }
        color_count = seen.len();
    }

    let output = SvgOutput::new(document.to_string(), color_count, path_count);
    log::debug!(
        "svg: {} paths in {} colors, {} bytes",
        output.path_count,
        output.color_count,
        output.vector_size
    );
    Ok(output)
}

fn with_paint<T: Node>(mut node: T, color: Color, options: &SvgOptions) -> T {
    let hex = color.to_hex();
    node.assign("fill", hex.clone());
    node.assign("fill-rule", "evenodd");
    if let Some(width) = options.gap_fill_stroke {
        node.assign("stroke", hex);
        node.assign("stroke-width", fmt_num(width, options.precision));
        node.assign("stroke-linejoin", "round");
    }
    node
}

/// Re-emits path data with every number rounded to `precision`, keeping the
/// original commands and separators. Non-finite or malformed numbers are
/// rejected.
fn normalize_path_data(data: &str, precision: usize) -> Result<String> {
    const COMMANDS: &str = "MmLlHhVvCcSsQqTtAaZz";

    let mut out = String::with_capacity(data.len());
    let chars: Vec<char> = data.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' {
            let start = i;
            i += 1;
            while i < chars.len() {
                let ch = chars[i];
                let exponent_sign = (ch == '-' || ch == '+') && matches!(chars[i - 1], 'e' | 'E');
                if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            let token: String = chars[start..i].iter().collect();
            out.push_str(&fmt_num(parse_coordinate(&token)?, precision));
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphabetic() {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            if token.chars().all(|ch| COMMANDS.contains(ch)) {
                out.push_str(&token);
            } else {
                parse_coordinate(&token)?;
                return Err(ConversionError::Generation(format!("unexpected token {token:?} in path data")));
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    Ok(out.trim().to_string())
}

fn parse_coordinate(token: &str) -> Result<f64> {
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(ConversionError::Generation(format!("non-finite coordinate {token} in path data"))),
        Err(_) => Err(ConversionError::Generation(format!("malformed number {token:?} in path data"))),
    }
}

/// Minimal document that embeds the original raster as a base64 data URI.
pub fn generate_fallback_svg(bytes: &[u8], format: RasterFormat, width: u32, height: u32) -> Result<SvgOutput> {
    if width == 0 || height == 0 {
        return Err(ConversionError::Generation(
            "cannot embed a raster of unknown size".to_string(),
        ));
    }
    let href = format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes));
    let document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width, height))
        .add(
            Image::new()
                .set("width", width)
                .set("height", height)
                .set("href", href),
        );
    Ok(SvgOutput::new(document.to_string(), 0, 0))
}
