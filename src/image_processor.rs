//! Input validation and decoding.
//!
//! Checks a [`SourceFile`] before any pixels are touched, then decodes PNG
//! and JPEG data into a [`PixelBuffer`].

use crate::error::{ConversionError, Result};
use crate::progress::Deadline;
use image::ImageFormat;
use rgb::{ComponentBytes, RGBA8};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

/// Decoded RGBA image, row-major and non-premultiplied.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<RGBA8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<RGBA8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ConversionError::Unknown(format!(
                "pixel buffer holds {} pixels, expected {}x{}={}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn filled(width: u32, height: u32, color: RGBA8) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Raw RGBA samples, `width * height * 4` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_bytes()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> RGBA8 {
        self.pixels[y * self.width as usize + x]
    }
}

/// An RGB palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn with_alpha(self, a: u8) -> RGBA8 {
        RGBA8::new(self.r, self.g, self.b, a)
    }
}

impl From<RGBA8> for Color {
    fn from(p: RGBA8) -> Self {
        Self::new(p.r, p.g, p.b)
    }
}

/// Encoded formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl RasterFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            RasterFormat::Png => "image/png",
            RasterFormat::Jpeg => "image/jpeg",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(RasterFormat::Png),
            "jpg" | "jpeg" => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => Some(RasterFormat::Png),
            "image/jpeg" | "image/jpg" => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }

    /// Sniffs the magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(RasterFormat::Png),
            ImageFormat::Jpeg => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            RasterFormat::Png => ImageFormat::Png,
            RasterFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// An encoded input file as handed over by a picker or the CLI.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Checks extension, declared MIME type, magic bytes and size before the
    /// file may enter the pipeline.
    pub fn validate(&self, max_size: u64) -> Result<RasterFormat> {
        if self.bytes.is_empty() {
            return Err(ConversionError::Validation(format!("{} is empty", self.name)));
        }
        if self.size() > max_size {
            return Err(ConversionError::Validation(format!(
                "{} is {:.1} MB, larger than the {:.1} MB limit",
                self.name,
                self.size() as f64 / 1024.0 / 1024.0,
                max_size as f64 / 1024.0 / 1024.0
            )));
        }

        let ext = Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(RasterFormat::from_extension)
            .ok_or_else(|| {
                ConversionError::Validation(format!("{} must have a .png, .jpg or .jpeg extension", self.name))
            })?;

        if let Some(mime) = &self.mime_type {
            if RasterFormat::from_mime(mime).is_none() {
                return Err(ConversionError::Validation(format!(
                    "{} has unsupported type {mime}, expected image/png or image/jpeg",
                    self.name
                )));
            }
        }

        let sniffed = RasterFormat::detect(&self.bytes).ok_or_else(|| {
            ConversionError::Validation(format!("{} is not a PNG or JPEG image", self.name))
        })?;
        if sniffed != ext {
            log::debug!("{}: extension says {:?}, content is {:?}", self.name, ext, sniffed);
        }
        Ok(sniffed)
    }
}

/// Decodes PNG/JPEG bytes, refusing images larger than `max_dimension` on
/// either side before the full decode allocates.
pub fn decode_image(bytes: &[u8], max_dimension: u32, deadline: &Deadline) -> Result<PixelBuffer> {
    let format = RasterFormat::detect(bytes)
        .ok_or_else(|| ConversionError::Decode("unrecognised image format".to_string()))?;

    let (width, height) = image::io::Reader::with_format(Cursor::new(bytes), format.image_format())
        .into_dimensions()
        .map_err(|e| ConversionError::Decode(format!("cannot read image header: {e}")))?;
    check_dimensions(width, height, max_dimension)?;
    deadline.check()?;

    let decoded = image::load_from_memory_with_format(bytes, format.image_format())?;
    deadline.check()?;

    let rgba = decoded.to_rgba8();
    check_dimensions(rgba.width(), rgba.height(), max_dimension)?;
    let (width, height) = rgba.dimensions();
    let pixels: Vec<RGBA8> = rgba
        .pixels()
        .map(|p| RGBA8::new(p[0], p[1], p[2], p[3]))
        .collect();

    log::debug!("decoded {:?} image {}x{}", format, width, height);
    PixelBuffer::new(width, height, pixels)
}

/// Width and height from the header alone; `None` when the bytes are not a
/// readable PNG/JPEG.
pub fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let format = RasterFormat::detect(bytes)?;
    image::io::Reader::with_format(Cursor::new(bytes), format.image_format())
        .into_dimensions()
        .ok()
}

fn check_dimensions(width: u32, height: u32, max_dimension: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ConversionError::Decode("image has zero width or height".to_string()));
    }
    if width > max_dimension || height > max_dimension {
        return Err(ConversionError::Decode(format!(
            "image dimensions {width}x{height} exceed the {max_dimension}px limit"
        )));
    }
    Ok(())
}

pub fn load_image(path: &Path) -> Result<PixelBuffer> {
    let bytes = std::fs::read(path)?;
    decode_image(&bytes, u32::MAX, &Deadline::unbounded(crate::progress::Stage::Preprocess))
}

#[cfg(test)]
mod tests {
    include!("image_processor_tests.rs");
}
