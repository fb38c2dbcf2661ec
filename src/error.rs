//! Error taxonomy shared by every conversion stage.
//!
//! One enum carries every failure source so the pipeline's recovery policy
//! can match on kinds instead of parsing strings. Messages stay human
//! readable because they end up on a failed job.

use crate::progress::Stage;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ConversionError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// Bad file type, size or configuration, rejected before processing.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("{stage} stage timed out after {}ms", .limit.as_millis())]
    Timeout { stage: Stage, limit: Duration },

    /// Memory or complexity ceiling exceeded.
    #[error("resource limit exceeded: {0}")]
    Resource(String),

    #[error("SVG generation failed: {0}")]
    Generation(String),

    /// Raised by the raster fallback path; never re-enters the fallback.
    #[error("fallback conversion failed: {0}")]
    Fallback(Box<ConversionError>),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

/// Coarse classification used by the recovery policy and job reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Decode,
    Timeout,
    Resource,
    Generation,
    Cancelled,
    Unknown,
}

const RESOURCE_KEYWORDS: [&str; 6] = ["memory", "size", "complex", "dimension", "too large", "limit"];

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Generation(_) => ErrorKind::Generation,
            Self::Fallback(inner) => inner.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Validation errors and cancellations bypass the recovery policy.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Validation | ErrorKind::Cancelled)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// True for memory/size/complexity failures, whether typed or only
    /// recognisable from the message text.
    pub fn is_resource_related(&self) -> bool {
        if self.kind() == ErrorKind::Resource {
            return true;
        }
        let message = self.to_string().to_lowercase();
        RESOURCE_KEYWORDS.iter().any(|k| message.contains(k))
    }

    /// Actionable text for a failed job, without internal detail.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => format!("{self}. Check the file type, size and settings."),
            ErrorKind::Decode => "The image could not be read. Make sure it is a valid PNG or JPEG file.".to_string(),
            ErrorKind::Timeout => "The image took too long to convert. Try fewer colors or higher simplification.".to_string(),
            ErrorKind::Resource => "The image is too large or complex. Try a smaller image or fewer colors.".to_string(),
            ErrorKind::Generation => "The SVG document could not be generated. Please retry.".to_string(),
            ErrorKind::Cancelled => "Conversion was cancelled.".to_string(),
            ErrorKind::Unknown => format!("Conversion failed: {self}"),
        }
    }

    pub(crate) fn into_fallback(self) -> Self {
        match self {
            Self::Fallback(_) => self,
            other => Self::Fallback(Box::new(other)),
        }
    }
}

impl From<image::ImageError> for ConversionError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Limits(l) => Self::Resource(l.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        Self::Unknown(e.to_string())
    }
}
