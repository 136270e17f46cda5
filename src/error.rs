// src/error.rs
//
// Unified error handling for lazy-convert
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/decoding/encoding issues
// - ResourceLimit: Memory/time/dimension limits
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/time/dimension limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Get the LAZY_CONVERT_* error code string for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "LAZY_CONVERT_USER_ERROR",
            ErrorCategory::CodecError => "LAZY_CONVERT_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "LAZY_CONVERT_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "LAZY_CONVERT_INTERNAL_BUG",
        }
    }
}

/// lazy-convert error types
///
/// Validation never produces these; validation helpers return a
/// [`Verdict`](crate::validate::Verdict) instead.
#[derive(Debug, Error)]
pub enum LazyConvertError {
    // Decode Errors
    #[error("Image load timed out after {timeout_ms}ms: {name}")]
    DecodeTimeout {
        name: Cow<'static, str>,
        timeout_ms: u64,
    },

    #[error("{stalled} timed-out decodes are still running (limit {max}); refusing to start another")]
    DecodeBacklog { stalled: usize, max: usize },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Could not allocate a {width}x{height} raster surface: {reason}")]
    SurfaceUnavailable {
        width: u32,
        height: u32,
        reason: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Pipeline Errors
    #[error("Conversion of '{name}' failed: {fallback} (primary attempt: {primary})")]
    ConversionFailed {
        name: Cow<'static, str>,
        primary: Box<LazyConvertError>,
        #[source]
        fallback: Box<LazyConvertError>,
    },

    #[error("Resize to {width}x{height} failed: {source}")]
    ResizeFailed {
        width: u32,
        height: u32,
        #[source]
        source: Box<LazyConvertError>,
    },

    // Input Errors
    #[error("Rejected before conversion: {reason}")]
    ValidationRejected { reason: Cow<'static, str> },

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // File I/O Errors
    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spool image data to a temporary file: {source}")]
    SpoolFailed {
        #[source]
        source: std::io::Error,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

// Constructor Helpers
impl LazyConvertError {
    pub fn decode_timeout(name: impl Into<Cow<'static, str>>, timeout_ms: u64) -> Self {
        Self::DecodeTimeout {
            name: name.into(),
            timeout_ms,
        }
    }

    pub fn decode_backlog(stalled: usize, max: usize) -> Self {
        Self::DecodeBacklog { stalled, max }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn surface_unavailable(
        width: u32,
        height: u32,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::SurfaceUnavailable {
            width,
            height,
            reason: reason.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn conversion_failed(
        name: impl Into<Cow<'static, str>>,
        primary: LazyConvertError,
        fallback: LazyConvertError,
    ) -> Self {
        Self::ConversionFailed {
            name: name.into(),
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }

    pub fn resize_failed(width: u32, height: u32, source: LazyConvertError) -> Self {
        Self::ResizeFailed {
            width,
            height,
            source: Box::new(source),
        }
    }

    pub fn validation_rejected(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::ValidationRejected {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn spool_failed(source: std::io::Error) -> Self {
        Self::SpoolFailed { source }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// True when the failure came from a decode that never finished in time,
    /// looking through conversion/resize wrappers.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::DecodeTimeout { .. } => true,
            Self::ConversionFailed { fallback, .. } => fallback.is_timeout(),
            Self::ResizeFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// Consistent with category(): UserError and ResourceLimit are recoverable,
    /// CodecError and InternalBug are not.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationRejected { .. } | Self::InvalidArgument { .. } => {
                ErrorCategory::UserError
            }

            Self::DecodeFailed { .. }
            | Self::UnsupportedFormat { .. }
            | Self::EncodeFailed { .. } => ErrorCategory::CodecError,

            // FileReadFailed/SpoolFailed usually mean disk or descriptor pressure,
            // which the caller can relieve.
            Self::DecodeTimeout { .. }
            | Self::DecodeBacklog { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::SurfaceUnavailable { .. }
            | Self::FileReadFailed { .. }
            | Self::SpoolFailed { .. } => ErrorCategory::ResourceLimit,

            // Wrappers report the cause that finally surfaced
            Self::ConversionFailed { fallback, .. } => fallback.category(),
            Self::ResizeFailed { source, .. } => source.category(),

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, LazyConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LazyConvertError::decode_timeout("photo.jpg", 30_000);
        let msg = err.to_string();
        assert!(msg.contains("photo.jpg"));
        assert!(msg.contains("30000ms"));
    }

    #[test]
    fn test_conversion_failed_keeps_both_causes() {
        let err = LazyConvertError::conversion_failed(
            "a.png",
            LazyConvertError::decode_timeout("a.png", 10),
            LazyConvertError::decode_failed("bad header"),
        );
        let msg = err.to_string();
        assert!(msg.contains("bad header"));
        assert!(msg.contains("timed out"));
        match err {
            LazyConvertError::ConversionFailed { primary, .. } => assert!(primary.is_timeout()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_wrappers_report_inner_category() {
        let conv = LazyConvertError::conversion_failed(
            "x",
            LazyConvertError::decode_failed("a"),
            LazyConvertError::decode_timeout("x", 1),
        );
        assert_eq!(conv.category(), ErrorCategory::ResourceLimit);
        assert!(conv.is_timeout());

        let resize =
            LazyConvertError::resize_failed(10, 10, LazyConvertError::encode_failed("png", "x"));
        assert_eq!(resize.category(), ErrorCategory::CodecError);
        assert!(!resize.is_recoverable());
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            LazyConvertError::validation_rejected("too big").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            LazyConvertError::invalid_argument("quality", "0", "must be 1-100").category(),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn test_error_category_resource_limit() {
        assert_eq!(
            LazyConvertError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LazyConvertError::pixel_count_exceeds_limit(1_000_000_000, 100_000_000).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LazyConvertError::surface_unavailable(0, 10, "zero width").category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LazyConvertError::decode_backlog(16, 16).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LazyConvertError::spool_failed(std::io::Error::from(std::io::ErrorKind::StorageFull))
                .category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_error_category_internal_bug() {
        let err = LazyConvertError::internal_panic("boom");
        assert_eq!(err.category(), ErrorCategory::InternalBug);
        assert_eq!(err.category().code(), "LAZY_CONVERT_INTERNAL_BUG");
        assert_eq!(err.category().as_str(), "InternalBug");
    }
}
