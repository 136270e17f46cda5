// src/format.rs
//
// Output format tokens, MIME resolution and per-format capabilities.

use bitflags::bitflags;
use image::ImageFormat;

/// Fallback MIME type for tokens the resolver does not know.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Format tokens a caller may request (the validation allow-list).
pub const ALLOWED_FORMAT_TOKENS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "avif", "svg",
];

bitflags! {
    /// What the engine can do with a given format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatCaps: u8 {
        /// A raster encoder exists for this format.
        const ENCODE = 0b0001;
        /// A decoder exists for this format.
        const DECODE = 0b0010;
        /// The encoder takes a quality parameter.
        const LOSSY  = 0b0100;
        /// The container can carry an alpha channel.
        const ALPHA  = 0b1000;
    }
}

/// Image formats known to the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Bmp,
    Tiff,
    Avif,
    Svg,
    Heic,
}

impl OutputFormat {
    /// Parse a case-insensitive format token ("JPG", "webp", "tif", ...).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "avif" => Some(Self::Avif),
            "svg" => Some(Self::Svg),
            "heic" | "heif" => Some(Self::Heic),
            _ => None,
        }
    }

    /// Parse a MIME type such as `image/jpeg`. Parameters after `;` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" | "image/apng" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/tiff" => Some(Self::Tiff),
            "image/avif" => Some(Self::Avif),
            "image/svg+xml" => Some(Self::Svg),
            "image/heic" | "image/heif" => Some(Self::Heic),
            _ => None,
        }
    }

    /// Format implied by a file name's extension.
    pub fn from_extension(file_name: &str) -> Option<Self> {
        extension_of(file_name).and_then(Self::from_token)
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::WebP => Some(Self::WebP),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::Bmp => Some(Self::Bmp),
            ImageFormat::Tiff => Some(Self::Tiff),
            ImageFormat::Avif => Some(Self::Avif),
            _ => None,
        }
    }

    /// The `image` crate format used for generic decode routing, if any.
    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            Self::Jpeg => Some(ImageFormat::Jpeg),
            Self::Png => Some(ImageFormat::Png),
            Self::WebP => Some(ImageFormat::WebP),
            Self::Gif => Some(ImageFormat::Gif),
            Self::Bmp => Some(ImageFormat::Bmp),
            Self::Tiff => Some(ImageFormat::Tiff),
            Self::Avif => Some(ImageFormat::Avif),
            Self::Svg | Self::Heic => None,
        }
    }

    /// Canonical encoder MIME type.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Avif => "image/avif",
            Self::Svg => "image/svg+xml",
            Self::Heic => "image/heic",
        }
    }

    /// Preferred file extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Avif => "avif",
            Self::Svg => "svg",
            Self::Heic => "heic",
        }
    }

    /// Short lowercase name, used in error messages and `ImageInfo::format`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            other => other.extension(),
        }
    }

    pub fn caps(self) -> FormatCaps {
        match self {
            Self::Jpeg => FormatCaps::ENCODE | FormatCaps::DECODE | FormatCaps::LOSSY,
            Self::Png => FormatCaps::ENCODE | FormatCaps::DECODE | FormatCaps::ALPHA,
            Self::WebP => {
                FormatCaps::ENCODE | FormatCaps::DECODE | FormatCaps::LOSSY | FormatCaps::ALPHA
            }
            Self::Gif | Self::Bmp | Self::Tiff => {
                FormatCaps::ENCODE | FormatCaps::DECODE | FormatCaps::ALPHA
            }
            Self::Avif => FormatCaps::ENCODE | FormatCaps::LOSSY | FormatCaps::ALPHA,
            Self::Svg | Self::Heic => FormatCaps::empty(),
        }
    }

    /// Format the bytes will actually be in. Formats without a raster
    /// encoder come out as PNG.
    pub fn encoded_as(self) -> Self {
        if self.caps().contains(FormatCaps::ENCODE) {
            self
        } else {
            Self::Png
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a format token to the encoder MIME type.
///
/// Unknown tokens resolve to `image/png` without any error, so a typo such
/// as "jepg" silently yields PNG output. Callers that care must run
/// [`validate_conversion_params`](crate::validate::validate_conversion_params) first.
pub fn resolve_mime_type(token: &str) -> &'static str {
    OutputFormat::from_token(token)
        .map(OutputFormat::mime_type)
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// Resolve a token to a format the same lenient way [`resolve_mime_type`] does.
pub fn resolve_format(token: &str) -> OutputFormat {
    OutputFormat::from_token(token).unwrap_or(OutputFormat::Png)
}

/// Lowercase-insensitive allow-list check.
pub fn is_allowed_token(token: &str) -> bool {
    let lower = token.trim().to_ascii_lowercase();
    ALLOWED_FORMAT_TOKENS.contains(&lower.as_str())
}

/// Extension of a file name without the dot, if it has a non-empty one.
pub fn extension_of(file_name: &str) -> Option<&str> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}
