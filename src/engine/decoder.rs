// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), and
// everything else through the image crate. Orientation from EXIF is applied
// after decode so callers always see upright pixels.

use crate::engine::common::run_with_panic_policy;
use crate::engine::{MAX_SURFACE_DIMENSION, MAX_SURFACE_PIXELS};
use crate::error::{LazyConvertError, Result};
use crate::format::OutputFormat;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// A fully decoded, upright RGBA pixel surface.
#[derive(Clone, Debug)]
pub struct DecodedBitmap {
    pixels: RgbaImage,
    source_format: Option<OutputFormat>,
}

impl DecodedBitmap {
    pub fn new(pixels: RgbaImage, source_format: Option<OutputFormat>) -> Self {
        Self {
            pixels,
            source_format,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Container format the pixels were decoded from, when known.
    pub fn source_format(&self) -> Option<OutputFormat> {
        self.source_format
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

/// Check if image dimensions fit on a raster surface.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
        return Err(LazyConvertError::dimension_exceeds_limit(
            width.max(height),
            MAX_SURFACE_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_SURFACE_PIXELS {
        return Err(LazyConvertError::pixel_count_exceeds_limit(
            pixels,
            MAX_SURFACE_PIXELS,
        ));
    }
    Ok(())
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decode by sniffing magic bytes, ignoring any declared type.
pub fn decode_sniffed(bytes: &[u8]) -> Result<DecodedBitmap> {
    let detected = detect_format(bytes).ok_or_else(|| {
        LazyConvertError::decode_failed("unrecognized image data (no known signature)")
    })?;
    let format = OutputFormat::from_image_format(detected)
        .ok_or_else(|| LazyConvertError::unsupported_format(format!("{detected:?}")))?;
    decode_as(bytes, format)
}

/// Decode assuming the bytes are `format`. Fails if they are not.
pub fn decode_as(bytes: &[u8], format: OutputFormat) -> Result<DecodedBitmap> {
    if !format.caps().contains(crate::format::FormatCaps::DECODE) {
        return Err(LazyConvertError::unsupported_format(format.as_str()));
    }
    ensure_dimensions_safe(bytes, format.image_format())?;

    let img = match format {
        OutputFormat::Jpeg => decode_jpeg_mozjpeg(bytes)?,
        OutputFormat::Png => decode_png_zune(bytes)?,
        OutputFormat::WebP => decode_webp_libwebp(bytes)?,
        other => {
            let image_format = other
                .image_format()
                .ok_or_else(|| LazyConvertError::unsupported_format(other.as_str()))?;
            decode_with_image_crate(bytes, image_format)?
        }
    };
    check_dimensions(img.width(), img.height())?;

    let img = match detect_exif_orientation(bytes) {
        Some(orientation) => apply_orientation(img, orientation),
        None => img,
    };
    Ok(DecodedBitmap::new(img.into_rgba8(), Some(format)))
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.starts_with(&[0xFF, 0xD8]) {
            return Err(LazyConvertError::decode_failed(
                "jpeg: missing SOI marker",
            ));
        }
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(LazyConvertError::decode_failed(
                "jpeg: missing EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            LazyConvertError::decode_failed(format!("jpeg: decompress init failed: {e:?}"))
        })?;
        let mut decompress = decompress.rgb().map_err(|e| {
            LazyConvertError::decode_failed(format!("jpeg: rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_SURFACE_DIMENSION as usize || height > MAX_SURFACE_DIMENSION as usize {
            return Err(LazyConvertError::dimension_exceeds_limit(
                width.max(height) as u32,
                MAX_SURFACE_DIMENSION,
            ));
        }
        let (width, height) = (width as u32, height as u32);
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            LazyConvertError::decode_failed(format!("jpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| LazyConvertError::decode_failed("jpeg: truncated pixel data"))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| LazyConvertError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| LazyConvertError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(LazyConvertError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| LazyConvertError::decode_failed("png: missing colorspace"))?;

        let built = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            ColorSpace::Luma => {
                GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(LazyConvertError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };
        built.ok_or_else(|| LazyConvertError::decode_failed("png: truncated pixel data"))
    })
}

/// Decode WebP using libwebp. Animated WebP goes through the image crate
/// (first frame only).
pub fn decode_webp_libwebp(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            LazyConvertError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return decode_with_image_crate(data, ImageFormat::WebP);
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| LazyConvertError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;
        Ok(decoded.to_image())
    })
}

/// Decode through the image crate with an explicit format.
pub fn decode_with_image_crate(data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory_with_format(data, format).map_err(|e| {
            LazyConvertError::decode_failed(format!("{format:?}: {e}"))
        })
    })
}

/// Read the header only and ensure the dimensions are safe before decoding.
/// Headers the reader cannot parse are left for the real decoder to reject.
pub fn ensure_dimensions_safe(bytes: &[u8], format: Option<ImageFormat>) -> Result<()> {
    match read_header_dimensions(bytes, format) {
        Some((width, height)) => check_dimensions(width, height),
        None => Ok(()),
    }
}

fn read_header_dimensions(bytes: &[u8], format: Option<ImageFormat>) -> Option<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes));
    let reader = match format {
        Some(f) => {
            let mut r = reader;
            r.set_format(f);
            r
        }
        None => reader.with_guessed_format().ok()?,
    };
    reader.into_dimensions().ok()
}

/// Header-only probe: upright dimensions plus the format actually read.
///
/// With `expected` set, the header is parsed as that format and a mismatch
/// fails; without it the format is sniffed.
pub fn probe_dimensions(
    bytes: &[u8],
    expected: Option<OutputFormat>,
) -> Result<(u32, u32, OutputFormat)> {
    let format = match expected {
        Some(f) => f,
        None => detect_format(bytes)
            .and_then(OutputFormat::from_image_format)
            .ok_or_else(|| LazyConvertError::decode_failed("unrecognized image data"))?,
    };
    let image_format = format
        .image_format()
        .filter(|_| format.caps().contains(crate::format::FormatCaps::DECODE))
        .ok_or_else(|| LazyConvertError::unsupported_format(format.as_str()))?;
    if detect_format(bytes) != Some(image_format) {
        return Err(LazyConvertError::decode_failed(format!(
            "data is not a valid {} image",
            format.as_str()
        )));
    }

    let (width, height) = read_header_dimensions(bytes, Some(image_format)).ok_or_else(|| {
        LazyConvertError::decode_failed(format!("{}: unreadable header", format.as_str()))
    })?;
    if width == 0 || height == 0 {
        return Err(LazyConvertError::decode_failed("image has zero dimensions"));
    }
    let upright = match detect_exif_orientation(bytes) {
        Some(5..=8) => (height, width),
        _ => (width, height),
    };
    Ok((upright.0, upright.1, format))
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    (1..=8).contains(&orientation).then_some(orientation)
}

/// Rotate/flip so the image is upright for the given EXIF orientation.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
