// src/engine/encoder.rs
//
// Encode stage: RGBA surface to container bytes.
// JPEG (mozjpeg), WebP (libwebp), AVIF (ravif via image), PNG (image + oxipng),
// GIF/BMP/TIFF (image). Formats without a raster encoder come out as PNG.

use crate::engine::common::run_with_panic_policy;
use crate::error::{LazyConvertError, Result};
use crate::format::{FormatCaps, OutputFormat};
use image::codecs::avif::AvifEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::io::Cursor;
use tracing::{debug, warn};

/// Quality used when a lossy encoder is called without one.
pub const DEFAULT_ENCODER_QUALITY: f32 = 0.92;

/// Per-format encoder tuning derived from a 0-100 quality.
///
/// Bands:
/// - High (>=85): AVIF speed 6
/// - Balanced (70-84): AVIF speed 7
/// - Fast (50-69): AVIF speed 8
/// - Fastest (<50): AVIF speed 9
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as f32,
        }
    }

    /// From an effective quality in `[0, 1]`.
    pub fn from_unit(quality: f32) -> Self {
        Self::new(percent(quality))
    }

    pub fn percent(&self) -> u8 {
        self.quality as u8
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        match self.band() {
            QualityBand::High => 0,
            QualityBand::Balanced => 5,
            QualityBand::Fast => 10,
            QualityBand::Fastest => 18,
        }
    }

    /// ravif speed: 1 (slowest) to 10 (fastest)
    pub fn avif_speed(&self) -> u8 {
        match self.band() {
            QualityBand::High => 6,
            QualityBand::Balanced => 7,
            QualityBand::Fast => 8,
            QualityBand::Fastest => 9,
        }
    }
}

fn percent(unit: f32) -> u8 {
    (unit * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encode `surface` as `format`.
///
/// `quality` is the blended effective quality in `[0.1, 1.0]`; only lossy
/// encoders look at it. Returns the bytes and the format they are actually in.
pub fn encode_surface(
    surface: &RgbaImage,
    format: OutputFormat,
    quality: Option<f32>,
) -> Result<(Vec<u8>, OutputFormat)> {
    let actual = format.encoded_as();
    if actual != format {
        debug!(target: "lazy_convert::encode", requested = %format, actual = %actual, "no raster encoder, using fallback format");
    }
    let settings = QualitySettings::from_unit(quality.unwrap_or(DEFAULT_ENCODER_QUALITY));

    let flattened;
    let surface = if actual.caps().contains(FormatCaps::ALPHA) {
        surface
    } else {
        flattened = flatten_over_black(surface);
        &flattened
    };

    let bytes = match actual {
        OutputFormat::Jpeg => encode_jpeg(surface, settings)?,
        OutputFormat::WebP => encode_webp(surface, settings)?,
        OutputFormat::Avif => encode_avif(surface, settings)?,
        OutputFormat::Png => encode_png(surface)?,
        OutputFormat::Gif => encode_with_image_crate(surface, ImageFormat::Gif)?,
        OutputFormat::Bmp => encode_with_image_crate(surface, ImageFormat::Bmp)?,
        OutputFormat::Tiff => encode_with_image_crate(surface, ImageFormat::Tiff)?,
        OutputFormat::Svg | OutputFormat::Heic => {
            return Err(LazyConvertError::unsupported_format(actual.as_str()))
        }
    };

    if bytes.is_empty() {
        return Err(LazyConvertError::encode_failed(
            actual.as_str(),
            "encoder returned no data",
        ));
    }
    Ok((bytes, actual))
}

/// Composite over opaque black. Every output pixel has alpha 255.
fn flatten_over_black(surface: &RgbaImage) -> RgbaImage {
    let mut flat = surface.clone();
    for pixel in flat.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            let a = a as u16;
            let over = |c: u8| ((c as u16 * a + 127) / 255) as u8;
            pixel.0 = [over(r), over(g), over(b), 255];
        }
    }
    flat
}

fn rgb_bytes(surface: &RgbaImage) -> Vec<u8> {
    surface
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect()
}

fn is_opaque(surface: &RgbaImage) -> bool {
    surface.pixels().all(|p| p.0[3] == 255)
}

/// Encode to JPEG using mozjpeg (progressive, optimized Huffman tables).
///
/// The alpha channel is discarded as-is. `encode_surface` flattens first
/// for every format without `FormatCaps::ALPHA`.
pub fn encode_jpeg(surface: &RgbaImage, settings: QualitySettings) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let (w, h) = surface.dimensions();
        if w == 0 || h == 0 {
            return Err(LazyConvertError::encode_failed("jpeg", "zero-sized surface"));
        }
        let pixels = rgb_bytes(surface);

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.percent() as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let mut output = Vec::with_capacity((pixels.len() / 10).max(4096));
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                LazyConvertError::encode_failed("jpeg", format!("mozjpeg: failed to start compress: {e:?}"))
            })?;
            for row in pixels.chunks(w as usize * 3) {
                writer.write_scanlines(row).map_err(|e| {
                    LazyConvertError::encode_failed("jpeg", format!("mozjpeg: failed to write scanlines: {e:?}"))
                })?;
            }
            writer.finish().map_err(|e| {
                LazyConvertError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

/// Encode to lossy WebP. Alpha is kept only when some pixel uses it.
pub fn encode_webp(surface: &RgbaImage, settings: QualitySettings) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = surface.dimensions();
        let rgb: Vec<u8>;
        let encoder = if is_opaque(surface) {
            rgb = rgb_bytes(surface);
            webp::Encoder::from_rgb(&rgb, w, h)
        } else {
            webp::Encoder::from_rgba(surface.as_raw(), w, h)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| LazyConvertError::internal_panic("failed to create WebPConfig"))?;
        config.lossless = 0;
        config.quality = settings.percent() as f32;
        config.method = 4;
        config.pass = 1;
        config.preprocessing = 0;
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            LazyConvertError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;
        Ok(mem.to_vec())
    })
}

/// Encode to AVIF with the pure-Rust ravif encoder.
pub fn encode_avif(surface: &RgbaImage, settings: QualitySettings) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:avif", || {
        let (w, h) = surface.dimensions();
        let mut buf = Vec::new();
        AvifEncoder::new_with_speed_quality(&mut buf, settings.avif_speed(), settings.percent())
            .write_image(surface.as_raw(), w, h, ExtendedColorType::Rgba8)
            .map_err(|e| LazyConvertError::encode_failed("avif", format!("AVIF encode failed: {e}")))?;
        Ok(buf)
    })
}

/// Encode to PNG, then recompress losslessly with oxipng.
pub fn encode_png(surface: &RgbaImage) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let (w, h) = surface.dimensions();
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(surface.as_raw(), w, h, ExtendedColorType::Rgba8)
            .map_err(|e| LazyConvertError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(2);
        options.strip = oxipng::StripChunks::Safe;
        match oxipng::optimize_from_memory(&buf, &options) {
            Ok(optimized) => Ok(optimized),
            Err(e) => {
                // The unoptimized stream is still a valid PNG
                warn!(target: "lazy_convert::encode", error = %e, "oxipng failed, keeping unoptimized png");
                Ok(buf)
            }
        }
    })
}

/// Encode through the image crate (GIF, BMP, TIFF).
pub fn encode_with_image_crate(surface: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:image", || {
        let mut buf = Vec::new();
        surface
            .write_to(&mut Cursor::new(&mut buf), format)
            .map_err(|e| LazyConvertError::encode_failed(format!("{format:?}"), e.to_string()))?;
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn surface() -> RgbaImage {
        RgbaImage::from_fn(8, 6, |x, y| Rgba([(x * 30) as u8, (y * 40) as u8, 200, 255]))
    }

    #[test]
    fn test_quality_settings_bands() {
        assert_eq!(QualitySettings::from_unit(0.9).percent(), 90);
        assert_eq!(QualitySettings::from_unit(0.1).percent(), 10);
        assert_eq!(QualitySettings::new(90).avif_speed(), 6);
        assert_eq!(QualitySettings::new(75).avif_speed(), 7);
        assert_eq!(QualitySettings::new(10).avif_speed(), 9);
        assert_eq!(QualitySettings::new(250).percent(), 100);
    }

    #[test]
    fn test_each_encoder_produces_its_container() {
        let img = surface();
        for format in [
            OutputFormat::Jpeg,
            OutputFormat::Png,
            OutputFormat::WebP,
            OutputFormat::Gif,
            OutputFormat::Bmp,
            OutputFormat::Tiff,
        ] {
            let (bytes, actual) = encode_surface(&img, format, Some(0.8)).unwrap();
            assert_eq!(actual, format);
            assert_eq!(
                image::guess_format(&bytes).ok(),
                format.image_format(),
                "format {format}"
            );
        }
    }

    #[test]
    fn test_avif_output_has_ftyp_box() {
        let (bytes, actual) = encode_surface(&surface(), OutputFormat::Avif, Some(0.5)).unwrap();
        assert_eq!(actual, OutputFormat::Avif);
        assert_eq!(&bytes[4..8], b"ftyp");
    }

    #[test]
    fn test_svg_and_heic_come_out_as_png() {
        for format in [OutputFormat::Svg, OutputFormat::Heic] {
            let (bytes, actual) = encode_surface(&surface(), format, None).unwrap();
            assert_eq!(actual, OutputFormat::Png);
            assert_eq!(image::guess_format(&bytes).ok(), Some(ImageFormat::Png));
        }
    }

    #[test]
    fn test_png_is_lossless() {
        let img = RgbaImage::from_fn(5, 5, |x, y| Rgba([x as u8 * 50, y as u8 * 50, 7, (x * y) as u8 * 10]));
        let (bytes, _) = encode_surface(&img, OutputFormat::Png, None).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_jpeg_flattens_alpha_over_black() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 0]));
        let (bytes, _) = encode_surface(&img, OutputFormat::Jpeg, Some(1.0)).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().into_rgb8();
        let p = decoded.get_pixel(8, 8).0;
        assert!(p.iter().all(|&c| c < 8), "expected near black, got {p:?}");
    }

    #[test]
    fn test_flatten_over_black_makes_surface_opaque() {
        let img = RgbaImage::from_fn(4, 1, |x, _| Rgba([200, 100, 50, [0, 51, 255, 128][x as usize]]));
        let flat = flatten_over_black(&img);
        assert!(is_opaque(&flat));
        assert_eq!(flat.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [40, 20, 10, 255]);
        assert_eq!(flat.get_pixel(2, 0).0, [200, 100, 50, 255]);
    }

    #[test]
    fn test_alpha_capable_formats_keep_transparency() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0]));
        for format in [OutputFormat::Png, OutputFormat::Tiff] {
            assert!(format.caps().contains(FormatCaps::ALPHA));
            let (bytes, _) = encode_surface(&img, format, None).unwrap();
            let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
            assert_eq!(decoded.get_pixel(1, 1).0[3], 0, "format {format}");
        }
    }

    #[test]
    fn test_webp_keeps_alpha_only_when_used() {
        let translucent = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let (bytes, _) = encode_surface(&translucent, OutputFormat::WebP, Some(0.9)).unwrap();
        let features = webp::BitstreamFeatures::new(&bytes).unwrap();
        assert!(features.has_alpha());

        let (bytes, _) = encode_surface(&surface(), OutputFormat::WebP, Some(0.9)).unwrap();
        let features = webp::BitstreamFeatures::new(&bytes).unwrap();
        assert!(!features.has_alpha());
    }
}
