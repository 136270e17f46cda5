// src/engine/render.rs
//
// Render/transform stage: raster surface allocation, resampling, the
// quality/compression blend and the PNG pseudo-quantization.

use crate::engine::decoder::DecodedBitmap;
use crate::engine::{MAX_SURFACE_DIMENSION, MAX_SURFACE_PIXELS};
use crate::error::{LazyConvertError, Result};
use fast_image_resize::{self as fir, ImageBufferError, PixelType, ResizeOptions};
use image::imageops::FilterType;
use image::RgbaImage;

/// Floor for the blended encoder quality. Encoders degrade badly below it.
pub const MIN_EFFECTIVE_QUALITY: f32 = 0.1;

/// Blend quality (1..=100) and compression level (0..=100) into one encoder
/// quality in `[0.1, 1.0]`.
pub fn effective_quality(quality: i32, compression_level: i32) -> f32 {
    let q = quality as f32 / 100.0;
    let keep = (100 - compression_level) as f32 / 100.0;
    (q * keep).clamp(MIN_EFFECTIVE_QUALITY, 1.0)
}

/// Levels per channel kept by [`quantize_colors`].
pub fn palette_size(compression_level: i32) -> u32 {
    let colors = (256.0 * (1.0 - compression_level as f64 / 100.0)).round();
    colors.clamp(2.0, 256.0) as u32
}

/// Uniform per-channel bit-depth reduction.
///
/// Each of R, G and B is truncated down to a multiple of `256 / colors`.
/// Alpha is untouched. No palette search and no dithering; levels at or below
/// zero leave the surface unchanged.
pub fn quantize_colors(surface: &mut RgbaImage, compression_level: i32) {
    if compression_level <= 0 {
        return;
    }
    let step = 256.0 / palette_size(compression_level) as f32;
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let truncated = ((value as f32 / step).floor() * step).round();
        *slot = truncated.clamp(0.0, 255.0) as u8;
    }
    for pixel in surface.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = lut[*channel as usize];
        }
    }
}

/// Output size for a conversion.
///
/// Both sides given: exactly that. One side: the other follows the aspect
/// ratio. Neither: the source size.
pub fn target_dimensions(
    original: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if orig_w > 0 => {
            let ratio = w as f64 / orig_w as f64;
            (w, ((orig_h as f64 * ratio).round() as u32).max(1))
        }
        (None, Some(h)) if orig_h > 0 => {
            let ratio = h as f64 / orig_h as f64;
            (((orig_w as f64 * ratio).round() as u32).max(1), h)
        }
        _ => original,
    }
}

/// Make sure a surface of this size can be allocated.
pub fn check_surface(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(LazyConvertError::surface_unavailable(
            width,
            height,
            "zero-sized surface",
        ));
    }
    if width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
        return Err(LazyConvertError::surface_unavailable(
            width,
            height,
            format!("side exceeds {MAX_SURFACE_DIMENSION}px"),
        ));
    }
    if width as u64 * height as u64 > MAX_SURFACE_PIXELS {
        return Err(LazyConvertError::surface_unavailable(
            width,
            height,
            format!("more than {MAX_SURFACE_PIXELS} pixels"),
        ));
    }
    Ok(())
}

/// Draw the bitmap onto a surface of `target` size (or its own size).
pub fn render_surface(bitmap: DecodedBitmap, target: Option<(u32, u32)>) -> Result<RgbaImage> {
    let (src_w, src_h) = bitmap.dimensions();
    let (dst_w, dst_h) = target.unwrap_or((src_w, src_h));
    check_surface(dst_w, dst_h)?;
    if (dst_w, dst_h) == (src_w, src_h) {
        return Ok(bitmap.into_pixels());
    }
    resize_rgba(bitmap.into_pixels(), dst_w, dst_h)
        .map_err(|reason| LazyConvertError::surface_unavailable(dst_w, dst_h, reason))
}

fn resize_options() -> ResizeOptions {
    ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear))
        .use_alpha(true)
}

/// Bilinear resample with fast_image_resize, falling back to the image
/// crate if SIMD resizing fails.
pub fn resize_rgba(
    src: RgbaImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<RgbaImage, String> {
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return Err("source surface is empty".to_string());
    }

    let mut raw = src.into_raw();
    let primary = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        raw.as_mut_slice(),
        PixelType::U8x4,
    ) {
        Ok(src_image) => resize_with_fir(&src_image, dst_width, dst_height),
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let mut aligned = fir::images::Image::new(src_width, src_height, PixelType::U8x4);
            aligned.buffer_mut().copy_from_slice(&raw);
            resize_with_fir(&aligned, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary {
        Ok(img) => Ok(img),
        Err(err) => RgbaImage::from_raw(src_width, src_height, raw)
            .map(|img| image::imageops::resize(&img, dst_width, dst_height, FilterType::Triangle))
            .ok_or_else(|| format!("{err}; image crate fallback failed: bad buffer")),
    }
}

fn resize_with_fir(
    src: &fir::images::Image<'_>,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<RgbaImage, String> {
    let mut dst = fir::images::Image::new(dst_width, dst_height, PixelType::U8x4);
    fir::Resizer::new()
        .resize(src, &mut dst, &resize_options())
        .map_err(|e| format!("fir resize error: {e:?}"))?;
    RgbaImage::from_raw(dst_width, dst_height, dst.into_vec())
        .ok_or_else(|| "failed to create rgba image from resized data".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_effective_quality_blend() {
        assert!((effective_quality(90, 0) - 0.9).abs() < 1e-6);
        assert!((effective_quality(80, 50) - 0.4).abs() < 1e-6);
        assert_eq!(effective_quality(100, 0), 1.0);
        assert_eq!(effective_quality(5, 0), MIN_EFFECTIVE_QUALITY);
        assert_eq!(effective_quality(100, 100), MIN_EFFECTIVE_QUALITY);
        assert_eq!(effective_quality(100, 150), MIN_EFFECTIVE_QUALITY);
    }

    #[test]
    fn test_palette_size_bounds() {
        assert_eq!(palette_size(0), 256);
        assert_eq!(palette_size(50), 128);
        assert_eq!(palette_size(75), 64);
        assert_eq!(palette_size(100), 2);
        assert_eq!(palette_size(99), 3);
    }

    #[test]
    fn test_quantize_truncates_rgb_only() {
        let mut surface = RgbaImage::from_pixel(2, 1, Rgba([255, 131, 7, 77]));
        quantize_colors(&mut surface, 50);
        assert_eq!(surface.get_pixel(0, 0).0, [254, 130, 6, 77]);

        let mut coarse = RgbaImage::from_pixel(1, 1, Rgba([255, 127, 128, 1]));
        quantize_colors(&mut coarse, 100);
        assert_eq!(coarse.get_pixel(0, 0).0, [128, 0, 128, 1]);
    }

    #[test]
    fn test_quantize_zero_level_is_identity() {
        let mut surface = RgbaImage::from_pixel(1, 1, Rgba([3, 5, 7, 9]));
        quantize_colors(&mut surface, 0);
        assert_eq!(surface.get_pixel(0, 0).0, [3, 5, 7, 9]);
    }

    #[test]
    fn test_target_dimensions_rules() {
        assert_eq!(target_dimensions((400, 200), Some(50), Some(50)), (50, 50));
        assert_eq!(target_dimensions((400, 200), Some(100), None), (100, 50));
        assert_eq!(target_dimensions((400, 200), None, Some(20)), (40, 20));
        assert_eq!(target_dimensions((400, 200), None, None), (400, 200));
        assert_eq!(target_dimensions((1000, 1), Some(10), None), (10, 1));
    }

    #[test]
    fn test_surface_limits() {
        assert!(check_surface(1, 1).is_ok());
        assert!(matches!(
            check_surface(0, 5),
            Err(LazyConvertError::SurfaceUnavailable { .. })
        ));
        assert!(check_surface(MAX_SURFACE_DIMENSION + 1, 1).is_err());
        assert!(check_surface(20_000, 20_000).is_err());
    }

    #[test]
    fn test_render_resizes_to_exact_target() {
        let bitmap = DecodedBitmap::new(RgbaImage::from_pixel(64, 32, Rgba([10, 20, 30, 255])), None);
        let surface = render_surface(bitmap, Some((16, 16))).unwrap();
        assert_eq!(surface.dimensions(), (16, 16));
        let p = surface.get_pixel(8, 8).0;
        assert_eq!(p[3], 255);
        assert!((p[0] as i32 - 10).abs() <= 1);
    }

    #[test]
    fn test_render_without_target_keeps_pixels() {
        let bitmap = DecodedBitmap::new(RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 4])), None);
        let surface = render_surface(bitmap, None).unwrap();
        assert_eq!(surface.get_pixel(2, 2).0, [1, 2, 3, 4]);
    }
}
