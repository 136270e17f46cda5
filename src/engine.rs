// src/engine.rs
//
// The conversion engine: decode (two strategies) -> render -> encode,
// driven by Converter. This file is a facade over the modules in engine/.

// =============================================================================
// SURFACE LIMITS
// =============================================================================

/// Maximum raster surface side, in pixels.
/// Larger images are rejected to prevent decompression bombs.
pub const MAX_SURFACE_DIMENSION: u32 = 32768;

/// Maximum raster surface area.
/// 100 megapixels = 400MB of RGBA. Beyond this is likely malicious.
pub const MAX_SURFACE_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod asset;
mod common;
mod converter;
mod decoder;
mod encoder;
mod executor;
mod memory;
mod render;
mod spool;
mod strategy;

pub use asset::{ConvertedAsset, ImageInfo, ImageSource, LoadedBytes, SourceAsset};
pub use common::{run_with_deadline, stalled_decodes, MAX_STALLED_DECODES};
pub use converter::{BatchResult, ConversionRequest, Converter, DEFAULT_QUALITY};
pub use decoder::{
    apply_orientation, check_dimensions, decode_as, decode_sniffed, detect_exif_orientation,
    detect_format, probe_dimensions, DecodedBitmap,
};
pub use encoder::{encode_surface, QualitySettings, DEFAULT_ENCODER_QUALITY};
pub use executor::ExecutionContext;
pub use memory::{detect_memory_snapshot, MemorySnapshot, SystemMemoryMonitor};
pub use render::{
    check_surface, effective_quality, palette_size, quantize_colors, render_surface,
    target_dimensions, MIN_EFFECTIVE_QUALITY,
};
pub use spool::Spool;
pub use strategy::{DecodeStrategy, InlineDecode, SpooledDecode};
