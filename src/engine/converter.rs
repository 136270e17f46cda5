// src/engine/converter.rs
//
// Conversion orchestrator.
//
//   Idle -> Attempting(primary) -> Success
//                               -> Attempting(fallback) -> Success | Failed
//
// A failure anywhere in the primary path (decode timeout, decode error,
// surface, encode) reruns the whole pipeline once with the fallback strategy.
// resize_image is a single attempt; get_image_info never fails.

use crate::config::ConverterConfig;
use crate::engine::asset::{ConvertedAsset, ImageInfo, ImageSource, SourceAsset};
use crate::engine::common::run_with_deadline;
use crate::engine::decoder::{decode_sniffed, DecodedBitmap};
use crate::engine::encoder::encode_surface;
use crate::engine::executor::build_pool;
use crate::engine::render::{effective_quality, quantize_colors, render_surface, target_dimensions};
use crate::engine::strategy::{DecodeStrategy, InlineDecode, SpooledDecode};
use crate::error::{LazyConvertError, Result};
use crate::format::{resolve_format, FormatCaps, OutputFormat};
use crate::validate::{validate_conversion_params, validate_file, Verdict};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Quality used when a request does not set one.
pub const DEFAULT_QUALITY: i32 = 92;

/// Parameters for one conversion.
///
/// Values are kept as given so that out-of-range input can be reported by
/// [`ConversionRequest::validate`]; the pipeline itself is lenient (unknown
/// formats become PNG, quality is clamped by the blend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionRequest {
    format: String,
    quality: i32,
    compression_level: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
}

impl ConversionRequest {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            quality: DEFAULT_QUALITY,
            compression_level: None,
            width: None,
            height: None,
        }
    }

    pub fn quality(mut self, quality: i32) -> Self {
        self.quality = quality;
        self
    }

    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Target size. With one side set the other follows the aspect ratio.
    pub fn resize(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format_token(&self) -> &str {
        &self.format
    }

    pub fn quality_value(&self) -> i32 {
        self.quality
    }

    pub fn compression_level_value(&self) -> Option<i32> {
        self.compression_level
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Format the pipeline will target. Unknown tokens resolve to PNG.
    pub fn output_format(&self) -> OutputFormat {
        resolve_format(&self.format)
    }

    pub fn effective_quality(&self) -> f32 {
        effective_quality(self.quality, self.compression_level.unwrap_or(0))
    }

    /// Parameter check (format allow-list, quality, compression level).
    pub fn validate(&self) -> Verdict {
        validate_conversion_params(&self.format, self.quality, self.compression_level)
    }
}

/// Outcome for one file of a batch.
#[derive(Debug)]
pub struct BatchResult {
    /// Position of the file in the input slice.
    pub index: usize,
    pub file_name: String,
    pub result: Result<ConvertedAsset>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything the render and encode stages need, resolved up front.
#[derive(Clone, Copy, Debug)]
struct RenderPlan {
    width: Option<u32>,
    height: Option<u32>,
    format: OutputFormat,
    quality: f32,
    compression_level: i32,
}

impl RenderPlan {
    fn from_request(request: &ConversionRequest) -> Self {
        Self {
            width: request.width,
            height: request.height,
            format: request.output_format(),
            quality: request.effective_quality(),
            compression_level: request.compression_level.unwrap_or(0),
        }
    }

    fn execute(self, bitmap: DecodedBitmap) -> Result<ConvertedAsset> {
        let target = match (self.width, self.height) {
            (None, None) => None,
            (w, h) => Some(target_dimensions(bitmap.dimensions(), w, h)),
        };
        let mut surface = render_surface(bitmap, target)?;

        if self.format == OutputFormat::Png && self.compression_level > 0 {
            quantize_colors(&mut surface, self.compression_level);
        }

        let quality = self
            .format
            .caps()
            .contains(FormatCaps::LOSSY)
            .then_some(self.quality);
        let (bytes, actual) = encode_surface(&surface, self.format, quality)?;
        Ok(ConvertedAsset::new(
            bytes,
            actual,
            surface.width(),
            surface.height(),
        ))
    }
}

/// Decode, transform and re-encode images.
pub struct Converter {
    config: ConverterConfig,
    primary: Arc<dyn DecodeStrategy>,
    fallback: Arc<dyn DecodeStrategy>,
    batch_pool: OnceLock<Option<ThreadPool>>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Converter {
    /// Inline decode first, spooled decode as fallback.
    pub fn new(config: ConverterConfig) -> Self {
        Self::with_strategies(config, Arc::new(InlineDecode), Arc::new(SpooledDecode))
    }

    pub fn with_strategies(
        config: ConverterConfig,
        primary: Arc<dyn DecodeStrategy>,
        fallback: Arc<dyn DecodeStrategy>,
    ) -> Self {
        Self {
            config,
            primary,
            fallback,
            batch_pool: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert `asset` as described by `request`, retrying once with the
    /// fallback strategy.
    pub fn convert(&self, asset: &SourceAsset, request: &ConversionRequest) -> Result<ConvertedAsset> {
        let plan = RenderPlan::from_request(request);
        let primary_err = match self.attempt(self.primary.as_ref(), asset, plan) {
            Ok(converted) => return Ok(converted),
            Err(e) => e,
        };

        warn!(
            target: "lazy_convert::converter",
            name = asset.name(),
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %primary_err,
            "primary conversion failed, trying fallback"
        );

        self.attempt(self.fallback.as_ref(), asset, plan)
            .map_err(|fallback_err| {
                LazyConvertError::conversion_failed(asset.name().to_string(), primary_err, fallback_err)
            })
    }

    /// Convert to `format` at `quality` (1-100) with an optional compression
    /// level (0-100). Unknown formats produce PNG.
    pub fn convert_image(
        &self,
        asset: &SourceAsset,
        format: &str,
        quality: i32,
        compression_level: Option<i32>,
    ) -> Result<ConvertedAsset> {
        let mut request = ConversionRequest::new(format).quality(quality);
        request.compression_level = compression_level;
        self.convert(asset, &request)
    }

    fn attempt(
        &self,
        strategy: &dyn DecodeStrategy,
        asset: &SourceAsset,
        plan: RenderPlan,
    ) -> Result<ConvertedAsset> {
        let bitmap = strategy.decode(asset, self.config.decode_timeout)?;
        self.render_and_encode(bitmap, plan)
    }

    fn render_and_encode(&self, bitmap: DecodedBitmap, plan: RenderPlan) -> Result<ConvertedAsset> {
        self.config.execution.run(move || plan.execute(bitmap))
    }

    /// Resample an encoded image (usually a previous result) to exactly
    /// `width` x `height`. One attempt, no fallback.
    pub fn resize_image(
        &self,
        source: &ImageSource,
        width: u32,
        height: u32,
        format: &str,
        quality: i32,
    ) -> Result<ConvertedAsset> {
        let wrap = |e| LazyConvertError::resize_failed(width, height, e);

        for (name, side) in [("width", width), ("height", height)] {
            if side == 0 {
                return Err(wrap(LazyConvertError::invalid_argument(
                    name,
                    "0",
                    "resize target must be at least 1 pixel",
                )));
            }
        }

        let bytes = source.load().map_err(wrap)?;
        let bitmap = run_with_deadline(&source.label(), self.config.decode_timeout, move || {
            decode_sniffed(&bytes)
        })
        .map_err(wrap)?;

        let plan = RenderPlan {
            width: Some(width),
            height: Some(height),
            format: resolve_format(format),
            quality: effective_quality(quality, 0),
            compression_level: 0,
        };
        self.render_and_encode(bitmap, plan).map_err(wrap)
    }

    /// Dimensions and format of `asset`. Never fails: when neither strategy
    /// can read it, the configured default dimensions and the file extension
    /// are returned.
    pub fn get_image_info(&self, asset: &SourceAsset) -> ImageInfo {
        let timeout = self.config.decode_timeout;
        for strategy in [&self.primary, &self.fallback] {
            match strategy.probe(asset, timeout) {
                Ok(info) => return info,
                Err(e) => debug!(
                    target: "lazy_convert::converter",
                    name = asset.name(),
                    strategy = strategy.name(),
                    error = %e,
                    "probe failed"
                ),
            }
        }

        let (width, height) = self.config.default_dimensions;
        warn!(
            target: "lazy_convert::converter",
            name = asset.name(),
            width,
            height,
            "could not read image dimensions, reporting defaults"
        );
        ImageInfo {
            width,
            height,
            format: asset.extension().unwrap_or_default(),
        }
    }

    /// Convert many files with `batch_concurrency` conversions in flight.
    ///
    /// Files failing the file or parameter checks are rejected without
    /// running the pipeline. Results are in input order; completion order
    /// is not defined.
    pub fn convert_batch(&self, assets: &[SourceAsset], request: &ConversionRequest) -> Vec<BatchResult> {
        let convert_one = |(index, asset): (usize, &SourceAsset)| BatchResult {
            index,
            file_name: asset.name().to_string(),
            result: self.convert_admitted(asset, request),
        };
        let run = || -> Vec<BatchResult> { assets.par_iter().enumerate().map(convert_one).collect() };

        match self.batch_pool() {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    fn convert_admitted(&self, asset: &SourceAsset, request: &ConversionRequest) -> Result<ConvertedAsset> {
        if let Verdict::Invalid { reason } = validate_file(asset).and_then(|| request.validate()) {
            return Err(LazyConvertError::validation_rejected(reason));
        }
        self.convert(asset, request)
    }

    fn batch_pool(&self) -> Option<&ThreadPool> {
        self.batch_pool
            .get_or_init(|| build_pool(self.config.batch_concurrency, "lazy-convert-batch"))
            .as_ref()
    }
}
