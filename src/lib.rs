// lib.rs
//
// lazy-convert: image format conversion with a fallback decode path.
//
// - Decode through one strategy, retry once through another
// - Every decode bounded by a deadline
// - Quality and compression blended into one encoder setting
// - Admission checks returned as verdicts, never as errors

// Memory allocator optimization - jemalloc for better performance
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod validate;

pub use config::ConverterConfig;
pub use engine::{
    BatchResult, ConversionRequest, ConvertedAsset, Converter, ExecutionContext, ImageInfo,
    ImageSource, SourceAsset,
};
pub use error::{ErrorCategory, LazyConvertError, Result};
pub use format::{resolve_mime_type, OutputFormat};
pub use validate::{sanitize_file_name, validate_conversion_params, validate_file, Verdict};

use format::FormatCaps;

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Formats the engine can decode
pub fn supported_input_formats() -> Vec<&'static str> {
    formats_with(FormatCaps::DECODE)
}

/// Formats the engine has a native encoder for. SVG and HEIC requests are
/// accepted too but produce PNG.
pub fn supported_output_formats() -> Vec<&'static str> {
    formats_with(FormatCaps::ENCODE)
}

fn formats_with(caps: FormatCaps) -> Vec<&'static str> {
    [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Gif,
        OutputFormat::Bmp,
        OutputFormat::Tiff,
        OutputFormat::Avif,
        OutputFormat::Svg,
        OutputFormat::Heic,
    ]
    .into_iter()
    .filter(|f| f.caps().contains(caps))
    .map(OutputFormat::as_str)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_format_lists() {
        let inputs = supported_input_formats();
        assert!(inputs.contains(&"jpeg"));
        assert!(!inputs.contains(&"avif"));
        let outputs = supported_output_formats();
        assert!(outputs.contains(&"avif"));
        assert!(!outputs.contains(&"svg"));
        assert!(!version().is_empty());
    }
}
