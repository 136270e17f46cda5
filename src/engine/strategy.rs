// src/engine/strategy.rs
//
// The two interchangeable decode strategies the converter tries in order.
//
// InlineDecode trusts the declared MIME type and decodes the caller's bytes
// in place. SpooledDecode copies the bytes to a private temporary file,
// maps it and lets the signature decide the codec. Each strategy bounds its
// own work with the decode deadline.

use crate::engine::asset::{ImageInfo, SourceAsset};
use crate::engine::common::run_with_deadline;
use crate::engine::decoder::{decode_as, decode_sniffed, probe_dimensions, DecodedBitmap};
use crate::engine::spool::Spool;
use crate::error::{LazyConvertError, Result};
use crate::format::OutputFormat;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// One way of turning a source asset into pixels.
pub trait DecodeStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Full decode, bounded by `timeout`.
    fn decode(&self, asset: &SourceAsset, timeout: Duration) -> Result<DecodedBitmap>;

    /// Header-only dimensions and format, bounded by `timeout`.
    fn probe(&self, asset: &SourceAsset, timeout: Duration) -> Result<ImageInfo>;
}

/// Decode the in-memory bytes with the codec the declared MIME type names.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDecode;

impl InlineDecode {
    fn declared_format(asset: &SourceAsset) -> Result<OutputFormat> {
        OutputFormat::from_mime(asset.mime())
            .ok_or_else(|| load_error(asset, format!("no decoder for type '{}'", asset.mime())))
    }
}

fn load_error(asset: &SourceAsset, cause: impl std::fmt::Display) -> LazyConvertError {
    LazyConvertError::decode_failed(format!(
        "failed to load image '{}' ({} bytes, type {}): {cause}",
        asset.name(),
        asset.len(),
        asset.mime()
    ))
}

fn with_load_context(asset: &SourceAsset, err: LazyConvertError) -> LazyConvertError {
    match err {
        LazyConvertError::DecodeFailed { message } => load_error(asset, message),
        other => other,
    }
}

impl DecodeStrategy for InlineDecode {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn decode(&self, asset: &SourceAsset, timeout: Duration) -> Result<DecodedBitmap> {
        let format = Self::declared_format(asset)?;
        let bytes = asset.shared_bytes();
        debug!(target: "lazy_convert::decode", strategy = self.name(), name = asset.name(), %format, "decoding");
        run_with_deadline(asset.name(), timeout, move || decode_as(&bytes, format))
            .map_err(|e| with_load_context(asset, e))
    }

    fn probe(&self, asset: &SourceAsset, timeout: Duration) -> Result<ImageInfo> {
        let format = Self::declared_format(asset)?;
        let bytes = asset.shared_bytes();
        let (width, height, format) =
            run_with_deadline(asset.name(), timeout, move || probe_dimensions(&bytes, Some(format)))
                .map_err(|e| with_load_context(asset, e))?;
        Ok(ImageInfo {
            width,
            height,
            format: format.as_str().to_string(),
        })
    }
}

/// Decode through a scoped temporary copy, picking the codec by signature.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpooledDecode;

/// Result of a spooled run plus where the spool lived (gone by now).
struct SpooledOutcome<T> {
    result: Result<T>,
    #[cfg_attr(not(test), allow(dead_code))]
    spool_path: PathBuf,
}

/// Spool `asset`, run `work` on the mapping under the deadline, release the
/// spool. The spool is released before returning on every path, including
/// timeout; a decode thread still running keeps only the unlinked mapping.
fn run_spooled<T, F>(asset: &SourceAsset, timeout: Duration, work: F) -> Result<SpooledOutcome<T>>
where
    T: Send + 'static,
    F: FnOnce(&[u8]) -> Result<T> + Send + 'static,
{
    let spool = Spool::write(asset.bytes())?;
    let spool_path = spool.path().to_path_buf();
    let map = spool.map();
    let result = run_with_deadline(asset.name(), timeout, move || work(&map[..]));
    drop(spool);
    Ok(SpooledOutcome { result, spool_path })
}

fn generic_failure(err: LazyConvertError) -> LazyConvertError {
    match err {
        LazyConvertError::DecodeFailed { message } => {
            LazyConvertError::decode_failed(format!("failed to load image: {message}"))
        }
        other => other,
    }
}

impl DecodeStrategy for SpooledDecode {
    fn name(&self) -> &'static str {
        "spooled"
    }

    fn decode(&self, asset: &SourceAsset, timeout: Duration) -> Result<DecodedBitmap> {
        debug!(target: "lazy_convert::decode", strategy = self.name(), name = asset.name(), "decoding");
        run_spooled(asset, timeout, decode_sniffed)?
            .result
            .map_err(generic_failure)
    }

    fn probe(&self, asset: &SourceAsset, timeout: Duration) -> Result<ImageInfo> {
        let (width, height, format) = run_spooled(asset, timeout, |bytes| probe_dimensions(bytes, None))?
            .result
            .map_err(generic_failure)?;
        Ok(ImageInfo {
            width,
            height,
            format: format.as_str().to_string(),
        })
    }
}
