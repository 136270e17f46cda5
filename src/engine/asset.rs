// src/engine/asset.rs
//
// Transient values that flow through one conversion call:
// the caller's source asset, blob-like sources for resize, and results.

use crate::error::{LazyConvertError, Result};
use crate::format::{extension_of, OutputFormat};
use crate::validate::sanitize_file_name;
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The originally supplied file: raw bytes, declared MIME type and name.
///
/// Cloning is cheap (the bytes are shared) and the pipeline never mutates it.
#[derive(Clone, Debug)]
pub struct SourceAsset {
    name: String,
    mime: String,
    bytes: Arc<[u8]>,
}

impl SourceAsset {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, declaring its MIME type from the extension
    /// (`application/octet-stream` when the extension is unknown).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            LazyConvertError::file_read_failed(path.to_string_lossy().into_owned(), e)
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = OutputFormat::from_extension(&name)
            .map(OutputFormat::mime_type)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(name, mime, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File name extension, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name).map(|e| e.to_ascii_lowercase())
    }
}

/// Encoded bytes that a resize can start from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// In-memory data (e.g. a previous conversion result)
    Memory(Arc<[u8]>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Arc<Mmap>),
    /// File path, read only when needed
    Path(PathBuf),
}

impl ImageSource {
    /// Memory-map a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = || path.to_string_lossy().into_owned();
        let file = File::open(path).map_err(|e| LazyConvertError::file_read_failed(display(), e))?;
        // Safety: the file must not be modified externally while mapped. If it is,
        // decoding may fail or produce garbage; it cannot violate memory safety in
        // our code because the map is only ever read as a byte slice.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| LazyConvertError::file_read_failed(display(), e))?;
        Ok(Self::Mapped(Arc::new(mmap)))
    }

    /// Load the bytes, reading from disk for `Path` sources. Memory and
    /// mapped sources are shared, not copied.
    pub fn load(&self) -> Result<LoadedBytes> {
        match self {
            ImageSource::Memory(data) => Ok(LoadedBytes::Shared(Arc::clone(data))),
            ImageSource::Mapped(mmap) => Ok(LoadedBytes::Mapped(Arc::clone(mmap))),
            ImageSource::Path(path) => std::fs::read(path)
                .map(|bytes| LoadedBytes::Shared(Arc::from(bytes)))
                .map_err(|e| {
                    LazyConvertError::file_read_failed(path.to_string_lossy().into_owned(), e)
                }),
        }
    }

    /// Label used in log lines and timeout errors.
    pub fn label(&self) -> String {
        match self {
            ImageSource::Memory(data) => format!("<memory:{} bytes>", data.len()),
            ImageSource::Mapped(mmap) => format!("<mapped:{} bytes>", mmap.len()),
            ImageSource::Path(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Bytes handed out by [`ImageSource::load`]; derefs to `[u8]`.
#[derive(Clone, Debug)]
pub enum LoadedBytes {
    Shared(Arc<[u8]>),
    Mapped(Arc<Mmap>),
}

impl Deref for LoadedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            LoadedBytes::Shared(bytes) => bytes,
            LoadedBytes::Mapped(mmap) => &mmap[..],
        }
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Memory(Arc::from(bytes))
    }
}

impl From<&ConvertedAsset> for ImageSource {
    fn from(asset: &ConvertedAsset) -> Self {
        ImageSource::Memory(Arc::from(asset.bytes()))
    }
}

/// Encoded output of one conversion. The caller owns it.
#[derive(Clone, Debug)]
pub struct ConvertedAsset {
    bytes: Vec<u8>,
    format: OutputFormat,
    width: u32,
    height: u32,
}

impl ConvertedAsset {
    pub(crate) fn new(bytes: Vec<u8>, format: OutputFormat, width: u32, height: u32) -> Self {
        Self {
            bytes,
            format,
            width,
            height,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Format the bytes are actually encoded in.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Download name: sanitized original stem plus the produced extension.
    pub fn suggested_file_name(&self, original: &str) -> String {
        let clean = sanitize_file_name(original);
        let stem = match clean.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => clean.as_str(),
        };
        sanitize_file_name(&format!("{stem}.{}", self.format.extension()))
    }
}

/// Dimensions and format as reported by `Converter::get_image_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_asset_accessors() {
        let asset = SourceAsset::new("Holiday.PNG", "image/png", vec![1u8, 2, 3]);
        assert_eq!(asset.len(), 3);
        assert_eq!(asset.extension().as_deref(), Some("png"));
        let clone = asset.clone();
        assert!(std::ptr::eq(asset.bytes().as_ptr(), clone.bytes().as_ptr()));
    }

    #[test]
    fn test_from_path_declares_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.webp");
        std::fs::write(&path, b"not really webp").unwrap();
        let asset = SourceAsset::from_path(&path).unwrap();
        assert_eq!(asset.name(), "shot.webp");
        assert_eq!(asset.mime(), "image/webp");

        let missing = SourceAsset::from_path(dir.path().join("gone.png")).unwrap_err();
        assert!(matches!(missing, LazyConvertError::FileReadFailed { .. }));
    }

    #[test]
    fn test_image_source_loads_all_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [9u8, 8, 7]).unwrap();

        let mapped = ImageSource::from_path(&path).unwrap();
        assert_eq!(&*mapped.load().unwrap(), &[9, 8, 7]);
        // mapped sources hand out the mapping itself
        if let ImageSource::Mapped(mmap) = &mapped {
            assert_eq!(mapped.load().unwrap().as_ptr(), mmap.as_ptr());
        }
        let lazy = ImageSource::Path(path);
        assert_eq!(&*lazy.load().unwrap(), &[9, 8, 7]);
        let mem = ImageSource::from(vec![1u8]);
        assert_eq!(&*mem.load().unwrap(), &[1]);
    }

    #[test]
    fn test_suggested_name_swaps_extension() {
        let out = ConvertedAsset::new(vec![0], OutputFormat::WebP, 1, 1);
        assert_eq!(out.suggested_file_name("../../etc/holiday.jpeg"), "etcholiday.webp");
        assert_eq!(out.suggested_file_name("photo"), "photo.webp");
        assert_eq!(out.suggested_file_name(""), "image.webp");
        assert_eq!(out.mime_type(), "image/webp");
    }
}
