// src/engine/spool.rs
//
// Scoped temporary copy of a source asset, memory-mapped for decoding.
// The spooled decode strategy reads through this instead of the caller's
// buffer; the file is unlinked when the Spool is dropped, on every exit path.

use crate::error::{LazyConvertError, Result};
use memmap2::Mmap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

pub struct Spool {
    file: NamedTempFile,
    map: Arc<Mmap>,
}

impl Spool {
    /// Write `bytes` to a fresh temporary file and map it read-only.
    pub fn write(bytes: &[u8]) -> Result<Self> {
        // Empty files cannot be mapped on every platform
        if bytes.is_empty() {
            return Err(LazyConvertError::decode_failed("spooled source is empty"));
        }

        let mut file = tempfile::Builder::new()
            .prefix("lazy-convert-")
            .suffix(".spool")
            .tempfile()
            .map_err(LazyConvertError::spool_failed)?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(LazyConvertError::spool_failed)?;

        // Safety: the temp file is private to this Spool and never written again
        // after this point.
        let map = unsafe { Mmap::map(file.as_file()) }.map_err(LazyConvertError::spool_failed)?;
        debug!(target: "lazy_convert::spool", path = %file.path().display(), len = bytes.len(), "spooled source");
        Ok(Self {
            file,
            map: Arc::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Shared handle to the mapping. It stays readable after the Spool is
    /// dropped (the file is unlinked, the pages are not).
    pub fn map(&self) -> Arc<Mmap> {
        Arc::clone(&self.map)
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        // NamedTempFile removes the file in its own Drop
        debug!(target: "lazy_convert::spool", path = %self.file.path().display(), "releasing spool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spool_contents_match_and_file_is_removed_on_drop() {
        let spool = Spool::write(b"abcdef").unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());
        let map = spool.map();
        assert_eq!(&map[..], b"abcdef");
        drop(spool);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let err = Spool::write(&[]).err().expect("empty spool must fail");
        assert!(matches!(err, LazyConvertError::DecodeFailed { .. }));
    }
}
