// tests/stalled_decodes.rs
//
// Decoders that never return must not pile up threads without bound.
// Kept in its own test binary: the stalled-decode count is process-wide.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use lazy_convert::engine::{
    run_with_deadline, stalled_decodes, DecodeStrategy, DecodedBitmap, ImageInfo,
    MAX_STALLED_DECODES,
};
use lazy_convert::{
    Converter, ConverterConfig, ErrorCategory, LazyConvertError, Result, SourceAsset,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static RELEASE: AtomicBool = AtomicBool::new(false);

/// Blocks every decode until RELEASE is set.
struct StuckDecode;

impl DecodeStrategy for StuckDecode {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn decode(&self, asset: &SourceAsset, timeout: Duration) -> Result<DecodedBitmap> {
        run_with_deadline(asset.name(), timeout, || {
            while !RELEASE.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(LazyConvertError::decode_failed("released"))
        })
    }

    fn probe(&self, asset: &SourceAsset, timeout: Duration) -> Result<ImageInfo> {
        self.decode(asset, timeout).map(|b| ImageInfo {
            width: b.width(),
            height: b.height(),
            format: String::new(),
        })
    }
}

fn png() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[cfg(target_os = "linux")]
fn live_threads() -> usize {
    std::fs::read_dir("/proc/self/task").unwrap().count()
}

#[test]
fn test_hung_decoders_keep_threads_bounded() {
    #[cfg(target_os = "linux")]
    let threads_before = live_threads();

    let converter = Converter::with_strategies(
        ConverterConfig::default().with_decode_timeout(Duration::from_millis(10)),
        Arc::new(StuckDecode),
        Arc::new(StuckDecode),
    );
    let asset = SourceAsset::new("stuck.png", "image/png", png());

    let mut backlog_errors = 0;
    for _ in 0..50 {
        let err = converter.convert_image(&asset, "png", 90, None).unwrap_err();
        assert!(stalled_decodes() <= MAX_STALLED_DECODES);
        if let LazyConvertError::ConversionFailed { fallback, .. } = &err {
            if matches!(**fallback, LazyConvertError::DecodeBacklog { .. }) {
                assert_eq!(err.category(), ErrorCategory::ResourceLimit);
                backlog_errors += 1;
            }
        }
    }
    assert_eq!(stalled_decodes(), MAX_STALLED_DECODES);
    assert!(backlog_errors > 0);

    // info still answers with defaults instead of spawning more threads
    let info = converter.get_image_info(&asset);
    assert_eq!((info.width, info.height), (800, 600));

    #[cfg(target_os = "linux")]
    assert!(live_threads() <= threads_before + MAX_STALLED_DECODES + 2);

    RELEASE.store(true, Ordering::Release);
    let deadline = Instant::now() + Duration::from_secs(5);
    while stalled_decodes() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stalled_decodes(), 0);

    // capacity is back once the stuck decoders exit
    let out = Converter::default().convert_image(&asset, "png", 90, None).unwrap();
    assert_eq!(out.width(), 4);
}
