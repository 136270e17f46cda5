#![no_main]

use arbitrary::Arbitrary;
use lazy_convert::{ConversionRequest, Converter, ConverterConfig, SourceAsset};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use std::time::Duration;

const TOKENS: &[&str] = &["jpeg", "png", "webp", "gif", "bmp", "tiff", "svg", "zzz"];
const MIMES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif", "text/plain"];

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    token: u8,
    mime: u8,
    quality: i8,
    compression: Option<i8>,
    width: Option<u8>,
    height: Option<u8>,
    bytes: &'a [u8],
}

fn converter() -> &'static Converter {
    static CONVERTER: OnceLock<Converter> = OnceLock::new();
    CONVERTER.get_or_init(|| {
        Converter::new(ConverterConfig::default().with_decode_timeout(Duration::from_secs(2)))
    })
}

fuzz_target!(|input: Input| {
    let asset = SourceAsset::new(
        "fuzz.bin",
        MIMES[input.mime as usize % MIMES.len()],
        input.bytes.to_vec(),
    );
    let mut request = ConversionRequest::new(TOKENS[input.token as usize % TOKENS.len()])
        .quality(input.quality as i32)
        .resize(
            input.width.map(|w| w as u32 % 64 + 1),
            input.height.map(|h| h as u32 % 64 + 1),
        );
    if let Some(level) = input.compression {
        request = request.compression_level(level as i32);
    }

    if let Ok(out) = converter().convert(&asset, &request) {
        assert!(!out.is_empty());
        if let (Some(w), Some(h)) = (input.width, input.height) {
            assert_eq!((out.width(), out.height()), (w as u32 % 64 + 1, h as u32 % 64 + 1));
        }
    }
    let _ = converter().get_image_info(&asset);
});
