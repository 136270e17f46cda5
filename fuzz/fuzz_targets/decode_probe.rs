#![no_main]

use lazy_convert::engine::{decode_sniffed, probe_dimensions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let probed = probe_dimensions(data, None);
    if let Ok(bitmap) = decode_sniffed(data) {
        // a full decode must agree with the header probe
        if let Ok((width, height, _)) = probed {
            assert_eq!(bitmap.dimensions(), (width, height));
        }
    }
});
