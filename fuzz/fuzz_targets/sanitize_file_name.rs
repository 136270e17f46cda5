#![no_main]

use lazy_convert::sanitize_file_name;
use lazy_convert::validate::MAX_FILE_NAME_CHARS;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|name: &str| {
    let clean = sanitize_file_name(name);
    assert!(!clean.is_empty());
    assert!(!clean.contains(['/', '\\']));
    assert!(!clean.contains(".."));
    assert!(!clean.starts_with('.'));
    assert!(clean.chars().count() <= MAX_FILE_NAME_CHARS);
    assert_eq!(sanitize_file_name(&clean), clean);
});
