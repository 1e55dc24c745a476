//! Fuzz test for size string parsing
//!
//! Sizes come from the command line and the settings file, so parsing must
//! reject garbage without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

use volspeed_core::{format_size, parse_size, TestRequest};

fuzz_target!(|data: &str| {
    if let Ok(size) = parse_size(data) {
        let _ = format_size(size);

        // Validation must not panic on any parsed size
        if let Ok(buffer) = usize::try_from(size) {
            let _ = TestRequest::new(".", size).buffer_size(buffer).validate();
        }
    }

    for suffix in ["", "B", "K", "KiB", "M", "MB", "G", "gib", "k", "m"] {
        let _ = parse_size(&format!("{}{}", data.trim(), suffix));
    }
});
