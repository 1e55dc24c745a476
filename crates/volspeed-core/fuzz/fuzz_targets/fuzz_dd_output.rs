//! Fuzz test for dd transfer summary parsing
//!
//! The helper's stderr is whatever the installed dd prints, in any locale.

#![no_main]

use libfuzzer_sys::fuzz_target;

use volspeed_platform::parse_copied_bytes;

fuzz_target!(|data: &str| {
    if let Some(bytes) = parse_copied_bytes(data) {
        // The count must appear verbatim on a line mentioning bytes
        let needle = bytes.to_string();
        assert!(data
            .lines()
            .any(|line| line.contains("bytes") && line.contains(&needle)));
    }

    let _ = parse_copied_bytes(&format!("{}\n{} bytes copied", data, data.len()));
});
