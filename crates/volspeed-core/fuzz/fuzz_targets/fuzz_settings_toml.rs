//! Fuzz test for settings TOML parsing

#![no_main]

use libfuzzer_sys::fuzz_target;

use volspeed_core::Settings;

fuzz_target!(|data: &str| {
    let result: Result<Settings, _> = toml::from_str(data);

    if let Ok(settings) = result {
        let _ = toml::to_string_pretty(&settings);

        // Conversions report bad values as errors
        let _ = settings.speedtest.engine_config();
        let _ = settings.speedtest.request(std::path::Path::new("."));
    }
});
