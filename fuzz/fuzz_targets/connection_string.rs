//! Connection string parsing must never panic, including on the strings
//! accepted settings render back to.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mycat_client::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = Config::from_connection_string(text) else {
        return;
    };
    let _ = config.hosts();
    let rendered = config.to_connection_string(true);
    let _ = Config::from_connection_string(&rendered);
});
