#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_client::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = Config::from_connection_string(s) {
            let _ = config.validate();
        }
    }
});
