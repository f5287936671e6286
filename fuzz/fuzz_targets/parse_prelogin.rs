#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PreLogin;

fuzz_target!(|data: &[u8]| {
    // Parses untrusted server responses before login
    if let Ok(prelogin) = PreLogin::decode(data) {
        let _ = prelogin.encryption.allows_plaintext();
        let _ = prelogin.version_string();
    }
});
