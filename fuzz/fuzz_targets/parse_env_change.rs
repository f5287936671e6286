#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::WireReader;
use tds_protocol::token::EnvChange;

fuzz_target!(|data: &[u8]| {
    let mut reader = WireReader::new(data);
    if let Ok(env) = EnvChange::decode(&mut reader) {
        let _ = env.new_database();
        let _ = env.new_packet_size();
    }
});
