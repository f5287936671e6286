#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tds_codec::{MessageAssembler, TdsCodec};
use tds_protocol::PacketHeader;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    if data.len() >= 8 {
        let mut cursor = data;
        let _ = PacketHeader::decode(&mut cursor);
    }

    // Frame and reassemble whatever the input contains
    let mut codec = TdsCodec::new();
    let mut assembler = MessageAssembler::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(packet)) = codec.decode(&mut buf) {
        let _ = assembler.push(packet);
    }
});
