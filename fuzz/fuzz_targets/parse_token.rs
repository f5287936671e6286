#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_client::Value;
use tds_protocol::{Token, TokenParser};

fuzz_target!(|data: &[u8]| {
    // Feed the input in two halves to exercise resumption
    let split = data.len() / 2;
    let mut parser = TokenParser::empty();
    parser.push(&data[..split]);

    let mut metadata = None;
    let mut pushed_rest = false;
    loop {
        match parser.next_token(metadata.as_ref()) {
            Ok(Some(Token::ColMetaData(meta))) => metadata = Some(meta),
            Ok(Some(Token::Row(row))) => {
                if let Some(meta) = &metadata {
                    for (column, raw) in meta.columns.iter().zip(&row.values) {
                        let _ = Value::decode(column, raw.as_deref());
                    }
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) if !pushed_rest => {
                parser.push(&data[split..]);
                pushed_rest = true;
            }
            Ok(None) | Err(_) => break,
        }
    }
});
