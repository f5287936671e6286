//! Benchmarks for TDS request encoding and response decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::{BufMut, Bytes, BytesMut};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tds_protocol::{
    Done, DoneStatus, Login7, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, Token,
    TokenParser, TokenType, encode_sql_batch,
};

fn bench_packet_header_decode(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 1000);
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
    header.encode(&mut buf);
    let encoded = buf.freeze();

    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = encoded.clone();
            black_box(PacketHeader::decode(&mut cursor).unwrap())
        })
    });
}

fn bench_login7_encode(c: &mut Criterion) {
    let login = Login7::new()
        .with_hostname("bench-host")
        .with_sql_auth("bench_user", "bench_password")
        .with_server_name("db.example.com");

    c.bench_function("login7_encode", |b| b.iter(|| black_box(login.encode())));
}

fn bench_sql_batch_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_batch_encode");
    for size in [16usize, 1024, 16 * 1024] {
        let sql = format!("SELECT '{}'", "x".repeat(size));
        group.throughput(Throughput::Bytes(sql.len() as u64));
        group.bench_function(format!("{size}"), |b| {
            b.iter(|| black_box(encode_sql_batch(&sql)))
        });
    }
    group.finish();
}

/// One INT column, `rows` ROW tokens and a final DONE.
fn int_result_set(rows: u32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0x81);
    buf.put_u16_le(1);
    buf.put_u32_le(0);
    buf.put_u16_le(0);
    buf.put_u8(0x38);
    buf.put_u8(1);
    buf.put_u16_le(u16::from(b'n'));
    for i in 0..rows {
        buf.put_u8(0xD1);
        buf.put_u32_le(i);
    }
    Done {
        status: DoneStatus::COUNT,
        cur_cmd: 0xC1,
        row_count: u64::from(rows),
    }
    .encode(TokenType::Done, &mut buf);
    buf.freeze()
}

fn bench_token_stream_decode(c: &mut Criterion) {
    let data = int_result_set(10_000);

    let mut group = c.benchmark_group("token_stream_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("int_rows_10k", |b| {
        b.iter(|| {
            let mut parser = TokenParser::new(data.clone());
            let mut metadata = None;
            let mut rows = 0usize;
            while let Some(token) = parser.next_token(metadata.as_ref()).unwrap() {
                match token {
                    Token::ColMetaData(meta) => metadata = Some(meta),
                    Token::Row(_) => rows += 1,
                    _ => {}
                }
            }
            black_box(rows)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_packet_header_decode,
    bench_login7_encode,
    bench_sql_batch_encode,
    bench_token_stream_decode,
);
criterion_main!(benches);
