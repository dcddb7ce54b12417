//! Request parsing benchmarks
//!
//! Measures the per-request parsing work of the transaction loop:
//! - Header block reading and lookups
//! - `Range` and `Accept` evaluation
//! - Chunked body decoding
//!
//! Run with: cargo bench --bench parsers

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use davhttpd::http::accept::{accepts, parse_accept};
use davhttpd::http::chunked::{encode_chunked_body, read_chunked};
use davhttpd::http::parser::{parse_request_line, read_header_block};
use davhttpd::http::range::parse_ranges;
use davhttpd::http::session::MemoryOps;
use davhttpd::http::{Headers, HttpSession};

const REQUEST_HEADERS: &[u8] = b"Host: dav.example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64) Thunderbird/115.0\r\n\
Accept: text/calendar, application/xml;q=0.9, */*;q=0.1\r\n\
Accept-Encoding: gzip, deflate;q=0.5\r\n\
Authorization: Basic YWxpY2U6c2VjcmV0\r\n\
Depth: 1\r\n\
Content-Type: application/xml; charset=utf-8\r\n\
If-None-Match: \"1700000000-1400\", \"1700000001-1400\"\r\n\
Connection: keep-alive\r\n\
\r\n";

fn bench_request_head(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_head");

    group.bench_function("request_line", |b| {
        b.iter(|| parse_request_line(black_box("PROPFIND /dav/calendars/user/alice/ HTTP/1.1")))
    });

    group.throughput(Throughput::Bytes(REQUEST_HEADERS.len() as u64));
    group.bench_function("header_block", |b| {
        b.iter(|| {
            let mut session = HttpSession::new(Box::new(MemoryOps::new(REQUEST_HEADERS.to_vec())));
            let mut headers = Headers::new();
            read_header_block(&mut session, &mut headers, 4096).unwrap();
            headers
        })
    });

    group.finish();
}

fn bench_header_lookup(c: &mut Criterion) {
    let mut session = HttpSession::new(Box::new(MemoryOps::new(REQUEST_HEADERS.to_vec())));
    let mut headers = Headers::new();
    read_header_block(&mut session, &mut headers, 4096).unwrap();

    let mut group = c.benchmark_group("header_lookup");
    group.bench_function("get_present", |b| b.iter(|| headers.get(black_box("content-type"))));
    group.bench_function("get_absent", |b| b.iter(|| headers.get(black_box("If-Match"))));
    group.bench_function("tokens", |b| {
        b.iter(|| headers.tokens(black_box("Connection")).count())
    });
    group.finish();
}

fn bench_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_ranges");

    for (name, hdr) in [
        ("single", "bytes=0-499"),
        ("suffix", "bytes=-500"),
        ("coalesced", "bytes=0-99,50-149,200-299,240-400"),
        ("many", "bytes=0-9,1000-1009,2000-2009,3000-3009,4000-4009,5000-5009,6000-6009,7000-7009"),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), hdr, |b, hdr| {
            b.iter(|| parse_ranges(black_box(hdr), 10_000))
        });
    }

    group.finish();
}

fn bench_accept(c: &mut Criterion) {
    let values = ["gzip;q=0.8, deflate;q=0.5, identity, *;q=0"];

    c.bench_function("accept_encoding", |b| {
        b.iter(|| {
            let entries = parse_accept(black_box(&values));
            accepts(&entries, "gzip")
        })
    });
}

fn bench_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_chunked");

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = vec![b'x'; size];
        let wire = encode_chunked_body(&data, 4096).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| {
                let mut session = HttpSession::new(Box::new(MemoryOps::new(wire.clone())));
                let mut trailers = Headers::new();
                let mut out = Vec::with_capacity(size);
                read_chunked(&mut session, &mut trailers, Some(&mut out), 0, 4096).unwrap();
                out
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_request_head, bench_header_lookup, bench_ranges, bench_accept, bench_chunked);
criterion_main!(benches);
