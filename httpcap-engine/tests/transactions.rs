//! End-to-end pairing over hand-fed TCP segments.

mod common;

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::TRANSFER_ENCODING;

use common::{Conn, Harness};
use httpcap_protocols::{BodyDecoding, ClientAddr, DECOMPRESSION_FAILED};

#[test]
fn simple_get_becomes_one_transaction() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40000", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");
    conn.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    conn.close(&mut h);

    let (events, metrics) = h.finish();
    assert_eq!(events.len(), 1);
    let tx = &events[0];
    assert_eq!(tx.seq(), 0);
    assert_eq!(tx.client_addr(), conn.client);
    assert_eq!(tx.request.server_addr, conn.server);
    assert_eq!(tx.request.method, "GET");
    assert_eq!(tx.request.uri, "/a");
    assert_eq!(tx.response.code, 200);
    assert_eq!(tx.response.reason, "OK");
    assert_eq!(tx.response.body, "hello");
    assert!(tx.request.body.is_empty());

    let parsed = tx.request.parsed.as_ref().unwrap();
    assert_eq!(parsed.uri(), "/a");
    assert_eq!(
        parsed.extensions().get::<ClientAddr>(),
        Some(&ClientAddr(conn.client))
    );
    assert_eq!(tx.response.parsed.as_ref().unwrap().status(), 200);

    assert!(tx.latency() >= chrono::Duration::zero());
    assert_eq!(metrics.transactions.get(), 1);
    assert_eq!(metrics.pairs_opened.get(), 1);
    assert_eq!(metrics.pairs_aborted.get(), 0);
}

#[test]
fn chunked_response_is_dechunked_and_marker_dropped() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40001", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"GET /wiki HTTP/1.1\r\n\r\n");
    conn.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n");
    conn.server_sends(&mut h, b"2\r\npe\r\n0\r\n\r\n");
    conn.close(&mut h);

    let (events, _) = h.finish();
    assert_eq!(events.len(), 1);
    let response = &events[0].response;
    assert_eq!(response.body, "Wikipe");
    assert!(response.headers.iter().any(|item| item.is("transfer-encoding")));

    let parsed = response.parsed.as_ref().unwrap();
    assert!(parsed.headers().get(TRANSFER_ENCODING).is_none());
    assert_eq!(parsed.body(), "Wikipe");
}

#[test]
fn transactions_are_numbered_in_order() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40002", "10.0.0.2:8080");
    conn.handshake(&mut h);
    for path in ["/0", "/1", "/2"] {
        conn.client_sends(&mut h, format!("GET {path} HTTP/1.1\r\n\r\n").as_bytes());
        conn.server_sends(&mut h, b"HTTP/1.1 204 No Content\r\n\r\n");
    }
    conn.close(&mut h);

    let (events, _) = h.finish();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq()).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    for (i, tx) in events.iter().enumerate() {
        assert_eq!(tx.request.uri, format!("/{i}"));
        assert_eq!(tx.response.code, 204);
        assert!(tx.request.event.start <= tx.request.event.end);
        assert!(tx.request.event.end <= tx.response.event.start);
        assert!(tx.response.event.start <= tx.response.event.end);
    }
    assert!(events[0].response.event.end <= events[1].request.event.start);
}

#[test]
fn pipelined_requests_pair_with_their_responses() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40003", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"GET /first HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\n");
    conn.server_sends(
        &mut h,
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n1HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n2",
    );
    conn.close(&mut h);

    let (events, _) = h.finish();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].request.uri, "/first");
    assert_eq!(events[0].response.body, "1");
    assert_eq!(events[1].request.uri, "/second");
    assert_eq!(events[1].response.body, "2");
}

#[test]
fn head_response_carries_no_body() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40004", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"HEAD /big HTTP/1.1\r\n\r\n");
    conn.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
    conn.client_sends(&mut h, b"GET /small HTTP/1.1\r\n\r\n");
    conn.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    conn.close(&mut h);

    let (events, _) = h.finish();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].request.method, "HEAD");
    assert!(events[0].response.body.is_empty());
    assert_eq!(events[1].response.body, "ok");
}

#[test]
fn gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"hello world").unwrap();
    let gz = encoder.finish().unwrap();

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    response.extend_from_slice(&gz);

    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40005", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"GET / HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n");
    conn.server_sends(&mut h, &response);
    conn.close(&mut h);

    let (events, metrics) = h.finish();
    assert_eq!(events[0].response.body, "hello world");
    assert_eq!(events[0].response.decoding, BodyDecoding::Decoded);
    assert_eq!(metrics.decompression_failures.get(), 0);
}

#[test]
fn corrupt_gzip_yields_sentinel_body() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40006", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"GET / HTTP/1.1\r\n\r\n");
    conn.server_sends(
        &mut h,
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 8\r\n\r\nnotgzip!",
    );
    conn.close(&mut h);

    let (events, metrics) = h.finish();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].response.body, DECOMPRESSION_FAILED);
    assert_eq!(events[0].response.decoding, BodyDecoding::Failed);
    assert_eq!(metrics.decompression_failures.get(), 1);
}

#[test]
fn gap_discards_the_connection() {
    let mut h = Harness::new(1);
    let mut conn = Conn::new("10.0.0.1:40007", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_loses(10);
    conn.client_sends(&mut h, b"GET /after-gap HTTP/1.1\r\n\r\n");
    conn.client_sends(&mut h, b"GET /again HTTP/1.1\r\n\r\n");
    conn.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    conn.close(&mut h);

    let (events, metrics) = h.finish();
    assert!(events.is_empty());
    assert_eq!(metrics.pairs_aborted.get(), 1);
    assert_eq!(metrics.transactions.get(), 0);
}

#[test]
fn malformed_connection_does_not_affect_others() {
    let mut h = Harness::new(16);
    let mut good = Conn::new("10.0.0.1:40008", "10.0.0.2:80");
    let mut bad = Conn::new("10.0.0.3:40009", "10.0.0.2:80");
    good.handshake(&mut h);
    bad.handshake(&mut h);

    bad.client_sends(&mut h, b"GET /bad HTTP/1.1\r\n\r\n");
    good.client_sends(&mut h, b"GET /good HTTP/1.1\r\n\r\n");
    bad.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n");
    good.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nfine");
    good.close(&mut h);
    bad.close(&mut h);

    let (events, metrics) = h.finish();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].client_addr(), good.client);
    assert_eq!(events[0].response.body, "fine");
    assert_eq!(metrics.pairs_opened.get(), 2);
    assert_eq!(metrics.pairs_aborted.get(), 1);
}

#[test]
fn request_body_by_content_length() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40010", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.client_sends(&mut h, b"POST /submit HTTP/1.1\r\nContent-Length: 9\r\n\r\nname=");
    conn.client_sends(&mut h, b"test");
    conn.server_sends(&mut h, b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
    conn.close(&mut h);

    let (events, _) = h.finish();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].request.method, "POST");
    assert_eq!(events[0].request.body, "name=test");
    assert_eq!(events[0].request.parsed.as_ref().unwrap().body(), "name=test");
    assert_eq!(events[0].response.code, 201);
}

#[test]
fn connection_without_http_traffic_yields_nothing() {
    let mut h = Harness::new(16);
    let mut conn = Conn::new("10.0.0.1:40011", "10.0.0.2:80");
    conn.handshake(&mut h);
    conn.close(&mut h);

    let (events, metrics) = h.finish();
    assert!(events.is_empty());
    assert_eq!(metrics.pairs_opened.get(), 1);
    assert_eq!(metrics.pairs_aborted.get(), 0);
}

#[test]
fn stalled_connection_is_dropped_without_blocking_others() {
    let mut h = Harness::with_bridges(16, 2, Duration::from_millis(50));
    let mut stalled = Conn::new("10.0.0.1:40012", "10.0.0.2:80");
    let mut healthy = Conn::new("10.0.0.5:40013", "10.0.0.2:80");
    stalled.handshake(&mut h);
    healthy.handshake(&mut h);

    // The request body never completes, so nothing reads the server side.
    stalled.client_sends(&mut h, b"POST /upload HTTP/1.1\r\nContent-Length: 100\r\n\r\nabc");
    for _ in 0..4 {
        stalled.server_sends(&mut h, b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    healthy.client_sends(&mut h, b"GET /still-works HTTP/1.1\r\n\r\n");
    healthy.server_sends(&mut h, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    healthy.close(&mut h);
    stalled.close(&mut h);

    let (events, metrics) = h.finish();
    assert_eq!(metrics.pairs_aborted.get(), 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].client_addr(), healthy.client);
    assert_eq!(events[0].request.uri, "/still-works");
    assert_eq!(events[0].response.body, "ok");
}
