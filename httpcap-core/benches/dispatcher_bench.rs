#[macro_use]
extern crate criterion;

use bytes::Bytes;
use chrono::Utc;
use criterion::Criterion;

use httpcap_core::events::{
    DeliveryMode, EventDispatcher, EventKind, HttpEvent, RequestEvent, ResponseEvent,
    TransactionEvent,
};
use httpcap_protocols::BodyDecoding;

fn transaction(seq: u64) -> TransactionEvent {
    let now = Utc::now();
    let client = "10.0.0.1:40000".parse().unwrap();
    let server = "10.0.0.2:80".parse().unwrap();
    let meta = |kind| HttpEvent {
        kind,
        start: now,
        end: now,
        seq,
    };
    TransactionEvent {
        request: RequestEvent {
            event: meta(EventKind::Request),
            client_addr: client,
            server_addr: server,
            method: "GET".into(),
            uri: "/".into(),
            version: "HTTP/1.1".into(),
            headers: Vec::new(),
            body: Bytes::new(),
            decoding: BodyDecoding::Identity,
            parsed: None,
        },
        response: ResponseEvent {
            event: meta(EventKind::Response),
            client_addr: client,
            server_addr: server,
            version: "HTTP/1.1".into(),
            code: 200,
            reason: "OK".into(),
            headers: Vec::new(),
            body: Bytes::from_static(b"test_payload"),
            decoding: BodyDecoding::Identity,
            parsed: None,
        },
    }
}

fn bench_dispatcher_publish_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_throughput");

    for capacity in [128, 1024, 16384] {
        group.throughput(criterion::Throughput::Elements(1));
        group.bench_function(format!("capacity_{}", capacity), |b| {
            let mut dispatcher = EventDispatcher::new(capacity, DeliveryMode::Queue).unwrap();
            let receiver = dispatcher.take_receiver().unwrap();
            let publisher = dispatcher.publisher();
            b.iter(|| {
                publisher.publish(transaction(0)).unwrap();
                receiver.try_recv().unwrap();
            });
            dispatcher.shutdown();
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatcher_publish_recv);
criterion_main!(benches);
